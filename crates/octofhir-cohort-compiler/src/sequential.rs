//! Sequential-grammar fold
//!
//! Containers and groups fold left to right into numbered staging steps
//! `(step_id, person_id)`. Each step is a [`StepExpr`] over container results and earlier
//! steps:
//!
//! - the first container of a group is seeded by the cohort accumulator
//! - later containers combine with the running group result: AND intersects, OR unions,
//!   NOT subtracts
//! - a group step intersects the group result into the accumulator, or subtracts it
//!   when the group is negated

use crate::context::Context;
use crate::filter::filter_query;
use crate::plan::{StepInfo, StepKind};
use octofhir_cohort_diagnostics::{NodePath, Result};
use octofhir_cohort_model::{Cohort, ContainerOperator};
use std::collections::{BTreeSet, HashMap};

/// Person set of one staging step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepExpr {
    /// Persons matching every filter of a container
    Container { group: usize, container: usize },
    /// Rows of an earlier step
    Step(i64),
    /// Every person of the CDM
    Population,
    Intersect(Box<StepExpr>, Box<StepExpr>),
    Union(Box<StepExpr>, Box<StepExpr>),
    Except(Box<StepExpr>, Box<StepExpr>),
}

impl StepExpr {
    fn intersect(a: StepExpr, b: StepExpr) -> Self {
        StepExpr::Intersect(Box::new(a), Box::new(b))
    }

    fn union(a: StepExpr, b: StepExpr) -> Self {
        StepExpr::Union(Box::new(a), Box::new(b))
    }

    fn except(a: StepExpr, b: StepExpr) -> Self {
        StepExpr::Except(Box::new(a), Box::new(b))
    }

    /// Evaluate against known container results and earlier steps
    pub fn evaluate(
        &self,
        containers: &HashMap<(usize, usize), BTreeSet<i64>>,
        steps: &HashMap<i64, BTreeSet<i64>>,
        population: &BTreeSet<i64>,
    ) -> BTreeSet<i64> {
        let eval = |e: &StepExpr| e.evaluate(containers, steps, population);
        match self {
            StepExpr::Container { group, container } => containers
                .get(&(*group, *container))
                .cloned()
                .unwrap_or_default(),
            StepExpr::Step(id) => steps.get(id).cloned().unwrap_or_default(),
            StepExpr::Population => population.clone(),
            StepExpr::Intersect(a, b) => eval(a).intersection(&eval(b)).copied().collect(),
            StepExpr::Union(a, b) => eval(a).union(&eval(b)).copied().collect(),
            StepExpr::Except(a, b) => eval(a).difference(&eval(b)).copied().collect(),
        }
    }
}

/// One staging step and the set it holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequentialStep {
    pub info: StepInfo,
    pub expr: StepExpr,
}

/// Fold a cohort into staging steps; the last group step holds the cohort
pub fn sequential_steps(cohort: &Cohort) -> Vec<SequentialStep> {
    let mut steps = Vec::new();
    let mut accumulator: Option<i64> = None;
    let mut push = |steps: &mut Vec<SequentialStep>, info: StepInfo, expr: StepExpr| {
        steps.push(SequentialStep { info, expr });
    };

    for (g, group) in cohort.groups.iter().enumerate() {
        let mut last: Option<i64> = None;
        for (c, container) in group.containers.iter().enumerate() {
            if container.filters.is_empty() {
                log::debug!("skipping empty container {c} of group {g}");
                continue;
            }
            let rows = StepExpr::Container {
                group: g,
                container: c,
            };
            let expr = match (last, accumulator) {
                (None, None) => rows,
                (None, Some(acc)) => StepExpr::intersect(rows, StepExpr::Step(acc)),
                (Some(prev), _) => match container.operator() {
                    ContainerOperator::And => StepExpr::intersect(StepExpr::Step(prev), rows),
                    ContainerOperator::Or => StepExpr::union(StepExpr::Step(prev), rows),
                    ContainerOperator::Not => StepExpr::except(StepExpr::Step(prev), rows),
                },
            };
            let step_id = steps.len() as i64 + 1;
            let info = StepInfo {
                step_id,
                kind: StepKind::Container,
                group_index: g,
                container_index: Some(c),
                name: container.name.clone(),
            };
            push(&mut steps, info, expr);
            last = Some(step_id);
        }

        let Some(last) = last else {
            log::debug!("skipping empty group {g}");
            continue;
        };
        let expr = if group.is_negated() {
            let base = accumulator.map_or(StepExpr::Population, StepExpr::Step);
            StepExpr::except(base, StepExpr::Step(last))
        } else {
            match accumulator {
                Some(acc) => StepExpr::intersect(StepExpr::Step(last), StepExpr::Step(acc)),
                None => StepExpr::Step(last),
            }
        };
        let step_id = steps.len() as i64 + 1;
        let info = StepInfo {
            step_id,
            kind: StepKind::Group,
            group_index: g,
            container_index: None,
            name: None,
        };
        push(&mut steps, info, expr);
        accumulator = Some(step_id);
    }
    steps
}

/// Renders step expressions against the staging table
pub(crate) struct StepRenderer<'a> {
    pub(crate) ctx: &'a Context<'a>,
    pub(crate) cohort: &'a Cohort,
    pub(crate) steps_table: &'a str,
}

impl StepRenderer<'_> {
    /// `INSERT` of one step's rows
    pub(crate) fn statement(&self, step: &SequentialStep) -> Result<String> {
        Ok(format!(
            "INSERT INTO {} (step_id, person_id)\nSELECT {} AS step_id, X.person_id\nFROM (\n{}\n) X",
            self.steps_table,
            step.info.step_id,
            self.render(&step.expr)?
        ))
    }

    fn render(&self, expr: &StepExpr) -> Result<String> {
        let dialect = self.ctx.dialect;
        Ok(match expr {
            StepExpr::Container { group, container } => self.container(*group, *container)?,
            StepExpr::Step(id) => format!(
                "SELECT S.person_id FROM {} S WHERE S.step_id = {id}",
                self.steps_table
            ),
            StepExpr::Population => {
                format!("SELECT P.person_id FROM {} P", self.ctx.cdm("person"))
            }
            StepExpr::Intersect(a, b) => format!(
                "SELECT A.person_id FROM (\n{}\n) A\nWHERE A.person_id IN (\n{}\n)",
                self.render(a)?,
                self.render(b)?
            ),
            StepExpr::Union(a, b) => self.set_operation(a, b, dialect.union_distinct())?,
            StepExpr::Except(a, b) => self.set_operation(a, b, dialect.except())?,
        })
    }

    fn set_operation(&self, a: &StepExpr, b: &StepExpr, keyword: &str) -> Result<String> {
        Ok(format!(
            "SELECT L.person_id FROM (\n{}\n) L\n{keyword}\nSELECT R.person_id FROM (\n{}\n) R",
            self.render(a)?,
            self.render(b)?
        ))
    }

    /// Intersection of a container's filters
    fn container(&self, group: usize, index: usize) -> Result<String> {
        let path = NodePath::root()
            .field("groups")
            .index(group)
            .field("containers")
            .index(index)
            .field("filters");
        let filters = &self.cohort.groups[group].containers[index].filters;
        let mut queries = filters
            .iter()
            .enumerate()
            .map(|(i, filter)| filter_query(self.ctx, filter, &path.index(i)))
            .collect::<Result<Vec<_>>>()?
            .into_iter();
        let first = queries.next().unwrap_or_default();
        let rest: Vec<String> = queries.collect();
        if rest.is_empty() {
            return Ok(first);
        }
        let conditions = rest
            .iter()
            .map(|q| format!("C.person_id IN (\n{q}\n)"))
            .collect::<Vec<_>>()
            .join("\n  AND ");
        Ok(format!("SELECT C.person_id FROM (\n{first}\n) C\nWHERE {conditions}"))
    }
}
