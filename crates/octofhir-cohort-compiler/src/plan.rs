//! Query plans
//!
//! A [`QueryPlan`] is the only output of compilation: an ordered list of SQL statements
//! tagged by role, plus the temp tables they create and (for the sequential grammar)
//! the metadata of every staging step.

use crate::{ColumnType, Dialect};
use octofhir_cohort_model::Grammar;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a statement does within the plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatementRole {
    /// Session settings and temp table creation
    SchemaSetup,
    /// Writes into a temp table or the results schema
    Populate,
    /// Returns rows to the caller
    Measure,
    /// Drops temp tables; runs on every exit path
    Cleanup,
}

impl fmt::Display for StatementRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatementRole::SchemaSetup => "schema-setup",
            StatementRole::Populate => "populate",
            StatementRole::Measure => "measure",
            StatementRole::Cleanup => "cleanup",
        })
    }
}

/// One SQL statement of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub role: StatementRole,
    /// Stable, human-readable name such as `populate:qualified_events`
    pub label: String,
    pub sql: String,
}

impl Statement {
    pub fn new(role: StatementRole, label: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            role,
            label: label.into(),
            sql: sql.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Container,
    Group,
}

/// Metadata of one sequential-grammar staging step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInfo {
    pub step_id: i64,
    pub kind: StepKind,
    pub group_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Ordered statements compiled from one cohort
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub grammar: Grammar,
    pub dialect: Dialect,
    pub session_id: String,
    pub statements: Vec<Statement>,
    /// Every temp table created by the plan, in creation order
    pub temp_tables: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepInfo>,
}

impl QueryPlan {
    pub fn statements_with_role(&self, role: StatementRole) -> impl Iterator<Item = &Statement> {
        self.statements.iter().filter(move |s| s.role == role)
    }

    /// Statements that must run before cleanup, in order
    pub fn body(&self) -> impl Iterator<Item = &Statement> {
        self.statements
            .iter()
            .filter(|s| s.role != StatementRole::Cleanup)
    }

    pub fn cleanup(&self) -> impl Iterator<Item = &Statement> {
        self.statements_with_role(StatementRole::Cleanup)
    }

    pub fn measures(&self) -> impl Iterator<Item = &Statement> {
        self.statements_with_role(StatementRole::Measure)
    }

    pub fn statement(&self, label: &str) -> Option<&Statement> {
        self.statements.iter().find(|s| s.label == label)
    }

    /// The whole plan as one script with a comment line per statement
    pub fn to_script(&self) -> String {
        self.statements
            .iter()
            .map(|s| format!("-- {}\n{};", s.label, s.sql))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Accumulates statements and temp tables while a plan is compiled
#[derive(Debug)]
pub(crate) struct PlanBuilder {
    dialect: Dialect,
    session_id: String,
    statements: Vec<Statement>,
    temp_tables: Vec<String>,
}

impl PlanBuilder {
    pub(crate) fn new(dialect: Dialect, session_id: String) -> Self {
        let statements = dialect
            .session_setup()
            .into_iter()
            .map(|sql| Statement::new(StatementRole::SchemaSetup, "setup:session", sql))
            .collect();
        Self {
            dialect,
            session_id,
            statements,
            temp_tables: Vec::new(),
        }
    }

    /// Create a session-scoped staging table and return its name
    pub(crate) fn temp_table(&mut self, base: &str, columns: &[(&str, ColumnType)]) -> String {
        let name = self.dialect.temp_table_name(base, &self.session_id);
        self.statements.push(Statement::new(
            StatementRole::SchemaSetup,
            format!("create:{base}"),
            self.dialect.create_temp_table(&name, columns),
        ));
        self.temp_tables.push(name.clone());
        name
    }

    pub(crate) fn populate(&mut self, label: impl Into<String>, sql: impl Into<String>) {
        let label = format!("populate:{}", label.into());
        log::debug!("emitting {label}");
        self.statements
            .push(Statement::new(StatementRole::Populate, label, sql));
    }

    pub(crate) fn measure(&mut self, label: impl Into<String>, sql: impl Into<String>) {
        let label = format!("measure:{}", label.into());
        log::debug!("emitting {label}");
        self.statements
            .push(Statement::new(StatementRole::Measure, label, sql));
    }

    /// Append cleanup for every temp table (reverse creation order) and seal the plan
    pub(crate) fn finish(mut self, grammar: Grammar, steps: Vec<StepInfo>) -> QueryPlan {
        for name in self.temp_tables.iter().rev() {
            self.statements.push(Statement::new(
                StatementRole::Cleanup,
                format!("drop:{name}"),
                self.dialect.drop_temp_table(name),
            ));
        }
        QueryPlan {
            grammar,
            dialect: self.dialect,
            session_id: self.session_id,
            statements: self.statements,
            temp_tables: self.temp_tables,
            steps,
        }
    }
}
