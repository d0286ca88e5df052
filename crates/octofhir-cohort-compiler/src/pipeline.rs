//! Compilation pipeline
//!
//! Orders every stage of a cohort into one [`QueryPlan`]: temp tables, concept sets,
//! grammar-specific stages, measures, optional results write-back and cleanup.

use crate::cohort_end::{
    cohort_rows_statement, final_cohort_statement, included_events_statement,
    inclusion_statements, strategy_ends_statement,
};
use crate::concept_set::concept_set_statement;
use crate::context::Context;
use crate::plan::{PlanBuilder, QueryPlan, StepKind};
use crate::primary::qualified_events_statement;
use crate::query::qualify;
use crate::sequential::{StepRenderer, sequential_steps};
use crate::{ColumnType, CompileOptions};
use octofhir_cohort_diagnostics::Result;
use octofhir_cohort_model::{
    Cohort, CohortDocument, CohortExpression, ConceptSet, Grammar, parse_document,
    validate_cohort, validate_expression,
};

const EVENT_TABLE: [(&str, ColumnType); 7] = [
    ("event_id", ColumnType::BigInt),
    ("person_id", ColumnType::BigInt),
    ("start_date", ColumnType::Date),
    ("end_date", ColumnType::Date),
    ("op_start_date", ColumnType::Date),
    ("op_end_date", ColumnType::Date),
    ("visit_occurrence_id", ColumnType::BigInt),
];

const PERIOD_TABLE: [(&str, ColumnType); 3] = [
    ("person_id", ColumnType::BigInt),
    ("start_date", ColumnType::Date),
    ("end_date", ColumnType::Date),
];

/// Parse, validate and compile a JSON document; the grammar is detected when `None`
pub fn compile(json: &str, grammar: Option<Grammar>, options: &CompileOptions) -> Result<QueryPlan> {
    let document = parse_document(json, grammar)?;
    compile_document(&document, options)
}

pub fn compile_document(document: &CohortDocument, options: &CompileOptions) -> Result<QueryPlan> {
    match document {
        CohortDocument::Tree(expr) => compile_expression(expr, options),
        CohortDocument::Sequential(cohort) => compile_cohort(cohort, options),
    }
}

/// Compile a tree-grammar cohort expression
pub fn compile_expression(expr: &CohortExpression, options: &CompileOptions) -> Result<QueryPlan> {
    options.validate()?;
    validate_expression(expr)?;

    let session_id = options.resolve_session_id();
    log::info!(
        "compiling tree cohort for {} (session {session_id})",
        options.dialect
    );
    let mut plan = PlanBuilder::new(options.dialect, session_id);

    let codesets = plan.temp_table(
        "codesets",
        &[("codeset_id", ColumnType::BigInt), ("concept_id", ColumnType::BigInt)],
    );
    let qualified = plan.temp_table("qualified_events", &EVENT_TABLE);
    let inclusion = plan.temp_table(
        "inclusion_events",
        &[
            ("inclusion_rule_id", ColumnType::BigInt),
            ("person_id", ColumnType::BigInt),
            ("event_id", ColumnType::BigInt),
        ],
    );
    let included = plan.temp_table("included_events", &EVENT_TABLE);
    let strategy_ends = expr.end_strategy.as_ref().map(|_| {
        plan.temp_table(
            "strategy_ends",
            &[
                ("event_id", ColumnType::BigInt),
                ("person_id", ColumnType::BigInt),
                ("end_date", ColumnType::Date),
            ],
        )
    });
    let cohort_rows = plan.temp_table("cohort_rows", &PERIOD_TABLE);
    let final_cohort = plan.temp_table("final_cohort", &PERIOD_TABLE);

    let ctx = Context::new(options, codesets);
    concept_sets(&mut plan, &ctx, &expr.concept_sets);

    log::info!("stage: qualified events");
    plan.populate(
        "qualified_events",
        qualified_events_statement(&ctx, expr, &qualified)?,
    );

    log::info!("stage: inclusion rules ({})", expr.inclusion_rules.len());
    for (i, sql) in inclusion_statements(&ctx, expr, &qualified, &inclusion)
        .into_iter()
        .enumerate()
    {
        plan.populate(format!("inclusion_rule:{i}"), sql);
    }
    plan.populate(
        "included_events",
        included_events_statement(expr, &qualified, &included),
    );

    log::info!("stage: cohort end dates");
    if let (Some(strategy), Some(table)) = (&expr.end_strategy, &strategy_ends) {
        plan.populate(
            "strategy_ends",
            strategy_ends_statement(&ctx, strategy, &included, table),
        );
    }
    plan.populate(
        "cohort_rows",
        cohort_rows_statement(&ctx, expr, &included, strategy_ends.as_deref(), &cohort_rows),
    );

    log::info!("stage: final cohort");
    plan.populate(
        "final_cohort",
        final_cohort_statement(&ctx, expr, &cohort_rows, &final_cohort),
    );
    write_back(&mut plan, options, "cohort", &final_cohort);

    plan.measure("cohort", cohort_measure(options, &final_cohort));
    if options.generate_stats {
        plan.measure(
            "stage_counts",
            stage_counts([
                ("qualified_events", qualified.as_str()),
                ("included_events", included.as_str()),
                ("final_cohort", final_cohort.as_str()),
            ]),
        );
        plan.measure(
            "inclusion_rule_counts",
            inclusion_rule_counts(&inclusion, &included),
        );
    }

    Ok(plan.finish(Grammar::Tree, Vec::new()))
}

/// Compile a sequential-grammar cohort
pub fn compile_cohort(cohort: &Cohort, options: &CompileOptions) -> Result<QueryPlan> {
    options.validate()?;
    validate_cohort(cohort)?;

    let session_id = options.resolve_session_id();
    log::info!(
        "compiling sequential cohort for {} (session {session_id})",
        options.dialect
    );
    let mut plan = PlanBuilder::new(options.dialect, session_id);

    let codesets = plan.temp_table(
        "codesets",
        &[("codeset_id", ColumnType::BigInt), ("concept_id", ColumnType::BigInt)],
    );
    let steps_table = plan.temp_table(
        "cohort_steps",
        &[("step_id", ColumnType::BigInt), ("person_id", ColumnType::BigInt)],
    );
    let final_cohort = plan.temp_table("final_cohort", &PERIOD_TABLE);

    let ctx = Context::new(options, codesets);
    concept_sets(&mut plan, &ctx, &cohort.conceptsets);

    log::info!("stage: sequential fold ({} groups)", cohort.groups.len());
    let steps = sequential_steps(cohort);
    let renderer = StepRenderer {
        ctx: &ctx,
        cohort,
        steps_table: &steps_table,
    };
    for step in &steps {
        plan.populate(
            format!("step:{}", step.info.step_id),
            renderer.statement(step)?,
        );
    }

    log::info!("stage: final cohort");
    let accumulator = steps
        .iter()
        .rev()
        .find(|s| s.info.kind == StepKind::Group)
        .map(|s| s.info.step_id);
    plan.populate(
        "final_cohort",
        sequential_final_statement(&ctx, &steps_table, accumulator, &final_cohort),
    );
    write_back(&mut plan, options, "cohort_detail", &final_cohort);

    plan.measure(
        "step_counts",
        format!(
            "SELECT step_id, COUNT(DISTINCT person_id) AS person_count\nFROM {steps_table}\n\
             GROUP BY step_id\nORDER BY step_id"
        ),
    );
    plan.measure("cohort", cohort_measure(options, &final_cohort));

    let infos = steps.into_iter().map(|s| s.info).collect();
    Ok(plan.finish(Grammar::Sequential, infos))
}

fn concept_sets(plan: &mut PlanBuilder, ctx: &Context<'_>, sets: &[ConceptSet]) {
    log::info!("stage: concept sets ({})", sets.len());
    for set in sets {
        plan.populate(
            format!("codeset:{}", set.id),
            concept_set_statement(ctx.dialect, ctx.options.vocabulary_schema(), &ctx.codesets, set),
        );
    }
}

/// Members are the persons of the last group step, spanning their observation periods
fn sequential_final_statement(
    ctx: &Context<'_>,
    steps_table: &str,
    accumulator: Option<i64>,
    table: &str,
) -> String {
    let insert = format!("INSERT INTO {table} (person_id, start_date, end_date)");
    let Some(step_id) = accumulator else {
        log::debug!("no group produced a step; the cohort is empty");
        return format!(
            "{insert}\nSELECT OP.person_id, OP.observation_period_start_date, OP.observation_period_end_date\n\
             FROM {} OP WHERE 1=0",
            ctx.cdm("observation_period")
        );
    };
    format!(
        "{insert}\nSELECT S.person_id, MIN(OP.observation_period_start_date) AS start_date, \
         MAX(OP.observation_period_end_date) AS end_date\n\
         FROM {steps_table} S\n\
         LEFT JOIN {} OP ON S.person_id = OP.person_id\n\
         WHERE S.step_id = {step_id}\n\
         GROUP BY S.person_id",
        ctx.cdm("observation_period")
    )
}

fn cohort_measure(options: &CompileOptions, final_cohort: &str) -> String {
    format!(
        "SELECT {} AS {}, F.person_id, F.start_date, F.end_date\nFROM {final_cohort} F\n\
         ORDER BY F.person_id, F.start_date",
        options.target_cohort_id, options.cohort_id_column_name
    )
}

/// Replace the target cohort's rows in `<resultsSchema>.<table>`
fn write_back(plan: &mut PlanBuilder, options: &CompileOptions, table: &str, final_cohort: &str) {
    let Some(schema) = &options.results_schema else {
        return;
    };
    let target = qualify(schema, table);
    let id = options.target_cohort_id;
    let column = &options.cohort_id_column_name;
    log::info!("writing cohort {id} to {target}");
    plan.populate(
        format!("delete:{table}"),
        format!("DELETE FROM {target} WHERE {column} = {id}"),
    );
    plan.populate(
        format!("results:{table}"),
        format!(
            "INSERT INTO {target} ({column}, subject_id, cohort_start_date, cohort_end_date)\n\
             SELECT {id} AS {column}, F.person_id, F.start_date, F.end_date\nFROM {final_cohort} F"
        ),
    );
}

fn stage_counts<'a>(stages: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    stages
        .into_iter()
        .map(|(stage, table)| {
            format!(
                "SELECT '{stage}' AS stage, COUNT(DISTINCT T.person_id) AS person_count, \
                 COUNT(*) AS row_count FROM {table} T"
            )
        })
        .collect::<Vec<_>>()
        .join("\nUNION ALL\n")
}

/// Included events satisfying each inclusion rule
fn inclusion_rule_counts(inclusion: &str, included: &str) -> String {
    format!(
        "SELECT R.inclusion_rule_id, COUNT(DISTINCT R.person_id) AS person_count, \
         COUNT(*) AS event_count\n\
         FROM {inclusion} R\n\
         JOIN {included} I ON R.person_id = I.person_id AND R.event_id = I.event_id\n\
         GROUP BY R.inclusion_rule_id\n\
         ORDER BY R.inclusion_rule_id"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Dialect, StatementRole};
    use octofhir_cohort_diagnostics::{COH0100, COH0403};
    use pretty_assertions::assert_eq;

    const TREE: &str = r#"{
        "ConceptSets": [{"id": 1, "expression": {"items": [{"concept": {"CONCEPT_ID": 201826}}]}}],
        "PrimaryCriteria": {"CriteriaList": [{"ConditionEra": {"CodesetId": 1}}]}
    }"#;

    fn labels(plan: &QueryPlan) -> Vec<&str> {
        plan.statements.iter().map(|s| s.label.as_str()).collect()
    }

    #[test]
    fn test_tree_stage_order() {
        let options = CompileOptions::new(Dialect::Postgresql).with_session_id("t");
        let plan = compile(TREE, None, &options).unwrap();
        assert_eq!(plan.grammar, Grammar::Tree);
        assert_eq!(
            labels(&plan),
            vec![
                "create:codesets",
                "create:qualified_events",
                "create:inclusion_events",
                "create:included_events",
                "create:cohort_rows",
                "create:final_cohort",
                "populate:codeset:1",
                "populate:qualified_events",
                "populate:included_events",
                "populate:cohort_rows",
                "populate:final_cohort",
                "measure:cohort",
                "drop:final_cohort_t",
                "drop:cohort_rows_t",
                "drop:included_events_t",
                "drop:inclusion_events_t",
                "drop:qualified_events_t",
                "drop:codesets_t",
            ]
        );
    }

    #[test]
    fn test_stats_and_write_back() {
        let options = CompileOptions::new(Dialect::SqlServer)
            .with_session_id("s")
            .with_results_schema("results")
            .with_target_cohort_id(7)
            .with_stats(true);
        let plan = compile(TREE, Some(Grammar::Tree), &options).unwrap();
        assert_eq!(
            plan.statement("populate:delete:cohort").unwrap().sql,
            "DELETE FROM results.cohort WHERE cohort_definition_id = 7"
        );
        assert!(
            plan.statement("populate:results:cohort")
                .unwrap()
                .sql
                .starts_with("INSERT INTO results.cohort (cohort_definition_id, subject_id, cohort_start_date, cohort_end_date)")
        );
        let measures: Vec<&str> = plan.measures().map(|s| s.label.as_str()).collect();
        assert_eq!(
            measures,
            vec!["measure:cohort", "measure:stage_counts", "measure:inclusion_rule_counts"]
        );
        assert!(plan.statement("measure:stage_counts").unwrap().sql.contains("FROM #final_cohort_s T"));
    }

    #[test]
    fn test_sequential_plan() {
        let options = CompileOptions::new(Dialect::Postgresql).with_session_id("q");
        let plan = compile(
            r#"[{"containers": [{"name": "dead", "filters": [{"type": "death"}]}]}]"#,
            None,
            &options,
        )
        .unwrap();
        assert_eq!(plan.grammar, Grammar::Sequential);
        assert_eq!(plan.steps.len(), 2);
        assert!(plan.statement("populate:step:1").is_some());
        assert!(
            plan.statement("populate:final_cohort")
                .unwrap()
                .sql
                .contains("WHERE S.step_id = 2")
        );
        assert_eq!(
            plan.statement("measure:step_counts").unwrap().sql,
            "SELECT step_id, COUNT(DISTINCT person_id) AS person_count\nFROM cohort_steps_q\n\
             GROUP BY step_id\nORDER BY step_id"
        );
        assert_eq!(plan.cleanup().count(), 3);
    }

    #[test]
    fn test_final_cohort_keeps_members_without_observation_period() {
        let options = CompileOptions::new(Dialect::Postgresql).with_session_id("p");
        let plan = compile(r#"[{"containers": [{"filters": [{"type": "death"}]}]}]"#, None, &options)
            .unwrap();
        let sql = &plan.statement("populate:final_cohort").unwrap().sql;

        assert_eq!(
            sql.as_str(),
            "INSERT INTO final_cohort_p (person_id, start_date, end_date)\n\
             SELECT S.person_id, MIN(OP.observation_period_start_date) AS start_date, \
             MAX(OP.observation_period_end_date) AS end_date\n\
             FROM cohort_steps_p S\n\
             LEFT JOIN cdm.observation_period OP ON S.person_id = OP.person_id\n\
             WHERE S.step_id = 2\n\
             GROUP BY S.person_id"
        );
    }

    #[test]
    fn test_empty_sequential_cohort_selects_nobody() {
        let options = CompileOptions::default().with_session_id("e");
        let plan = compile("[]", None, &options).unwrap();
        assert!(plan.steps.is_empty());
        assert!(plan.statement("populate:final_cohort").unwrap().sql.ends_with("WHERE 1=0"));
    }

    #[test]
    fn test_unresolved_codeset_fails_before_any_statement() {
        let err = compile(
            r#"{"PrimaryCriteria": {"CriteriaList": [{"ConditionEra": {"CodesetId": 9}}]}}"#,
            None,
            &CompileOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.code(), COH0100);
    }

    #[test]
    fn test_invalid_session_id() {
        let options = CompileOptions::default().with_session_id("bad id");
        let err = compile(TREE, None, &options).unwrap_err();
        assert_eq!(err.code(), COH0403);
    }

    #[test]
    fn test_setup_statements_precede_populates() {
        let options = CompileOptions::new(Dialect::ClickHouse);
        let plan = compile(TREE, None, &options).unwrap();
        let first_populate = plan
            .statements
            .iter()
            .position(|s| s.role == StatementRole::Populate)
            .unwrap();
        assert!(
            plan.statements[..first_populate]
                .iter()
                .all(|s| s.role == StatementRole::SchemaSetup)
        );
    }
}
