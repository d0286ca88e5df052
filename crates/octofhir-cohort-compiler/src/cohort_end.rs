//! Inclusion rules, end strategies, censoring and era collapse

use crate::Dialect;
use crate::context::Context;
use crate::criteria::criteria_query;
use crate::group::group_query;
use crate::primary::EVENT_COLUMNS;
use crate::query::SelectQuery;
use octofhir_cohort_model::{
    CensorWindow, CohortExpression, CollapseType, CustomEra, DateOffset, EndStrategy, LimitType,
    OffsetField,
};

/// One statement per inclusion rule recording `(inclusion_rule_id, person_id, event_id)`
/// of the qualified events satisfying it
pub(crate) fn inclusion_statements(
    ctx: &Context<'_>,
    expr: &CohortExpression,
    qualified: &str,
    table: &str,
) -> Vec<String> {
    expr.inclusion_rules
        .iter()
        .enumerate()
        .map(|(i, rule)| {
            log::debug!("inclusion rule {i}: {}", rule.name);
            format!(
                "INSERT INTO {table} (inclusion_rule_id, person_id, event_id)\n{}",
                group_query(ctx, &rule.expression, qualified, i)
            )
        })
        .collect()
}

/// Qualified events restricted to the expression limit
///
/// Inclusion rules only feed the stats measures; they never remove events here.
pub(crate) fn included_events_statement(expr: &CohortExpression, qualified: &str, table: &str) -> String {
    let limit = expr.expression_limit_type();
    let order = match limit {
        LimitType::Last => "Q.start_date DESC, Q.event_id",
        LimitType::First | LimitType::All => "Q.start_date, Q.event_id",
    };
    let mut ranked = SelectQuery::from(format!("{qualified} Q"));
    ranked
        .select_all(EVENT_COLUMNS.iter().map(|c| format!("Q.{c}")))
        .select(format!(
            "ROW_NUMBER() OVER (PARTITION BY Q.person_id ORDER BY {order}) AS ordinal"
        ));
    let mut query = SelectQuery::from_subquery(&ranked.render(), "R");
    query.select_all(EVENT_COLUMNS.iter().map(|c| format!("R.{c}")));
    if limit != LimitType::All {
        query.filter("R.ordinal = 1");
    }
    format!(
        "INSERT INTO {table} ({})\n{}",
        EVENT_COLUMNS.join(", "),
        query.render()
    )
}

/// `(event_id, person_id, end_date)` per included event under `strategy`
pub(crate) fn strategy_ends_statement(
    ctx: &Context<'_>,
    strategy: &EndStrategy,
    included: &str,
    table: &str,
) -> String {
    let select = match strategy {
        EndStrategy::DateOffset(offset) => date_offset_ends(ctx.dialect, offset, included),
        EndStrategy::CustomEra(era) => custom_era_ends(ctx, era, included),
    };
    format!("INSERT INTO {table} (event_id, person_id, end_date)\n{select}")
}

fn clamp_to_op_end(expr: &str) -> String {
    format!("CASE WHEN {expr} > I.op_end_date THEN I.op_end_date ELSE {expr} END")
}

fn date_offset_ends(dialect: Dialect, offset: &DateOffset, included: &str) -> String {
    let date = match offset.date_field {
        OffsetField::StartDate => "I.start_date",
        OffsetField::EndDate => "I.end_date",
    };
    let shifted = dialect.date_add(date, offset.offset);
    let mut query = SelectQuery::from(format!("{included} I"));
    query.select_all([
        "I.event_id".to_string(),
        "I.person_id".to_string(),
        format!("{} AS end_date", clamp_to_op_end(&shifted)),
    ]);
    query.render()
}

/// End of the drug era containing the index date, plus the offset
fn custom_era_ends(ctx: &Context<'_>, era: &CustomEra, included: &str) -> String {
    let dialect = ctx.dialect;
    let start = "de.drug_exposure_start_date";
    let end = match era.days_supply_override {
        Some(days) => dialect.date_add(start, days),
        None => format!(
            "COALESCE(de.drug_exposure_end_date, {}, {})",
            dialect.date_add(start, "de.days_supply"),
            dialect.date_add(start, 1)
        ),
    };
    let mut exposures = SelectQuery::from(format!("{} de", ctx.cdm("drug_exposure")));
    exposures
        .select_all([
            "de.person_id".to_string(),
            format!("{start} AS start_date"),
            format!("{end} AS end_date"),
        ])
        .filter(ctx.in_codeset("de.drug_concept_id", era.drug_codeset_id));
    let eras = era_query(dialect, &format!("(\n{}\n)", exposures.render()), era.gap_days);

    let shifted = dialect.date_add("ER.end_date", era.offset);
    let mut query = SelectQuery::from(format!("{included} I"));
    query
        .select_all([
            "I.event_id".to_string(),
            "I.person_id".to_string(),
            format!("{} AS end_date", clamp_to_op_end(&shifted)),
        ])
        .join_subquery(
            "INNER",
            &eras,
            "ER",
            "I.person_id = ER.person_id AND I.start_date >= ER.start_date AND I.start_date <= ER.end_date",
        );
    query.render()
}

/// `(person_id, start_date, end_date)` per included event: the earliest end on or after
/// the start among the strategy end (or the observation period end) and censoring events
pub(crate) fn cohort_rows_statement(
    ctx: &Context<'_>,
    expr: &CohortExpression,
    included: &str,
    strategy_ends: Option<&str>,
    table: &str,
) -> String {
    let mut ends = vec![match strategy_ends {
        Some(strategy_ends) => {
            format!("SELECT SE.event_id, SE.person_id, SE.end_date\nFROM {strategy_ends} SE")
        }
        None => format!(
            "SELECT I.event_id, I.person_id, I.op_end_date AS end_date\nFROM {included} I"
        ),
    }];
    if !expr.censoring_criteria.is_empty() {
        let censoring = expr
            .censoring_criteria
            .iter()
            .map(|criteria| criteria_query(ctx, criteria))
            .collect::<Vec<_>>()
            .join("\nUNION ALL\n");
        let mut censored = SelectQuery::from(format!("{included} I"));
        censored
            .select_all([
                "I.event_id",
                "I.person_id",
                "MIN(C.start_date) AS end_date",
            ])
            .join_subquery("INNER", &censoring, "C", "C.person_id = I.person_id")
            .filter("C.start_date >= I.start_date")
            .filter("C.start_date <= I.op_end_date")
            .group_by("I.event_id")
            .group_by("I.person_id");
        ends.push(censored.render());
    }

    let mut ranked = SelectQuery::from(format!("{included} I"));
    ranked
        .select_all([
            "I.person_id",
            "I.start_date",
            "CE.end_date",
            "ROW_NUMBER() OVER (PARTITION BY I.person_id, I.event_id ORDER BY CE.end_date) AS ordinal",
        ])
        .join_subquery(
            "INNER",
            &ends.join("\nUNION ALL\n"),
            "CE",
            "I.event_id = CE.event_id AND I.person_id = CE.person_id AND CE.end_date >= I.start_date",
        );
    let mut query = SelectQuery::from_subquery(&ranked.render(), "F");
    query
        .select_all(["F.person_id", "F.start_date", "F.end_date"])
        .filter("F.ordinal = 1");
    format!(
        "INSERT INTO {table} (person_id, start_date, end_date)\n{}",
        query.render()
    )
}

/// Final `(person_id, start_date, end_date)` after collapse and the censor window
pub(crate) fn final_cohort_statement(
    ctx: &Context<'_>,
    expr: &CohortExpression,
    cohort_rows: &str,
    table: &str,
) -> String {
    let dialect = ctx.dialect;
    let collapse = expr.collapse();
    let collapsed = match collapse.collapse_type {
        CollapseType::Era => era_query(dialect, cohort_rows, collapse.era_pad),
        CollapseType::None => {
            let mut rows = SelectQuery::from(format!("{cohort_rows} R"));
            rows.distinct()
                .select_all(["R.person_id", "R.start_date", "R.end_date"]);
            rows.render()
        }
    };

    let select = match expr.censor_window.as_ref().filter(|w| !w.is_empty()) {
        Some(window) => censor_window_query(dialect, window, &collapsed),
        None => collapsed,
    };
    format!("INSERT INTO {table} (person_id, start_date, end_date)\n{select}")
}

fn censor_window_query(dialect: Dialect, window: &CensorWindow, rows: &str) -> String {
    let start = match window.start_date {
        Some(date) => {
            let date = dialect.date_literal(date);
            format!("CASE WHEN W.start_date < {date} THEN {date} ELSE W.start_date END")
        }
        None => "W.start_date".to_string(),
    };
    let end = match window.end_date {
        Some(date) => {
            let date = dialect.date_literal(date);
            format!("CASE WHEN W.end_date > {date} THEN {date} ELSE W.end_date END")
        }
        None => "W.end_date".to_string(),
    };
    let mut clamped = SelectQuery::from_subquery(rows, "W");
    clamped.select_all([
        "W.person_id".to_string(),
        format!("{start} AS start_date"),
        format!("{end} AS end_date"),
    ]);
    let mut query = SelectQuery::from_subquery(&clamped.render(), "CW");
    query
        .select_all(["CW.person_id", "CW.start_date", "CW.end_date"])
        .filter("CW.start_date <= CW.end_date");
    query.render()
}

/// Merge `(person_id, start_date, end_date)` intervals of `source` whose gap is at most `pad` days
///
/// `source` is a table name or a parenthesized subquery.
pub(crate) fn era_query(dialect: Dialect, source: &str, pad: i32) -> String {
    let padded_end = dialect.date_add("R.end_date", pad);
    let mut flagged = SelectQuery::from(format!("{source} R"));
    flagged.select_all([
        "R.person_id".to_string(),
        "R.start_date".to_string(),
        "R.end_date".to_string(),
        format!(
            "CASE WHEN R.start_date <= MAX({padded_end}) OVER (PARTITION BY R.person_id \
             ORDER BY R.start_date, R.end_date ROWS BETWEEN UNBOUNDED PRECEDING AND 1 PRECEDING) \
             THEN 0 ELSE 1 END AS is_new"
        ),
    ]);

    let mut numbered = SelectQuery::from_subquery(&flagged.render(), "S");
    numbered.select_all([
        "S.person_id",
        "S.start_date",
        "S.end_date",
        "SUM(S.is_new) OVER (PARTITION BY S.person_id ORDER BY S.start_date, S.end_date \
         ROWS UNBOUNDED PRECEDING) AS era_id",
    ]);

    let mut query = SelectQuery::from_subquery(&numbered.render(), "G");
    query
        .select_all([
            "G.person_id",
            "MIN(G.start_date) AS start_date",
            "MAX(G.end_date) AS end_date",
        ])
        .group_by("G.person_id")
        .group_by("G.era_id");
    query.render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CompileOptions;
    use pretty_assertions::assert_eq;

    fn expression(extra: &str) -> CohortExpression {
        let json = format!(
            r#"{{"PrimaryCriteria": {{"CriteriaList": [{{"ConditionOccurrence": {{"CodesetId": 1}}}}]}}{extra}}}"#
        );
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn test_era_query_merges_within_pad() {
        let sql = era_query(Dialect::SqlServer, "#rows", 30);
        assert!(sql.contains("MAX(DATEADD(day, 30, R.end_date)) OVER (PARTITION BY R.person_id"));
        assert!(sql.contains("FROM #rows R"));
        assert!(sql.ends_with("GROUP BY G.person_id, G.era_id"));
    }

    #[test]
    fn test_date_offset_is_clamped_to_observation_period() {
        let options = CompileOptions::new(Dialect::SqlServer);
        let ctx = Context::for_tests(&options);
        let expr = expression(r#", "EndStrategy": {"DateOffset": {"DateField": "StartDate", "Offset": 7}}"#);
        let sql = strategy_ends_statement(&ctx, expr.end_strategy.as_ref().unwrap(), "#included", "#ends");
        assert_eq!(
            sql,
            "INSERT INTO #ends (event_id, person_id, end_date)\n\
             SELECT I.event_id, I.person_id, CASE WHEN DATEADD(day, 7, I.start_date) > I.op_end_date \
             THEN I.op_end_date ELSE DATEADD(day, 7, I.start_date) END AS end_date\n\
             FROM #included I"
        );
    }

    #[test]
    fn test_custom_era_uses_drug_codeset_and_gap() {
        let options = CompileOptions::new(Dialect::Postgresql);
        let ctx = Context::for_tests(&options);
        let expr = expression(
            r#", "EndStrategy": {"CustomEra": {"DrugCodesetId": 4, "GapDays": 30, "Offset": 0, "DaysSupplyOverride": 14}}"#,
        );
        let sql = strategy_ends_statement(&ctx, expr.end_strategy.as_ref().unwrap(), "included", "ends");
        assert!(sql.contains("de.drug_concept_id IN (SELECT concept_id FROM codesets WHERE codeset_id = 4)"));
        assert!(sql.contains("CAST((de.drug_exposure_start_date + 14 * INTERVAL '1 day') AS DATE) AS end_date"));
        assert!(sql.contains("MAX(CAST((R.end_date + 30 * INTERVAL '1 day') AS DATE)) OVER"));
        assert!(sql.contains("I.start_date >= ER.start_date AND I.start_date <= ER.end_date"));
    }

    #[test]
    fn test_censoring_takes_earliest_censor_event() {
        let options = CompileOptions::new(Dialect::SqlServer);
        let ctx = Context::for_tests(&options);
        let expr = expression(r#", "CensoringCriteria": [{"Death": {}}]"#);
        let sql = cohort_rows_statement(&ctx, &expr, "#included", None, "#rows");
        assert!(sql.contains("SELECT I.event_id, I.person_id, I.op_end_date AS end_date\nFROM #included I"));
        assert!(sql.contains("MIN(C.start_date) AS end_date"));
        assert!(sql.contains("ORDER BY CE.end_date) AS ordinal"));
        assert!(sql.ends_with("WHERE F.ordinal = 1"));
    }

    #[test]
    fn test_inclusion_rules_are_indexed() {
        let options = CompileOptions::new(Dialect::SqlServer);
        let ctx = Context::for_tests(&options);
        let expr = expression(
            r#", "InclusionRules": [
                {"name": "a", "expression": {"Type": "ALL"}},
                {"name": "b", "expression": {"Type": "ANY", "DemographicCriteriaList": [{"Gender": [8532]}]}}
            ]"#,
        );
        let statements = inclusion_statements(&ctx, &expr, "#qualified", "#inclusion");
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with(
            "INSERT INTO #inclusion (inclusion_rule_id, person_id, event_id)\nSELECT 0 AS index_id"
        ));
        assert!(statements[1].contains("SELECT 1 AS index_id, E.person_id, E.event_id\nFROM #qualified E"));
    }

    #[test]
    fn test_censor_window_clamps_and_drops_empty_intervals() {
        let options = CompileOptions::new(Dialect::SqlServer);
        let ctx = Context::for_tests(&options);
        let expr = expression(
            r#", "CollapseSettings": {"CollapseType": "NONE", "EraPad": 0},
                "CensorWindow": {"StartDate": "2020-01-01"}"#,
        );
        let sql = final_cohort_statement(&ctx, &expr, "#rows", "#final");
        assert!(sql.contains("CASE WHEN W.start_date < DATEFROMPARTS(2020, 1, 1) THEN DATEFROMPARTS(2020, 1, 1) ELSE W.start_date END AS start_date"));
        assert!(sql.contains("W.end_date AS end_date"));
        assert!(sql.contains("SELECT DISTINCT R.person_id, R.start_date, R.end_date\nFROM #rows R"));
        assert!(sql.ends_with("WHERE CW.start_date <= CW.end_date"));
    }
}
