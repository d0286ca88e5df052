//! Primary and qualified events
//!
//! Primary events are the anchor rows of a tree-grammar cohort: the union of the primary
//! criteria, restricted to the observation window and the primary limit. Qualified events
//! are the primary events passing the additional criteria, restricted to the qualified limit.

use crate::context::Context;
use crate::criteria::criteria_query;
use crate::group::group_query;
use crate::query::SelectQuery;
use octofhir_cohort_diagnostics::{COH0008, CohortError, NodePath, Result};
use octofhir_cohort_model::{CohortExpression, LimitType, PrimaryCriteria};

/// Columns of the primary and qualified event sets
pub(crate) const EVENT_COLUMNS: [&str; 7] = [
    "event_id",
    "person_id",
    "start_date",
    "end_date",
    "op_start_date",
    "op_end_date",
    "visit_occurrence_id",
];

pub(crate) fn primary_events_query(ctx: &Context<'_>, primary: &PrimaryCriteria) -> Result<String> {
    if primary.criteria_list.is_empty() {
        return Err(CohortError::malformed(
            COH0008,
            "primary criteria list is empty",
            NodePath::root().field("PrimaryCriteria").field("CriteriaList"),
        ));
    }
    let events = primary
        .criteria_list
        .iter()
        .map(|criteria| criteria_query(ctx, criteria))
        .collect::<Vec<_>>()
        .join("\nUNION ALL\n");

    let dialect = ctx.dialect;
    let window = &primary.observation_window;
    let order = match primary.primary_criteria_limit.limit_type {
        LimitType::Last => "E.sort_date DESC, E.event_id",
        LimitType::First | LimitType::All => "E.sort_date, E.event_id",
    };

    let mut ranked = SelectQuery::from_subquery(&events, "E");
    ranked
        .select_all([
            "E.person_id".to_string(),
            "E.start_date".to_string(),
            "E.end_date".to_string(),
            format!("ROW_NUMBER() OVER (PARTITION BY E.person_id ORDER BY {order}) AS ordinal"),
            "OP.observation_period_start_date AS op_start_date".to_string(),
            "OP.observation_period_end_date AS op_end_date".to_string(),
            "E.visit_occurrence_id".to_string(),
        ])
        .join(ctx.observation_period_join("E"))
        .filter(format!(
            "{} <= E.start_date",
            dialect.date_add("OP.observation_period_start_date", window.prior_days)
        ))
        .filter(format!(
            "{} <= OP.observation_period_end_date",
            dialect.date_add("E.start_date", window.post_days)
        ));

    let mut query = SelectQuery::from_subquery(&ranked.render(), "P");
    query.select_all([
        "P.ordinal AS event_id",
        "P.person_id",
        "P.start_date",
        "P.end_date",
        "P.op_start_date",
        "P.op_end_date",
        "P.visit_occurrence_id",
    ]);
    if primary.primary_criteria_limit.limit_type != LimitType::All {
        query.filter("P.ordinal = 1");
    }
    Ok(query.render())
}

/// Statement filling `table` with the qualified events of `expr`
pub(crate) fn qualified_events_statement(ctx: &Context<'_>, expr: &CohortExpression, table: &str) -> Result<String> {
    let primary = format!("(\n{}\n)", primary_events_query(ctx, &expr.primary_criteria)?);
    let limit = expr.qualified_limit_type();
    let order = match limit {
        LimitType::Last => "pe.start_date DESC, pe.event_id",
        LimitType::First | LimitType::All => "pe.start_date, pe.event_id",
    };

    let mut ranked = SelectQuery::from(format!("{primary} pe"));
    ranked.select_all(EVENT_COLUMNS.iter().map(|c| format!("pe.{c}")));
    ranked.select(format!(
        "ROW_NUMBER() OVER (PARTITION BY pe.person_id ORDER BY {order}) AS ordinal"
    ));
    if let Some(group) = expr.additional_criteria.as_ref().filter(|g| !g.is_empty()) {
        ranked.join_subquery(
            "INNER",
            &group_query(ctx, group, &primary, 0),
            "AC",
            "AC.person_id = pe.person_id AND AC.event_id = pe.event_id",
        );
    }

    let mut query = SelectQuery::from_subquery(&ranked.render(), "Q");
    query.select_all(EVENT_COLUMNS.iter().map(|c| format!("Q.{c}")));
    if limit != LimitType::All {
        query.filter("Q.ordinal = 1");
    }
    Ok(format!(
        "INSERT INTO {table} ({})\n{}",
        EVENT_COLUMNS.join(", "),
        query.render()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CompileOptions, Dialect};
    use pretty_assertions::assert_eq;

    fn expression(json: &str) -> CohortExpression {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_primary_window_and_first_limit() {
        let options = CompileOptions::new(Dialect::SqlServer);
        let ctx = Context::for_tests(&options);
        let expr = expression(
            r#"{
                "PrimaryCriteria": {
                    "CriteriaList": [{"ConditionEra": {"CodesetId": 1}}],
                    "ObservationWindow": {"PriorDays": 365, "PostDays": 0},
                    "PrimaryCriteriaLimit": {"Type": "First"}
                }
            }"#,
        );
        let sql = primary_events_query(&ctx, &expr.primary_criteria).unwrap();
        assert!(sql.starts_with("SELECT P.ordinal AS event_id, P.person_id"));
        assert!(sql.contains("ROW_NUMBER() OVER (PARTITION BY E.person_id ORDER BY E.sort_date, E.event_id) AS ordinal"));
        assert!(sql.contains("DATEADD(day, 365, OP.observation_period_start_date) <= E.start_date"));
        assert!(sql.contains("DATEADD(day, 0, E.start_date) <= OP.observation_period_end_date"));
        assert!(sql.ends_with("WHERE P.ordinal = 1"));
    }

    #[test]
    fn test_last_limit_orders_descending() {
        let options = CompileOptions::new(Dialect::Postgresql);
        let ctx = Context::for_tests(&options);
        let expr = expression(
            r#"{
                "PrimaryCriteria": {
                    "CriteriaList": [{"VisitOccurrence": {}}, {"Death": {}}],
                    "PrimaryCriteriaLimit": {"Type": "Last"}
                }
            }"#,
        );
        let sql = primary_events_query(&ctx, &expr.primary_criteria).unwrap();
        assert!(sql.contains("ORDER BY E.sort_date DESC, E.event_id"));
        assert_eq!(sql.matches("\nUNION ALL\n").count(), 1);
    }

    #[test]
    fn test_empty_primary_criteria_is_rejected() {
        let options = CompileOptions::default();
        let ctx = Context::for_tests(&options);
        let expr = expression(r#"{"PrimaryCriteria": {"CriteriaList": []}}"#);
        let err = primary_events_query(&ctx, &expr.primary_criteria).unwrap_err();
        assert_eq!(err.code(), COH0008);
        assert_eq!(
            err.path().map(ToString::to_string).as_deref(),
            Some("PrimaryCriteria.CriteriaList")
        );
    }

    #[test]
    fn test_qualified_events_join_additional_criteria() {
        let options = CompileOptions::new(Dialect::SqlServer);
        let ctx = Context::for_tests(&options);
        let expr = expression(
            r#"{
                "PrimaryCriteria": {"CriteriaList": [{"ConditionOccurrence": {"CodesetId": 1}}]},
                "AdditionalCriteria": {"Type": "ALL", "CriteriaList": [{
                    "Criteria": {"DrugExposure": {"CodesetId": 2}},
                    "StartWindow": {"Start": {"Days": 0, "Coeff": 1}, "End": {"Days": 30, "Coeff": 1}}
                }]},
                "QualifiedLimit": {"Type": "First"}
            }"#,
        );
        let sql = qualified_events_statement(&ctx, &expr, "#qualified_s").unwrap();
        assert!(sql.starts_with(
            "INSERT INTO #qualified_s (event_id, person_id, start_date, end_date, op_start_date, op_end_date, visit_occurrence_id)\n\
             SELECT Q.event_id, Q.person_id"
        ));
        assert!(sql.contains(") AC ON AC.person_id = pe.person_id AND AC.event_id = pe.event_id"));
        assert!(sql.ends_with("WHERE Q.ordinal = 1"));
    }
}
