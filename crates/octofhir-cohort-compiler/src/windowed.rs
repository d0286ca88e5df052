//! Correlated criteria relative to an anchor event
//!
//! The anchor table `P` carries `person_id, event_id, start_date, end_date,
//! visit_occurrence_id, op_start_date, op_end_date`.

use crate::context::Context;
use crate::criteria::criteria_query;
use crate::query::SelectQuery;
use octofhir_cohort_model::{CorrelatedCriteria, CountColumn, Endpoint, Window};

/// Rows `(anchor, matching event)` satisfying the windows of `criteria`
pub(crate) fn windowed_query(ctx: &Context<'_>, criteria: &CorrelatedCriteria, anchor: &str) -> String {
    let mut query = SelectQuery::from(format!("{anchor} P"));
    query
        .select_all([
            "P.person_id",
            "P.event_id",
            "A.domain_concept_id",
            "A.start_date",
            "A.end_date",
            "A.visit_occurrence_id",
        ])
        .join_subquery(
            "INNER",
            &criteria_query(ctx, &criteria.criteria),
            "A",
            "A.person_id = P.person_id",
        );

    let honor_op = !criteria.ignore_observation_period;
    if honor_op {
        query
            .filter("A.start_date >= P.op_start_date")
            .filter("A.start_date <= P.op_end_date");
    }
    if let Some(window) = &criteria.start_window {
        let event = if window.use_event_end == Some(true) {
            "A.end_date"
        } else {
            "A.start_date"
        };
        query.filter_all(window_clauses(ctx, window, event, honor_op));
    }
    if let Some(window) = &criteria.end_window {
        let event = if window.use_event_end == Some(false) {
            "A.start_date"
        } else {
            "A.end_date"
        };
        query.filter_all(window_clauses(ctx, window, event, honor_op));
    }
    if criteria.restrict_visit {
        query.filter("A.visit_occurrence_id = P.visit_occurrence_id");
    }
    query.render()
}

fn window_clauses(ctx: &Context<'_>, window: &Window, event: &str, honor_op: bool) -> Vec<String> {
    let index = if window.use_index_end == Some(true) {
        "P.end_date"
    } else {
        "P.start_date"
    };
    [(&window.start, ">="), (&window.end, "<=")]
        .into_iter()
        .filter_map(|(endpoint, op)| {
            bound(ctx, endpoint, index, honor_op).map(|bound| format!("{event} {op} {bound}"))
        })
        .collect()
}

/// A window bound; unbounded sides fall back to the observation period or vanish
fn bound(ctx: &Context<'_>, endpoint: &Endpoint, index: &str, honor_op: bool) -> Option<String> {
    match endpoint.offset() {
        Some(0) => Some(index.to_string()),
        Some(offset) => Some(ctx.dialect.date_add(index, offset)),
        None if !honor_op => None,
        None if endpoint.coeff < 0 => Some("P.op_start_date".to_string()),
        None => Some("P.op_end_date".to_string()),
    }
}

/// Anchors `(person_id, event_id)` whose correlated event count satisfies the occurrence
pub(crate) fn correlated_query(ctx: &Context<'_>, criteria: &CorrelatedCriteria, anchor: &str) -> String {
    let occurrence = criteria.occurrence_or_default();
    let kind = if occurrence.tolerates_absence() {
        "LEFT"
    } else {
        "INNER"
    };
    let counted = if occurrence.is_distinct {
        let column = match occurrence.count_column.unwrap_or(CountColumn::DomainConcept) {
            CountColumn::DomainConcept => "domain_concept_id",
            CountColumn::StartDate => "start_date",
            CountColumn::EndDate => "end_date",
            CountColumn::VisitId => "visit_occurrence_id",
        };
        format!("COUNT(DISTINCT CC.{column})")
    } else {
        "COUNT(CC.event_id)".to_string()
    };

    let mut query = SelectQuery::from(format!("{anchor} E"));
    query
        .select_all(["E.person_id", "E.event_id"])
        .join_subquery(
            kind,
            &windowed_query(ctx, criteria, anchor),
            "CC",
            "E.person_id = CC.person_id AND E.event_id = CC.event_id",
        )
        .group_by("E.person_id")
        .group_by("E.event_id")
        .having(format!(
            "{counted} {} {}",
            occurrence.occurrence_type.sql_token(),
            occurrence.count
        ));
    query.render()
}
