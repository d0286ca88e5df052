//! Criteria group composition
//!
//! Each group entry becomes one `UNION ALL` branch `(index_id, person_id, event_id)`;
//! the group keeps anchors whose count of distinct satisfied branches meets its type.

use crate::context::Context;
use crate::predicate::{concept_list, date_range, numeric_range};
use crate::query::SelectQuery;
use crate::windowed::correlated_query;
use octofhir_cohort_model::{CorrelatedCriteria, CriteriaGroup, DemographicCriteria, GroupItem, GroupType};

/// Anchors of `anchor` satisfying `group`, tagged with `index` as `index_id`
pub(crate) fn group_query(ctx: &Context<'_>, group: &CriteriaGroup, anchor: &str, index: usize) -> String {
    let mut query = SelectQuery::from(format!("{anchor} E"));
    query.select_all([
        format!("{index} AS index_id"),
        "E.person_id".to_string(),
        "E.event_id".to_string(),
    ]);
    if group.is_empty() {
        return query.render();
    }

    let mut branches = Vec::with_capacity(group.item_count());
    for item in &group.criteria_list {
        let i = branches.len();
        let correlated = match item {
            GroupItem::Correlated(c) => correlated_query(ctx, c, anchor),
            GroupItem::Plain(criteria) => {
                // Any event of the anchor's person
                let plain = CorrelatedCriteria {
                    criteria: criteria.clone(),
                    start_window: None,
                    end_window: None,
                    restrict_visit: false,
                    ignore_observation_period: true,
                    occurrence: None,
                };
                correlated_query(ctx, &plain, anchor)
            }
        };
        let mut branch = SelectQuery::from_subquery(&correlated, "CC");
        branch.select_all([
            format!("{i} AS index_id"),
            "CC.person_id".to_string(),
            "CC.event_id".to_string(),
        ]);
        branches.push(branch.render());
    }
    for demographic in &group.demographic_criteria_list {
        let i = branches.len();
        branches.push(demographic_query(ctx, demographic, anchor, i));
    }
    for nested in &group.groups {
        let i = branches.len();
        branches.push(group_query(ctx, nested, anchor, i));
    }

    let kind = if group.group_type == GroupType::All {
        "INNER"
    } else {
        "LEFT"
    };
    let having = match group.group_type {
        GroupType::All => format!("= {}", branches.len()),
        GroupType::Any => "> 0".to_string(),
        GroupType::AtLeast => format!(">= {}", group.count.unwrap_or(1)),
        GroupType::AtMost => format!("<= {}", group.count.unwrap_or(1)),
    };
    query
        .join_subquery(
            kind,
            &branches.join("\nUNION ALL\n"),
            "CQ",
            "E.person_id = CQ.person_id AND E.event_id = CQ.event_id",
        )
        .group_by("E.person_id")
        .group_by("E.event_id")
        .having(format!("COUNT(DISTINCT CQ.index_id) {having}"));
    query.render()
}

/// Person attributes and anchor dates
fn demographic_query(ctx: &Context<'_>, demographic: &DemographicCriteria, anchor: &str, index: usize) -> String {
    let dialect = ctx.dialect;
    let mut query = SelectQuery::from(format!("{anchor} E"));
    query
        .select_all([
            format!("{index} AS index_id"),
            "E.person_id".to_string(),
            "E.event_id".to_string(),
        ])
        .join(format!("JOIN {} P ON P.person_id = E.person_id", ctx.cdm("person")));

    if let Some(age) = &demographic.age {
        let expr = format!("{} - P.year_of_birth", dialect.year("E.start_date"));
        query.filter(numeric_range(dialect, &expr, age));
    }
    let concept_filters = [
        ("P.gender_concept_id", &demographic.gender, demographic.gender_exclude),
        ("P.race_concept_id", &demographic.race, demographic.race_exclude),
        ("P.ethnicity_concept_id", &demographic.ethnicity, demographic.ethnicity_exclude),
    ];
    for (column, concepts, exclude) in concept_filters {
        let clause = concepts
            .as_deref()
            .and_then(|c| concept_list(column, c, exclude.unwrap_or(false)));
        query.filter_all(clause);
    }
    if let Some(range) = &demographic.occurrence_start_date {
        query.filter(date_range(dialect, "E.start_date", range));
    }
    if let Some(range) = &demographic.occurrence_end_date {
        query.filter(date_range(dialect, "E.end_date", range));
    }
    query.render()
}
