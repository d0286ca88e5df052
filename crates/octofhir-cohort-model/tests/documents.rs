//! Document Parsing Tests
//!
//! Whole-document tests for both grammars:
//! - circe expressions with groups, limits, end strategy and censoring
//! - sequential cohorts with containers and negated groups
//! - grammar detection and validation of realistic documents

use octofhir_cohort_model::{
    CohortDocument, CollapseType, ContainerOperator, Criteria, EndStrategy, Filter, Grammar,
    GroupItem, GroupType, LimitType, OccurrenceType, OffsetField, parse_document,
    parse_expression, validate_document,
};
use pretty_assertions::assert_eq;
use rstest::rstest;

// ============================================================================
// Test Helpers
// ============================================================================

/// Scenario documents are shared with the compiler crate's plan tests
fn fixture(name: &str) -> String {
    let path = format!(
        "{}/../octofhir-cohort-compiler/tests/fixtures/{name}",
        env!("CARGO_MANIFEST_DIR")
    );
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("cannot read {path}: {e}"))
}

// ============================================================================
// Tree grammar
// ============================================================================

#[test]
fn test_scenario_a_expression() {
    let expr = parse_expression(&fixture("scenario_a.json")).unwrap();
    assert_eq!(expr.concept_sets.len(), 1);
    assert_eq!(expr.concept_sets[0].items[0].concept_id, Some(201826));
    assert!(matches!(
        expr.primary_criteria.criteria_list[0],
        Criteria::ConditionEra(_)
    ));
    assert_eq!(expr.primary_criteria.criteria_list[0].common().codeset_id, Some(1));
    assert!(expr.additional_criteria.is_none());
    assert_eq!(expr.collapse().collapse_type, CollapseType::Era);
}

#[test]
fn test_scenario_c_expression() {
    let expr = parse_expression(&fixture("scenario_c.json")).unwrap();

    assert_eq!(
        expr.primary_criteria.primary_criteria_limit.limit_type,
        LimitType::First
    );
    assert_eq!(expr.primary_criteria.observation_window.prior_days, 365);

    let group = expr.additional_criteria.as_ref().unwrap();
    assert_eq!(group.group_type, GroupType::AtLeast);
    assert_eq!(group.count, Some(2));
    assert_eq!(group.criteria_list.len(), 3);

    let GroupItem::Correlated(measurement) = &group.criteria_list[1] else {
        panic!("expected correlated criteria");
    };
    let occurrence = measurement.occurrence_or_default();
    assert_eq!(occurrence.occurrence_type, OccurrenceType::AtLeast);
    assert_eq!(occurrence.count, 2);
    assert!(occurrence.is_distinct);

    let GroupItem::Correlated(procedure) = &group.criteria_list[2] else {
        panic!("expected correlated criteria");
    };
    assert!(procedure.restrict_visit);
    assert_eq!(procedure.start_window.unwrap().start.offset(), None);

    assert_eq!(
        expr.end_strategy,
        Some(EndStrategy::DateOffset(octofhir_cohort_model::DateOffset {
            date_field: OffsetField::StartDate,
            offset: 365,
        }))
    );
    assert_eq!(expr.inclusion_rules[0].name, "Adult at index");
    assert_eq!(expr.censoring_criteria.len(), 1);
    assert_eq!(expr.collapse().era_pad, 30);
    assert!(!expr.censor_window.unwrap().is_empty());
}

// ============================================================================
// Sequential grammar
// ============================================================================

#[test]
fn test_scenario_b_cohort() {
    let doc = parse_document(&fixture("scenario_b.json"), None).unwrap();
    let CohortDocument::Sequential(cohort) = &doc else {
        panic!("expected sequential grammar");
    };
    assert_eq!(cohort.conceptsets.len(), 2);
    let containers = &cohort.groups[0].containers;
    assert_eq!(containers[1].operator(), ContainerOperator::Not);
    assert!(matches!(containers[1].filters[0], Filter::DrugExposure(_)));
    assert_eq!(containers[1].name.as_deref(), Some("no insulin"));
}

// ============================================================================
// Detection and validation
// ============================================================================

#[rstest]
#[case("scenario_a.json", Grammar::Tree)]
#[case("scenario_b.json", Grammar::Sequential)]
#[case("scenario_c.json", Grammar::Tree)]
fn test_fixtures_detect_and_validate(#[case] name: &str, #[case] grammar: Grammar) {
    let doc = parse_document(&fixture(name), None).unwrap();
    assert_eq!(doc.grammar(), grammar);
    validate_document(&doc).unwrap();
}

#[test]
fn test_forced_grammar_mismatch_fails() {
    let err = parse_document(&fixture("scenario_b.json"), Some(Grammar::Tree)).unwrap_err();
    assert!(err.is_compile_error());
}
