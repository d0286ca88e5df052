//! Design-time checks
//!
//! Checks run on documents that already validate. They never fail a document: each
//! finding is a warning [`Diagnostic`] pointing at the node that looks unintended,
//! such as a concept set nothing references or a `bt` range that can never match.

use crate::{
    Cohort, CohortDocument, CohortExpression, ConceptSet, CorrelatedCriteria, Criteria,
    CriteriaGroup, DateRange, EndStrategy, FilterField, GroupItem, LimitType, RangeOp, Window,
};
use octofhir_cohort_diagnostics::{
    COH0300, COH0301, COH0302, COH0303, COH0304, COH0305, Diagnostic, NodePath,
};
use std::collections::HashSet;
use std::fmt;

/// Check a document of either grammar
pub fn check_document(document: &CohortDocument) -> Vec<Diagnostic> {
    match document {
        CohortDocument::Tree(expr) => check_expression(expr),
        CohortDocument::Sequential(cohort) => check_cohort(cohort),
    }
}

/// Check a tree-grammar expression
pub fn check_expression(expr: &CohortExpression) -> Vec<Diagnostic> {
    let root = NodePath::root();
    let mut c = Checker::default();

    let primary = root.field("PrimaryCriteria").field("CriteriaList");
    for (i, criteria) in expr.primary_criteria.criteria_list.iter().enumerate() {
        c.criteria(criteria, &primary.index(i));
    }
    if let Some(group) = &expr.additional_criteria {
        c.group(group, &root.field("AdditionalCriteria"));
    }
    for (i, rule) in expr.inclusion_rules.iter().enumerate() {
        let path = root.field("InclusionRules").index(i).field("expression");
        c.group(&rule.expression, &path);
    }
    for (i, criteria) in expr.censoring_criteria.iter().enumerate() {
        c.criteria(criteria, &root.field("CensoringCriteria").index(i));
    }
    if let Some(EndStrategy::CustomEra(era)) = &expr.end_strategy {
        c.used.insert(era.drug_codeset_id);
    }

    c.concept_sets(&expr.concept_sets, &root.field("ConceptSets"));
    if lacks_exit(expr) {
        c.warnings.push(
            Diagnostic::warning(
                COH0303,
                "all events are kept and no exit or censoring criteria is specified",
            )
            .with_path(root.field("EndStrategy")),
        );
    }

    log::debug!("design checks found {} warning(s)", c.warnings.len());
    c.warnings
}

/// Check a sequential-grammar cohort; only its concept sets carry design warnings
pub fn check_cohort(cohort: &Cohort) -> Vec<Diagnostic> {
    let mut c = Checker::default();
    for group in &cohort.groups {
        for container in &group.containers {
            for filter in &container.filters {
                for (_, field) in filter.fields() {
                    if let FilterField::Codeset(op) = field {
                        c.used.extend(op.values().into_iter().map(|id| id.value()));
                    }
                }
            }
        }
    }
    c.concept_sets(&cohort.conceptsets, &NodePath::root().field("conceptsets"));
    c.warnings
}

/// Every anchor event survives and nothing ends the era early
fn lacks_exit(expr: &CohortExpression) -> bool {
    let limits_all = expr.primary_criteria.primary_criteria_limit.limit_type == LimitType::All
        && expr.expression_limit_type() == LimitType::All
        && (expr.additional_criteria.is_none() || expr.qualified_limit_type() == LimitType::All);
    limits_all && expr.end_strategy.is_none() && expr.censoring_criteria.is_empty()
}

fn label(set: &ConceptSet) -> String {
    match &set.name {
        Some(name) => format!("\"{name}\""),
        None => set.id.to_string(),
    }
}

#[derive(Default)]
struct Checker {
    used: HashSet<i64>,
    warnings: Vec<Diagnostic>,
}

impl Checker {
    fn concept_sets(&mut self, sets: &[ConceptSet], path: &NodePath) {
        for (i, set) in sets.iter().enumerate() {
            if !self.used.contains(&set.id) {
                self.warnings.push(
                    Diagnostic::warning(COH0300, format!("concept set {} is not used", label(set)))
                        .with_path(path.index(i)),
                );
            }
        }

        for (i, set) in sets.iter().enumerate() {
            if set.items.is_empty() {
                self.warnings.push(
                    Diagnostic::warning(
                        COH0301,
                        format!("concept set {} contains no concepts", label(set)),
                    )
                    .with_path(path.index(i).field("items")),
                );
            }
        }

        // Item order is irrelevant to the codeset a set resolves to
        let contents: Vec<_> = sets
            .iter()
            .map(|set| {
                let mut items: Vec<_> = set
                    .items
                    .iter()
                    .map(|item| {
                        (
                            item.concept_id,
                            item.is_excluded,
                            item.include_descendants,
                            item.include_mapped,
                        )
                    })
                    .collect();
                items.sort_unstable();
                items.dedup();
                items
            })
            .collect();
        let mut reported = HashSet::new();
        for (i, set) in sets.iter().enumerate() {
            if contents[i].is_empty() || reported.contains(&i) {
                continue;
            }
            let duplicates: Vec<usize> = (i + 1..sets.len())
                .filter(|&j| contents[j] == contents[i])
                .collect();
            if duplicates.is_empty() {
                continue;
            }
            let names: Vec<String> = duplicates.iter().map(|&j| label(&sets[j])).collect();
            reported.extend(duplicates);
            self.warnings.push(
                Diagnostic::warning(
                    COH0302,
                    format!(
                        "concept set {} contains the same concepts as {}",
                        label(set),
                        names.join(", ")
                    ),
                )
                .with_path(path.index(i)),
            );
        }
    }

    fn criteria(&mut self, criteria: &Criteria, path: &NodePath) {
        let body = path.field(criteria.type_name());
        self.used
            .extend(criteria.codeset_references().into_iter().map(|(_, id)| id));

        for (field, range) in criteria.numeric_ranges() {
            self.range(range.op, range.value, range.extent, &body.field(field));
        }
        let common = criteria.common();
        self.date_range(
            common.occurrence_start_date.as_ref(),
            &body.field("OccurrenceStartDate"),
        );
        self.date_range(
            common.occurrence_end_date.as_ref(),
            &body.field("OccurrenceEndDate"),
        );
        if let Some(group) = &common.correlated_criteria {
            self.group(group, &body.field("CorrelatedCriteria"));
        }
    }

    fn date_range(&mut self, range: Option<&DateRange>, path: &NodePath) {
        if let Some(range) = range {
            self.range(range.op, range.value, range.extent, path);
        }
    }

    /// `bt` and `!bt` with an Extent below the Value match everything or nothing
    fn range<T: PartialOrd + fmt::Display>(
        &mut self,
        op: RangeOp,
        value: T,
        extent: Option<T>,
        path: &NodePath,
    ) {
        let Some(extent) = extent.filter(|e| op.is_between() && *e < value) else {
            return;
        };
        self.warnings.push(
            Diagnostic::warning(
                COH0304,
                format!("'{op}' range starts at {value} after its Extent {extent}"),
            )
            .with_path(path.clone()),
        );
    }

    fn group(&mut self, group: &CriteriaGroup, path: &NodePath) {
        for (i, item) in group.criteria_list.iter().enumerate() {
            let item_path = path.field("CriteriaList").index(i);
            match item {
                GroupItem::Correlated(correlated) => self.correlated(correlated, &item_path),
                GroupItem::Plain(criteria) => self.criteria(criteria, &item_path),
            }
        }
        for (i, demographic) in group.demographic_criteria_list.iter().enumerate() {
            let item_path = path.field("DemographicCriteriaList").index(i);
            if let Some(age) = &demographic.age {
                self.range(age.op, age.value, age.extent, &item_path.field("Age"));
            }
            self.date_range(
                demographic.occurrence_start_date.as_ref(),
                &item_path.field("OccurrenceStartDate"),
            );
            self.date_range(
                demographic.occurrence_end_date.as_ref(),
                &item_path.field("OccurrenceEndDate"),
            );
        }
        for (i, nested) in group.groups.iter().enumerate() {
            self.group(nested, &path.field("Groups").index(i));
        }
    }

    fn correlated(&mut self, correlated: &CorrelatedCriteria, path: &NodePath) {
        self.window(correlated.start_window.as_ref(), &path.field("StartWindow"));
        self.window(correlated.end_window.as_ref(), &path.field("EndWindow"));
        self.criteria(&correlated.criteria, &path.field("Criteria"));
    }

    fn window(&mut self, window: Option<&Window>, path: &NodePath) {
        let Some(window) = window else {
            return;
        };
        if let (Some(start), Some(end)) = (window.start.offset(), window.end.offset()) {
            if start > end {
                self.warnings.push(
                    Diagnostic::warning(
                        COH0305,
                        format!("window starts {start} days from the index but ends at {end}"),
                    )
                    .with_path(path.clone()),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parse_cohort, parse_document, parse_expression};
    use octofhir_cohort_diagnostics::{ErrorCode, Severity};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    /// Primary criteria using concept set 1 with an exit strategy, so it is clean
    fn expression(concept_sets: &str, extra: &str) -> CohortExpression {
        let json = format!(
            r#"{{
                "ConceptSets": [{concept_sets}],
                "PrimaryCriteria": {{"CriteriaList": [{{"ConditionOccurrence": {{"CodesetId": 1}}}}]}},
                "EndStrategy": {{"DateOffset": {{"DateField": "StartDate", "Offset": 7}}}}
                {extra}
            }}"#
        );
        parse_expression(&json).unwrap()
    }

    const DIABETES: &str =
        r#"{"id": 1, "name": "Diabetes", "expression": {"items": [{"concept": {"CONCEPT_ID": 201826}}]}}"#;

    fn codes(warnings: &[Diagnostic]) -> Vec<ErrorCode> {
        warnings.iter().map(|w| w.code).collect()
    }

    fn paths(warnings: &[Diagnostic]) -> Vec<String> {
        warnings
            .iter()
            .map(|w| w.path.as_ref().map(ToString::to_string).unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_clean_expression_has_no_warnings() {
        let warnings = check_expression(&expression(DIABETES, ""));
        assert!(warnings.is_empty(), "{warnings:?}");
    }

    #[test]
    fn test_unused_concept_set() {
        let sets = format!(
            r#"{DIABETES}, {{"id": 2, "name": "Insulin", "expression": {{"items": [{{"concept": {{"CONCEPT_ID": 1596977}}}}]}}}}"#
        );
        let warnings = check_expression(&expression(&sets, ""));

        assert_eq!(codes(&warnings), vec![COH0300]);
        assert_eq!(warnings[0].severity, Severity::Warning);
        assert_eq!(warnings[0].message, "concept set \"Insulin\" is not used");
        assert_eq!(paths(&warnings), vec!["ConceptSets[1]"]);
    }

    #[rstest]
    #[case::nested_correlated(r#", "AdditionalCriteria": {"Type": "ALL", "CriteriaList": [
        {"Criteria": {"Measurement": {"CorrelatedCriteria": {"Type": "ANY", "CriteriaList": [
            {"Criteria": {"DrugExposure": {"CodesetId": 2}}}]}}}}]}"#)]
    #[case::inclusion_rule(r#", "InclusionRules": [{"name": "insulin", "expression": {"Type": "ANY",
        "Groups": [{"Type": "ALL", "CriteriaList": [{"Criteria": {"DrugEra": {"CodesetId": 2}}}]}]}}]"#)]
    #[case::censoring(r#", "CensoringCriteria": [{"DrugExposure": {"CodesetId": 2}}]"#)]
    #[case::source_concept(r#", "CensoringCriteria": [{"DrugExposure": {"DrugSourceConcept": 2}}]"#)]
    fn test_concept_set_used_anywhere(#[case] extra: &str) {
        let sets = format!(
            r#"{DIABETES}, {{"id": 2, "expression": {{"items": [{{"concept": {{"CONCEPT_ID": 1596977}}}}]}}}}"#
        );
        let warnings = check_expression(&expression(&sets, extra));
        assert!(warnings.is_empty(), "{warnings:?}");
    }

    #[test]
    fn test_custom_era_uses_concept_set() {
        let json = format!(
            r#"{{
                "ConceptSets": [{DIABETES}, {{"id": 2, "expression": {{"items": [{{"concept": {{"CONCEPT_ID": 1596977}}}}]}}}}],
                "PrimaryCriteria": {{"CriteriaList": [{{"ConditionOccurrence": {{"CodesetId": 1}}}}]}},
                "EndStrategy": {{"CustomEra": {{"DrugCodesetId": 2, "GapDays": 30}}}}
            }}"#
        );
        let warnings = check_expression(&parse_expression(&json).unwrap());
        assert!(warnings.is_empty(), "{warnings:?}");
    }

    #[test]
    fn test_empty_concept_set() {
        let json = r#"{
            "ConceptSets": [{"id": 1, "name": "Nothing", "expression": {"items": []}}],
            "PrimaryCriteria": {"CriteriaList": [{"ConditionOccurrence": {"CodesetId": 1}}]},
            "EndStrategy": {"DateOffset": {"DateField": "EndDate", "Offset": 0}}
        }"#;
        let warnings = check_expression(&parse_expression(json).unwrap());

        assert_eq!(codes(&warnings), vec![COH0301]);
        assert_eq!(warnings[0].message, "concept set \"Nothing\" contains no concepts");
        assert_eq!(paths(&warnings), vec!["ConceptSets[0].items"]);
    }

    #[test]
    fn test_duplicate_concept_sets() {
        let json = r#"{
            "ConceptSets": [
                {"id": 1, "expression": {"items": [
                    {"concept": {"CONCEPT_ID": 201826}, "includeDescendants": true},
                    {"concept": {"CONCEPT_ID": 201254}}]}},
                {"id": 2, "expression": {"items": [
                    {"concept": {"CONCEPT_ID": 201254}},
                    {"concept": {"CONCEPT_ID": 201826}, "includeDescendants": true}]}},
                {"id": 3, "expression": {"items": [{"concept": {"CONCEPT_ID": 201826}}]}}
            ],
            "PrimaryCriteria": {"CriteriaList": [
                {"ConditionOccurrence": {"CodesetId": 1}},
                {"ConditionOccurrence": {"CodesetId": 2}},
                {"ConditionOccurrence": {"CodesetId": 3}}
            ]},
            "EndStrategy": {"DateOffset": {"DateField": "EndDate", "Offset": 0}}
        }"#;
        let warnings = check_expression(&parse_expression(json).unwrap());

        assert_eq!(codes(&warnings), vec![COH0302]);
        assert_eq!(warnings[0].message, "concept set 1 contains the same concepts as 2");
        assert_eq!(paths(&warnings), vec!["ConceptSets[0]"]);
    }

    #[rstest]
    #[case::bare("", true)]
    #[case::first_event(r#", "PrimaryCriteria": {"CriteriaList": [{"Death": {}}],
        "PrimaryCriteriaLimit": {"Type": "First"}}"#, false)]
    #[case::expression_limit(r#", "ExpressionLimit": {"Type": "Last"}"#, false)]
    #[case::censoring(r#", "CensoringCriteria": [{"Death": {}}]"#, false)]
    #[case::end_strategy(r#", "EndStrategy": {"DateOffset": {"DateField": "StartDate", "Offset": 1}}"#, false)]
    #[case::qualified_limit(r#", "AdditionalCriteria": {"Type": "ALL"}, "QualifiedLimit": {"Type": "First"}"#, false)]
    fn test_no_exit_criteria(#[case] extra: &str, #[case] expected: bool) {
        let primary = if extra.contains("PrimaryCriteria") {
            ""
        } else {
            r#", "PrimaryCriteria": {"CriteriaList": [{"Death": {}}]}"#
        };
        let json = format!(r#"{{"ConceptSets": []{primary}{extra}}}"#);
        let warnings = check_expression(&parse_expression(&json).unwrap());

        assert_eq!(codes(&warnings).contains(&COH0303), expected, "{json}");
    }

    #[test]
    fn test_contradictory_ranges() {
        let extra = r#", "AdditionalCriteria": {"Type": "ALL",
            "CriteriaList": [{"Criteria": {"Measurement": {
                "ValueAsNumber": {"Value": 10, "Op": "bt", "Extent": 2},
                "OccurrenceStartDate": {"Value": "2020-06-01", "Op": "bt", "Extent": "2020-01-01"},
                "RangeLow": {"Value": 1, "Op": "bt", "Extent": 5}}}}],
            "DemographicCriteriaList": [{"Age": {"Value": 65, "Op": "!bt", "Extent": 18}}]}"#;
        let warnings = check_expression(&expression(DIABETES, extra));

        assert_eq!(codes(&warnings), vec![COH0304, COH0304, COH0304]);
        assert_eq!(
            paths(&warnings),
            vec![
                "AdditionalCriteria.CriteriaList[0].Criteria.Measurement.ValueAsNumber",
                "AdditionalCriteria.CriteriaList[0].Criteria.Measurement.OccurrenceStartDate",
                "AdditionalCriteria.DemographicCriteriaList[0].Age",
            ]
        );
        assert_eq!(warnings[0].message, "'bt' range starts at 10 after its Extent 2");
    }

    #[test]
    fn test_inverted_time_window() {
        let extra = r#", "InclusionRules": [{"name": "prior", "expression": {"Type": "ALL",
            "CriteriaList": [
                {"Criteria": {"Death": {}},
                 "StartWindow": {"Start": {"Days": 0, "Coeff": 1}, "End": {"Days": 30, "Coeff": -1}}},
                {"Criteria": {"Death": {}},
                 "StartWindow": {"Start": {"Days": 30, "Coeff": -1}, "End": {"Coeff": 1}}}
            ]}}]"#;
        let warnings = check_expression(&expression(DIABETES, extra));

        assert_eq!(codes(&warnings), vec![COH0305]);
        assert_eq!(
            paths(&warnings),
            vec!["InclusionRules[0].expression.CriteriaList[0].StartWindow"]
        );
    }

    #[test]
    fn test_sequential_concept_sets() {
        let json = r#"{
            "conceptsets": [
                {"conceptset_id": "1", "items": [{"concept_id": "201826"}]},
                {"conceptset_id": "2", "items": [{"concept_id": "201826"}]},
                {"conceptset_id": "3", "items": []}
            ],
            "groups": [{"containers": [{"filters": [
                {"type": "condition_occurrence", "conceptset": {"eq": ["1", "2"]}}
            ]}]}]
        }"#;
        let warnings = check_cohort(&parse_cohort(json).unwrap());

        assert_eq!(codes(&warnings), vec![COH0300, COH0301, COH0302]);
        assert_eq!(
            paths(&warnings),
            vec!["conceptsets[2]", "conceptsets[2].items", "conceptsets[0]"]
        );
    }

    #[test]
    fn test_check_document_dispatches_on_grammar() {
        let document =
            parse_document(r#"{"PrimaryCriteria": {"CriteriaList": [{"Death": {}}]}}"#, None)
                .unwrap();
        assert_eq!(codes(&check_document(&document)), vec![COH0303]);
    }
}
