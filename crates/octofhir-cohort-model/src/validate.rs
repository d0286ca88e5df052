//! Semantic validation of parsed cohorts
//!
//! Validation walks the whole document and collects every problem before failing, so
//! a caller sees all malformed nodes and unresolved references of one document at once.

use crate::{
    Cohort, CohortDocument, CohortExpression, ConceptSet, CorrelatedCriteria, Criteria,
    CriteriaGroup, DateRange, EndStrategy, FilterField, GroupItem, OneOrMany, Operator,
    TextOperator,
};
use octofhir_cohort_diagnostics::{
    COH0004, COH0005, COH0006, COH0007, COH0009, COH0010, COH0100, COH0101, CohortError,
    NodePath, Result,
};
use std::collections::HashSet;

/// Validate a document of either grammar
pub fn validate_document(document: &CohortDocument) -> Result<()> {
    match document {
        CohortDocument::Tree(expr) => validate_expression(expr),
        CohortDocument::Sequential(cohort) => validate_cohort(cohort),
    }
}

/// Validate a tree-grammar expression
pub fn validate_expression(expr: &CohortExpression) -> Result<()> {
    let root = NodePath::root();
    let mut v = Validator::new(&expr.concept_sets, root.field("ConceptSets"));

    let primary = root.field("PrimaryCriteria").field("CriteriaList");
    for (i, criteria) in expr.primary_criteria.criteria_list.iter().enumerate() {
        v.criteria(criteria, &primary.index(i));
    }
    if let Some(group) = &expr.additional_criteria {
        v.group(group, &root.field("AdditionalCriteria"));
    }
    for (i, rule) in expr.inclusion_rules.iter().enumerate() {
        let path = root.field("InclusionRules").index(i).field("expression");
        v.group(&rule.expression, &path);
    }
    for (i, criteria) in expr.censoring_criteria.iter().enumerate() {
        v.criteria(criteria, &root.field("CensoringCriteria").index(i));
    }
    if let Some(EndStrategy::CustomEra(era)) = &expr.end_strategy {
        let path = root
            .field("EndStrategy")
            .field("CustomEra")
            .field("DrugCodesetId");
        v.codeset(era.drug_codeset_id, &path);
    }

    v.finish()
}

/// Validate a sequential-grammar cohort
pub fn validate_cohort(cohort: &Cohort) -> Result<()> {
    let mut v = Validator::new(&cohort.conceptsets, NodePath::root().field("conceptsets"));
    let groups = NodePath::root().field("groups");

    for (g, group) in cohort.groups.iter().enumerate() {
        for (c, container) in group.containers.iter().enumerate() {
            let container_path = groups.index(g).field("containers").index(c);
            for (f, filter) in container.filters.iter().enumerate() {
                let filter_path = container_path.field("filters").index(f);
                for (name, field) in filter.fields() {
                    v.filter_field(field, &filter_path.field(name));
                }
            }
        }
    }

    v.finish()
}

struct Validator {
    known: HashSet<i64>,
    errors: Vec<CohortError>,
}

impl Validator {
    fn new(concept_sets: &[ConceptSet], path: NodePath) -> Self {
        let mut known = HashSet::new();
        let mut errors = Vec::new();
        for (i, set) in concept_sets.iter().enumerate() {
            let set_path = path.index(i);
            if !known.insert(set.id) {
                errors.push(CohortError::malformed(
                    COH0101,
                    format!("concept set id {} is defined more than once", set.id),
                    set_path.clone(),
                ));
            }
            for (j, item) in set.items.iter().enumerate() {
                if item.concept_id.is_none() {
                    errors.push(CohortError::malformed(
                        COH0006,
                        format!("concept set {} has an item without a concept id", set.id),
                        set_path.field("items").index(j),
                    ));
                }
            }
        }
        Self { known, errors }
    }

    fn finish(self) -> Result<()> {
        if !self.errors.is_empty() {
            log::debug!("validation found {} problem(s)", self.errors.len());
        }
        CohortError::collect(self.errors)
    }

    fn codeset(&mut self, id: i64, path: &NodePath) {
        if !self.known.contains(&id) {
            self.errors.push(CohortError::unresolved(
                COH0100,
                format!("concept set {id} is not defined"),
                path.clone(),
            ));
        }
    }

    // ------------------------------------------------------------------
    // Tree grammar
    // ------------------------------------------------------------------

    fn criteria(&mut self, criteria: &Criteria, path: &NodePath) {
        let body = path.field(criteria.type_name());
        for (field, id) in criteria.codeset_references() {
            self.codeset(id, &body.field(field));
        }
        for (field, range) in criteria.numeric_ranges() {
            if range.op.is_between() && range.extent.is_none() {
                self.errors.push(CohortError::malformed(
                    COH0010,
                    format!("'{}' needs an Extent", range.op),
                    body.field(field),
                ));
            }
        }
        let common = criteria.common();
        for (field, range) in [
            ("OccurrenceStartDate", &common.occurrence_start_date),
            ("OccurrenceEndDate", &common.occurrence_end_date),
        ] {
            if let Some(range) = range {
                self.date_range(range, &body.field(field));
            }
        }
        if let Some(group) = &common.correlated_criteria {
            self.group(group, &body.field("CorrelatedCriteria"));
        }
    }

    fn date_range(&mut self, range: &DateRange, path: &NodePath) {
        if range.op.is_between() && range.extent.is_none() {
            self.errors.push(CohortError::malformed(
                COH0010,
                format!("'{}' needs an Extent", range.op),
                path.clone(),
            ));
        }
    }

    fn group(&mut self, group: &CriteriaGroup, path: &NodePath) {
        if group.group_type.needs_count() && group.count.is_none_or(|n| n <= 0) {
            self.errors.push(CohortError::malformed(
                COH0004,
                format!("{:?} group needs a positive Count", group.group_type),
                path.field("Count"),
            ));
        }
        for (i, item) in group.criteria_list.iter().enumerate() {
            let item_path = path.field("CriteriaList").index(i);
            match item {
                GroupItem::Correlated(correlated) => self.correlated(correlated, &item_path),
                GroupItem::Plain(criteria) => self.criteria(criteria, &item_path),
            }
        }
        for (i, demographic) in group.demographic_criteria_list.iter().enumerate() {
            let item_path = path.field("DemographicCriteriaList").index(i);
            if let Some(age) = demographic.age.as_ref().filter(|a| a.op.is_between()) {
                if age.extent.is_none() {
                    self.errors.push(CohortError::malformed(
                        COH0010,
                        format!("'{}' needs an Extent", age.op),
                        item_path.field("Age"),
                    ));
                }
            }
            for (field, range) in [
                ("OccurrenceStartDate", &demographic.occurrence_start_date),
                ("OccurrenceEndDate", &demographic.occurrence_end_date),
            ] {
                if let Some(range) = range {
                    self.date_range(range, &item_path.field(field));
                }
            }
        }
        for (i, nested) in group.groups.iter().enumerate() {
            self.group(nested, &path.field("Groups").index(i));
        }
    }

    fn correlated(&mut self, correlated: &CorrelatedCriteria, path: &NodePath) {
        if let Some(occurrence) = correlated.occurrence.filter(|o| o.count < 0) {
            self.errors.push(CohortError::malformed(
                COH0007,
                format!("occurrence count {} is negative", occurrence.count),
                path.field("Occurrence").field("Count"),
            ));
        }
        self.criteria(&correlated.criteria, &path.field("Criteria"));
    }

    // ------------------------------------------------------------------
    // Sequential grammar
    // ------------------------------------------------------------------

    fn filter_field(&mut self, field: FilterField<'_>, path: &NodePath) {
        match field {
            FilterField::Number(op) => self.operator(op, path),
            FilterField::Concept(op) => self.operator(op, path),
            FilterField::Date(op) => self.operator(op, path),
            FilterField::Codeset(op) => {
                self.operator(op, path);
                for id in op.values() {
                    self.codeset(id.value(), path);
                }
            }
            FilterField::Text(op) => self.text(op, path),
            FilterField::Flag(_) => {}
        }
    }

    fn operator<T>(&mut self, op: &Operator<T>, path: &NodePath) {
        let Operator::Compare(cmp) = op else {
            return;
        };
        if cmp.is_empty() {
            self.errors.push(CohortError::malformed(
                COH0005,
                "operator has none of eq, neq, gt, gte, lt, lte",
                path.clone(),
            ));
            return;
        }
        for (name, values) in cmp.fields() {
            if values.is_empty() {
                self.errors.push(CohortError::malformed(
                    COH0005,
                    format!("'{name}' has no values"),
                    path.field(name),
                ));
            }
        }
    }

    fn text(&mut self, op: &TextOperator, path: &NodePath) {
        let TextOperator::Match(m) = op else {
            return;
        };
        if m.is_empty() {
            self.errors.push(CohortError::malformed(
                COH0009,
                "text operator has none of eq, neq, startsWith, endsWith, contains",
                path.clone(),
            ));
            return;
        }
        let fields: [(&str, &Option<OneOrMany<String>>); 5] = [
            ("eq", &m.eq),
            ("neq", &m.neq),
            ("startsWith", &m.starts_with),
            ("endsWith", &m.ends_with),
            ("contains", &m.contains),
        ];
        for (name, values) in fields {
            if values.as_ref().is_some_and(OneOrMany::is_empty) {
                self.errors.push(CohortError::malformed(
                    COH0009,
                    format!("'{name}' has no values"),
                    path.field(name),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parse_cohort, parse_expression};
    use octofhir_cohort_diagnostics::ErrorCode;
    use pretty_assertions::assert_eq;

    fn codes(err: &CohortError) -> Vec<ErrorCode> {
        err.errors().into_iter().map(CohortError::code).collect()
    }

    #[test]
    fn test_valid_expression() {
        let json = r#"{
            "ConceptSets": [{"id": 1, "expression": {"items": [{"concept": {"CONCEPT_ID": 201826}}]}}],
            "PrimaryCriteria": {"CriteriaList": [{"ConditionEra": {"CodesetId": 1}}]}
        }"#;
        let expr = parse_expression(json).unwrap();
        assert!(validate_expression(&expr).is_ok());
    }

    #[test]
    fn test_unresolved_codeset_has_path() {
        let json = r#"{
            "ConceptSets": [],
            "PrimaryCriteria": {"CriteriaList": [{"ConditionOccurrence": {"CodesetId": 7}}]}
        }"#;
        let expr = parse_expression(json).unwrap();
        let err = validate_expression(&expr).unwrap_err();
        assert_eq!(err.code(), COH0100);
        assert!(!err.is_retryable());
        assert_eq!(
            err.path().map(ToString::to_string).as_deref(),
            Some("PrimaryCriteria.CriteriaList[0].ConditionOccurrence.CodesetId")
        );
    }

    #[test]
    fn test_collects_all_problems() {
        let json = r#"{
            "ConceptSets": [
                {"id": 1, "expression": {"items": [{"concept": {}}]}},
                {"id": 1, "expression": {"items": []}}
            ],
            "PrimaryCriteria": {"CriteriaList": [{"Death": {"Age": {"Value": 1, "Op": "bt"}}}]},
            "AdditionalCriteria": {"Type": "AT_LEAST", "Count": 0, "CriteriaList": [
                {"Criteria": {"Measurement": {"CodesetId": 9}},
                 "StartWindow": {"Start": {"Coeff": -1}, "End": {"Coeff": 1}}}
            ]}
        }"#;
        let expr = parse_expression(json).unwrap();
        let err = validate_expression(&expr).unwrap_err();
        assert_eq!(
            codes(&err),
            vec![COH0006, COH0101, COH0010, COH0004, COH0100]
        );
    }

    #[test]
    fn test_sequential_empty_operator() {
        let json = r#"{"groups": [{"containers": [{"filters": [
            {"type": "measurement", "valueAsNumber": {"between": 3}}
        ]}]}]}"#;
        let cohort = parse_cohort(json).unwrap();
        let err = validate_cohort(&cohort).unwrap_err();
        assert_eq!(err.code(), COH0005);
        assert_eq!(
            err.path().map(ToString::to_string).as_deref(),
            Some("groups[0].containers[0].filters[0].valueAsNumber")
        );
    }

    #[test]
    fn test_sequential_text_and_codesets() {
        let json = r#"{
            "conceptsets": [{"conceptset_id": "1", "items": [{"concept_id": "1"}]}],
            "groups": [{"containers": [{"filters": [
                {"type": "drug_exposure", "conceptset": "1", "lotNumber": {}},
                {"type": "condition_occurrence", "conceptset": {"eq": ["1", "4"]}}
            ]}]}]
        }"#;
        let cohort = parse_cohort(json).unwrap();
        let err = validate_cohort(&cohort).unwrap_err();
        assert_eq!(codes(&err), vec![COH0009, COH0100]);
    }
}
