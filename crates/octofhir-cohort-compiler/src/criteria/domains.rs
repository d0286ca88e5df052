//! Domain-specific criteria fields

use super::CriteriaQuery;
use octofhir_cohort_model::{Concept, Criteria, NumericRange, Period};

/// Concept ids flagging an abnormal measurement value (`Abnormal`, `High`)
const ABNORMAL_VALUE_CONCEPTS: &str = "4155142, 4155143";

pub(super) fn apply(q: &mut CriteriaQuery<'_>, criteria: &Criteria) {
    match criteria {
        Criteria::ConditionOccurrence(c) => {
            q.concepts(&q.col("condition_type_concept_id"), &c.condition_type, c.condition_type_exclude);
            q.concepts(&q.col("condition_status_concept_id"), &c.condition_status, c.condition_status_exclude);
            q.text(&q.col("stop_reason"), &c.stop_reason);
            q.codeset("condition_source_concept_id", c.condition_source_concept);
            q.encounter(&c.encounter);
        }
        Criteria::ConditionEra(c) => {
            q.date_range(&q.col("condition_era_start_date"), &c.era_start_date);
            q.date_range(&q.col("condition_era_end_date"), &c.era_end_date);
            q.numeric(&q.col("condition_occurrence_count"), &c.occurrence_count);
            let length = q.days_between("condition_era_start_date", "condition_era_end_date");
            q.numeric(&length, &c.era_length);
            era_ages(q, "condition_era", &c.age_at_start, &c.age_at_end);
        }
        Criteria::Death(c) => {
            q.concepts(&q.col("death_type_concept_id"), &c.death_type, c.death_type_exclude);
            q.codeset("cause_source_concept_id", c.death_source_concept);
        }
        Criteria::DeviceExposure(c) => {
            q.concepts(&q.col("device_type_concept_id"), &c.device_type, c.device_type_exclude);
            q.text(&q.col("unique_device_id"), &c.unique_device_id);
            q.numeric(&q.col("quantity"), &c.quantity);
            q.codeset("device_source_concept_id", c.device_source_concept);
            q.encounter(&c.encounter);
        }
        Criteria::DoseEra(c) => {
            q.date_range(&q.col("dose_era_start_date"), &c.era_start_date);
            q.date_range(&q.col("dose_era_end_date"), &c.era_end_date);
            let length = q.days_between("dose_era_start_date", "dose_era_end_date");
            q.numeric(&length, &c.era_length);
            era_ages(q, "dose_era", &c.age_at_start, &c.age_at_end);
            q.concepts(&q.col("unit_concept_id"), &c.unit, None);
            q.numeric(&q.col("dose_value"), &c.dose_value);
        }
        Criteria::DrugEra(c) => {
            q.date_range(&q.col("drug_era_start_date"), &c.era_start_date);
            q.date_range(&q.col("drug_era_end_date"), &c.era_end_date);
            let length = q.days_between("drug_era_start_date", "drug_era_end_date");
            q.numeric(&length, &c.era_length);
            q.numeric(&q.col("drug_exposure_count"), &c.occurrence_count);
            q.numeric(&q.col("gap_days"), &c.gap_days);
            era_ages(q, "drug_era", &c.age_at_start, &c.age_at_end);
        }
        Criteria::DrugExposure(c) => {
            q.concepts(&q.col("drug_type_concept_id"), &c.drug_type, c.drug_type_exclude);
            q.text(&q.col("stop_reason"), &c.stop_reason);
            q.numeric(&q.col("refills"), &c.refills);
            q.numeric(&q.col("quantity"), &c.quantity);
            q.numeric(&q.col("days_supply"), &c.days_supply);
            q.concepts(&q.col("route_concept_id"), &c.route_concept, None);
            q.numeric(&q.col("effective_drug_dose"), &c.effective_drug_dose);
            q.concepts(&q.col("dose_unit_concept_id"), &c.dose_unit, None);
            q.text(&q.col("lot_number"), &c.lot_number);
            q.codeset("drug_source_concept_id", c.drug_source_concept);
            q.encounter(&c.encounter);
        }
        Criteria::Measurement(c) => {
            q.concepts(&q.col("measurement_type_concept_id"), &c.measurement_type, c.measurement_type_exclude);
            q.concepts(&q.col("operator_concept_id"), &c.operator, None);
            q.numeric(&q.col("value_as_number"), &c.value_as_number);
            q.concepts(&q.col("value_as_concept_id"), &c.value_as_concept, None);
            q.concepts(&q.col("unit_concept_id"), &c.unit, None);
            q.numeric(&q.col("range_low"), &c.range_low);
            q.numeric(&q.col("range_high"), &c.range_high);
            let value = q.col("value_as_number");
            let low_ratio = format!("({value} / NULLIF({}, 0))", q.col("range_low"));
            let high_ratio = format!("({value} / NULLIF({}, 0))", q.col("range_high"));
            q.numeric(&low_ratio, &c.range_low_ratio);
            q.numeric(&high_ratio, &c.range_high_ratio);
            if c.abnormal == Some(true) {
                let abnormal = format!(
                    "({value} < {low} OR {value} > {high} OR {concept} IN ({ABNORMAL_VALUE_CONCEPTS}))",
                    low = q.col("range_low"),
                    high = q.col("range_high"),
                    concept = q.col("value_as_concept_id"),
                );
                q.filter(abnormal);
            }
            q.codeset("measurement_source_concept_id", c.measurement_source_concept);
            q.encounter(&c.encounter);
        }
        Criteria::Observation(c) => {
            q.concepts(&q.col("observation_type_concept_id"), &c.observation_type, c.observation_type_exclude);
            q.numeric(&q.col("value_as_number"), &c.value_as_number);
            q.text(&q.col("value_as_string"), &c.value_as_string);
            q.concepts(&q.col("value_as_concept_id"), &c.value_as_concept, None);
            q.concepts(&q.col("qualifier_concept_id"), &c.qualifier, None);
            q.concepts(&q.col("unit_concept_id"), &c.unit, None);
            q.codeset("observation_source_concept_id", c.observation_source_concept);
            q.encounter(&c.encounter);
        }
        Criteria::ObservationPeriod(c) => {
            q.date_range(&q.col("observation_period_start_date"), &c.period_start_date);
            q.date_range(&q.col("observation_period_end_date"), &c.period_end_date);
            q.concepts(&q.col("period_type_concept_id"), &c.period_type, c.period_type_exclude);
            let length = q.days_between("observation_period_start_date", "observation_period_end_date");
            q.numeric(&length, &c.period_length);
            era_ages(q, "observation_period", &c.age_at_start, &c.age_at_end);
            user_defined_period(q, "observation_period", &c.user_defined_period);
        }
        Criteria::PayerPlanPeriod(c) => {
            q.date_range(&q.col("payer_plan_period_start_date"), &c.period_start_date);
            q.date_range(&q.col("payer_plan_period_end_date"), &c.period_end_date);
            let length = q.days_between("payer_plan_period_start_date", "payer_plan_period_end_date");
            q.numeric(&length, &c.period_length);
            era_ages(q, "payer_plan_period", &c.age_at_start, &c.age_at_end);
            user_defined_period(q, "payer_plan_period", &c.user_defined_period);
            q.codeset("payer_concept_id", c.payer_concept);
            q.codeset("plan_concept_id", c.plan_concept);
            q.codeset("sponsor_concept_id", c.sponsor_concept);
            q.codeset("stop_reason_concept_id", c.stop_reason_concept);
            q.codeset("payer_source_concept_id", c.payer_source_concept);
            q.codeset("plan_source_concept_id", c.plan_source_concept);
            q.codeset("sponsor_source_concept_id", c.sponsor_source_concept);
            q.codeset("stop_reason_source_concept_id", c.stop_reason_source_concept);
        }
        Criteria::ProcedureOccurrence(c) => {
            q.concepts(&q.col("procedure_type_concept_id"), &c.procedure_type, c.procedure_type_exclude);
            q.concepts(&q.col("modifier_concept_id"), &c.modifier, None);
            q.numeric(&q.col("quantity"), &c.quantity);
            q.codeset("procedure_source_concept_id", c.procedure_source_concept);
            q.encounter(&c.encounter);
        }
        Criteria::Specimen(c) => {
            q.concepts(&q.col("specimen_type_concept_id"), &c.specimen_type, c.specimen_type_exclude);
            q.numeric(&q.col("quantity"), &c.quantity);
            q.concepts(&q.col("unit_concept_id"), &c.unit, None);
            q.concepts(&q.col("anatomic_site_concept_id"), &c.anatomic_site, None);
            q.concepts(&q.col("disease_status_concept_id"), &c.disease_status, None);
            q.text(&q.col("specimen_source_id"), &c.source_id);
        }
        Criteria::VisitOccurrence(c) => {
            q.concepts(&q.col("visit_type_concept_id"), &c.visit_type, c.visit_type_exclude);
            let length = q.days_between("visit_start_date", "visit_end_date");
            q.numeric(&length, &c.visit_length);
            place_and_specialty(q, &c.provider_specialty, &c.place_of_service);
            q.codeset("visit_source_concept_id", c.visit_source_concept);
        }
        Criteria::VisitDetail(c) => {
            q.date_range(&q.col("visit_detail_start_date"), &c.visit_detail_start_date);
            q.date_range(&q.col("visit_detail_end_date"), &c.visit_detail_end_date);
            q.concepts(&q.col("visit_detail_type_concept_id"), &c.visit_detail_type, c.visit_detail_type_exclude);
            let length = q.days_between("visit_detail_start_date", "visit_detail_end_date");
            q.numeric(&length, &c.visit_detail_length);
            place_and_specialty(q, &c.provider_specialty, &c.place_of_service);
            q.codeset("visit_detail_source_concept_id", c.visit_detail_source_concept);
        }
    }
}

/// `AgeAtStart` / `AgeAtEnd` over `<prefix>_start_date` / `<prefix>_end_date`
fn era_ages(
    q: &mut CriteriaQuery<'_>,
    prefix: &str,
    at_start: &Option<NumericRange>,
    at_end: &Option<NumericRange>,
) {
    if at_start.is_some() {
        let age = q.age_at(&format!("{prefix}_start_date"));
        q.numeric(&age, at_start);
    }
    if at_end.is_some() {
        let age = q.age_at(&format!("{prefix}_end_date"));
        q.numeric(&age, at_end);
    }
}

/// Keep periods spanning the user period and emit its dates instead
fn user_defined_period(q: &mut CriteriaQuery<'_>, prefix: &str, period: &Option<Period>) {
    let Some(period) = period else {
        return;
    };
    let dialect = q.dialect();
    if let Some(start) = period.start_date {
        let literal = dialect.date_literal(start);
        q.filter(format!("{} <= {literal}", q.col(&format!("{prefix}_start_date"))));
        q.override_start(literal);
    }
    if let Some(end) = period.end_date {
        let literal = dialect.date_literal(end);
        q.filter(format!("{} >= {literal}", q.col(&format!("{prefix}_end_date"))));
        q.override_end(literal);
    }
}

fn place_and_specialty(
    q: &mut CriteriaQuery<'_>,
    specialty: &Option<Vec<Concept>>,
    place_of_service: &Option<Vec<Concept>>,
) {
    if specialty.is_some() {
        let provider = q.provider();
        q.concepts(&format!("{provider}.specialty_concept_id"), specialty, None);
    }
    if place_of_service.is_some() {
        let care_site = q.care_site();
        q.concepts(&format!("{care_site}.place_of_service_concept_id"), place_of_service, None);
    }
}

#[cfg(test)]
mod tests {
    use crate::context::Context;
    use crate::criteria::criteria_query;
    use crate::{CompileOptions, Dialect};
    use octofhir_cohort_model::Criteria;
    use rstest::rstest;

    fn compile(json: &str) -> String {
        let options = CompileOptions::new(Dialect::SqlServer);
        let ctx = Context::for_tests(&options);
        let criteria: Criteria = serde_json::from_str(json).unwrap();
        criteria_query(&ctx, &criteria)
    }

    #[rstest]
    #[case(
        r#"{"DrugEra": {"EraLength": {"Value": 30, "Op": "gt"}}}"#,
        "DATEDIFF(day, C.drug_era_start_date, C.drug_era_end_date) > 30"
    )]
    #[case(
        r#"{"DrugExposure": {"DrugSourceConcept": 9}}"#,
        "C.drug_source_concept_id IN (SELECT concept_id FROM codesets WHERE codeset_id = 9)"
    )]
    #[case(
        r#"{"Observation": {"ValueAsString": {"Text": "neg", "Op": "startsWith"}}}"#,
        "C.value_as_string LIKE 'neg%' ESCAPE '\\'"
    )]
    #[case(
        r#"{"Measurement": {"RangeHighRatio": {"Value": 2, "Op": "gte"}}}"#,
        "(C.value_as_number / NULLIF(C.range_high, 0)) >= 2"
    )]
    #[case(
        r#"{"Measurement": {"Abnormal": true}}"#,
        "(C.value_as_number < C.range_low OR C.value_as_number > C.range_high OR C.value_as_concept_id IN (4155142, 4155143))"
    )]
    #[case(
        r#"{"ConditionEra": {"AgeAtEnd": {"Value": 65, "Op": "lt"}}}"#,
        "YEAR(C.condition_era_end_date) - P.year_of_birth < 65"
    )]
    #[case(
        r#"{"VisitOccurrence": {"PlaceOfService": [8756]}}"#,
        "CS.place_of_service_concept_id IN (8756)"
    )]
    #[case(
        r#"{"Death": {"DeathSourceConcept": 3}}"#,
        "C.cause_source_concept_id IN (SELECT concept_id FROM codesets WHERE codeset_id = 3)"
    )]
    fn test_domain_field(#[case] json: &str, #[case] expected: &str) {
        let sql = compile(json);
        assert!(sql.contains(expected), "missing `{expected}` in\n{sql}");
    }

    #[test]
    fn test_user_defined_period_overrides_dates() {
        let sql = compile(
            r#"{"ObservationPeriod": {"UserDefinedPeriod": {"StartDate": "2020-01-01", "EndDate": "2020-12-31"}}}"#,
        );
        assert!(sql.contains("DATEFROMPARTS(2020, 1, 1) AS start_date"));
        assert!(sql.contains("DATEFROMPARTS(2020, 12, 31) AS end_date"));
        assert!(sql.contains("C.observation_period_start_date <= DATEFROMPARTS(2020, 1, 1)"));
        assert!(sql.contains("C.observation_period_end_date >= DATEFROMPARTS(2020, 12, 31)"));
    }

    #[test]
    fn test_visit_type_on_visit_occurrence_filters_the_visit_itself() {
        let sql = compile(r#"{"VisitOccurrence": {"VisitType": [44818517], "VisitTypeExclude": true}}"#);
        assert!(sql.contains("C.visit_type_concept_id NOT IN (44818517)"));
        assert!(!sql.contains("JOIN cdm.visit_occurrence V"));
    }
}
