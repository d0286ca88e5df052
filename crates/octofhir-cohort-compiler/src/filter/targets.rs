//! Column targets of every sequential-grammar filter field

use octofhir_cohort_model::Filter;

/// What a filter field is compared against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    /// Column of the event table `E`
    Event(&'static str),
    /// `YEAR(E.column) - P.year_of_birth`
    AgeAt(&'static str),
    /// Column of `person`
    Person(&'static str),
    /// Concept of the linked visit
    VisitConcept,
    ProviderSpecialty,
    PlaceOfService,
    /// Calendar years between two event date columns
    YearsBetween(&'static str, &'static str),
    /// Value outside its reference range or flagged abnormal
    Abnormal,
    /// Keep each person's earliest matching row
    First,
}

use Target::{
    Abnormal, AgeAt, Event, First, PlaceOfService, Person, ProviderSpecialty, VisitConcept,
    YearsBetween,
};

const GENDER: Target = Person("gender_concept_id");

const CONDITION_ERA: &[(&str, Target)] = &[
    ("conceptset", Event("condition_concept_id")),
    ("first", First),
    ("startAge", AgeAt("condition_era_start_date")),
    ("endAge", AgeAt("condition_era_end_date")),
    ("gender", GENDER),
    ("startDate", Event("condition_era_start_date")),
    ("endDate", Event("condition_era_end_date")),
    ("conditionCount", Event("condition_occurrence_count")),
    ("length", YearsBetween("condition_era_start_date", "condition_era_end_date")),
];

const CONDITION_OCCURRENCE: &[(&str, Target)] = &[
    ("conceptset", Event("condition_concept_id")),
    ("first", First),
    ("age", AgeAt("condition_start_date")),
    ("gender", GENDER),
    ("conditionStatus", Event("condition_status_concept_id")),
    ("startDate", Event("condition_start_date")),
    ("endDate", Event("condition_end_date")),
    ("conditionType", Event("condition_type_concept_id")),
    ("visitType", VisitConcept),
    ("stopReason", Event("stop_reason")),
    ("source", Event("condition_source_concept_id")),
    ("providerSpecialty", ProviderSpecialty),
];

const DEATH: &[(&str, Target)] = &[
    ("conceptset", Event("cause_concept_id")),
    ("age", AgeAt("death_date")),
    ("gender", GENDER),
    ("date", Event("death_date")),
    ("deathType", Event("death_type_concept_id")),
    ("cause", Event("cause_source_concept_id")),
];

const DEVICE_EXPOSURE: &[(&str, Target)] = &[
    ("conceptset", Event("device_concept_id")),
    ("first", First),
    ("age", AgeAt("device_exposure_start_date")),
    ("gender", GENDER),
    ("startDate", Event("device_exposure_start_date")),
    ("endDate", Event("device_exposure_end_date")),
    ("deviceType", Event("device_type_concept_id")),
    ("visitType", VisitConcept),
    ("uniqueDeviceId", Event("unique_device_id")),
    ("quantity", Event("quantity")),
    ("source", Event("device_source_concept_id")),
    ("providerSpecialty", ProviderSpecialty),
];

const DOSE_ERA: &[(&str, Target)] = &[
    ("conceptset", Event("drug_concept_id")),
    ("first", First),
    ("startAge", AgeAt("dose_era_start_date")),
    ("endAge", AgeAt("dose_era_end_date")),
    ("gender", GENDER),
    ("startDate", Event("dose_era_start_date")),
    ("endDate", Event("dose_era_end_date")),
    ("doseUnit", Event("unit_concept_id")),
    ("length", YearsBetween("dose_era_start_date", "dose_era_end_date")),
    ("doseValue", Event("dose_value")),
];

const DRUG_ERA: &[(&str, Target)] = &[
    ("conceptset", Event("drug_concept_id")),
    ("first", First),
    ("startAge", AgeAt("drug_era_start_date")),
    ("endAge", AgeAt("drug_era_end_date")),
    ("gender", GENDER),
    ("startDate", Event("drug_era_start_date")),
    ("endDate", Event("drug_era_end_date")),
    ("length", YearsBetween("drug_era_start_date", "drug_era_end_date")),
    ("eraExposureCount", Event("drug_exposure_count")),
];

const DRUG_EXPOSURE: &[(&str, Target)] = &[
    ("conceptset", Event("drug_concept_id")),
    ("first", First),
    ("age", AgeAt("drug_exposure_start_date")),
    ("gender", GENDER),
    ("startDate", Event("drug_exposure_start_date")),
    ("endDate", Event("drug_exposure_end_date")),
    ("drugType", Event("drug_type_concept_id")),
    ("visitType", VisitConcept),
    ("stopReason", Event("stop_reason")),
    ("refill", Event("refills")),
    ("quantity", Event("quantity")),
    ("daysSupply", Event("days_supply")),
    ("routeType", Event("route_concept_id")),
    ("effectiveDose", Event("effective_drug_dose")),
    ("doseUnit", Event("dose_unit_concept_id")),
    ("lotNumber", Event("lot_number")),
    ("source", Event("drug_source_concept_id")),
    ("providerSpecialty", ProviderSpecialty),
];

const MEASUREMENT: &[(&str, Target)] = &[
    ("conceptset", Event("measurement_concept_id")),
    ("first", First),
    ("age", AgeAt("measurement_date")),
    ("gender", GENDER),
    ("date", Event("measurement_date")),
    ("measurementType", Event("measurement_type_concept_id")),
    ("visitType", VisitConcept),
    ("operatorType", Event("operator_concept_id")),
    ("valueAsNumber", Event("value_as_number")),
    ("valueAsConcept", Event("value_as_concept_id")),
    ("unitType", Event("unit_concept_id")),
    ("abnormal", Abnormal),
    ("rangeLow", Event("range_low")),
    ("rangeHigh", Event("range_high")),
    ("providerSpecialty", ProviderSpecialty),
    ("source", Event("measurement_source_concept_id")),
];

const OBSERVATION: &[(&str, Target)] = &[
    ("conceptset", Event("observation_concept_id")),
    ("first", First),
    ("age", AgeAt("observation_date")),
    ("gender", GENDER),
    ("date", Event("observation_date")),
    ("observationType", Event("observation_type_concept_id")),
    ("visitType", VisitConcept),
    ("valueAsNumber", Event("value_as_number")),
    ("valueAsString", Event("value_as_string")),
    ("valueAsConcept", Event("value_as_concept_id")),
    ("qualifierType", Event("qualifier_concept_id")),
    ("unitType", Event("unit_concept_id")),
    ("source", Event("observation_source_concept_id")),
    ("providerSpecialty", ProviderSpecialty),
];

const OBSERVATION_PERIOD: &[(&str, Target)] = &[
    ("first", First),
    ("startAge", AgeAt("observation_period_start_date")),
    ("endAge", AgeAt("observation_period_end_date")),
    ("startDate", Event("observation_period_start_date")),
    ("endDate", Event("observation_period_end_date")),
    ("periodType", Event("period_type_concept_id")),
    (
        "length",
        YearsBetween("observation_period_start_date", "observation_period_end_date"),
    ),
];

const PROCEDURE_OCCURRENCE: &[(&str, Target)] = &[
    ("conceptset", Event("procedure_concept_id")),
    ("first", First),
    ("age", AgeAt("procedure_date")),
    ("gender", GENDER),
    ("startDate", Event("procedure_date")),
    ("procedureType", Event("procedure_type_concept_id")),
    ("visitType", VisitConcept),
    ("modifierType", Event("modifier_concept_id")),
    ("quantity", Event("quantity")),
    ("source", Event("procedure_source_concept_id")),
    ("providerSpecialty", ProviderSpecialty),
];

const SPECIMEN: &[(&str, Target)] = &[
    ("conceptset", Event("specimen_concept_id")),
    ("first", First),
    ("age", AgeAt("specimen_date")),
    ("gender", GENDER),
    ("date", Event("specimen_date")),
    ("specimenType", Event("specimen_type_concept_id")),
    ("quantity", Event("quantity")),
    ("unitType", Event("unit_concept_id")),
    ("anatomicSiteType", Event("anatomic_site_concept_id")),
    ("diseaseStatus", Event("disease_status_concept_id")),
];

const VISIT_OCCURRENCE: &[(&str, Target)] = &[
    ("conceptset", Event("visit_concept_id")),
    ("first", First),
    ("age", AgeAt("visit_start_date")),
    ("gender", GENDER),
    ("startDate", Event("visit_start_date")),
    ("endDate", Event("visit_end_date")),
    // The visit itself, not a linked visit
    ("visitType", Event("visit_concept_id")),
    ("length", YearsBetween("visit_start_date", "visit_end_date")),
    ("source", Event("visit_source_concept_id")),
    ("providerSpecialty", ProviderSpecialty),
    ("placeOfService", PlaceOfService),
];

const DEMOGRAPHIC: &[(&str, Target)] = &[
    ("age", AgeAt("observation_period_start_date")),
    ("gender", GENDER),
    ("startDate", Event("observation_period_start_date")),
    ("endDate", Event("observation_period_end_date")),
    ("raceType", Person("race_concept_id")),
    ("ethnicityType", Person("ethnicity_concept_id")),
];

fn targets(filter: &Filter) -> &'static [(&'static str, Target)] {
    match filter {
        Filter::ConditionEra(_) => CONDITION_ERA,
        Filter::ConditionOccurrence(_) => CONDITION_OCCURRENCE,
        Filter::Death(_) => DEATH,
        Filter::DeviceExposure(_) => DEVICE_EXPOSURE,
        Filter::DoseEra(_) => DOSE_ERA,
        Filter::DrugEra(_) => DRUG_ERA,
        Filter::DrugExposure(_) => DRUG_EXPOSURE,
        Filter::Measurement(_) => MEASUREMENT,
        Filter::Observation(_) => OBSERVATION,
        Filter::ObservationPeriod(_) => OBSERVATION_PERIOD,
        Filter::ProcedureOccurrence(_) => PROCEDURE_OCCURRENCE,
        Filter::Specimen(_) => SPECIMEN,
        Filter::VisitOccurrence(_) => VISIT_OCCURRENCE,
        Filter::Demographic(_) => DEMOGRAPHIC,
    }
}

/// Target of the wire field `name` of `filter`
pub(crate) fn target(filter: &Filter, name: &str) -> Option<Target> {
    targets(filter)
        .iter()
        .find(|(wire, _)| *wire == name)
        .map(|(_, target)| *target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use octofhir_cohort_model::FILTER_TYPES;

    fn all_fields(type_name: &str) -> serde_json::Value {
        // Every field with a value accepted by its kind
        let filter: Filter = serde_json::from_str(&format!(r#"{{"type": "{type_name}"}}"#)).unwrap();
        let mut object = serde_json::Map::new();
        object.insert("type".into(), type_name.into());
        for (wire, _) in targets(&filter) {
            let value = match *wire {
                "first" | "abnormal" => serde_json::json!(true),
                "startDate" | "endDate" | "date" => serde_json::json!("2020-01-01"),
                "stopReason" | "uniqueDeviceId" | "lotNumber" | "valueAsString" => {
                    serde_json::json!("x")
                }
                _ => serde_json::json!(1),
            };
            object.insert((*wire).to_string(), value);
        }
        serde_json::Value::Object(object)
    }

    #[test]
    fn test_every_model_field_has_a_target() {
        for type_name in FILTER_TYPES {
            let filter: Filter = serde_json::from_value(all_fields(type_name)).unwrap();
            let fields = filter.fields();
            assert_eq!(fields.len(), targets(&filter).len(), "{type_name}");
            for (wire, _) in fields {
                assert!(target(&filter, wire).is_some(), "{type_name}.{wire}");
            }
        }
    }
}
