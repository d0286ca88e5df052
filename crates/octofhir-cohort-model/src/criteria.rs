//! Domain criteria of the circe tree grammar
//!
//! [`Criteria`] is externally tagged by domain name, e.g.
//! `{"ConditionOccurrence": {"CodesetId": 1, "First": true}}`. Every variant maps to
//! exactly one CDM event table.

use crate::{Concept, CriteriaGroup, DateAdjustment, DateRange, NumericRange, Period, TextFilter};
use serde::{Deserialize, Serialize};

/// Fields every domain criteria understands
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CriteriaCommon {
    /// Concept set restricting the domain concept column
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codeset_id: Option<i64>,
    /// Keep only the earliest event per person
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurrence_start_date: Option<DateRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurrence_end_date: Option<DateRange>,
    /// Age at event start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<NumericRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Vec<Concept>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender_exclude: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_adjustment: Option<DateAdjustment>,
    /// Group evaluated against this criteria's own events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlated_criteria: Option<CriteriaGroup>,
}

impl CriteriaCommon {
    pub fn is_first(&self) -> bool {
        self.first.unwrap_or(false)
    }
}

/// Provider and visit filters available on visit-linked domains
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EncounterFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_specialty: Option<Vec<Concept>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visit_type: Option<Vec<Concept>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visit_type_exclude: Option<bool>,
}

macro_rules! criteria_struct {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$fmeta:meta])* $field:ident : $ty:ty),* $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        #[serde(rename_all = "PascalCase")]
        pub struct $name {
            #[serde(flatten)]
            pub common: CriteriaCommon,
            $(
                $(#[$fmeta])*
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub $field: Option<$ty>,
            )*
        }
    };
    (
        $(#[$meta:meta])*
        $name:ident with encounter { $($(#[$fmeta:meta])* $field:ident : $ty:ty),* $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        #[serde(rename_all = "PascalCase")]
        pub struct $name {
            #[serde(flatten)]
            pub common: CriteriaCommon,
            #[serde(flatten)]
            pub encounter: EncounterFilters,
            $(
                $(#[$fmeta])*
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub $field: Option<$ty>,
            )*
        }
    };
}

criteria_struct! {
    /// `condition_occurrence` rows
    ConditionOccurrence with encounter {
        condition_type: Vec<Concept>,
        condition_type_exclude: bool,
        condition_status: Vec<Concept>,
        condition_status_exclude: bool,
        stop_reason: TextFilter,
        /// Codeset matched against `condition_source_concept_id`
        condition_source_concept: i64,
    }
}

criteria_struct! {
    /// `condition_era` rows
    ConditionEra {
        era_start_date: DateRange,
        era_end_date: DateRange,
        occurrence_count: NumericRange,
        era_length: NumericRange,
        age_at_start: NumericRange,
        age_at_end: NumericRange,
    }
}

criteria_struct! {
    /// `death` rows
    Death {
        death_type: Vec<Concept>,
        death_type_exclude: bool,
        death_source_concept: i64,
    }
}

criteria_struct! {
    /// `device_exposure` rows
    DeviceExposure with encounter {
        device_type: Vec<Concept>,
        device_type_exclude: bool,
        unique_device_id: TextFilter,
        quantity: NumericRange,
        device_source_concept: i64,
    }
}

criteria_struct! {
    /// `dose_era` rows
    DoseEra {
        era_start_date: DateRange,
        era_end_date: DateRange,
        era_length: NumericRange,
        age_at_start: NumericRange,
        age_at_end: NumericRange,
        unit: Vec<Concept>,
        dose_value: NumericRange,
    }
}

criteria_struct! {
    /// `drug_era` rows
    DrugEra {
        era_start_date: DateRange,
        era_end_date: DateRange,
        era_length: NumericRange,
        occurrence_count: NumericRange,
        gap_days: NumericRange,
        age_at_start: NumericRange,
        age_at_end: NumericRange,
    }
}

criteria_struct! {
    /// `drug_exposure` rows
    DrugExposure with encounter {
        drug_type: Vec<Concept>,
        drug_type_exclude: bool,
        stop_reason: TextFilter,
        refills: NumericRange,
        quantity: NumericRange,
        days_supply: NumericRange,
        route_concept: Vec<Concept>,
        effective_drug_dose: NumericRange,
        dose_unit: Vec<Concept>,
        lot_number: TextFilter,
        drug_source_concept: i64,
    }
}

criteria_struct! {
    /// `measurement` rows
    Measurement with encounter {
        measurement_type: Vec<Concept>,
        measurement_type_exclude: bool,
        operator: Vec<Concept>,
        value_as_number: NumericRange,
        value_as_concept: Vec<Concept>,
        unit: Vec<Concept>,
        range_low: NumericRange,
        range_high: NumericRange,
        range_low_ratio: NumericRange,
        range_high_ratio: NumericRange,
        /// Value outside the reference range or flagged abnormal
        abnormal: bool,
        measurement_source_concept: i64,
    }
}

criteria_struct! {
    /// `observation` rows
    Observation with encounter {
        observation_type: Vec<Concept>,
        observation_type_exclude: bool,
        value_as_number: NumericRange,
        value_as_string: TextFilter,
        value_as_concept: Vec<Concept>,
        qualifier: Vec<Concept>,
        unit: Vec<Concept>,
        observation_source_concept: i64,
    }
}

criteria_struct! {
    /// `observation_period` rows
    ObservationPeriod {
        period_start_date: DateRange,
        period_end_date: DateRange,
        period_type: Vec<Concept>,
        period_type_exclude: bool,
        period_length: NumericRange,
        age_at_start: NumericRange,
        age_at_end: NumericRange,
        /// Keep periods spanning these dates
        user_defined_period: Period,
    }
}

criteria_struct! {
    /// `payer_plan_period` rows; concept filters are codeset references
    PayerPlanPeriod {
        period_start_date: DateRange,
        period_end_date: DateRange,
        period_length: NumericRange,
        age_at_start: NumericRange,
        age_at_end: NumericRange,
        user_defined_period: Period,
        payer_concept: i64,
        plan_concept: i64,
        sponsor_concept: i64,
        stop_reason_concept: i64,
        payer_source_concept: i64,
        plan_source_concept: i64,
        sponsor_source_concept: i64,
        stop_reason_source_concept: i64,
    }
}

criteria_struct! {
    /// `procedure_occurrence` rows
    ProcedureOccurrence with encounter {
        procedure_type: Vec<Concept>,
        procedure_type_exclude: bool,
        modifier: Vec<Concept>,
        quantity: NumericRange,
        procedure_source_concept: i64,
    }
}

criteria_struct! {
    /// `specimen` rows
    Specimen {
        specimen_type: Vec<Concept>,
        specimen_type_exclude: bool,
        quantity: NumericRange,
        unit: Vec<Concept>,
        anatomic_site: Vec<Concept>,
        disease_status: Vec<Concept>,
        source_id: TextFilter,
    }
}

criteria_struct! {
    /// `visit_occurrence` rows; `VisitType` filters the visit itself
    VisitOccurrence {
        visit_type: Vec<Concept>,
        visit_type_exclude: bool,
        visit_length: NumericRange,
        provider_specialty: Vec<Concept>,
        place_of_service: Vec<Concept>,
        visit_source_concept: i64,
    }
}

criteria_struct! {
    /// `visit_detail` rows
    VisitDetail {
        visit_detail_start_date: DateRange,
        visit_detail_end_date: DateRange,
        visit_detail_type: Vec<Concept>,
        visit_detail_type_exclude: bool,
        visit_detail_length: NumericRange,
        provider_specialty: Vec<Concept>,
        place_of_service: Vec<Concept>,
        visit_detail_source_concept: i64,
    }
}

/// A domain criteria
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Criteria {
    ConditionOccurrence(ConditionOccurrence),
    ConditionEra(ConditionEra),
    Death(Death),
    DeviceExposure(DeviceExposure),
    DoseEra(DoseEra),
    DrugEra(DrugEra),
    DrugExposure(DrugExposure),
    Measurement(Measurement),
    Observation(Observation),
    ObservationPeriod(ObservationPeriod),
    PayerPlanPeriod(PayerPlanPeriod),
    ProcedureOccurrence(ProcedureOccurrence),
    Specimen(Specimen),
    VisitOccurrence(VisitOccurrence),
    VisitDetail(VisitDetail),
}

/// Tags accepted for [`Criteria`]
pub const CRITERIA_TYPES: &[&str] = &[
    "ConditionOccurrence",
    "ConditionEra",
    "Death",
    "DeviceExposure",
    "DoseEra",
    "DrugEra",
    "DrugExposure",
    "Measurement",
    "Observation",
    "ObservationPeriod",
    "PayerPlanPeriod",
    "ProcedureOccurrence",
    "Specimen",
    "VisitOccurrence",
    "VisitDetail",
];

/// Circe tags that are recognized but not compiled
pub const UNSUPPORTED_CRITERIA_TYPES: &[&str] = &["LocationRegion"];

impl Criteria {
    /// Wire tag of the variant
    pub fn type_name(&self) -> &'static str {
        match self {
            Criteria::ConditionOccurrence(_) => "ConditionOccurrence",
            Criteria::ConditionEra(_) => "ConditionEra",
            Criteria::Death(_) => "Death",
            Criteria::DeviceExposure(_) => "DeviceExposure",
            Criteria::DoseEra(_) => "DoseEra",
            Criteria::DrugEra(_) => "DrugEra",
            Criteria::DrugExposure(_) => "DrugExposure",
            Criteria::Measurement(_) => "Measurement",
            Criteria::Observation(_) => "Observation",
            Criteria::ObservationPeriod(_) => "ObservationPeriod",
            Criteria::PayerPlanPeriod(_) => "PayerPlanPeriod",
            Criteria::ProcedureOccurrence(_) => "ProcedureOccurrence",
            Criteria::Specimen(_) => "Specimen",
            Criteria::VisitOccurrence(_) => "VisitOccurrence",
            Criteria::VisitDetail(_) => "VisitDetail",
        }
    }

    pub fn common(&self) -> &CriteriaCommon {
        match self {
            Criteria::ConditionOccurrence(c) => &c.common,
            Criteria::ConditionEra(c) => &c.common,
            Criteria::Death(c) => &c.common,
            Criteria::DeviceExposure(c) => &c.common,
            Criteria::DoseEra(c) => &c.common,
            Criteria::DrugEra(c) => &c.common,
            Criteria::DrugExposure(c) => &c.common,
            Criteria::Measurement(c) => &c.common,
            Criteria::Observation(c) => &c.common,
            Criteria::ObservationPeriod(c) => &c.common,
            Criteria::PayerPlanPeriod(c) => &c.common,
            Criteria::ProcedureOccurrence(c) => &c.common,
            Criteria::Specimen(c) => &c.common,
            Criteria::VisitOccurrence(c) => &c.common,
            Criteria::VisitDetail(c) => &c.common,
        }
    }

    /// Codeset references as `(field name, codeset id)`, excluding correlated criteria
    pub fn codeset_references(&self) -> Vec<(&'static str, i64)> {
        let mut refs = Vec::new();
        let mut push = |name: &'static str, id: Option<i64>| {
            if let Some(id) = id {
                refs.push((name, id));
            }
        };
        push("CodesetId", self.common().codeset_id);
        match self {
            Criteria::ConditionOccurrence(c) => {
                push("ConditionSourceConcept", c.condition_source_concept)
            }
            Criteria::Death(c) => push("DeathSourceConcept", c.death_source_concept),
            Criteria::DeviceExposure(c) => push("DeviceSourceConcept", c.device_source_concept),
            Criteria::DrugExposure(c) => push("DrugSourceConcept", c.drug_source_concept),
            Criteria::Measurement(c) => {
                push("MeasurementSourceConcept", c.measurement_source_concept)
            }
            Criteria::Observation(c) => {
                push("ObservationSourceConcept", c.observation_source_concept)
            }
            Criteria::PayerPlanPeriod(c) => {
                push("PayerConcept", c.payer_concept);
                push("PlanConcept", c.plan_concept);
                push("SponsorConcept", c.sponsor_concept);
                push("StopReasonConcept", c.stop_reason_concept);
                push("PayerSourceConcept", c.payer_source_concept);
                push("PlanSourceConcept", c.plan_source_concept);
                push("SponsorSourceConcept", c.sponsor_source_concept);
                push("StopReasonSourceConcept", c.stop_reason_source_concept);
            }
            Criteria::ProcedureOccurrence(c) => {
                push("ProcedureSourceConcept", c.procedure_source_concept)
            }
            Criteria::VisitOccurrence(c) => push("VisitSourceConcept", c.visit_source_concept),
            Criteria::VisitDetail(c) => {
                push("VisitDetailSourceConcept", c.visit_detail_source_concept)
            }
            Criteria::ConditionEra(_)
            | Criteria::DoseEra(_)
            | Criteria::DrugEra(_)
            | Criteria::ObservationPeriod(_)
            | Criteria::Specimen(_) => {}
        }
        refs
    }

    /// Numeric ranges as `(field name, range)`, used for `bt` extent checks
    pub fn numeric_ranges(&self) -> Vec<(&'static str, &NumericRange)> {
        let common = self.common();
        let mut ranges: Vec<(&'static str, &NumericRange)> = Vec::new();
        if let Some(age) = &common.age {
            ranges.push(("Age", age));
        }
        let extra: Vec<(&'static str, &Option<NumericRange>)> = match self {
            Criteria::ConditionEra(c) => vec![
                ("OccurrenceCount", &c.occurrence_count),
                ("EraLength", &c.era_length),
                ("AgeAtStart", &c.age_at_start),
                ("AgeAtEnd", &c.age_at_end),
            ],
            Criteria::DeviceExposure(c) => vec![("Quantity", &c.quantity)],
            Criteria::DoseEra(c) => vec![
                ("EraLength", &c.era_length),
                ("AgeAtStart", &c.age_at_start),
                ("AgeAtEnd", &c.age_at_end),
                ("DoseValue", &c.dose_value),
            ],
            Criteria::DrugEra(c) => vec![
                ("EraLength", &c.era_length),
                ("OccurrenceCount", &c.occurrence_count),
                ("GapDays", &c.gap_days),
                ("AgeAtStart", &c.age_at_start),
                ("AgeAtEnd", &c.age_at_end),
            ],
            Criteria::DrugExposure(c) => vec![
                ("Refills", &c.refills),
                ("Quantity", &c.quantity),
                ("DaysSupply", &c.days_supply),
                ("EffectiveDrugDose", &c.effective_drug_dose),
            ],
            Criteria::Measurement(c) => vec![
                ("ValueAsNumber", &c.value_as_number),
                ("RangeLow", &c.range_low),
                ("RangeHigh", &c.range_high),
                ("RangeLowRatio", &c.range_low_ratio),
                ("RangeHighRatio", &c.range_high_ratio),
            ],
            Criteria::Observation(c) => vec![("ValueAsNumber", &c.value_as_number)],
            Criteria::ObservationPeriod(c) => vec![
                ("PeriodLength", &c.period_length),
                ("AgeAtStart", &c.age_at_start),
                ("AgeAtEnd", &c.age_at_end),
            ],
            Criteria::PayerPlanPeriod(c) => vec![
                ("PeriodLength", &c.period_length),
                ("AgeAtStart", &c.age_at_start),
                ("AgeAtEnd", &c.age_at_end),
            ],
            Criteria::ProcedureOccurrence(c) => vec![("Quantity", &c.quantity)],
            Criteria::Specimen(c) => vec![("Quantity", &c.quantity)],
            Criteria::VisitOccurrence(c) => vec![("VisitLength", &c.visit_length)],
            Criteria::VisitDetail(c) => vec![("VisitDetailLength", &c.visit_detail_length)],
            Criteria::ConditionOccurrence(_) | Criteria::Death(_) => vec![],
        };
        ranges.extend(
            extra
                .into_iter()
                .filter_map(|(name, range)| range.as_ref().map(|r| (name, r))),
        );
        ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RangeOp;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_externally_tagged_criteria() {
        let json = r#"{"ConditionOccurrence": {
            "CodesetId": 1,
            "First": true,
            "ConditionType": [{"CONCEPT_ID": 32020}],
            "ConditionTypeExclude": true,
            "VisitType": [9201],
            "Age": {"Value": 18, "Op": "gte"}
        }}"#;
        let criteria: Criteria = serde_json::from_str(json).unwrap();
        let Criteria::ConditionOccurrence(co) = &criteria else {
            panic!("expected condition occurrence");
        };
        assert_eq!(criteria.type_name(), "ConditionOccurrence");
        assert!(co.common.is_first());
        assert_eq!(co.common.codeset_id, Some(1));
        assert_eq!(co.condition_type, Some(vec![Concept::new(32020)]));
        assert_eq!(co.condition_type_exclude, Some(true));
        assert_eq!(co.encounter.visit_type, Some(vec![Concept::new(9201)]));
        assert_eq!(co.common.age.as_ref().map(|a| a.op), Some(RangeOp::Gte));
    }

    #[test]
    fn test_codeset_references() {
        let json = r#"{"DrugExposure": {"CodesetId": 2, "DrugSourceConcept": 5}}"#;
        let criteria: Criteria = serde_json::from_str(json).unwrap();
        assert_eq!(
            criteria.codeset_references(),
            vec![("CodesetId", 2), ("DrugSourceConcept", 5)]
        );
    }

    #[test]
    fn test_numeric_ranges() {
        let json = r#"{"Measurement": {
            "ValueAsNumber": {"Value": 7, "Op": "bt"},
            "Age": {"Value": 40, "Op": "lt"}
        }}"#;
        let criteria: Criteria = serde_json::from_str(json).unwrap();
        let names: Vec<_> = criteria.numeric_ranges().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Age", "ValueAsNumber"]);
    }

    #[test]
    fn test_nested_correlated_criteria() {
        let json = r#"{"VisitOccurrence": {
            "CorrelatedCriteria": {"Type": "ALL", "CriteriaList": []}
        }}"#;
        let criteria: Criteria = serde_json::from_str(json).unwrap();
        assert!(criteria.common().correlated_criteria.is_some());
    }

    #[test]
    fn test_all_tags_round_trip_through_type_name() {
        for tag in CRITERIA_TYPES {
            let json = format!("{{\"{tag}\": {{}}}}");
            let criteria: Criteria = serde_json::from_str(&json).unwrap();
            assert_eq!(criteria.type_name(), *tag);
        }
    }
}
