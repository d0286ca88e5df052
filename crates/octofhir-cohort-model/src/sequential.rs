//! Sequential grammar: groups of containers of domain filters
//!
//! ```json
//! {
//!   "conceptsets": [{"conceptset_id": "1", "items": [{"concept_id": "201826"}]}],
//!   "groups": [
//!     {"containers": [
//!       {"name": "T2DM", "filters": [{"type": "condition_era", "conceptset": "1", "first": true}]},
//!       {"name": "no insulin", "operator": "NOT", "filters": [{"type": "drug_exposure", "conceptset": "2"}]}
//!     ]},
//!     {"not": true, "containers": [{"filters": [{"type": "death"}]}]}
//!   ]
//! }
//! ```
//!
//! A bare array of groups is accepted as well.

use crate::{ConceptSet, Identifier, Operator, TextOperator};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Root
// ============================================================================

/// Aggregate root of the sequential grammar
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "CohortRepr")]
pub struct Cohort {
    pub conceptsets: Vec<ConceptSet>,
    pub groups: Vec<Group>,
}

impl Cohort {
    pub fn new(conceptsets: Vec<ConceptSet>, groups: Vec<Group>) -> Self {
        Self {
            conceptsets,
            groups,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CohortRepr {
    Object {
        #[serde(default, alias = "conceptSets", alias = "concept_sets")]
        conceptsets: Vec<ConceptSet>,
        #[serde(alias = "cohort")]
        groups: Vec<Group>,
    },
    Groups(Vec<Group>),
}

impl From<CohortRepr> for Cohort {
    fn from(repr: CohortRepr) -> Self {
        match repr {
            CohortRepr::Object {
                conceptsets,
                groups,
            } => Cohort::new(conceptsets, groups),
            CohortRepr::Groups(groups) => Cohort::new(Vec::new(), groups),
        }
    }
}

/// Ordered containers; the group result is AND-ed into the cohort
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    #[serde(default)]
    pub containers: Vec<Container>,
    /// Contribute the complement of the group instead of the group
    #[serde(default, alias = "not", skip_serializing_if = "Option::is_none")]
    pub negate: Option<bool>,
}

impl Group {
    pub fn is_negated(&self) -> bool {
        self.negate.unwrap_or(false)
    }
}

/// AND of filters combined with the running result by `operator`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    /// Ignored on the first container of a group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<ContainerOperator>,
}

impl Container {
    pub fn operator(&self) -> ContainerOperator {
        self.operator.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContainerOperator {
    #[default]
    And,
    Or,
    Not,
}

impl fmt::Display for ContainerOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ContainerOperator::And => "AND",
            ContainerOperator::Or => "OR",
            ContainerOperator::Not => "NOT",
        })
    }
}

// ============================================================================
// Filters
// ============================================================================

/// Borrowed view of one present filter field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterField<'a> {
    Number(&'a Operator<Decimal>),
    /// Concept id compared directly against a column
    Concept(&'a Operator<Identifier>),
    /// Concept set id; the column must be a member of the codeset
    Codeset(&'a Operator<Identifier>),
    Date(&'a Operator<NaiveDate>),
    Text(&'a TextOperator),
    Flag(bool),
}

macro_rules! filter_type {
    (number) => { Operator<Decimal> };
    (concept) => { Operator<Identifier> };
    (codeset) => { Operator<Identifier> };
    (date) => { Operator<NaiveDate> };
    (text) => { TextOperator };
    (flag) => { bool };
}

macro_rules! filter_field {
    (number, $v:expr) => { FilterField::Number($v) };
    (concept, $v:expr) => { FilterField::Concept($v) };
    (codeset, $v:expr) => { FilterField::Codeset($v) };
    (date, $v:expr) => { FilterField::Date($v) };
    (text, $v:expr) => { FilterField::Text($v) };
    (flag, $v:expr) => { FilterField::Flag(*$v) };
}

macro_rules! filter_struct {
    (
        $(#[$meta:meta])*
        $name:ident { $($field:ident => $wire:literal : $kind:ident),* $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub struct $name {
            $(
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub $field: Option<filter_type!($kind)>,
            )*
        }

        impl $name {
            /// Present fields as `(wire name, value)` in declaration order
            pub fn fields(&self) -> Vec<(&'static str, FilterField<'_>)> {
                let mut fields = Vec::new();
                $(
                    if let Some(value) = &self.$field {
                        fields.push(($wire, filter_field!($kind, value)));
                    }
                )*
                fields
            }
        }
    };
}

filter_struct! {
    ConditionEraFilter {
        conceptset => "conceptset": codeset,
        first => "first": flag,
        start_age => "startAge": number,
        end_age => "endAge": number,
        gender => "gender": concept,
        start_date => "startDate": date,
        end_date => "endDate": date,
        condition_count => "conditionCount": number,
        length => "length": number,
    }
}

filter_struct! {
    ConditionOccurrenceFilter {
        conceptset => "conceptset": codeset,
        first => "first": flag,
        age => "age": number,
        gender => "gender": concept,
        condition_status => "conditionStatus": concept,
        start_date => "startDate": date,
        end_date => "endDate": date,
        condition_type => "conditionType": concept,
        visit_type => "visitType": concept,
        stop_reason => "stopReason": text,
        source => "source": codeset,
        provider_specialty => "providerSpecialty": concept,
    }
}

filter_struct! {
    DeathFilter {
        conceptset => "conceptset": codeset,
        age => "age": number,
        gender => "gender": concept,
        date => "date": date,
        death_type => "deathType": concept,
        cause => "cause": codeset,
    }
}

filter_struct! {
    DeviceExposureFilter {
        conceptset => "conceptset": codeset,
        first => "first": flag,
        age => "age": number,
        gender => "gender": concept,
        start_date => "startDate": date,
        end_date => "endDate": date,
        device_type => "deviceType": concept,
        visit_type => "visitType": concept,
        unique_device_id => "uniqueDeviceId": text,
        quantity => "quantity": number,
        source => "source": codeset,
        provider_specialty => "providerSpecialty": concept,
    }
}

filter_struct! {
    DoseEraFilter {
        conceptset => "conceptset": codeset,
        first => "first": flag,
        start_age => "startAge": number,
        end_age => "endAge": number,
        gender => "gender": concept,
        start_date => "startDate": date,
        end_date => "endDate": date,
        dose_unit => "doseUnit": concept,
        length => "length": number,
        dose_value => "doseValue": number,
    }
}

filter_struct! {
    DrugEraFilter {
        conceptset => "conceptset": codeset,
        first => "first": flag,
        start_age => "startAge": number,
        end_age => "endAge": number,
        gender => "gender": concept,
        start_date => "startDate": date,
        end_date => "endDate": date,
        length => "length": number,
        era_exposure_count => "eraExposureCount": number,
    }
}

filter_struct! {
    DrugExposureFilter {
        conceptset => "conceptset": codeset,
        first => "first": flag,
        age => "age": number,
        gender => "gender": concept,
        start_date => "startDate": date,
        end_date => "endDate": date,
        drug_type => "drugType": concept,
        visit_type => "visitType": concept,
        stop_reason => "stopReason": text,
        refill => "refill": number,
        quantity => "quantity": number,
        days_supply => "daysSupply": number,
        route_type => "routeType": concept,
        effective_dose => "effectiveDose": number,
        dose_unit => "doseUnit": concept,
        lot_number => "lotNumber": text,
        source => "source": codeset,
        provider_specialty => "providerSpecialty": concept,
    }
}

filter_struct! {
    MeasurementFilter {
        conceptset => "conceptset": codeset,
        first => "first": flag,
        age => "age": number,
        gender => "gender": concept,
        date => "date": date,
        measurement_type => "measurementType": concept,
        visit_type => "visitType": concept,
        operator_type => "operatorType": concept,
        value_as_number => "valueAsNumber": number,
        value_as_concept => "valueAsConcept": concept,
        unit_type => "unitType": concept,
        abnormal => "abnormal": flag,
        range_low => "rangeLow": number,
        range_high => "rangeHigh": number,
        provider_specialty => "providerSpecialty": concept,
        source => "source": codeset,
    }
}

filter_struct! {
    ObservationFilter {
        conceptset => "conceptset": codeset,
        first => "first": flag,
        age => "age": number,
        gender => "gender": concept,
        date => "date": date,
        observation_type => "observationType": concept,
        visit_type => "visitType": concept,
        value_as_number => "valueAsNumber": number,
        value_as_string => "valueAsString": text,
        value_as_concept => "valueAsConcept": concept,
        qualifier_type => "qualifierType": concept,
        unit_type => "unitType": concept,
        source => "source": codeset,
        provider_specialty => "providerSpecialty": concept,
    }
}

filter_struct! {
    ObservationPeriodFilter {
        first => "first": flag,
        start_age => "startAge": number,
        end_age => "endAge": number,
        start_date => "startDate": date,
        end_date => "endDate": date,
        period_type => "periodType": concept,
        length => "length": number,
    }
}

filter_struct! {
    ProcedureOccurrenceFilter {
        conceptset => "conceptset": codeset,
        first => "first": flag,
        age => "age": number,
        gender => "gender": concept,
        start_date => "startDate": date,
        procedure_type => "procedureType": concept,
        visit_type => "visitType": concept,
        modifier_type => "modifierType": concept,
        quantity => "quantity": number,
        source => "source": codeset,
        provider_specialty => "providerSpecialty": concept,
    }
}

filter_struct! {
    SpecimenFilter {
        conceptset => "conceptset": codeset,
        first => "first": flag,
        age => "age": number,
        gender => "gender": concept,
        date => "date": date,
        specimen_type => "specimenType": concept,
        quantity => "quantity": number,
        unit_type => "unitType": concept,
        anatomic_site_type => "anatomicSiteType": concept,
        disease_status => "diseaseStatus": concept,
    }
}

filter_struct! {
    VisitOccurrenceFilter {
        conceptset => "conceptset": codeset,
        first => "first": flag,
        age => "age": number,
        gender => "gender": concept,
        start_date => "startDate": date,
        end_date => "endDate": date,
        visit_type => "visitType": concept,
        length => "length": number,
        source => "source": codeset,
        provider_specialty => "providerSpecialty": concept,
        place_of_service => "placeOfService": concept,
    }
}

filter_struct! {
    /// Person attributes, evaluated against observation periods
    DemographicFilter {
        age => "age": number,
        gender => "gender": concept,
        start_date => "startDate": date,
        end_date => "endDate": date,
        race_type => "raceType": concept,
        ethnicity_type => "ethnicityType": concept,
    }
}

/// A domain filter, internally tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    ConditionEra(ConditionEraFilter),
    ConditionOccurrence(ConditionOccurrenceFilter),
    Death(DeathFilter),
    DeviceExposure(DeviceExposureFilter),
    DoseEra(DoseEraFilter),
    DrugEra(DrugEraFilter),
    DrugExposure(DrugExposureFilter),
    Measurement(MeasurementFilter),
    Observation(ObservationFilter),
    ObservationPeriod(ObservationPeriodFilter),
    ProcedureOccurrence(ProcedureOccurrenceFilter),
    Specimen(SpecimenFilter),
    VisitOccurrence(VisitOccurrenceFilter),
    Demographic(DemographicFilter),
}

/// Tags accepted for [`Filter`]
pub const FILTER_TYPES: &[&str] = &[
    "condition_era",
    "condition_occurrence",
    "death",
    "device_exposure",
    "dose_era",
    "drug_era",
    "drug_exposure",
    "measurement",
    "observation",
    "observation_period",
    "procedure_occurrence",
    "specimen",
    "visit_occurrence",
    "demographic",
];

impl Filter {
    pub fn type_name(&self) -> &'static str {
        match self {
            Filter::ConditionEra(_) => "condition_era",
            Filter::ConditionOccurrence(_) => "condition_occurrence",
            Filter::Death(_) => "death",
            Filter::DeviceExposure(_) => "device_exposure",
            Filter::DoseEra(_) => "dose_era",
            Filter::DrugEra(_) => "drug_era",
            Filter::DrugExposure(_) => "drug_exposure",
            Filter::Measurement(_) => "measurement",
            Filter::Observation(_) => "observation",
            Filter::ObservationPeriod(_) => "observation_period",
            Filter::ProcedureOccurrence(_) => "procedure_occurrence",
            Filter::Specimen(_) => "specimen",
            Filter::VisitOccurrence(_) => "visit_occurrence",
            Filter::Demographic(_) => "demographic",
        }
    }

    pub fn fields(&self) -> Vec<(&'static str, FilterField<'_>)> {
        match self {
            Filter::ConditionEra(f) => f.fields(),
            Filter::ConditionOccurrence(f) => f.fields(),
            Filter::Death(f) => f.fields(),
            Filter::DeviceExposure(f) => f.fields(),
            Filter::DoseEra(f) => f.fields(),
            Filter::DrugEra(f) => f.fields(),
            Filter::DrugExposure(f) => f.fields(),
            Filter::Measurement(f) => f.fields(),
            Filter::Observation(f) => f.fields(),
            Filter::ObservationPeriod(f) => f.fields(),
            Filter::ProcedureOccurrence(f) => f.fields(),
            Filter::Specimen(f) => f.fields(),
            Filter::VisitOccurrence(f) => f.fields(),
            Filter::Demographic(f) => f.fields(),
        }
    }

    /// `first: true` keeps only each person's earliest event
    pub fn is_first(&self) -> bool {
        self.fields()
            .iter()
            .any(|(name, field)| *name == "first" && *field == FilterField::Flag(true))
    }

    /// Concept set ids referenced by `conceptset`, `source` and `cause`
    pub fn codeset_references(&self) -> Vec<(&'static str, Identifier)> {
        self.fields()
            .into_iter()
            .filter_map(|(name, field)| match field {
                FilterField::Codeset(op) => Some((name, op)),
                _ => None,
            })
            .flat_map(|(name, op)| op.values().into_iter().map(move |id| (name, *id)))
            .collect()
    }
}
