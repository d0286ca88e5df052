//! CDM event table metadata shared by both grammars

use crate::Dialect;
use octofhir_cohort_model::{Criteria, Filter};

/// How the end date of an event row is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndDate {
    /// Non-nullable end column
    Column(&'static str),
    /// Nullable end column, falling back to start + 1 day
    Nullable(&'static str),
    /// Drug exposure: end column, then start + days_supply, then start + 1 day
    DaysSupply(&'static str),
    /// No end column; start + 1 day
    NextDay,
}

/// One clinical event table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainTable {
    pub table: &'static str,
    /// Primary key; `None` for tables keyed by person (death)
    pub event_id: Option<&'static str>,
    /// Column matched against the criteria's concept set
    pub concept: &'static str,
    pub start_date: &'static str,
    pub end_date: EndDate,
    pub visit_occurrence: Option<&'static str>,
}

/// A clinical domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    ConditionOccurrence,
    ConditionEra,
    Death,
    DeviceExposure,
    DoseEra,
    DrugEra,
    DrugExposure,
    Measurement,
    Observation,
    ObservationPeriod,
    PayerPlanPeriod,
    ProcedureOccurrence,
    Specimen,
    VisitOccurrence,
    VisitDetail,
}

impl Domain {
    pub const fn table(self) -> DomainTable {
        match self {
            Domain::ConditionOccurrence => DomainTable {
                table: "condition_occurrence",
                event_id: Some("condition_occurrence_id"),
                concept: "condition_concept_id",
                start_date: "condition_start_date",
                end_date: EndDate::Nullable("condition_end_date"),
                visit_occurrence: Some("visit_occurrence_id"),
            },
            Domain::ConditionEra => DomainTable {
                table: "condition_era",
                event_id: Some("condition_era_id"),
                concept: "condition_concept_id",
                start_date: "condition_era_start_date",
                end_date: EndDate::Column("condition_era_end_date"),
                visit_occurrence: None,
            },
            Domain::Death => DomainTable {
                table: "death",
                event_id: None,
                concept: "cause_concept_id",
                start_date: "death_date",
                end_date: EndDate::NextDay,
                visit_occurrence: None,
            },
            Domain::DeviceExposure => DomainTable {
                table: "device_exposure",
                event_id: Some("device_exposure_id"),
                concept: "device_concept_id",
                start_date: "device_exposure_start_date",
                end_date: EndDate::Nullable("device_exposure_end_date"),
                visit_occurrence: Some("visit_occurrence_id"),
            },
            Domain::DoseEra => DomainTable {
                table: "dose_era",
                event_id: Some("dose_era_id"),
                concept: "drug_concept_id",
                start_date: "dose_era_start_date",
                end_date: EndDate::Column("dose_era_end_date"),
                visit_occurrence: None,
            },
            Domain::DrugEra => DomainTable {
                table: "drug_era",
                event_id: Some("drug_era_id"),
                concept: "drug_concept_id",
                start_date: "drug_era_start_date",
                end_date: EndDate::Column("drug_era_end_date"),
                visit_occurrence: None,
            },
            Domain::DrugExposure => DomainTable {
                table: "drug_exposure",
                event_id: Some("drug_exposure_id"),
                concept: "drug_concept_id",
                start_date: "drug_exposure_start_date",
                end_date: EndDate::DaysSupply("drug_exposure_end_date"),
                visit_occurrence: Some("visit_occurrence_id"),
            },
            Domain::Measurement => DomainTable {
                table: "measurement",
                event_id: Some("measurement_id"),
                concept: "measurement_concept_id",
                start_date: "measurement_date",
                end_date: EndDate::NextDay,
                visit_occurrence: Some("visit_occurrence_id"),
            },
            Domain::Observation => DomainTable {
                table: "observation",
                event_id: Some("observation_id"),
                concept: "observation_concept_id",
                start_date: "observation_date",
                end_date: EndDate::NextDay,
                visit_occurrence: Some("visit_occurrence_id"),
            },
            Domain::ObservationPeriod => DomainTable {
                table: "observation_period",
                event_id: Some("observation_period_id"),
                concept: "period_type_concept_id",
                start_date: "observation_period_start_date",
                end_date: EndDate::Column("observation_period_end_date"),
                visit_occurrence: None,
            },
            Domain::PayerPlanPeriod => DomainTable {
                table: "payer_plan_period",
                event_id: Some("payer_plan_period_id"),
                concept: "payer_concept_id",
                start_date: "payer_plan_period_start_date",
                end_date: EndDate::Column("payer_plan_period_end_date"),
                visit_occurrence: None,
            },
            Domain::ProcedureOccurrence => DomainTable {
                table: "procedure_occurrence",
                event_id: Some("procedure_occurrence_id"),
                concept: "procedure_concept_id",
                start_date: "procedure_date",
                end_date: EndDate::NextDay,
                visit_occurrence: Some("visit_occurrence_id"),
            },
            Domain::Specimen => DomainTable {
                table: "specimen",
                event_id: Some("specimen_id"),
                concept: "specimen_concept_id",
                start_date: "specimen_date",
                end_date: EndDate::NextDay,
                visit_occurrence: None,
            },
            Domain::VisitOccurrence => DomainTable {
                table: "visit_occurrence",
                event_id: Some("visit_occurrence_id"),
                concept: "visit_concept_id",
                start_date: "visit_start_date",
                end_date: EndDate::Column("visit_end_date"),
                visit_occurrence: Some("visit_occurrence_id"),
            },
            Domain::VisitDetail => DomainTable {
                table: "visit_detail",
                event_id: Some("visit_detail_id"),
                concept: "visit_detail_concept_id",
                start_date: "visit_detail_start_date",
                end_date: EndDate::Column("visit_detail_end_date"),
                visit_occurrence: Some("visit_occurrence_id"),
            },
        }
    }

    /// Domain of a sequential-grammar filter; demographic filters read observation periods
    pub const fn of_filter(filter: &Filter) -> Domain {
        match filter {
            Filter::ConditionEra(_) => Domain::ConditionEra,
            Filter::ConditionOccurrence(_) => Domain::ConditionOccurrence,
            Filter::Death(_) => Domain::Death,
            Filter::DeviceExposure(_) => Domain::DeviceExposure,
            Filter::DoseEra(_) => Domain::DoseEra,
            Filter::DrugEra(_) => Domain::DrugEra,
            Filter::DrugExposure(_) => Domain::DrugExposure,
            Filter::Measurement(_) => Domain::Measurement,
            Filter::Observation(_) => Domain::Observation,
            Filter::ObservationPeriod(_) | Filter::Demographic(_) => Domain::ObservationPeriod,
            Filter::ProcedureOccurrence(_) => Domain::ProcedureOccurrence,
            Filter::Specimen(_) => Domain::Specimen,
            Filter::VisitOccurrence(_) => Domain::VisitOccurrence,
        }
    }

    pub const fn of_criteria(criteria: &Criteria) -> Domain {
        match criteria {
            Criteria::ConditionOccurrence(_) => Domain::ConditionOccurrence,
            Criteria::ConditionEra(_) => Domain::ConditionEra,
            Criteria::Death(_) => Domain::Death,
            Criteria::DeviceExposure(_) => Domain::DeviceExposure,
            Criteria::DoseEra(_) => Domain::DoseEra,
            Criteria::DrugEra(_) => Domain::DrugEra,
            Criteria::DrugExposure(_) => Domain::DrugExposure,
            Criteria::Measurement(_) => Domain::Measurement,
            Criteria::Observation(_) => Domain::Observation,
            Criteria::ObservationPeriod(_) => Domain::ObservationPeriod,
            Criteria::PayerPlanPeriod(_) => Domain::PayerPlanPeriod,
            Criteria::ProcedureOccurrence(_) => Domain::ProcedureOccurrence,
            Criteria::Specimen(_) => Domain::Specimen,
            Criteria::VisitOccurrence(_) => Domain::VisitOccurrence,
            Criteria::VisitDetail(_) => Domain::VisitDetail,
        }
    }
}

impl DomainTable {
    /// Event id expression over rows aliased `alias`
    pub fn event_id_expr(&self, alias: &str) -> String {
        format!("{alias}.{}", self.event_id.unwrap_or("person_id"))
    }

    pub fn start_expr(&self, alias: &str) -> String {
        format!("{alias}.{}", self.start_date)
    }

    pub fn end_expr(&self, dialect: Dialect, alias: &str) -> String {
        let start = self.start_expr(alias);
        match self.end_date {
            EndDate::Column(column) => format!("{alias}.{column}"),
            EndDate::Nullable(column) => format!(
                "COALESCE({alias}.{column}, {})",
                dialect.date_add(&start, 1)
            ),
            EndDate::DaysSupply(column) => format!(
                "COALESCE({alias}.{column}, {}, {})",
                dialect.date_add(&start, format!("{alias}.days_supply")),
                dialect.date_add(&start, 1)
            ),
            EndDate::NextDay => dialect.date_add(&start, 1),
        }
    }

    /// Visit id expression; a typed NULL for tables without a visit link
    pub fn visit_expr(&self, dialect: Dialect, alias: &str) -> String {
        match self.visit_occurrence {
            Some(column) => format!("{alias}.{column}"),
            None => dialect.int_cast("NULL"),
        }
    }
}
