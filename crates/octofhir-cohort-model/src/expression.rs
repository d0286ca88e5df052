//! Circe cohort expression (tree grammar root)

use crate::{Concept, ConceptSet, Criteria, DateRange, NumericRange, Window};
use chrono::NaiveDate;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

// ============================================================================
// Root
// ============================================================================

/// Aggregate root of the tree grammar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CohortExpression {
    #[serde(default)]
    pub concept_sets: Vec<ConceptSet>,
    pub primary_criteria: PrimaryCriteria,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_criteria: Option<CriteriaGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualified_limit: Option<ResultLimit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_limit: Option<ResultLimit>,
    #[serde(default)]
    pub inclusion_rules: Vec<InclusionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_strategy: Option<EndStrategy>,
    #[serde(default)]
    pub censoring_criteria: Vec<Criteria>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collapse_settings: Option<CollapseSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub censor_window: Option<CensorWindow>,
}

impl CohortExpression {
    /// An expression with only primary criteria
    pub fn new(primary_criteria: PrimaryCriteria) -> Self {
        Self {
            concept_sets: Vec::new(),
            primary_criteria,
            additional_criteria: None,
            qualified_limit: None,
            expression_limit: None,
            inclusion_rules: Vec::new(),
            end_strategy: None,
            censoring_criteria: Vec::new(),
            collapse_settings: None,
            censor_window: None,
        }
    }

    pub fn qualified_limit_type(&self) -> LimitType {
        self.qualified_limit.map(|l| l.limit_type).unwrap_or_default()
    }

    pub fn expression_limit_type(&self) -> LimitType {
        self.expression_limit.map(|l| l.limit_type).unwrap_or_default()
    }

    pub fn collapse(&self) -> CollapseSettings {
        self.collapse_settings.unwrap_or_default()
    }
}

// ============================================================================
// Primary criteria and limits
// ============================================================================

/// Anchor events of the cohort
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PrimaryCriteria {
    pub criteria_list: Vec<Criteria>,
    #[serde(default)]
    pub observation_window: ObservationWindow,
    #[serde(default)]
    pub primary_criteria_limit: ResultLimit,
}

/// Continuous observation required around the anchor event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObservationWindow {
    #[serde(default)]
    pub prior_days: i32,
    #[serde(default)]
    pub post_days: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultLimit {
    #[serde(rename = "Type", default)]
    pub limit_type: LimitType,
}

impl ResultLimit {
    pub const fn new(limit_type: LimitType) -> Self {
        Self { limit_type }
    }
}

/// Which events per person survive a limit
///
/// Accepts `"All"`, `"First"`, `"Last"` in any case, or the numeric codes
/// `0` (all), `1` (last) and `2` (first).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum LimitType {
    #[default]
    All,
    First,
    Last,
}

impl<'de> Deserialize<'de> for LimitType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Code(u8),
            Name(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Code(0) => Ok(LimitType::All),
            Repr::Code(1) => Ok(LimitType::Last),
            Repr::Code(2) => Ok(LimitType::First),
            Repr::Code(n) => Err(D::Error::custom(format!("invalid limit type code {n}"))),
            Repr::Name(name) => match name.to_ascii_lowercase().as_str() {
                "all" => Ok(LimitType::All),
                "first" => Ok(LimitType::First),
                "last" => Ok(LimitType::Last),
                _ => Err(D::Error::custom(format!(
                    "invalid limit type '{name}', expected All, First or Last"
                ))),
            },
        }
    }
}

// ============================================================================
// Criteria groups
// ============================================================================

/// Boolean policy of a [`CriteriaGroup`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupType {
    #[default]
    All,
    Any,
    AtLeast,
    AtMost,
}

impl GroupType {
    pub const fn needs_count(self) -> bool {
        matches!(self, GroupType::AtLeast | GroupType::AtMost)
    }
}

/// Recursive group of correlated, demographic and nested criteria
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CriteriaGroup {
    #[serde(rename = "Type", default)]
    pub group_type: GroupType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i32>,
    #[serde(default)]
    pub criteria_list: Vec<GroupItem>,
    #[serde(default)]
    pub demographic_criteria_list: Vec<DemographicCriteria>,
    #[serde(default)]
    pub groups: Vec<CriteriaGroup>,
}

impl CriteriaGroup {
    pub fn new(group_type: GroupType) -> Self {
        Self {
            group_type,
            ..Self::default()
        }
    }

    /// Number of UNION ALL branches the group compiles to
    pub fn item_count(&self) -> usize {
        self.criteria_list.len() + self.demographic_criteria_list.len() + self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }
}

/// One entry of a group's `CriteriaList`
///
/// Objects carrying a `Criteria` key are correlated criteria; anything else is read
/// as a bare domain criteria.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GroupItem {
    Correlated(CorrelatedCriteria),
    Plain(Criteria),
}

impl GroupItem {
    pub fn criteria(&self) -> &Criteria {
        match self {
            GroupItem::Correlated(c) => &c.criteria,
            GroupItem::Plain(c) => c,
        }
    }
}

impl<'de> Deserialize<'de> for GroupItem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let correlated = value
            .as_object()
            .is_some_and(|obj| obj.contains_key("Criteria"));
        if correlated {
            serde_json::from_value(value)
                .map(GroupItem::Correlated)
                .map_err(D::Error::custom)
        } else {
            serde_json::from_value(value)
                .map(GroupItem::Plain)
                .map_err(D::Error::custom)
        }
    }
}

/// A criteria evaluated relative to an anchor event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CorrelatedCriteria {
    pub criteria: Criteria,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_window: Option<Window>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_window: Option<Window>,
    #[serde(default)]
    pub restrict_visit: bool,
    #[serde(default)]
    pub ignore_observation_period: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurrence: Option<Occurrence>,
}

impl CorrelatedCriteria {
    pub fn new(criteria: Criteria, start_window: Window) -> Self {
        Self {
            criteria,
            start_window: Some(start_window),
            end_window: None,
            restrict_visit: false,
            ignore_observation_period: false,
            occurrence: None,
        }
    }

    /// Effective occurrence; absent means "at least 1"
    pub fn occurrence_or_default(&self) -> Occurrence {
        self.occurrence.unwrap_or_default()
    }
}

/// How many correlated events must exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Occurrence {
    #[serde(rename = "Type")]
    pub occurrence_type: OccurrenceType,
    pub count: i32,
    #[serde(default)]
    pub is_distinct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_column: Option<CountColumn>,
}

impl Default for Occurrence {
    fn default() -> Self {
        Self {
            occurrence_type: OccurrenceType::AtLeast,
            count: 1,
            is_distinct: false,
            count_column: None,
        }
    }
}

impl Occurrence {
    pub const fn new(occurrence_type: OccurrenceType, count: i32) -> Self {
        Self {
            occurrence_type,
            count,
            is_distinct: false,
            count_column: None,
        }
    }

    /// Anchors without any matching event still qualify
    pub const fn tolerates_absence(&self) -> bool {
        matches!(self.occurrence_type, OccurrenceType::AtMost)
            || (matches!(self.occurrence_type, OccurrenceType::Exactly) && self.count == 0)
    }
}

/// Occurrence comparison; wire codes `0` exactly, `1` at most, `2` at least
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OccurrenceType {
    Exactly,
    AtMost,
    AtLeast,
}

impl OccurrenceType {
    pub const fn code(self) -> u8 {
        match self {
            OccurrenceType::Exactly => 0,
            OccurrenceType::AtMost => 1,
            OccurrenceType::AtLeast => 2,
        }
    }

    pub const fn sql_token(self) -> &'static str {
        match self {
            OccurrenceType::Exactly => "=",
            OccurrenceType::AtMost => "<=",
            OccurrenceType::AtLeast => ">=",
        }
    }
}

impl Serialize for OccurrenceType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for OccurrenceType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(OccurrenceType::Exactly),
            1 => Ok(OccurrenceType::AtMost),
            2 => Ok(OccurrenceType::AtLeast),
            n => Err(D::Error::custom(format!(
                "invalid occurrence type {n}, expected 0 (exactly), 1 (at most) or 2 (at least)"
            ))),
        }
    }
}

/// Column counted by an [`Occurrence`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CountColumn {
    DomainConcept,
    StartDate,
    EndDate,
    VisitId,
}

/// Person-level demographic test against the anchor event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DemographicCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<NumericRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Vec<Concept>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender_exclude: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub race: Option<Vec<Concept>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub race_exclude: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ethnicity: Option<Vec<Concept>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ethnicity_exclude: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurrence_start_date: Option<DateRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurrence_end_date: Option<DateRange>,
}

// ============================================================================
// Post-processing
// ============================================================================

/// Reporting-only rule counted against the included events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InclusionRule {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub expression: CriteriaGroup,
}

/// How a cohort era ends when no censoring event comes first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndStrategy {
    DateOffset(DateOffset),
    CustomEra(CustomEra),
}

/// End = chosen anchor date + offset, clamped to the observation period end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DateOffset {
    pub date_field: OffsetField,
    #[serde(default)]
    pub offset: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OffsetField {
    StartDate,
    EndDate,
}

/// End = end of the drug era (built from a codeset) containing the index date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomEra {
    pub drug_codeset_id: i64,
    #[serde(default)]
    pub gap_days: i32,
    #[serde(default)]
    pub offset: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_supply_override: Option<i32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollapseType {
    #[default]
    Era,
    None,
}

/// Era collapsing of the final cohort rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CollapseSettings {
    #[serde(default)]
    pub collapse_type: CollapseType,
    #[serde(default)]
    pub era_pad: i32,
}

/// Clamp of the final cohort dates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CensorWindow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
}

impl CensorWindow {
    pub fn is_empty(&self) -> bool {
        self.start_date.is_none() && self.end_date.is_none()
    }
}
