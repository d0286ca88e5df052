//! Value filters of the circe tree grammar

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Comparison operator of a [`NumericRange`] or [`DateRange`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RangeOp {
    #[serde(rename = "lt")]
    Lt,
    #[serde(rename = "lte")]
    Lte,
    #[serde(rename = "eq")]
    Eq,
    #[serde(rename = "!eq")]
    NotEq,
    #[serde(rename = "gt")]
    Gt,
    #[serde(rename = "gte")]
    Gte,
    #[serde(rename = "bt")]
    Between,
    #[serde(rename = "!bt")]
    NotBetween,
}

impl RangeOp {
    /// Operators that need an `Extent`
    pub const fn is_between(self) -> bool {
        matches!(self, RangeOp::Between | RangeOp::NotBetween)
    }

    /// SQL comparison token for the single-bound operators
    pub const fn sql_token(self) -> &'static str {
        match self {
            RangeOp::Lt => "<",
            RangeOp::Lte => "<=",
            RangeOp::Eq => "=",
            RangeOp::NotEq => "<>",
            RangeOp::Gt => ">",
            RangeOp::Gte => ">=",
            RangeOp::Between => "BETWEEN",
            RangeOp::NotBetween => "NOT BETWEEN",
        }
    }
}

impl fmt::Display for RangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RangeOp::Lt => "lt",
            RangeOp::Lte => "lte",
            RangeOp::Eq => "eq",
            RangeOp::NotEq => "!eq",
            RangeOp::Gt => "gt",
            RangeOp::Gte => "gte",
            RangeOp::Between => "bt",
            RangeOp::NotBetween => "!bt",
        };
        f.write_str(s)
    }
}

/// `{"Value": 18, "Op": "gte"}` or `{"Value": 1, "Op": "bt", "Extent": 5}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NumericRange {
    pub value: Decimal,
    pub op: RangeOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extent: Option<Decimal>,
}

impl NumericRange {
    pub fn new(op: RangeOp, value: impl Into<Decimal>) -> Self {
        Self {
            value: value.into(),
            op,
            extent: None,
        }
    }

    pub fn between(value: impl Into<Decimal>, extent: impl Into<Decimal>) -> Self {
        Self {
            value: value.into(),
            op: RangeOp::Between,
            extent: Some(extent.into()),
        }
    }
}

/// Date counterpart of [`NumericRange`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DateRange {
    pub value: NaiveDate,
    pub op: RangeOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extent: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(op: RangeOp, value: NaiveDate) -> Self {
        Self {
            value,
            op,
            extent: None,
        }
    }
}

/// Operator of a [`TextFilter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextOp {
    Contains,
    StartsWith,
    EndsWith,
    Eq,
    #[serde(rename = "!contains")]
    NotContains,
    #[serde(rename = "!startsWith")]
    NotStartsWith,
    #[serde(rename = "!endsWith")]
    NotEndsWith,
    #[serde(rename = "!eq")]
    NotEq,
}

impl TextOp {
    pub const fn is_negated(self) -> bool {
        matches!(
            self,
            TextOp::NotContains | TextOp::NotStartsWith | TextOp::NotEndsWith | TextOp::NotEq
        )
    }
}

/// `{"Text": "aspirin", "Op": "contains"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TextFilter {
    pub text: String,
    pub op: TextOp,
}

/// Which raw date feeds an adjusted date
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DateField {
    #[default]
    StartDate,
    EndDate,
}

/// Shifts the emitted start/end dates of a criteria
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DateAdjustment {
    #[serde(default = "start_date_field")]
    pub start_with: DateField,
    #[serde(default)]
    pub start_offset: i32,
    #[serde(default = "end_date_field")]
    pub end_with: DateField,
    #[serde(default)]
    pub end_offset: i32,
}

fn start_date_field() -> DateField {
    DateField::StartDate
}

fn end_date_field() -> DateField {
    DateField::EndDate
}

impl Default for DateAdjustment {
    fn default() -> Self {
        Self {
            start_with: DateField::StartDate,
            start_offset: 0,
            end_with: DateField::EndDate,
            end_offset: 0,
        }
    }
}

/// A fixed date interval, used by `UserDefinedPeriod`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Period {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
}

/// One side of a [`Window`]: `Coeff * Days` relative to the index date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Endpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<i32>,
    #[serde(default = "positive_coeff")]
    pub coeff: i32,
}

fn positive_coeff() -> i32 {
    1
}

impl Endpoint {
    pub const fn days(days: i32, coeff: i32) -> Self {
        Self {
            days: Some(days),
            coeff,
        }
    }

    /// Bound without an explicit offset
    pub const fn unbounded(coeff: i32) -> Self {
        Self { days: None, coeff }
    }

    /// Signed day offset, if the endpoint has one
    pub fn offset(&self) -> Option<i32> {
        self.days.map(|d| d * self.coeff)
    }
}

/// Temporal window of a correlated criteria relative to the anchor event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Window {
    pub start: Endpoint,
    pub end: Endpoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_index_end: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_event_end: Option<bool>,
}
