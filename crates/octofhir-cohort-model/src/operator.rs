//! Comparison operators of the sequential grammar
//!
//! An [`Operator`] is either a bare value (equality) or an object of comparisons.
//! Comparisons present in one object are AND-combined; list-valued comparisons are
//! interpreted by the predicate compiler (`IN`, `NOT IN`, max/min bound).

use crate::OneOrMany;
use serde::{Deserialize, Serialize};

/// A literal value or a set of comparisons against it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operator<T> {
    Value(T),
    Compare(Comparison<T>),
}

impl<T> Operator<T> {
    /// True when this is a comparison object without any recognized field
    pub fn is_empty(&self) -> bool {
        match self {
            Operator::Value(_) => false,
            Operator::Compare(cmp) => cmp.is_empty(),
        }
    }

    /// Every literal carried by the operator
    pub fn values(&self) -> Vec<&T> {
        match self {
            Operator::Value(v) => vec![v],
            Operator::Compare(cmp) => cmp
                .fields()
                .into_iter()
                .flat_map(|(_, values)| values.as_slice())
                .collect(),
        }
    }
}

impl<T> From<T> for Operator<T> {
    fn from(value: T) -> Self {
        Operator::Value(value)
    }
}

/// Comparison fields of an operator object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Comparison<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eq: Option<OneOrMany<T>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neq: Option<OneOrMany<T>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<OneOrMany<T>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gte: Option<OneOrMany<T>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<OneOrMany<T>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lte: Option<OneOrMany<T>>,
}

impl<T> Default for Comparison<T> {
    fn default() -> Self {
        Self {
            eq: None,
            neq: None,
            gt: None,
            gte: None,
            lt: None,
            lte: None,
        }
    }
}

impl<T> Comparison<T> {
    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// Present fields in a fixed order: eq, neq, gt, gte, lt, lte
    pub fn fields(&self) -> Vec<(&'static str, &OneOrMany<T>)> {
        [
            ("eq", &self.eq),
            ("neq", &self.neq),
            ("gt", &self.gt),
            ("gte", &self.gte),
            ("lt", &self.lt),
            ("lte", &self.lte),
        ]
        .into_iter()
        .filter_map(|(name, field)| field.as_ref().map(|v| (name, v)))
        .collect()
    }
}

/// A literal string (exact match) or a set of text matchers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextOperator {
    Value(String),
    Match(TextMatch),
}

impl TextOperator {
    pub fn is_empty(&self) -> bool {
        match self {
            TextOperator::Value(_) => false,
            TextOperator::Match(m) => m.is_empty(),
        }
    }
}

/// Text matchers; each field is AND-combined, list entries are OR-combined
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eq: Option<OneOrMany<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neq: Option<OneOrMany<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_with: Option<OneOrMany<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_with: Option<OneOrMany<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<OneOrMany<String>>,
}

impl TextMatch {
    pub fn is_empty(&self) -> bool {
        self.eq.is_none()
            && self.neq.is_none()
            && self.starts_with.is_none()
            && self.ends_with.is_none()
            && self.contains.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Identifier;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    #[test]
    fn test_literal_operator() {
        let op: Operator<Decimal> = serde_json::from_str("18").unwrap();
        assert_eq!(op, Operator::Value(Decimal::from(18)));
        assert!(!op.is_empty());
    }

    #[test]
    fn test_comparison_operator() {
        let op: Operator<Decimal> = serde_json::from_str(r#"{"gte": 18, "lt": [65, 70]}"#).unwrap();
        let Operator::Compare(cmp) = &op else {
            panic!("expected comparison");
        };
        assert_eq!(cmp.gte, Some(OneOrMany::One(Decimal::from(18))));
        assert_eq!(cmp.lt.as_ref().map(|v| v.len()), Some(2));
        assert_eq!(op.values().len(), 3);
    }

    #[test]
    fn test_unrecognized_fields_make_empty_operator() {
        let op: Operator<Decimal> = serde_json::from_str(r#"{"between": 3}"#).unwrap();
        assert!(op.is_empty());
    }

    #[test]
    fn test_identifier_operator_from_string() {
        let op: Operator<Identifier> = serde_json::from_str(r#"{"neq": ["1", 2]}"#).unwrap();
        let Operator::Compare(cmp) = op else {
            panic!("expected comparison");
        };
        assert_eq!(
            cmp.neq.unwrap().as_slice(),
            &[Identifier::new(1), Identifier::new(2)]
        );
    }

    #[test]
    fn test_date_operator() {
        let op: Operator<NaiveDate> = serde_json::from_str(r#""2020-01-01""#).unwrap();
        assert_eq!(
            op,
            Operator::Value(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap())
        );
    }

    #[test]
    fn test_text_operator() {
        let exact: TextOperator = serde_json::from_str(r#""aspirin""#).unwrap();
        assert_eq!(exact, TextOperator::Value("aspirin".into()));

        let m: TextOperator =
            serde_json::from_str(r#"{"startsWith": ["a", "b"], "contains": "50%"}"#).unwrap();
        let TextOperator::Match(m) = m else {
            panic!("expected matcher");
        };
        assert_eq!(m.starts_with.unwrap().len(), 2);
        assert_eq!(m.contains, Some(OneOrMany::One("50%".to_string())));

        let empty: TextOperator = serde_json::from_str("{}").unwrap();
        assert!(empty.is_empty());
    }
}
