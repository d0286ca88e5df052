//! Scalar building blocks shared by both grammars

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// A single value or a list of values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn as_slice(&self) -> &[T] {
        match self {
            OneOrMany::One(value) => std::slice::from_ref(value),
            OneOrMany::Many(values) => values,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }
}

impl<T> From<T> for OneOrMany<T> {
    fn from(value: T) -> Self {
        OneOrMany::One(value)
    }
}

impl<T> From<Vec<T>> for OneOrMany<T> {
    fn from(values: Vec<T>) -> Self {
        OneOrMany::Many(values)
    }
}

/// Integer id of a concept, concept set or cohort
///
/// Accepts JSON numbers and numeric strings (`5` and `"5"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "IdentifierRepr", into = "i64")]
pub struct Identifier(pub i64);

impl Identifier {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Identifier {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Identifier> for i64 {
    fn from(id: Identifier) -> Self {
        id.0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdentifierRepr {
    Number(i64),
    Text(String),
}

impl TryFrom<IdentifierRepr> for Identifier {
    type Error = String;

    fn try_from(repr: IdentifierRepr) -> Result<Self, Self::Error> {
        match repr {
            IdentifierRepr::Number(n) => Ok(Identifier(n)),
            IdentifierRepr::Text(s) => s
                .trim()
                .parse::<i64>()
                .map(Identifier)
                .map_err(|_| format!("invalid identifier '{s}', expected an integer")),
        }
    }
}

/// A vocabulary concept reference inside a circe concept list
///
/// Accepts a bare id or an object carrying `CONCEPT_ID`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Concept {
    #[serde(rename = "CONCEPT_ID")]
    pub concept_id: i64,
}

impl Concept {
    pub const fn new(concept_id: i64) -> Self {
        Self { concept_id }
    }
}

impl<'de> Deserialize<'de> for Concept {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Id(Identifier),
            Object {
                #[serde(rename = "CONCEPT_ID", alias = "conceptId", alias = "concept_id")]
                concept_id: Identifier,
            },
        }

        match Repr::deserialize(deserializer)? {
            Repr::Id(id) | Repr::Object { concept_id: id } => Ok(Concept::new(id.0)),
        }
    }
}

/// Ids of a concept list, in input order
pub fn concept_ids(concepts: &[Concept]) -> Vec<i64> {
    concepts.iter().map(|c| c.concept_id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_identifier_from_number_and_string() {
        let a: Identifier = serde_json::from_str("42").unwrap();
        let b: Identifier = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.value(), 42);
    }

    #[test]
    fn test_identifier_rejects_text() {
        let err = serde_json::from_str::<Identifier>("\"abc\"").unwrap_err();
        assert!(err.to_string().contains("invalid identifier"));
    }

    #[test]
    fn test_concept_forms() {
        let concepts: Vec<Concept> =
            serde_json::from_str(r#"[8507, {"CONCEPT_ID": 8532, "CONCEPT_NAME": "FEMALE"}, "9201"]"#)
                .unwrap();
        assert_eq!(concept_ids(&concepts), vec![8507, 8532, 9201]);
    }

    #[test]
    fn test_one_or_many() {
        let one: OneOrMany<i64> = serde_json::from_str("3").unwrap();
        let many: OneOrMany<i64> = serde_json::from_str("[1, 2]").unwrap();
        assert_eq!(one.as_slice(), &[3]);
        assert_eq!(many.len(), 2);
        assert!(OneOrMany::<i64>::Many(vec![]).is_empty());
    }
}
