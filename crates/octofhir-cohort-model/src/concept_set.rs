//! Concept sets
//!
//! Two wire shapes are accepted:
//!
//! - the flat form used by the sequential grammar:
//!   `{"conceptset_id": "1", "items": [{"concept_id": "201826", "includeDescendants": true}]}`
//! - the circe form:
//!   `{"id": 1, "expression": {"items": [{"concept": {"CONCEPT_ID": 201826}, "isExcluded": false}]}}`

use crate::Identifier;
use serde::{Deserialize, Serialize};

/// A named collection of concepts, resolved to a codeset at execution time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ConceptSetRepr")]
pub struct ConceptSet {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub items: Vec<ConceptSetItem>,
}

impl ConceptSet {
    pub fn new(id: i64, items: Vec<ConceptSetItem>) -> Self {
        Self {
            id,
            name: None,
            items,
        }
    }

    pub fn included(&self) -> impl Iterator<Item = &ConceptSetItem> {
        self.items.iter().filter(|item| !item.is_excluded)
    }

    pub fn excluded(&self) -> impl Iterator<Item = &ConceptSetItem> {
        self.items.iter().filter(|item| item.is_excluded)
    }
}

/// One entry of a concept set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptSetItem {
    /// `None` only for malformed input; rejected by validation
    #[serde(rename = "concept_id", alias = "conceptId")]
    pub concept_id: Option<i64>,
    #[serde(default)]
    pub is_excluded: bool,
    #[serde(default)]
    pub include_descendants: bool,
    #[serde(default)]
    pub include_mapped: bool,
}

impl ConceptSetItem {
    pub fn concept(concept_id: i64) -> Self {
        Self {
            concept_id: Some(concept_id),
            ..Self::default()
        }
    }

    pub fn with_descendants(mut self) -> Self {
        self.include_descendants = true;
        self
    }

    pub fn with_mapped(mut self) -> Self {
        self.include_mapped = true;
        self
    }

    pub fn excluded(mut self) -> Self {
        self.is_excluded = true;
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ConceptSetRepr {
    Circe {
        id: Identifier,
        #[serde(default)]
        name: Option<String>,
        expression: CirceExpression,
    },
    Flat {
        #[serde(alias = "id")]
        conceptset_id: Identifier,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        items: Vec<FlatItem>,
    },
}

#[derive(Deserialize)]
struct CirceExpression {
    #[serde(default)]
    items: Vec<CirceItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CirceItem {
    #[serde(default)]
    concept: Option<CirceConcept>,
    #[serde(default)]
    is_excluded: Option<bool>,
    #[serde(default)]
    include_descendants: Option<bool>,
    #[serde(default)]
    include_mapped: Option<bool>,
}

#[derive(Deserialize)]
struct CirceConcept {
    #[serde(default, rename = "CONCEPT_ID", alias = "conceptId")]
    concept_id: Option<Identifier>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlatItem {
    #[serde(default, rename = "concept_id", alias = "conceptId")]
    concept_id: Option<Identifier>,
    #[serde(default)]
    is_excluded: Option<bool>,
    #[serde(default)]
    include_descendants: Option<bool>,
    #[serde(default)]
    include_mapped: Option<bool>,
}

impl From<ConceptSetRepr> for ConceptSet {
    fn from(repr: ConceptSetRepr) -> Self {
        match repr {
            ConceptSetRepr::Circe {
                id,
                name,
                expression,
            } => ConceptSet {
                id: id.value(),
                name,
                items: expression
                    .items
                    .into_iter()
                    .map(|item| ConceptSetItem {
                        concept_id: item.concept.and_then(|c| c.concept_id).map(Identifier::value),
                        is_excluded: item.is_excluded.unwrap_or(false),
                        include_descendants: item.include_descendants.unwrap_or(false),
                        include_mapped: item.include_mapped.unwrap_or(false),
                    })
                    .collect(),
            },
            ConceptSetRepr::Flat {
                conceptset_id,
                name,
                items,
            } => ConceptSet {
                id: conceptset_id.value(),
                name,
                items: items
                    .into_iter()
                    .map(|item| ConceptSetItem {
                        concept_id: item.concept_id.map(Identifier::value),
                        is_excluded: item.is_excluded.unwrap_or(false),
                        include_descendants: item.include_descendants.unwrap_or(false),
                        include_mapped: item.include_mapped.unwrap_or(false),
                    })
                    .collect(),
            },
        }
    }
}
