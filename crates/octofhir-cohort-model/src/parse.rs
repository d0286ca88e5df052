//! JSON parsing with node-path diagnostics
//!
//! Documents are first read as untyped JSON and walked for criteria and filter tags,
//! so that an unknown tag is reported with the path of the offending node rather than
//! as an opaque "data did not match any variant" error. The typed parse runs only
//! after the tag walk succeeds.

use crate::{CRITERIA_TYPES, Cohort, CohortExpression, FILTER_TYPES, UNSUPPORTED_CRITERIA_TYPES};
use octofhir_cohort_diagnostics::{
    COH0001, COH0002, COH0003, COH0007, COH0008, COH0011, COH0012, CohortError, NodePath,
    Result, SourceLocation,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// The two cohort grammars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grammar {
    /// Circe cohort expression
    Tree,
    /// Groups of containers of filters
    Sequential,
}

impl fmt::Display for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Grammar::Tree => "tree",
            Grammar::Sequential => "sequential",
        })
    }
}

impl FromStr for Grammar {
    type Err = CohortError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tree" | "circe" => Ok(Grammar::Tree),
            "sequential" => Ok(Grammar::Sequential),
            _ => Err(CohortError::malformed(
                COH0012,
                format!("unknown grammar '{s}', expected tree or sequential"),
                NodePath::root(),
            )),
        }
    }
}

/// A parsed document of either grammar
#[derive(Debug, Clone, PartialEq)]
pub enum CohortDocument {
    Tree(CohortExpression),
    Sequential(Cohort),
}

impl CohortDocument {
    pub fn grammar(&self) -> Grammar {
        match self {
            CohortDocument::Tree(_) => Grammar::Tree,
            CohortDocument::Sequential(_) => Grammar::Sequential,
        }
    }
}

/// Guess the grammar from the document shape
pub fn detect_grammar(value: &Value) -> Option<Grammar> {
    match value {
        Value::Array(_) => Some(Grammar::Sequential),
        Value::Object(obj) if obj.contains_key("PrimaryCriteria") => Some(Grammar::Tree),
        Value::Object(obj) if obj.contains_key("groups") || obj.contains_key("cohort") => {
            Some(Grammar::Sequential)
        }
        _ => None,
    }
}

/// Parse a document, detecting the grammar when `grammar` is `None`
pub fn parse_document(json: &str, grammar: Option<Grammar>) -> Result<CohortDocument> {
    let value = parse_value(json)?;
    let grammar = match grammar.or_else(|| detect_grammar(&value)) {
        Some(grammar) => grammar,
        None => {
            return Err(CohortError::malformed(
                COH0012,
                "cannot tell the grammar: expected an object with PrimaryCriteria, \
                 an object with groups, or an array of groups",
                NodePath::root(),
            ));
        }
    };
    log::debug!("parsing cohort document as {grammar} grammar");
    match grammar {
        Grammar::Tree => {
            check_expression_tags(&value)?;
            typed(json).map(CohortDocument::Tree)
        }
        Grammar::Sequential => {
            check_cohort_tags(&value)?;
            typed(json).map(CohortDocument::Sequential)
        }
    }
}

/// Parse a tree-grammar cohort expression
pub fn parse_expression(json: &str) -> Result<CohortExpression> {
    let value = parse_value(json)?;
    check_expression_tags(&value)?;
    typed(json)
}

/// Parse a sequential-grammar cohort
pub fn parse_cohort(json: &str) -> Result<Cohort> {
    let value = parse_value(json)?;
    check_cohort_tags(&value)?;
    typed(json)
}

fn parse_value(json: &str) -> Result<Value> {
    serde_json::from_str(json).map_err(|e| {
        CohortError::malformed_at(
            COH0001,
            format!("invalid JSON: {e}"),
            NodePath::root(),
            SourceLocation::new(e.line(), e.column()),
        )
    })
}

fn typed<T: for<'de> Deserialize<'de>>(json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| {
        let code = if e.to_string().starts_with("missing field") {
            COH0008
        } else {
            COH0007
        };
        CohortError::malformed_at(
            code,
            e.to_string(),
            NodePath::root(),
            SourceLocation::new(e.line(), e.column()),
        )
    })
}

// ============================================================================
// Tag walks
// ============================================================================

fn check_expression_tags(value: &Value) -> Result<()> {
    let mut errors = Vec::new();
    let root = NodePath::root();

    let primary = root.field("PrimaryCriteria").field("CriteriaList");
    for (i, item) in array_at(value, &["PrimaryCriteria", "CriteriaList"]) {
        check_criteria(item, &primary.index(i), &mut errors);
    }
    if let Some(group) = value.get("AdditionalCriteria").filter(|v| !v.is_null()) {
        check_group(group, &root.field("AdditionalCriteria"), &mut errors);
    }
    for (i, rule) in array_at(value, &["InclusionRules"]) {
        if let Some(group) = rule.get("expression") {
            let path = root.field("InclusionRules").index(i).field("expression");
            check_group(group, &path, &mut errors);
        }
    }
    for (i, item) in array_at(value, &["CensoringCriteria"]) {
        check_criteria(item, &root.field("CensoringCriteria").index(i), &mut errors);
    }
    if let Some(strategy) = value.get("EndStrategy").filter(|v| !v.is_null()) {
        let path = root.field("EndStrategy");
        match single_key(strategy) {
            Some("DateOffset" | "CustomEra") => {}
            Some(other) => errors.push(CohortError::malformed(
                COH0007,
                format!("unknown end strategy '{other}'"),
                path,
            )),
            None => errors.push(CohortError::malformed(
                COH0007,
                "end strategy must be an object with exactly one key",
                path,
            )),
        }
    }

    CohortError::collect(errors)
}

fn check_group(group: &Value, path: &NodePath, errors: &mut Vec<CohortError>) {
    for (i, item) in array_at(group, &["CriteriaList"]) {
        let item_path = path.field("CriteriaList").index(i);
        match item.get("Criteria") {
            Some(criteria) => check_criteria(criteria, &item_path.field("Criteria"), errors),
            None => check_criteria(item, &item_path, errors),
        }
    }
    for (i, nested) in array_at(group, &["Groups"]) {
        check_group(nested, &path.field("Groups").index(i), errors);
    }
}

fn check_criteria(criteria: &Value, path: &NodePath, errors: &mut Vec<CohortError>) {
    let Some(tag) = single_key(criteria) else {
        errors.push(CohortError::malformed(
            COH0002,
            "criteria must be an object with exactly one domain key",
            path.clone(),
        ));
        return;
    };
    if UNSUPPORTED_CRITERIA_TYPES.contains(&tag) {
        errors.push(CohortError::malformed(
            COH0011,
            format!("criteria type '{tag}' is not supported"),
            path.field(tag),
        ));
        return;
    }
    if !CRITERIA_TYPES.contains(&tag) {
        errors.push(CohortError::malformed(
            COH0002,
            format!("unknown criteria type '{tag}'"),
            path.field(tag),
        ));
        return;
    }
    if let Some(group) = criteria
        .get(tag)
        .and_then(|body| body.get("CorrelatedCriteria"))
        .filter(|v| !v.is_null())
    {
        check_group(group, &path.field(tag).field("CorrelatedCriteria"), errors);
    }
}

fn check_cohort_tags(value: &Value) -> Result<()> {
    let mut errors = Vec::new();
    let (groups, groups_path) = match value {
        Value::Array(groups) => (groups.as_slice(), NodePath::root()),
        Value::Object(obj) => {
            let key = if obj.contains_key("cohort") && !obj.contains_key("groups") {
                "cohort"
            } else {
                "groups"
            };
            let groups = obj.get(key).and_then(Value::as_array);
            (
                groups.map(Vec::as_slice).unwrap_or_default(),
                NodePath::root().field(key),
            )
        }
        _ => (&[][..], NodePath::root()),
    };

    for (g, group) in groups.iter().enumerate() {
        let group_path = groups_path.index(g);
        for (c, container) in array_at(group, &["containers"]) {
            let container_path = group_path.field("containers").index(c);
            for (f, filter) in array_at(container, &["filters"]) {
                let path = container_path.field("filters").index(f);
                match filter.get("type").and_then(Value::as_str) {
                    None => errors.push(CohortError::malformed(
                        COH0008,
                        "filter has no 'type'",
                        path,
                    )),
                    Some(tag) if !FILTER_TYPES.contains(&tag) => {
                        errors.push(CohortError::malformed(
                            COH0003,
                            format!("unknown filter type '{tag}'"),
                            path.field("type"),
                        ))
                    }
                    Some(_) => {}
                }
            }
        }
    }

    CohortError::collect(errors)
}

fn array_at<'a>(
    value: &'a Value,
    keys: &[&str],
) -> impl Iterator<Item = (usize, &'a Value)> + use<'a> {
    let mut current = Some(value);
    for key in keys {
        current = current.and_then(|v| v.get(*key));
    }
    current
        .and_then(Value::as_array)
        .map(|items| items.iter().enumerate())
        .into_iter()
        .flatten()
}

fn single_key(value: &Value) -> Option<&str> {
    let obj = value.as_object()?;
    if obj.len() != 1 {
        return None;
    }
    obj.keys().next().map(String::as_str)
}
