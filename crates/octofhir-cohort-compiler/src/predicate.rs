//! Predicate compiler
//!
//! Turns typed filter values into boolean SQL fragments:
//! - sequential-grammar [`Operator`] and [`TextOperator`] values
//! - circe [`NumericRange`], [`DateRange`], [`TextFilter`] and concept lists
//!
//! Operator fields are AND-combined. A multi-valued `eq` becomes `IN`, a multi-valued
//! `neq` becomes `NOT IN`, `gt`/`gte` over an array compare against its maximum and
//! `lt`/`lte` against its minimum.

use crate::query::{all_of, any_of};
use crate::{Dialect, escape_like};
use chrono::NaiveDate;
use octofhir_cohort_model::{
    Comparison, Concept, DateRange, Identifier, NumericRange, OneOrMany, Operator, RangeOp,
    TextFilter, TextMatch, TextOp, TextOperator,
};
use rust_decimal::Decimal;

/// A value that renders as a SQL literal
pub trait SqlLiteral {
    fn to_sql(&self, dialect: Dialect) -> String;
}

impl SqlLiteral for Decimal {
    fn to_sql(&self, _dialect: Dialect) -> String {
        self.normalize().to_string()
    }
}

impl SqlLiteral for NaiveDate {
    fn to_sql(&self, dialect: Dialect) -> String {
        dialect.date_literal(*self)
    }
}

impl SqlLiteral for Identifier {
    fn to_sql(&self, dialect: Dialect) -> String {
        dialect.int_cast(self.value())
    }
}

// ============================================================================
// Sequential grammar operators
// ============================================================================

/// Compile an operator against `column`; `None` when it carries no usable value
pub fn operator<T>(dialect: Dialect, column: &str, op: &Operator<T>) -> Option<String>
where
    T: SqlLiteral + Ord,
{
    match op {
        Operator::Value(value) => Some(format!("{column} = {}", value.to_sql(dialect))),
        Operator::Compare(cmp) => comparison(dialect, column, cmp),
    }
}

fn comparison<T>(dialect: Dialect, column: &str, cmp: &Comparison<T>) -> Option<String>
where
    T: SqlLiteral + Ord,
{
    let mut clauses = Vec::new();
    for (name, values) in cmp.fields() {
        let values = values.as_slice();
        let clause = match name {
            "eq" => membership(dialect, column, values, false),
            "neq" => membership(dialect, column, values, true),
            "gt" => bound(dialect, column, ">", values.iter().max()),
            "gte" => bound(dialect, column, ">=", values.iter().max()),
            "lt" => bound(dialect, column, "<", values.iter().min()),
            "lte" => bound(dialect, column, "<=", values.iter().min()),
            _ => None,
        };
        clauses.extend(clause);
    }
    all_of(clauses)
}

fn membership<T: SqlLiteral>(
    dialect: Dialect,
    column: &str,
    values: &[T],
    negated: bool,
) -> Option<String> {
    match values {
        [] => None,
        [single] => {
            let op = if negated { "<>" } else { "=" };
            Some(format!("{column} {op} {}", single.to_sql(dialect)))
        }
        many => {
            let op = if negated { "NOT IN" } else { "IN" };
            let list = many
                .iter()
                .map(|v| v.to_sql(dialect))
                .collect::<Vec<_>>()
                .join(", ");
            Some(format!("{column} {op} ({list})"))
        }
    }
}

fn bound<T: SqlLiteral>(dialect: Dialect, column: &str, op: &str, value: Option<&T>) -> Option<String> {
    value.map(|v| format!("{column} {op} {}", v.to_sql(dialect)))
}

/// Compile a text operator against `column`
pub fn text_operator(dialect: Dialect, column: &str, op: &TextOperator) -> Option<String> {
    match op {
        TextOperator::Value(value) => Some(format!("{column} = {}", dialect.string_literal(value))),
        TextOperator::Match(m) => text_match(dialect, column, m),
    }
}

fn text_match(dialect: Dialect, column: &str, m: &TextMatch) -> Option<String> {
    let strings = |values: &Option<OneOrMany<String>>| -> Vec<String> {
        values
            .as_ref()
            .map(|v| v.as_slice().to_vec())
            .unwrap_or_default()
    };
    let literals = |values: Vec<String>| -> Vec<String> {
        values.iter().map(|v| dialect.string_literal(v)).collect()
    };

    let mut clauses = Vec::new();
    clauses.extend(literal_membership(column, literals(strings(&m.eq)), false));
    clauses.extend(literal_membership(column, literals(strings(&m.neq)), true));

    let patterns = [
        (&m.starts_with, "", "%"),
        (&m.ends_with, "%", ""),
        (&m.contains, "%", "%"),
    ];
    for (values, prefix, suffix) in patterns {
        let likes = strings(values)
            .iter()
            .map(|v| dialect.like(column, &format!("{prefix}{}{suffix}", escape_like(v)), false))
            .collect();
        clauses.extend(any_of(likes));
    }
    all_of(clauses)
}

fn literal_membership(column: &str, literals: Vec<String>, negated: bool) -> Option<String> {
    match literals.as_slice() {
        [] => None,
        [single] => Some(format!("{column} {} {single}", if negated { "<>" } else { "=" })),
        many => Some(format!(
            "{column} {} ({})",
            if negated { "NOT IN" } else { "IN" },
            many.join(", ")
        )),
    }
}

// ============================================================================
// Circe value filters
// ============================================================================

pub fn numeric_range(dialect: Dialect, column: &str, range: &NumericRange) -> String {
    range_clause(
        column,
        range.op,
        range.value.to_sql(dialect),
        range.extent.map(|e| e.to_sql(dialect)),
    )
}

pub fn date_range(dialect: Dialect, column: &str, range: &DateRange) -> String {
    range_clause(
        column,
        range.op,
        range.value.to_sql(dialect),
        range.extent.map(|e| e.to_sql(dialect)),
    )
}

fn range_clause(column: &str, op: RangeOp, value: String, extent: Option<String>) -> String {
    match (op, extent) {
        (RangeOp::Between, Some(extent)) => format!("{column} BETWEEN {value} AND {extent}"),
        (RangeOp::NotBetween, Some(extent)) => {
            format!("{column} NOT BETWEEN {value} AND {extent}")
        }
        // Validation rejects a missing extent; degrade to the lower bound
        (RangeOp::Between, None) => format!("{column} >= {value}"),
        (RangeOp::NotBetween, None) => format!("{column} < {value}"),
        (op, _) => format!("{column} {} {value}", op.sql_token()),
    }
}

pub fn text_filter(dialect: Dialect, column: &str, filter: &TextFilter) -> String {
    let text = escape_like(&filter.text);
    let negated = filter.op.is_negated();
    match filter.op {
        TextOp::Eq => format!("{column} = {}", dialect.string_literal(&filter.text)),
        TextOp::NotEq => format!("{column} <> {}", dialect.string_literal(&filter.text)),
        TextOp::Contains | TextOp::NotContains => {
            dialect.like(column, &format!("%{text}%"), negated)
        }
        TextOp::StartsWith | TextOp::NotStartsWith => {
            dialect.like(column, &format!("{text}%"), negated)
        }
        TextOp::EndsWith | TextOp::NotEndsWith => {
            dialect.like(column, &format!("%{text}"), negated)
        }
    }
}

/// `column [NOT] IN (ids)`; `None` for an empty list
pub fn concept_list(column: &str, concepts: &[Concept], exclude: bool) -> Option<String> {
    if concepts.is_empty() {
        return None;
    }
    let ids = concepts
        .iter()
        .map(|c| c.concept_id.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let op = if exclude { "NOT IN" } else { "IN" };
    Some(format!("{column} {op} ({ids})"))
}

/// Membership of `column` in the expansion of the given codesets
pub fn codeset_membership(column: &str, codesets_table: &str, ids: &[i64], negated: bool) -> String {
    let op = if negated { "NOT IN" } else { "IN" };
    let filter = match ids {
        [single] => format!("codeset_id = {single}"),
        many => format!(
            "codeset_id IN ({})",
            many.iter()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    format!("{column} {op} (SELECT concept_id FROM {codesets_table} WHERE {filter})")
}
