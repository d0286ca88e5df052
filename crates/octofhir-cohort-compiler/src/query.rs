//! Structured SELECT builder
//!
//! Queries are assembled from select/join/where/group/having lists and rendered once.

use indexmap::IndexSet;
use std::fmt;

/// A SELECT statement under construction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectQuery {
    distinct: bool,
    columns: IndexSet<String>,
    from: String,
    joins: Vec<String>,
    filters: Vec<String>,
    group_by: Vec<String>,
    having: Vec<String>,
}

impl SelectQuery {
    /// `FROM source`; `source` is a table reference with alias, e.g. `cdm.person P`
    pub fn from(source: impl Into<String>) -> Self {
        Self {
            from: source.into(),
            ..Self::default()
        }
    }

    /// `FROM (subquery) alias`
    pub fn from_subquery(subquery: &str, alias: &str) -> Self {
        Self::from(format!("(\n{subquery}\n) {alias}"))
    }

    pub fn distinct(&mut self) -> &mut Self {
        self.distinct = true;
        self
    }

    /// Add a select-list entry; duplicates are ignored
    pub fn select(&mut self, column: impl Into<String>) -> &mut Self {
        self.columns.insert(column.into());
        self
    }

    pub fn select_all<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for column in columns {
            self.select(column);
        }
        self
    }

    /// Add a full join clause, e.g. `JOIN cdm.person P ON ...`
    pub fn join(&mut self, clause: impl Into<String>) -> &mut Self {
        let clause = clause.into();
        if !self.joins.contains(&clause) {
            self.joins.push(clause);
        }
        self
    }

    /// `{kind} JOIN (subquery) alias ON condition`
    pub fn join_subquery(&mut self, kind: &str, subquery: &str, alias: &str, on: &str) -> &mut Self {
        self.join(format!("{kind} JOIN (\n{subquery}\n) {alias} ON {on}"))
    }

    /// AND a condition into the WHERE clause
    pub fn filter(&mut self, condition: impl Into<String>) -> &mut Self {
        self.filters.push(condition.into());
        self
    }

    pub fn filter_all<I>(&mut self, conditions: I) -> &mut Self
    where
        I: IntoIterator<Item = String>,
    {
        self.filters.extend(conditions);
        self
    }

    pub fn group_by(&mut self, column: impl Into<String>) -> &mut Self {
        self.group_by.push(column.into());
        self
    }

    pub fn having(&mut self, condition: impl Into<String>) -> &mut Self {
        self.having.push(condition.into());
        self
    }

    pub fn has_filters(&self) -> bool {
        !self.filters.is_empty()
    }

    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SelectQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.iter().cloned().collect::<Vec<_>>().join(", ")
        };
        let distinct = if self.distinct { "DISTINCT " } else { "" };
        write!(f, "SELECT {distinct}{columns}\nFROM {}", self.from)?;
        for join in &self.joins {
            write!(f, "\n{join}")?;
        }
        if !self.filters.is_empty() {
            write!(f, "\nWHERE {}", self.filters.join("\n  AND "))?;
        }
        if !self.group_by.is_empty() {
            write!(f, "\nGROUP BY {}", self.group_by.join(", "))?;
        }
        if !self.having.is_empty() {
            write!(f, "\nHAVING {}", self.having.join(" AND "))?;
        }
        Ok(())
    }
}

/// `(a OR b)`; a single condition is returned unwrapped
pub fn any_of(conditions: Vec<String>) -> Option<String> {
    combine(conditions, " OR ")
}

/// `(a AND b)`; a single condition is returned unwrapped
pub fn all_of(conditions: Vec<String>) -> Option<String> {
    combine(conditions, " AND ")
}

fn combine(mut conditions: Vec<String>, separator: &str) -> Option<String> {
    match conditions.len() {
        0 => None,
        1 => conditions.pop(),
        _ => Some(format!("({})", conditions.join(separator))),
    }
}

/// `table` qualified by `schema` when one is set
pub fn qualify(schema: &str, table: &str) -> String {
    if schema.is_empty() {
        table.to_string()
    } else {
        format!("{schema}.{table}")
    }
}
