//! Database session abstraction
//!
//! A [`Session`] is one connection that keeps temp tables alive between statements.
//! Plans never share a session concurrently.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Rows returned by a measure statement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Values of one column as integers; non-integer cells are skipped
    pub fn i64_column(&self, name: &str) -> Vec<i64> {
        let Some(index) = self.column_index(name) else {
            return Vec::new();
        };
        self.rows
            .iter()
            .filter_map(|row| row.get(index).and_then(serde_json::Value::as_i64))
            .collect()
    }
}

/// Session error
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Statement failed: {0}")]
    StatementFailed(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),
}

/// One database connection executing plan statements in order
#[async_trait]
pub trait Session: Send + Sync {
    /// Run a statement without a result set; returns the affected row count
    async fn execute(&self, sql: &str) -> Result<u64, SessionError>;

    /// Run a statement returning rows
    async fn query(&self, sql: &str) -> Result<QueryResult, SessionError>;
}
