//! Compile options

use crate::Dialect;
use octofhir_cohort_diagnostics::{COH0402, COH0403, CohortError, Result};
use serde::{Deserialize, Serialize};

/// Knobs of one compile request
///
/// Deserializes from camelCase JSON; every field is optional on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompileOptions {
    pub dialect: Dialect,
    /// Schema holding the clinical tables
    pub cdm_schema: String,
    /// Schema receiving the final rows; no write-back when absent
    pub results_schema: Option<String>,
    /// Schema of `concept`, `concept_ancestor` and `concept_relationship`; defaults to `cdm_schema`
    pub vocabulary_schema: Option<String>,
    /// Emit per-stage count measures
    pub generate_stats: bool,
    pub target_cohort_id: i64,
    pub cohort_id_column_name: String,
    /// Suffix of every temp table; generated when absent
    pub session_id: Option<String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            cdm_schema: "cdm".to_string(),
            results_schema: None,
            vocabulary_schema: None,
            generate_stats: false,
            target_cohort_id: 0,
            cohort_id_column_name: "cohort_definition_id".to_string(),
            session_id: None,
        }
    }
}

impl CompileOptions {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            ..Self::default()
        }
    }

    /// Parse options from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| CohortError::options(COH0402, format!("invalid compile options: {e}")))
    }

    pub fn with_cdm_schema(mut self, schema: impl Into<String>) -> Self {
        self.cdm_schema = schema.into();
        self
    }

    pub fn with_vocabulary_schema(mut self, schema: impl Into<String>) -> Self {
        self.vocabulary_schema = Some(schema.into());
        self
    }

    pub fn with_results_schema(mut self, schema: impl Into<String>) -> Self {
        self.results_schema = Some(schema.into());
        self
    }

    pub fn with_target_cohort_id(mut self, id: i64) -> Self {
        self.target_cohort_id = id;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_stats(mut self, generate_stats: bool) -> Self {
        self.generate_stats = generate_stats;
        self
    }

    pub fn vocabulary_schema(&self) -> &str {
        self.vocabulary_schema.as_deref().unwrap_or(&self.cdm_schema)
    }

    /// Check identifiers that end up verbatim in SQL
    pub fn validate(&self) -> Result<()> {
        let schemas = [
            ("cdmSchema", Some(self.cdm_schema.as_str())),
            ("vocabularySchema", self.vocabulary_schema.as_deref()),
            ("resultsSchema", self.results_schema.as_deref()),
        ];
        for (name, schema) in schemas {
            if let Some(schema) = schema {
                if !is_schema_name(schema) {
                    return Err(CohortError::options(
                        COH0402,
                        format!("{name} '{schema}' is not a valid schema name"),
                    ));
                }
            }
        }
        if !is_identifier(&self.cohort_id_column_name) {
            return Err(CohortError::options(
                COH0402,
                format!(
                    "cohortIdColumnName '{}' is not a valid column name",
                    self.cohort_id_column_name
                ),
            ));
        }
        if let Some(session_id) = &self.session_id {
            if !is_identifier(session_id) {
                return Err(CohortError::options(
                    COH0403,
                    format!("session id '{session_id}' must match [A-Za-z0-9_]+"),
                ));
            }
        }
        Ok(())
    }

    /// The configured session id, or a fresh one
    pub fn resolve_session_id(&self) -> String {
        match &self.session_id {
            Some(id) => id.clone(),
            None => uuid::Uuid::new_v4().simple().to_string(),
        }
    }
}

fn is_identifier(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Identifiers optionally qualified by a database (`db.schema`)
fn is_schema_name(value: &str) -> bool {
    value.split('.').all(is_identifier)
}
