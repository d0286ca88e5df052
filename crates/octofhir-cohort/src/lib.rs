//! Cohort definition to SQL compiler
//!
//! This crate bundles the cohort toolchain:
//! - parsing and validating cohort documents in the circe tree grammar and the sequential grammar
//! - compiling them into dialect-specific SQL query plans
//! - executing plans on a caller-provided database session
//!
//! # Example
//!
//! ```
//! use octofhir_cohort::{CompileOptions, Dialect, compile};
//!
//! let cohort = r#"[{"containers": [{"filters": [{"type": "death"}]}]}]"#;
//! let options = CompileOptions::new(Dialect::Postgresql).with_session_id("demo");
//! let plan = compile(cohort, None, &options)?;
//! assert!(plan.to_script().contains("cohort_steps_demo"));
//! # Ok::<(), octofhir_cohort::CohortError>(())
//! ```

pub use octofhir_cohort_compiler as compiler;
pub use octofhir_cohort_diagnostics as diagnostics;
pub use octofhir_cohort_exec as exec;
pub use octofhir_cohort_model as model;

// Convenience re-exports
pub use octofhir_cohort_compiler::{
    CompileOptions, Dialect, QueryPlan, Statement, StatementRole, compile, compile_document,
};
pub use octofhir_cohort_diagnostics::{CohortError, Diagnostic, ErrorCode, Result};
pub use octofhir_cohort_exec::{ExecutionReport, PlanExecutor, QueryResult, Session, SessionError};
pub use octofhir_cohort_model::{
    CohortDocument, Grammar, check_document, parse_document, validate_document,
};

#[cfg(feature = "cli")]
pub mod cli;
