//! Cohort plan execution
//!
//! This crate runs a compiled [`QueryPlan`](octofhir_cohort_compiler::QueryPlan) on a
//! caller-provided [`Session`]:
//! - statements run in plan order on the one session
//! - cleanup statements run on every exit path, including failure, timeout and cancellation
//! - measure results are captured by statement label
//!
//! No database driver is bundled; implement [`Session`] for your connection type.

mod executor;
mod session;

pub use executor::{ExecutionReport, PlanExecutor};
pub use session::{QueryResult, Session, SessionError};

pub use octofhir_cohort_diagnostics::{CohortError, Result};
