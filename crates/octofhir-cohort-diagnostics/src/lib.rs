//! Cohort compiler diagnostics and error handling
//!
//! This crate provides the error handling infrastructure shared by the cohort model,
//! compiler and execution crates: error codes, node paths into a cohort expression,
//! and diagnostic reporting.

mod error;
mod error_code;
mod path;

pub use error::*;
pub use error_code::*;
pub use path::*;

/// Result type for cohort operations
pub type Result<T> = std::result::Result<T, CohortError>;
