//! CLI functionality for the cohort tool
//!
//! - Compilation to SQL scripts or JSON plans
//! - Document validation
//! - Dialect listing
//! - Output formatting

pub mod compile;
pub mod dialects;
pub mod output;
pub mod validate;
