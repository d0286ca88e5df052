//! Cohort expression data model
//!
//! This crate provides:
//! - serde data structures for the circe tree grammar ([`CohortExpression`]) and the
//!   sequential grammar ([`Cohort`])
//! - JSON parsing with node-path diagnostics and grammar detection
//! - semantic validation (group counts, empty operators, unresolved concept sets)
//! - design-time warnings for documents that compile but look unintended

mod check;
mod concept_set;
mod criteria;
mod expression;
mod operator;
mod parse;
mod range;
mod sequential;
mod validate;
mod value;

pub use check::*;
pub use concept_set::*;
pub use criteria::*;
pub use expression::*;
pub use operator::*;
pub use parse::*;
pub use range::*;
pub use sequential::*;
pub use validate::*;
pub use value::*;

pub use octofhir_cohort_diagnostics::{CohortError, Result};
