//! Cohort SQL compiler
//!
//! This crate compiles a parsed cohort of either grammar into a [`QueryPlan`]: an ordered
//! list of dialect-specific SQL statements over session-scoped temp tables.
//!
//! ```
//! use octofhir_cohort_compiler::{CompileOptions, Dialect, compile};
//!
//! let options = CompileOptions::new(Dialect::Postgresql).with_session_id("doc");
//! let plan = compile(r#"[{"containers": [{"filters": [{"type": "death"}]}]}]"#, None, &options).unwrap();
//! assert_eq!(plan.temp_tables, vec!["codesets_doc", "cohort_steps_doc", "final_cohort_doc"]);
//! ```

mod cohort_end;
mod concept_set;
mod context;
mod criteria;
mod dialect;
mod domain;
mod filter;
mod group;
mod options;
mod pipeline;
mod plan;
mod predicate;
mod primary;
mod query;
mod sequential;
mod windowed;

pub use concept_set::{ConceptSelection, Vocabulary, concept_set_statement, resolve_concept_set};
pub use dialect::{ColumnType, Dialect, escape_like};
pub use domain::{Domain, DomainTable, EndDate};
pub use options::CompileOptions;
pub use pipeline::{compile, compile_cohort, compile_document, compile_expression};
pub use plan::{QueryPlan, Statement, StatementRole, StepInfo, StepKind};
pub use predicate::{
    SqlLiteral, codeset_membership, concept_list, date_range, numeric_range, operator,
    text_filter, text_operator,
};
pub use query::{SelectQuery, all_of, any_of, qualify};
pub use sequential::{SequentialStep, StepExpr, sequential_steps};

pub use octofhir_cohort_diagnostics::{CohortError, Result};
pub use octofhir_cohort_model::Grammar;
