use crate::predicate::codeset_membership;
use crate::query::qualify;
use crate::{CompileOptions, Dialect};

/// Per-compile state shared by every query builder
#[derive(Debug, Clone)]
pub(crate) struct Context<'a> {
    pub(crate) dialect: Dialect,
    pub(crate) options: &'a CompileOptions,
    /// Session-scoped codeset table
    pub(crate) codesets: String,
}

impl<'a> Context<'a> {
    pub(crate) fn new(options: &'a CompileOptions, codesets: String) -> Self {
        Self {
            dialect: options.dialect,
            options,
            codesets,
        }
    }

    /// A CDM table, schema-qualified
    pub(crate) fn cdm(&self, table: &str) -> String {
        qualify(&self.options.cdm_schema, table)
    }

    pub(crate) fn in_codeset(&self, column: &str, codeset_id: i64) -> String {
        codeset_membership(column, &self.codesets, &[codeset_id], false)
    }

    pub(crate) fn observation_period_join(&self, events: &str) -> String {
        format!(
            "JOIN {} OP ON {events}.person_id = OP.person_id \
             AND {events}.start_date >= OP.observation_period_start_date \
             AND {events}.start_date <= OP.observation_period_end_date",
            self.cdm("observation_period")
        )
    }
}

#[cfg(test)]
impl Context<'_> {
    pub(crate) fn for_tests(options: &CompileOptions) -> Context<'_> {
        Context::new(options, "codesets".to_string())
    }
}
