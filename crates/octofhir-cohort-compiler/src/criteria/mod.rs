//! Tree-grammar domain criteria
//!
//! Every [`Criteria`] compiles to a query over one CDM event table producing
//!
//! ```text
//! person_id, event_id, start_date, end_date, visit_occurrence_id, sort_date, domain_concept_id
//! ```
//!
//! The concept set and `First` ranking apply to the raw table (inner query `d`); every
//! other filter applies to the ranked rows (outer query `C`).

mod domains;

use crate::context::Context;
use crate::domain::{Domain, DomainTable};
use crate::group::group_query;
use crate::predicate::{concept_list, date_range, numeric_range, text_filter};
use crate::query::SelectQuery;
use octofhir_cohort_model::{
    Concept, Criteria, CriteriaCommon, CriteriaGroup, DateField, DateRange, EncounterFilters,
    NumericRange, TextFilter,
};

/// Compile one criteria into its event query
pub(crate) fn criteria_query(ctx: &Context<'_>, criteria: &Criteria) -> String {
    let common = criteria.common();
    let mut query = CriteriaQuery::new(ctx, Domain::of_criteria(criteria), common);
    domains::apply(&mut query, criteria);
    let sql = query.render();

    match common.correlated_criteria.as_ref().filter(|g| !g.is_empty()) {
        Some(group) => with_correlated_criteria(ctx, &sql, group),
        None => sql,
    }
}

/// Keep only events satisfying a criteria-level correlated group
fn with_correlated_criteria(ctx: &Context<'_>, events: &str, group: &CriteriaGroup) -> String {
    let mut anchored = SelectQuery::from_subquery(events, "E");
    anchored
        .select_all([
            "E.person_id",
            "E.event_id",
            "E.start_date",
            "E.end_date",
            "E.visit_occurrence_id",
            "E.sort_date",
            "E.domain_concept_id",
            "OP.observation_period_start_date AS op_start_date",
            "OP.observation_period_end_date AS op_end_date",
        ])
        .join(ctx.observation_period_join("E"));
    let anchor = format!("(\n{}\n)", anchored.render());

    let mut query = SelectQuery::from(format!("{anchor} PE"));
    query
        .select_all([
            "PE.person_id",
            "PE.event_id",
            "PE.start_date",
            "PE.end_date",
            "PE.visit_occurrence_id",
            "PE.sort_date",
            "PE.domain_concept_id",
        ])
        .join_subquery(
            "INNER",
            &group_query(ctx, group, &anchor, 0),
            "AC",
            "AC.person_id = PE.person_id AND AC.event_id = PE.event_id",
        );
    query.render()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Lookup {
    Person,
    Visit,
    Provider,
    CareSite,
}

/// Builder for one domain criteria query
pub(crate) struct CriteriaQuery<'a> {
    ctx: &'a Context<'a>,
    table: DomainTable,
    common: &'a CriteriaCommon,
    lookups: Vec<Lookup>,
    filters: Vec<String>,
    start_override: Option<String>,
    end_override: Option<String>,
}

impl<'a> CriteriaQuery<'a> {
    fn new(ctx: &'a Context<'a>, domain: Domain, common: &'a CriteriaCommon) -> Self {
        let mut query = Self {
            ctx,
            table: domain.table(),
            common,
            lookups: Vec::new(),
            filters: Vec::new(),
            start_override: None,
            end_override: None,
        };
        query.common_filters();
        query
    }

    fn common_filters(&mut self) {
        let common = self.common;
        let start = self.col(self.table.start_date);
        let end = self.table.end_expr(self.ctx.dialect, "C");
        self.date_range(&start, &common.occurrence_start_date);
        self.date_range(&end, &common.occurrence_end_date);
        if common.age.is_some() {
            let age = self.age_at(self.table.start_date);
            self.numeric(&age, &common.age);
        }
        if common.gender.is_some() {
            let person = self.person();
            self.concepts(
                &format!("{person}.gender_concept_id"),
                &common.gender,
                common.gender_exclude,
            );
        }
    }

    pub(crate) fn dialect(&self) -> crate::Dialect {
        self.ctx.dialect
    }

    /// Column of the ranked domain rows
    pub(crate) fn col(&self, column: &str) -> String {
        format!("C.{column}")
    }

    pub(crate) fn filter(&mut self, condition: String) {
        self.filters.push(condition);
    }

    fn lookup(&mut self, lookup: Lookup) {
        if !self.lookups.contains(&lookup) {
            self.lookups.push(lookup);
        }
    }

    pub(crate) fn person(&mut self) -> &'static str {
        self.lookup(Lookup::Person);
        "P"
    }

    pub(crate) fn visit(&mut self) -> &'static str {
        self.lookup(Lookup::Visit);
        "V"
    }

    pub(crate) fn provider(&mut self) -> &'static str {
        self.lookup(Lookup::Provider);
        "PR"
    }

    pub(crate) fn care_site(&mut self) -> &'static str {
        self.lookup(Lookup::CareSite);
        "CS"
    }

    /// `YEAR(C.column) - P.year_of_birth`
    pub(crate) fn age_at(&mut self, column: &str) -> String {
        let person = self.person();
        format!(
            "{} - {person}.year_of_birth",
            self.ctx.dialect.year(&self.col(column))
        )
    }

    /// Days from `start` to `end`
    pub(crate) fn days_between(&self, start: &str, end: &str) -> String {
        self.ctx.dialect.date_diff(&self.col(start), &self.col(end))
    }

    pub(crate) fn date_range(&mut self, expr: &str, range: &Option<DateRange>) {
        if let Some(range) = range {
            let clause = date_range(self.ctx.dialect, expr, range);
            self.filter(clause);
        }
    }

    pub(crate) fn numeric(&mut self, expr: &str, range: &Option<NumericRange>) {
        if let Some(range) = range {
            let clause = numeric_range(self.ctx.dialect, expr, range);
            self.filter(clause);
        }
    }

    pub(crate) fn text(&mut self, expr: &str, filter: &Option<TextFilter>) {
        if let Some(filter) = filter {
            let clause = text_filter(self.ctx.dialect, expr, filter);
            self.filter(clause);
        }
    }

    pub(crate) fn concepts(
        &mut self,
        expr: &str,
        concepts: &Option<Vec<Concept>>,
        exclude: Option<bool>,
    ) {
        let clause = concepts
            .as_deref()
            .and_then(|c| concept_list(expr, c, exclude.unwrap_or(false)));
        if let Some(clause) = clause {
            self.filter(clause);
        }
    }

    /// Membership of a domain column in a referenced concept set
    pub(crate) fn codeset(&mut self, column: &str, codeset_id: Option<i64>) {
        if let Some(id) = codeset_id {
            let clause = self.ctx.in_codeset(&self.col(column), id);
            self.filter(clause);
        }
    }

    /// Provider specialty and visit type of visit-linked events
    pub(crate) fn encounter(&mut self, encounter: &EncounterFilters) {
        if encounter.provider_specialty.is_some() {
            let provider = self.provider();
            self.concepts(
                &format!("{provider}.specialty_concept_id"),
                &encounter.provider_specialty,
                None,
            );
        }
        if encounter.visit_type.is_some() {
            let visit = self.visit();
            self.concepts(
                &format!("{visit}.visit_concept_id"),
                &encounter.visit_type,
                encounter.visit_type_exclude,
            );
        }
    }

    /// Replace the emitted start date with a fixed date expression
    pub(crate) fn override_start(&mut self, expr: String) {
        self.start_override = Some(expr);
    }

    pub(crate) fn override_end(&mut self, expr: String) {
        self.end_override = Some(expr);
    }

    fn inner(&self) -> SelectQuery {
        let table = &self.table;
        let mut inner = SelectQuery::from(format!("{} d", self.ctx.cdm(table.table)));
        inner.select("d.*");
        if self.common.is_first() {
            inner.select(format!(
                "ROW_NUMBER() OVER (PARTITION BY d.person_id ORDER BY {}, {}) AS ordinal",
                table.start_expr("d"),
                table.event_id_expr("d")
            ));
        }
        if let Some(id) = self.common.codeset_id {
            inner.filter(self.ctx.in_codeset(&format!("d.{}", table.concept), id));
        }
        inner
    }

    fn render(mut self) -> String {
        let dialect = self.ctx.dialect;
        let raw_start = self
            .start_override
            .clone()
            .unwrap_or_else(|| self.table.start_expr("C"));
        let raw_end = self
            .end_override
            .clone()
            .unwrap_or_else(|| self.table.end_expr(dialect, "C"));

        let (start, end) = match self.common.date_adjustment {
            Some(adjustment) => {
                let pick = |field: DateField| match field {
                    DateField::StartDate => raw_start.clone(),
                    DateField::EndDate => raw_end.clone(),
                };
                let shift = |expr: String, offset: i32| {
                    if offset == 0 {
                        expr
                    } else {
                        dialect.date_add(&expr, offset)
                    }
                };
                let start = shift(pick(adjustment.start_with), adjustment.start_offset);
                let end = shift(pick(adjustment.end_with), adjustment.end_offset);
                self.filter(format!("{start} <= {end}"));
                (start, end)
            }
            None => (raw_start, raw_end),
        };

        let mut query = SelectQuery::from_subquery(&self.inner().render(), "C");
        query.select_all([
            "C.person_id".to_string(),
            format!("{} AS event_id", self.table.event_id_expr("C")),
            format!("{start} AS start_date"),
            format!("{end} AS end_date"),
            format!(
                "{} AS visit_occurrence_id",
                self.table.visit_expr(dialect, "C")
            ),
            format!("{start} AS sort_date"),
            format!("C.{} AS domain_concept_id", self.table.concept),
        ]);

        self.lookups.sort();
        for lookup in &self.lookups {
            query.join(match lookup {
                Lookup::Person => format!(
                    "JOIN {} P ON C.person_id = P.person_id",
                    self.ctx.cdm("person")
                ),
                Lookup::Visit => format!(
                    "JOIN {} V ON C.visit_occurrence_id = V.visit_occurrence_id AND C.person_id = V.person_id",
                    self.ctx.cdm("visit_occurrence")
                ),
                Lookup::Provider => format!(
                    "LEFT JOIN {} PR ON C.provider_id = PR.provider_id",
                    self.ctx.cdm("provider")
                ),
                Lookup::CareSite => format!(
                    "LEFT JOIN {} CS ON C.care_site_id = CS.care_site_id",
                    self.ctx.cdm("care_site")
                ),
            });
        }

        query.filter_all(self.filters);
        if self.common.is_first() {
            query.filter("C.ordinal = 1");
        }
        query.render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CompileOptions, Dialect};
    use pretty_assertions::assert_eq;

    fn compile(json: &str) -> String {
        let options = CompileOptions::new(Dialect::Postgresql);
        let ctx = Context::for_tests(&options);
        let criteria: Criteria = serde_json::from_str(json).unwrap();
        criteria_query(&ctx, &criteria)
    }

    #[test]
    fn test_condition_era_with_codeset_and_first() {
        let sql = compile(r#"{"ConditionEra": {"CodesetId": 1, "First": true}}"#);
        assert_eq!(
            sql,
            "SELECT C.person_id, C.condition_era_id AS event_id, C.condition_era_start_date AS start_date, \
             C.condition_era_end_date AS end_date, CAST(NULL AS BIGINT) AS visit_occurrence_id, \
             C.condition_era_start_date AS sort_date, C.condition_concept_id AS domain_concept_id\n\
             FROM (\n\
             SELECT d.*, ROW_NUMBER() OVER (PARTITION BY d.person_id ORDER BY d.condition_era_start_date, d.condition_era_id) AS ordinal\n\
             FROM cdm.condition_era d\n\
             WHERE d.condition_concept_id IN (SELECT concept_id FROM codesets WHERE codeset_id = 1)\n\
             ) C\n\
             WHERE C.ordinal = 1"
        );
    }

    #[test]
    fn test_age_and_gender_join_person_once() {
        let sql = compile(
            r#"{"ConditionOccurrence": {
                "Age": {"Value": 18, "Op": "gte"},
                "Gender": [{"CONCEPT_ID": 8532}],
                "GenderExclude": true
            }}"#,
        );
        assert_eq!(sql.matches("JOIN cdm.person P").count(), 1);
        assert!(sql.contains("EXTRACT(YEAR FROM C.condition_start_date) - P.year_of_birth >= 18"));
        assert!(sql.contains("P.gender_concept_id NOT IN (8532)"));
    }

    #[test]
    fn test_encounter_filters_join_lookups() {
        let sql = compile(
            r#"{"DrugExposure": {"ProviderSpecialty": [38004446], "VisitType": [9201]}}"#,
        );
        let visit = sql.find("JOIN cdm.visit_occurrence V").unwrap();
        let provider = sql.find("LEFT JOIN cdm.provider PR").unwrap();
        assert!(visit < provider);
        assert!(sql.contains("PR.specialty_concept_id IN (38004446)"));
        assert!(sql.contains("V.visit_concept_id IN (9201)"));
    }

    #[test]
    fn test_date_adjustment_shifts_emitted_dates() {
        let sql = compile(
            r#"{"Observation": {"DateAdjustment": {"StartWith": "START_DATE", "StartOffset": 7, "EndWith": "START_DATE", "EndOffset": 30}}}"#,
        );
        let start = "CAST((C.observation_date + 7 * INTERVAL '1 day') AS DATE)";
        let end = "CAST((C.observation_date + 30 * INTERVAL '1 day') AS DATE)";
        assert!(sql.contains(&format!("{start} AS start_date")));
        assert!(sql.contains(&format!("{end} AS end_date")));
        assert!(sql.contains(&format!("{start} AS sort_date")));
        assert!(sql.contains(&format!("WHERE {start} <= {end}")));
    }

    #[test]
    fn test_correlated_criteria_wraps_events() {
        let sql = compile(
            r#"{"VisitOccurrence": {
                "CodesetId": 4,
                "CorrelatedCriteria": {
                    "Type": "ALL",
                    "CriteriaList": [{
                        "Criteria": {"ConditionOccurrence": {"CodesetId": 5}},
                        "StartWindow": {"Start": {"Days": 0, "Coeff": -1}, "End": {"Days": 0, "Coeff": 1}}
                    }]
                }
            }}"#,
        );
        assert!(sql.starts_with("SELECT PE.person_id, PE.event_id"));
        assert!(sql.contains("AS op_start_date"));
        assert!(sql.contains(") AC ON AC.person_id = PE.person_id AND AC.event_id = PE.event_id"));
        assert!(sql.contains("SELECT 0 AS index_id, E.person_id, E.event_id"));
    }

    #[test]
    fn test_empty_correlated_group_is_ignored() {
        let sql = compile(r#"{"Death": {"CorrelatedCriteria": {"Type": "ANY"}}}"#);
        assert!(!sql.contains("AC ON"));
        assert!(sql.contains("C.person_id AS event_id"));
    }
}
