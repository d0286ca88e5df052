//! Sequential-grammar domain filters
//!
//! A filter compiles to `SELECT DISTINCT person_id` over its event table `E` with every
//! present field AND-ed into the WHERE clause. `first` ranks the rows that pass the other
//! fields and keeps each person's earliest one.

mod targets;

use crate::context::Context;
use crate::domain::Domain;
use crate::predicate::{codeset_membership, operator, text_operator};
use crate::query::{SelectQuery, all_of};
use octofhir_cohort_diagnostics::{COH0005, COH0007, COH0009, COH0400, CohortError, NodePath, Result};
use octofhir_cohort_model::{Filter, FilterField, Identifier, Operator};
use targets::Target;

/// Concept ids flagging an abnormal measurement value (`Abnormal`, `High`)
const ABNORMAL_VALUE_CONCEPTS: &str = "4155142, 4155143";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Lookup {
    Person,
    Visit,
    Provider,
    CareSite,
}

/// Persons with at least one row matching `filter`; `path` locates the filter in the document
pub(crate) fn filter_query(ctx: &Context<'_>, filter: &Filter, path: &NodePath) -> Result<String> {
    let table = Domain::of_filter(filter).table();
    let mut lookups = Vec::new();
    let mut clauses = Vec::new();
    let mut first = false;

    for (name, field) in filter.fields() {
        let field_path = path.field(name);
        let Some(target) = targets::target(filter, name) else {
            return Err(CohortError::system(
                COH0400,
                format!("no column for {}.{name}", filter.type_name()),
            ));
        };
        let column = match target {
            Target::First => {
                first = matches!(field, FilterField::Flag(true));
                continue;
            }
            Target::Abnormal => {
                if matches!(field, FilterField::Flag(true)) {
                    clauses.push(format!(
                        "(E.value_as_number < E.range_low OR E.value_as_number > E.range_high \
                         OR E.value_as_concept_id IN ({ABNORMAL_VALUE_CONCEPTS}))"
                    ));
                }
                continue;
            }
            Target::Event(column) => format!("E.{column}"),
            Target::AgeAt(column) => {
                add(&mut lookups, Lookup::Person);
                format!("{} - P.year_of_birth", ctx.dialect.year(&format!("E.{column}")))
            }
            Target::Person(column) => {
                add(&mut lookups, Lookup::Person);
                format!("P.{column}")
            }
            Target::VisitConcept => {
                add(&mut lookups, Lookup::Visit);
                "V.visit_concept_id".to_string()
            }
            Target::ProviderSpecialty => {
                add(&mut lookups, Lookup::Provider);
                "PR.specialty_concept_id".to_string()
            }
            Target::PlaceOfService => {
                add(&mut lookups, Lookup::CareSite);
                "CS.place_of_service_concept_id".to_string()
            }
            Target::YearsBetween(start, end) => format!(
                "({} - {})",
                ctx.dialect.year(&format!("E.{end}")),
                ctx.dialect.year(&format!("E.{start}"))
            ),
        };
        clauses.push(field_clause(ctx, &column, field, &field_path)?);
    }

    let mut query = SelectQuery::from(format!("{} E", ctx.cdm(table.table)));
    lookups.sort();
    for lookup in lookups {
        query.join(match lookup {
            Lookup::Person => format!("JOIN {} P ON E.person_id = P.person_id", ctx.cdm("person")),
            Lookup::Visit => format!(
                "LEFT JOIN {} V ON E.visit_occurrence_id = V.visit_occurrence_id",
                ctx.cdm("visit_occurrence")
            ),
            Lookup::Provider => format!(
                "LEFT JOIN {} PR ON E.provider_id = PR.provider_id",
                ctx.cdm("provider")
            ),
            Lookup::CareSite => format!(
                "LEFT JOIN {} CS ON E.care_site_id = CS.care_site_id",
                ctx.cdm("care_site")
            ),
        });
    }
    query.filter_all(clauses);

    if !first {
        query.distinct().select("E.person_id");
        return Ok(query.render());
    }
    query.select_all([
        "E.person_id".to_string(),
        format!(
            "ROW_NUMBER() OVER (PARTITION BY E.person_id ORDER BY {}, {}) AS ordinal",
            table.start_expr("E"),
            table.event_id_expr("E")
        ),
    ]);
    let mut ranked = SelectQuery::from_subquery(&query.render(), "F");
    ranked
        .distinct()
        .select("F.person_id")
        .filter("F.ordinal = 1");
    Ok(ranked.render())
}

fn add(lookups: &mut Vec<Lookup>, lookup: Lookup) {
    if !lookups.contains(&lookup) {
        lookups.push(lookup);
    }
}

fn field_clause(ctx: &Context<'_>, column: &str, field: FilterField<'_>, path: &NodePath) -> Result<String> {
    let dialect = ctx.dialect;
    let clause = match field {
        FilterField::Number(op) => operator(dialect, column, op),
        FilterField::Concept(op) => operator(dialect, column, op),
        FilterField::Date(op) => operator(dialect, column, op),
        FilterField::Codeset(op) => codeset_clause(ctx, column, op, path)?,
        FilterField::Text(op) => {
            return text_operator(dialect, column, op).ok_or_else(|| {
                CohortError::malformed(COH0009, "text operator has no matcher", path.clone())
            });
        }
        FilterField::Flag(value) => Some(format!("{column} = {}", i32::from(value))),
    };
    clause.ok_or_else(|| CohortError::malformed(COH0005, "operator has no comparison", path.clone()))
}

/// Codeset membership; only `eq` and `neq` make sense for a concept set reference
fn codeset_clause(
    ctx: &Context<'_>,
    column: &str,
    op: &Operator<Identifier>,
    path: &NodePath,
) -> Result<Option<String>> {
    let cmp = match op {
        Operator::Value(id) => {
            return Ok(Some(codeset_membership(column, &ctx.codesets, &[id.value()], false)));
        }
        Operator::Compare(cmp) => cmp,
    };
    let mut clauses = Vec::new();
    for (name, values) in cmp.fields() {
        let negated = match name {
            "eq" => false,
            "neq" => true,
            other => {
                return Err(CohortError::malformed(
                    COH0007,
                    format!("concept set references support only eq and neq, found {other}"),
                    path.clone(),
                ));
            }
        };
        let ids: Vec<i64> = values.as_slice().iter().map(|id| id.value()).collect();
        if !ids.is_empty() {
            clauses.push(codeset_membership(column, &ctx.codesets, &ids, negated));
        }
    }
    Ok(all_of(clauses))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CompileOptions, Dialect};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn compile_with(dialect: Dialect, json: &str) -> Result<String> {
        let options = CompileOptions::new(dialect);
        let ctx = Context::for_tests(&options);
        let filter: Filter = serde_json::from_str(json).unwrap();
        let path = NodePath::root().field("groups").index(0).field("filters").index(0);
        filter_query(&ctx, &filter, &path)
    }

    fn compile(json: &str) -> String {
        compile_with(Dialect::SqlServer, json).unwrap()
    }

    #[test]
    fn test_codeset_and_age() {
        assert_eq!(
            compile(r#"{"type": "condition_era", "conceptset": "1", "startAge": {"gte": 18}}"#),
            "SELECT DISTINCT E.person_id\n\
             FROM cdm.condition_era E\n\
             JOIN cdm.person P ON E.person_id = P.person_id\n\
             WHERE E.condition_concept_id IN (SELECT concept_id FROM codesets WHERE codeset_id = 1)\n  \
             AND YEAR(E.condition_era_start_date) - P.year_of_birth >= 18"
        );
    }

    #[test]
    fn test_first_ranks_after_other_fields() {
        let sql = compile(
            r#"{"type": "drug_exposure", "conceptset": 2, "first": true, "daysSupply": {"gt": [10, 30]}}"#,
        );
        assert!(sql.starts_with("SELECT DISTINCT F.person_id\nFROM (\nSELECT E.person_id, ROW_NUMBER() OVER"));
        assert!(sql.contains("ORDER BY E.drug_exposure_start_date, E.drug_exposure_id) AS ordinal"));
        assert!(sql.contains("AND E.days_supply > 30\n) F"));
        assert!(sql.ends_with("WHERE F.ordinal = 1"));
    }

    #[rstest]
    #[case(
        r#"{"type": "drug_exposure", "visitType": [9201, 9203]}"#,
        "LEFT JOIN cdm.visit_occurrence V ON E.visit_occurrence_id = V.visit_occurrence_id",
        "V.visit_concept_id IN (CAST(9201 AS BIGINT), CAST(9203 AS BIGINT))"
    )]
    #[case(
        r#"{"type": "visit_occurrence", "visitType": 9201, "placeOfService": 8756}"#,
        "LEFT JOIN cdm.care_site CS ON E.care_site_id = CS.care_site_id",
        "E.visit_concept_id = CAST(9201 AS BIGINT)"
    )]
    #[case(
        r#"{"type": "demographic", "raceType": {"neq": 8527}}"#,
        "FROM cdm.observation_period E\nJOIN cdm.person P",
        "P.race_concept_id <> CAST(8527 AS BIGINT)"
    )]
    #[case(
        r#"{"type": "observation", "valueAsString": {"contains": "50%"}}"#,
        "FROM cdm.observation E",
        "E.value_as_string LIKE '%50\\%%' ESCAPE '\\'"
    )]
    #[case(
        r#"{"type": "measurement", "abnormal": true}"#,
        "FROM cdm.measurement E",
        "OR E.value_as_concept_id IN (4155142, 4155143))"
    )]
    #[case(
        r#"{"type": "drug_era", "length": {"lt": 2}}"#,
        "FROM cdm.drug_era E",
        "(YEAR(E.drug_era_end_date) - YEAR(E.drug_era_start_date)) < 2"
    )]
    #[case(
        r#"{"type": "death", "cause": {"neq": [1, 2]}}"#,
        "FROM cdm.death E",
        "E.cause_source_concept_id NOT IN (SELECT concept_id FROM codesets WHERE codeset_id IN (1, 2))"
    )]
    fn test_field_targets(#[case] json: &str, #[case] join: &str, #[case] clause: &str) {
        let sql = compile(json);
        assert!(sql.contains(join), "missing `{join}` in\n{sql}");
        assert!(sql.contains(clause), "missing `{clause}` in\n{sql}");
    }

    #[test]
    fn test_ordered_comparison_on_codeset_is_rejected() {
        let err = compile_with(
            Dialect::Postgresql,
            r#"{"type": "condition_occurrence", "conceptset": {"gt": 3}}"#,
        )
        .unwrap_err();
        assert_eq!(err.code(), COH0007);
        assert_eq!(
            err.path().map(ToString::to_string).as_deref(),
            Some("groups[0].filters[0].conceptset")
        );
    }

    #[test]
    fn test_empty_operator_is_rejected() {
        let err = compile_with(Dialect::ClickHouse, r#"{"type": "specimen", "quantity": {}}"#).unwrap_err();
        assert_eq!(err.code(), COH0005);
    }

    #[test]
    fn test_unfiltered_table_selects_every_person() {
        assert_eq!(
            compile(r#"{"type": "death"}"#),
            "SELECT DISTINCT E.person_id\nFROM cdm.death E"
        );
    }
}
