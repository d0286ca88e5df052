//! CLI Command Tests
//!
//! Drives the command implementations against fixture documents:
//! - compilation of both grammars with option files and flag overrides
//! - error context for unreadable and malformed documents
//! - validation of fixtures and broken documents

use octofhir_cohort::cli::compile::{CompileConfig, compile, compile_file};
use octofhir_cohort::cli::validate::validate_file;
use octofhir_cohort::{CohortError, Grammar, StatementRole};
use octofhir_cohort::diagnostics::{COH0001, COH0100};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// Test Helpers
// ============================================================================

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../octofhir-cohort-compiler/tests/fixtures")
        .join(name)
}

fn config(file: PathBuf) -> CompileConfig {
    CompileConfig {
        file,
        session_id: Some("cli".into()),
        ..CompileConfig::default()
    }
}

// ============================================================================
// Compile
// ============================================================================

#[rstest]
#[case("scenario_a.json", Grammar::Tree)]
#[case("scenario_b.json", Grammar::Sequential)]
fn test_compile_detects_grammar(#[case] name: &str, #[case] grammar: Grammar) {
    let plan = compile_file(&config(fixture(name))).unwrap();
    assert_eq!(plan.grammar, grammar);
    assert_eq!(plan.session_id, "cli");
    assert!(plan.measures().count() >= 1);
}

#[test]
fn test_compile_applies_flags() {
    let plan = compile_file(&CompileConfig {
        dialect: Some("sql-server".into()),
        cdm_schema: Some("omop".into()),
        results_schema: Some("results".into()),
        target_cohort_id: Some(42),
        ..config(fixture("scenario_b.json"))
    })
    .unwrap();

    let script = plan.to_script();
    assert!(script.contains("#cohort_steps_cli"));
    assert!(script.contains("omop.drug_exposure"));
    assert!(script.contains("DELETE FROM results.cohort_detail WHERE cohort_definition_id = 42"));
}

#[test]
fn test_compile_writes_json_plan() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("plan.json");
    compile(CompileConfig {
        format: Some("json".into()),
        output_file: Some(out.clone()),
        ..config(fixture("scenario_b.json"))
    })
    .unwrap();

    let plan: serde_json::Value = serde_json::from_str(&fs::read_to_string(out).unwrap()).unwrap();
    assert_eq!(plan["grammar"], "sequential");
    assert_eq!(plan["session_id"], "cli");
    let roles: Vec<&str> = plan["statements"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|s| s["role"].as_str())
        .collect();
    assert_eq!(roles.first(), Some(&"schema-setup"));
    assert_eq!(roles.last(), Some(&"cleanup"));
}

#[test]
fn test_compile_forced_grammar_mismatch() {
    let err = compile_file(&CompileConfig {
        grammar: Some("sequential".into()),
        ..config(fixture("scenario_a.json"))
    })
    .unwrap_err();

    assert!(err.to_string().starts_with("Failed to parse cohort file"));
    let cohort = err.downcast_ref::<CohortError>().unwrap();
    assert!(cohort.is_compile_error());
}

#[test]
fn test_compile_missing_file() {
    let err = compile_file(&config(PathBuf::from("/nonexistent/cohort.json"))).unwrap_err();
    assert!(err.to_string().contains("Failed to read cohort file"));
}

#[test]
fn test_compile_unresolved_codeset() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cohort.json");
    fs::write(
        &path,
        r#"[{"containers": [{"filters": [{"type": "condition_occurrence", "conceptset": "99"}]}]}]"#,
    )
    .unwrap();

    let err = compile_file(&config(path)).unwrap_err();
    let cohort = err.downcast_ref::<CohortError>().unwrap();
    assert_eq!(cohort.errors()[0].code(), COH0100);
}

// ============================================================================
// Validate
// ============================================================================

#[test]
fn test_validate_fixtures() {
    for name in ["scenario_a.json", "scenario_b.json"] {
        let result = validate_file(&fixture(name), false);
        assert!(result.is_valid(), "{name}: {:?}", result.diagnostics);
    }
}

#[test]
fn test_validate_invalid_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    fs::write(&path, "{ not json").unwrap();

    let result = validate_file(&path, false);
    assert_eq!(result.grammar, None);
    assert_eq!(result.diagnostics[0].code, COH0001);
}

#[test]
fn test_body_statements_exclude_cleanup() {
    let plan = compile_file(&config(fixture("scenario_b.json"))).unwrap();
    assert!(plan.body().all(|s| s.role != StatementRole::Cleanup));
    assert_eq!(plan.cleanup().count(), plan.temp_tables.len());
}
