//! Compile command implementation

use super::output;
use anyhow::{Context, Result};
use octofhir_cohort_compiler::{CompileOptions, Dialect, QueryPlan, compile_document};
use octofhir_cohort_model::{Grammar, parse_document};
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

/// How the compiled plan is printed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanFormat {
    /// `-- label` annotated SQL script
    Sql,
    /// The serialized query plan
    Json,
}

impl FromStr for PlanFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sql" => Ok(Self::Sql),
            "json" => Ok(Self::Json),
            other => anyhow::bail!("Unsupported output format: {other}. Use 'sql' or 'json'"),
        }
    }
}

/// Configuration for compile command
#[derive(Debug, Clone, Default)]
pub struct CompileConfig {
    pub file: PathBuf,
    /// `auto`, `tree` or `sequential`
    pub grammar: Option<String>,
    pub dialect: Option<String>,
    /// JSON file with compile options; flags override its fields
    pub options_file: Option<PathBuf>,
    pub cdm_schema: Option<String>,
    pub vocabulary_schema: Option<String>,
    pub results_schema: Option<String>,
    pub target_cohort_id: Option<i64>,
    pub session_id: Option<String>,
    pub generate_stats: bool,
    pub format: Option<String>,
    pub output_file: Option<PathBuf>,
}

impl CompileConfig {
    /// Options file merged with command-line overrides
    pub fn compile_options(&self) -> Result<CompileOptions> {
        let mut options = match &self.options_file {
            Some(path) => {
                let json = fs::read_to_string(path).with_context(|| {
                    format!("Failed to read options file: {}", path.display())
                })?;
                CompileOptions::from_json(&json)
                    .with_context(|| format!("Invalid options file: {}", path.display()))?
            }
            None => CompileOptions::default(),
        };

        if let Some(dialect) = &self.dialect {
            options.dialect = Dialect::from_str(dialect)?;
        }
        if let Some(schema) = &self.cdm_schema {
            options.cdm_schema = schema.clone();
        }
        if let Some(schema) = &self.vocabulary_schema {
            options.vocabulary_schema = Some(schema.clone());
        }
        if let Some(schema) = &self.results_schema {
            options.results_schema = Some(schema.clone());
        }
        if let Some(id) = self.target_cohort_id {
            options.target_cohort_id = id;
        }
        if let Some(session_id) = &self.session_id {
            options.session_id = Some(session_id.clone());
        }
        options.generate_stats |= self.generate_stats;
        Ok(options)
    }

    /// Requested grammar; `None` means detect from the document
    pub fn grammar(&self) -> Result<Option<Grammar>> {
        match self.grammar.as_deref() {
            None | Some("auto") => Ok(None),
            Some(name) => Ok(Some(Grammar::from_str(name)?)),
        }
    }

    pub fn format(&self) -> Result<PlanFormat> {
        self.format.as_deref().map_or(Ok(PlanFormat::Sql), PlanFormat::from_str)
    }
}

/// Compile a cohort document into a plan
pub fn compile_file(config: &CompileConfig) -> Result<QueryPlan> {
    let options = config.compile_options()?;
    let grammar = config.grammar()?;

    let json = fs::read_to_string(&config.file)
        .with_context(|| format!("Failed to read cohort file: {}", config.file.display()))?;
    let document = parse_document(&json, grammar)
        .with_context(|| format!("Failed to parse cohort file: {}", config.file.display()))?;
    log::info!(
        "compiling {} as {} grammar for {}",
        config.file.display(),
        document.grammar(),
        options.dialect
    );

    compile_document(&document, &options)
        .with_context(|| format!("Failed to compile cohort file: {}", config.file.display()))
}

/// Compile and print the plan
pub fn compile(config: CompileConfig) -> Result<()> {
    let format = config.format()?;
    let plan = compile_file(&config)?;
    log::debug!(
        "plan has {} statements over {} temp tables",
        plan.statements.len(),
        plan.temp_tables.len()
    );

    let content = match format {
        PlanFormat::Sql => plan.to_script(),
        PlanFormat::Json => output::format_json(&plan)?,
    };
    output::write_output(&content, config.output_file.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn test_flags_override_options_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        fs::write(
            &path,
            r#"{"dialect": "clickhouse", "cdmSchema": "omop", "resultsSchema": "out", "targetCohortId": 3}"#,
        )
        .unwrap();

        let config = CompileConfig {
            options_file: Some(path),
            cdm_schema: Some("cdm_v5".into()),
            target_cohort_id: Some(12),
            generate_stats: true,
            ..CompileConfig::default()
        };
        let options = config.compile_options().unwrap();

        assert_eq!(options.dialect, Dialect::ClickHouse);
        assert_eq!(options.cdm_schema, "cdm_v5");
        assert_eq!(options.results_schema.as_deref(), Some("out"));
        assert_eq!(options.target_cohort_id, 12);
        assert!(options.generate_stats);
    }

    #[test]
    fn test_unknown_dialect_flag() {
        let config = CompileConfig {
            dialect: Some("oracle".into()),
            ..CompileConfig::default()
        };
        let err = config.compile_options().unwrap_err();
        assert!(err.to_string().contains("unknown dialect 'oracle'"));
    }

    #[rstest]
    #[case(None, None)]
    #[case(Some("auto"), None)]
    #[case(Some("circe"), Some(Grammar::Tree))]
    #[case(Some("sequential"), Some(Grammar::Sequential))]
    fn test_grammar_flag(#[case] flag: Option<&str>, #[case] expected: Option<Grammar>) {
        let config = CompileConfig {
            grammar: flag.map(String::from),
            ..CompileConfig::default()
        };
        assert_eq!(config.grammar().unwrap(), expected);
    }

    #[test]
    fn test_format_flag() {
        assert_eq!(PlanFormat::from_str("JSON").unwrap(), PlanFormat::Json);
        assert!(PlanFormat::from_str("xml").is_err());
    }
}
