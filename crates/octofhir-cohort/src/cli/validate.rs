//! Validate command implementation

use super::output;
use anyhow::Result;
use colored::Colorize;
use octofhir_cohort_diagnostics::{COH0401, CohortError, Diagnostic};
use octofhir_cohort_model::{Grammar, check_document, parse_document, validate_document};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for validate command
pub struct ValidateConfig {
    pub files: Vec<PathBuf>,
    pub verbose: bool,
}

/// Validation result for a single file
#[derive(Debug)]
pub struct ValidationResult {
    pub file: PathBuf,
    /// Detected grammar, when the document parsed
    pub grammar: Option<Grammar>,
    pub diagnostics: Vec<Diagnostic>,
    /// Design warnings of a valid document; they never fail validation
    pub warnings: Vec<Diagnostic>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Validate cohort documents
pub fn validate(config: ValidateConfig) -> Result<()> {
    if config.files.is_empty() {
        anyhow::bail!("No files specified for validation");
    }

    let results: Vec<ValidationResult> = config
        .files
        .iter()
        .map(|file| validate_file(file, config.verbose))
        .collect();
    for result in &results {
        print_validation_result(result);
    }

    println!();
    let failed = results.iter().filter(|r| !r.is_valid()).count();
    let warnings: usize = results.iter().map(|r| r.warnings.len()).sum();
    if failed == 0 {
        let mut message = format!("All {} file(s) validated successfully", results.len());
        if warnings > 0 {
            message.push_str(&format!(" with {warnings} warning(s)"));
        }
        println!("{}", output::format_success(&message));
        return Ok(());
    }

    let errors: usize = results.iter().map(|r| r.diagnostics.len()).sum();
    anyhow::bail!("{errors} error(s) in {failed} of {} file(s)", results.len())
}

/// Parse and validate one file, collecting every diagnostic
pub fn validate_file(file: &Path, verbose: bool) -> ValidationResult {
    if verbose {
        eprintln!("Validating: {}", file.display());
    }
    let mut result = ValidationResult {
        file: file.to_path_buf(),
        grammar: None,
        diagnostics: Vec::new(),
        warnings: Vec::new(),
    };

    let json = match fs::read_to_string(file) {
        Ok(json) => json,
        Err(e) => {
            let error = CohortError::system(COH0401, format!("Failed to read file: {e}"));
            result.diagnostics.push(error.to_diagnostic());
            return result;
        }
    };

    let outcome = parse_document(&json, None).and_then(|document| {
        result.grammar = Some(document.grammar());
        validate_document(&document)?;
        Ok(document)
    });
    match outcome {
        Ok(document) => result.warnings = check_document(&document),
        Err(error) => {
            result.diagnostics = error.errors().iter().map(|e| e.to_diagnostic()).collect();
        }
    }
    result
}

/// Print validation result for a file
fn print_validation_result(result: &ValidationResult) {
    let status = if result.is_valid() {
        "✓".green().bold()
    } else {
        "✗".red().bold()
    };
    match result.grammar {
        Some(grammar) => println!(
            "{} {} ({grammar})",
            status,
            result.file.display().to_string().cyan()
        ),
        None => println!("{} {}", status, result.file.display().to_string().cyan()),
    }

    for diagnostic in result.diagnostics.iter().chain(&result.warnings) {
        for line in diagnostic.to_colored_string().lines() {
            println!("  {line}");
        }
    }
}
