//! Output formatting utilities

use anyhow::{Context, Result};
use colored::Colorize;
use octofhir_cohort_diagnostics::CohortError;
use serde::Serialize;
use std::fs;
use std::io::IsTerminal;
use std::path::Path;

/// Set up color output based on user preference
pub fn setup_colors(mode: &str) {
    match mode.to_ascii_lowercase().as_str() {
        "always" => colored::control::set_override(true),
        "never" => colored::control::set_override(false),
        _ => colored::control::set_override(std::io::stdout().is_terminal()),
    }
}

/// Format an error for display
///
/// Cohort errors anywhere in the chain are expanded into one diagnostic per underlying error.
pub fn format_error(error: &anyhow::Error) -> String {
    let mut out = format!("{} {}", "Error:".red().bold(), error);
    if let Some(cohort) = error.chain().find_map(|e| e.downcast_ref::<CohortError>()) {
        for inner in cohort.errors() {
            out.push('\n');
            out.push_str(&indent(&inner.to_diagnostic().to_colored_string()));
        }
    }
    out
}

/// Format a success message for display
pub fn format_success(message: &str) -> String {
    format!("{} {}", "Success:".green().bold(), message)
}

/// Write output to a file or stdout
pub fn write_output(content: &str, output_file: Option<&Path>) -> Result<()> {
    match output_file {
        Some(path) => {
            fs::write(path, content)
                .with_context(|| format!("Failed to write output file: {}", path.display()))?;
            eprintln!(
                "{}",
                format_success(&format!("Output written to {}", path.display()))
            );
        }
        None => println!("{content}"),
    }
    Ok(())
}

/// Serialize a value as pretty JSON
pub fn format_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("Failed to serialize JSON")
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("  {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use octofhir_cohort_diagnostics::{COH0003, COH0100, NodePath};

    #[test]
    fn test_format_error_expands_cohort_errors() {
        colored::control::set_override(false);
        let cohort = CohortError::Multiple(vec![
            CohortError::malformed(COH0003, "count must be positive", NodePath::root()),
            CohortError::unresolved(COH0100, "unknown codeset 9", NodePath::root()),
        ]);
        let error = anyhow::Error::new(cohort).context("Failed to compile cohort.json");
        let text = format_error(&error);

        assert!(text.starts_with("Error: Failed to compile cohort.json"));
        assert!(text.contains("  error[COH0003]: count must be positive"));
        assert!(text.contains("  error[COH0100]: unknown codeset 9"));
    }

    #[test]
    fn test_format_error_plain() {
        colored::control::set_override(false);
        let error = anyhow::anyhow!("No files specified");
        assert_eq!(format_error(&error), "Error: No files specified");
    }

    #[test]
    fn test_write_output_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.sql");
        write_output("SELECT 1;", Some(&path)).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "SELECT 1;");
    }
}
