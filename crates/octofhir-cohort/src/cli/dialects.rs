//! Dialects command implementation

use colored::Colorize;
use octofhir_cohort_compiler::Dialect;

/// One line per supported dialect: name and description
pub fn dialect_listing() -> String {
    let width = Dialect::ALL
        .iter()
        .map(|d| d.name().len())
        .max()
        .unwrap_or_default();
    Dialect::ALL
        .iter()
        .map(|d| {
            format!(
                "{}  {}",
                format!("{:width$}", d.name()).cyan().bold(),
                d.description()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Print the supported dialects
pub fn dialects() -> anyhow::Result<()> {
    println!("{}", dialect_listing());
    Ok(())
}
