//! Cohort command-line interface

use anyhow::Result;
use clap::{Parser, Subcommand};
use octofhir_cohort::cli::{compile, dialects, output, validate};
use std::path::PathBuf;

/// Cohort command-line tool
#[derive(Parser)]
#[command(name = "cohort")]
#[command(author, version, about = "Compile cohort definitions to SQL", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output file (default: stdout)
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    color: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a cohort document to a SQL query plan
    Compile {
        /// Cohort document (JSON)
        file: PathBuf,

        /// Grammar (auto, tree, sequential)
        #[arg(short, long, default_value = "auto")]
        grammar: String,

        /// SQL dialect (sql-server, postgresql, clickhouse)
        #[arg(short, long)]
        dialect: Option<String>,

        /// Compile options file (JSON)
        #[arg(long = "options")]
        options_file: Option<PathBuf>,

        /// Schema holding the clinical tables
        #[arg(long)]
        cdm_schema: Option<String>,

        /// Schema holding the vocabulary tables
        #[arg(long)]
        vocabulary_schema: Option<String>,

        /// Schema receiving the cohort rows
        #[arg(long)]
        results_schema: Option<String>,

        /// Cohort definition id written with the rows
        #[arg(long)]
        target_cohort_id: Option<i64>,

        /// Temp table suffix (default: random)
        #[arg(long)]
        session_id: Option<String>,

        /// Emit count measures for each stage
        #[arg(long)]
        generate_stats: bool,

        /// Output format (sql, json)
        #[arg(short, long, default_value = "sql")]
        format: String,
    },

    /// Validate cohort documents
    Validate {
        /// Cohort documents to validate
        files: Vec<PathBuf>,
    },

    /// List supported SQL dialects
    Dialects,
}

fn main() {
    human_panic::setup_panic!();

    let cli = Cli::parse();

    output::setup_colors(&cli.color);

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.as_str()))
        .init();

    if let Err(e) = run(cli) {
        eprintln!("{}", output::format_error(&e));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Compile {
            file,
            grammar,
            dialect,
            options_file,
            cdm_schema,
            vocabulary_schema,
            results_schema,
            target_cohort_id,
            session_id,
            generate_stats,
            format,
        } => compile::compile(compile::CompileConfig {
            file,
            grammar: Some(grammar),
            dialect,
            options_file,
            cdm_schema,
            vocabulary_schema,
            results_schema,
            target_cohort_id,
            session_id,
            generate_stats,
            format: Some(format),
            output_file: cli.output,
        }),

        Commands::Validate { files } => validate::validate(validate::ValidateConfig {
            files,
            verbose: cli.verbose,
        }),

        Commands::Dialects => dialects::dialects(),
    }
}
