//! Command-line interface for schematron
//!
//! Exit status of `validate`: 0 when every document is valid, 1 when any
//! document is invalid, 2 when the schema or a document could not be
//! processed.

#[cfg(feature = "cli")]
use clap::{ArgAction, Parser, Subcommand, ValueEnum};

#[cfg(feature = "cli")]
use std::fs;
#[cfg(feature = "cli")]
use std::path::PathBuf;
#[cfg(feature = "cli")]
use std::process::ExitCode;

#[cfg(feature = "cli")]
use tracing_subscriber::EnvFilter;

#[cfg(feature = "cli")]
use schematron::{
    compile_parsed, load_schema_file, to_svrl, validate_files, CompileOptions, SvrlOptions,
    ValidationReport,
};

#[cfg(feature = "cli")]
#[derive(Parser, Debug)]
#[command(name = "schematron")]
#[command(author, version, about = "ISO Schematron validator", long_about = None)]
struct Cli {
    /// Increase log output (-v debug, -vv trace); RUST_LOG applies otherwise
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[cfg(feature = "cli")]
#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate XML documents against a Schematron schema
    Validate {
        /// Path to the Schematron schema
        #[arg(short, long, value_name = "SCHEMA")]
        schema: PathBuf,

        /// Phase to activate (defaults to the schema's defaultPhase)
        #[arg(short, long)]
        phase: Option<String>,

        /// Query binding, overriding the schema's queryBinding
        #[arg(short = 'b', long)]
        query_binding: Option<String>,

        /// Report format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,

        /// Include svrl:metadata in SVRL output
        #[arg(long)]
        metadata: bool,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Documents to validate
        #[arg(value_name = "DOC", required = true)]
        documents: Vec<PathBuf>,
    },

    /// Show the structure of a schema after includes and abstractions are resolved
    Inspect {
        /// Path to the Schematron schema
        #[arg(value_name = "SCHEMA")]
        schema: PathBuf,

        /// Phase to show (defaults to every pattern)
        #[arg(short, long)]
        phase: Option<String>,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
}

#[cfg(feature = "cli")]
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    /// One line per failure
    Text,
    /// Schematron Validation Report Language
    Svrl,
    /// serde_json rendering of the report
    Json,
}

#[cfg(feature = "cli")]
fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(feature = "cli")]
fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Validate {
            schema,
            phase,
            query_binding,
            format,
            metadata,
            output,
            documents,
        } => cmd_validate(schema, phase, query_binding, format, metadata, output, documents),
        Commands::Inspect { schema, phase, json } => cmd_inspect(schema, phase, json),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(2)
        }
    }
}

#[cfg(feature = "cli")]
#[allow(clippy::too_many_arguments)]
fn cmd_validate(
    schema_path: PathBuf,
    phase: Option<String>,
    query_binding: Option<String>,
    format: Format,
    metadata: bool,
    output: Option<PathBuf>,
    documents: Vec<PathBuf>,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    // an SVRL report is a whole XML document
    if format == Format::Svrl && documents.len() > 1 {
        return Err("--format svrl takes a single document".into());
    }

    let mut options = CompileOptions::new();
    if let Some(phase) = phase {
        options = options.with_phase(phase);
    }
    if let Some(binding) = query_binding {
        options = options.with_query_binding(binding);
    }

    let concrete = load_schema_file(&schema_path, &options)?;
    let schema = compile_parsed(&concrete, &options)?;

    let results = validate_files(&schema, &documents, &options.limits);
    let mut reports: Vec<ValidationReport> = Vec::with_capacity(results.len());
    let mut failed = false;
    for (path, result) in documents.iter().zip(results) {
        match result {
            Ok(report) => reports.push(report),
            Err(e) => {
                eprintln!("Error: {}: {}", path.display(), e);
                failed = true;
            }
        }
    }

    let rendered = match format {
        Format::Text => reports.iter().map(ValidationReport::to_text).collect::<String>(),
        Format::Json if reports.len() == 1 => reports[0].to_json()?,
        Format::Json => serde_json::to_string_pretty(&reports)?,
        Format::Svrl => {
            let options = SvrlOptions::new().with_metadata(metadata);
            match reports.first() {
                Some(report) => to_svrl(report, &options)? + "\n",
                None => String::new(),
            }
        }
    };

    match output {
        Some(path) => fs::write(path, rendered)?,
        None => print!("{}", rendered),
    }

    Ok(if failed {
        ExitCode::from(2)
    } else if reports.iter().all(ValidationReport::is_valid) {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

#[cfg(feature = "cli")]
fn cmd_inspect(
    schema_path: PathBuf,
    phase: Option<String>,
    json_output: bool,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let options = CompileOptions::new().with_phase(phase.unwrap_or_else(|| "#ALL".to_string()));
    let concrete = load_schema_file(&schema_path, &options)?;
    let schema = compile_parsed(&concrete, &options)?;
    let outline = schema.outline();

    if json_output {
        println!("{}", serde_json::to_string_pretty(&outline)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("schematron v{}", schematron::VERSION);
    println!();
    println!("Schema: {}", schema_path.display());
    println!("  Title: {}", outline.title.as_deref().unwrap_or("(none)"));
    println!("  Query Binding: {}", outline.binding);
    if outline.phases.is_empty() {
        println!("  Phases: (none)");
    } else {
        println!("  Phases: {}", outline.phases.join(", "));
    }
    println!("  Active Phase: {}", outline.phase.as_deref().unwrap_or("#ALL"));
    println!();
    println!("=== Patterns ===");
    for pattern in &outline.patterns {
        match &pattern.title {
            Some(title) => println!("  {} ({})", pattern.id, title),
            None => println!("  {}", pattern.id),
        }
        for rule in &pattern.rules {
            println!("    {} : {} [{} checks]", rule.id, rule.context, rule.checks);
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Rebuild with --features cli");
    std::process::exit(2);
}
