//! Flagstone CLI - deterministic feature flag evaluation.
//!
//! Commands:
//! - `flagstone validate` - Check a flag definition file
//! - `flagstone eval` - Evaluate one flag for a context
//! - `flagstone batch` - Evaluate several flags for one context
//! - `flagstone simulate` - Evaluate a flag over a synthetic population
//! - `flagstone history` - Show how a flag changed across file revisions
//! - `flagstone schema` - Print the definition file JSON Schema
//! - `flagstone watch` - Reload a definition file as it changes

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use commands::{ContextArgs, OutputFormat};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "flagstone")]
#[command(about = "Deterministic feature flag evaluation")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text", env = "FLAGSTONE_LOG_FORMAT")]
    log_format: LogFormat,

    /// Path to the flag definition file (YAML or JSON)
    #[arg(short, long, global = true, default_value = "flags.yaml", env = "FLAGSTONE_FLAGS")]
    flags: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a flag definition file
    Validate,

    /// Evaluate one flag for a context
    Eval {
        /// Flag key
        key: String,

        #[command(flatten)]
        context: ContextArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Evaluate several flags (all flags when none are named) for one context
    Batch {
        /// Flag keys
        keys: Vec<String>,

        #[command(flatten)]
        context: ContextArgs,
    },

    /// Evaluate a flag over a synthetic population
    Simulate {
        /// Flag key
        key: String,

        /// Number of synthetic subjects
        #[arg(short = 'n', long, default_value = "10000")]
        size: usize,

        /// Population seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Environment every subject is evaluated in
        #[arg(short, long)]
        env: Option<String>,

        /// Evaluation time (RFC 3339); now when omitted
        #[arg(long)]
        at: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Show how a flag changed across file revisions
    History {
        /// Flag key
        key: String,

        /// Later revisions of the definition file, oldest first
        #[arg(short, long = "revision")]
        revisions: Vec<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Print the definition file JSON Schema
    Schema {
        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Reload a definition file as it changes
    Watch {
        /// Seconds between reload checks
        #[arg(short, long, default_value = "5")]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match cli.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }

    let flags = cli.flags.as_path();
    match cli.command {
        Commands::Validate => commands::validate::run(flags),
        Commands::Eval {
            key,
            context,
            output,
        } => commands::eval::run(flags, &key, &context, output),
        Commands::Batch { keys, context } => commands::batch::run(flags, &keys, &context),
        Commands::Simulate {
            key,
            size,
            seed,
            env,
            at,
            output,
        } => commands::simulate::run(flags, &key, size, seed, env.as_deref(), at.as_deref(), output),
        Commands::History {
            key,
            revisions,
            output,
        } => commands::history::run(flags, &revisions, &key, output),
        Commands::Schema { out } => commands::schema::run(out.as_deref()),
        Commands::Watch { interval } => commands::watch::run(flags, interval).await,
    }
}
