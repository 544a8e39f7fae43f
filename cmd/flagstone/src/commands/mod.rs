//! Command implementations and the helpers they share.

pub mod batch;
pub mod eval;
pub mod history;
pub mod schema;
pub mod simulate;
pub mod validate;
pub mod watch;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, ValueEnum};
use flagstone_model::{EvaluationContext, FlagFile};
use flagstone_store::{FlagService, LoadReport};
use serde_json::Value;
use std::path::Path;
use tracing::info;

/// How command results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable lines.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Evaluation context options shared by `eval` and `batch`.
#[derive(Debug, Clone, Default, Args)]
pub struct ContextArgs {
    /// Subject id used for sticky bucketing
    #[arg(short, long, default_value = "")]
    pub subject: String,

    /// Context property as NAME=VALUE; VALUE is parsed as JSON, else kept as a string
    #[arg(short = 'p', long = "prop")]
    pub properties: Vec<String>,

    /// Group the subject belongs to
    #[arg(short, long = "group")]
    pub groups: Vec<String>,

    /// Environment to evaluate in
    #[arg(short, long)]
    pub env: Option<String>,

    /// Evaluation time (RFC 3339); now when omitted
    #[arg(long)]
    pub at: Option<String>,
}

impl ContextArgs {
    /// Builds the evaluation context.
    pub fn to_context(&self) -> Result<EvaluationContext> {
        let mut context = EvaluationContext::new(self.subject.clone());
        for raw in &self.properties {
            let (name, value) = parse_property(raw)?;
            context = context.with_property(name, value);
        }
        for group in &self.groups {
            context = context.with_group(group.clone());
        }
        if let Some(env) = &self.env {
            context = context.with_environment(env.clone());
        }
        if let Some(at) = parse_instant(self.at.as_deref())? {
            context = context.at(at);
        }
        Ok(context)
    }
}

/// Parses `NAME=VALUE`.
pub fn parse_property(raw: &str) -> Result<(String, Value)> {
    let (name, value) = raw
        .split_once('=')
        .with_context(|| format!("Property '{raw}' is not NAME=VALUE"))?;
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("Property '{raw}' has an empty name");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::from(value));
    Ok((name.to_string(), value))
}

/// Parses an optional RFC 3339 instant.
pub fn parse_instant(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|raw| {
        DateTime::parse_from_rfc3339(raw)
            .map(|at| at.with_timezone(&Utc))
            .with_context(|| format!("Invalid RFC 3339 time: {raw}"))
    })
    .transpose()
}

/// Loads and validates a definition file.
pub fn load_flags(path: &Path) -> Result<FlagFile> {
    FlagFile::load(path)
        .with_context(|| format!("Failed to load flag definitions: {}", path.display()))
}

/// Loads a definition file into a fresh service.
pub fn load_service(path: &Path) -> Result<FlagService> {
    let file = load_flags(path)?;
    let service = FlagService::new();
    service
        .load_file(&file)
        .with_context(|| format!("Failed to register flags from {}", path.display()))?;
    info!("Loaded {} flag(s) from {}", file.flags.len(), path.display());
    Ok(service)
}

/// Makes the service match a definition file: registers new and changed
/// flags, then deletes flags the file no longer defines.
///
/// Returns the load report and the deleted keys.
pub fn apply_revision(service: &FlagService, file: &FlagFile) -> Result<(LoadReport, Vec<String>)> {
    let report = service.load_file(file).context("Failed to register flags")?;
    let removed: Vec<String> = service
        .registry()
        .keys()
        .into_iter()
        .filter(|key| !file.flags.iter().any(|flag| flag.key == *key))
        .collect();
    for key in &removed {
        service.delete_flag(key)?;
    }
    Ok((report, removed))
}

/// Prints a value as pretty JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}
