//! Simulate command implementation.

use super::{load_flags, parse_instant, print_json, OutputFormat};
use anyhow::{Context, Result};
use chrono::Utc;
use flagstone_engine::FlagLookup;
use flagstone_sim::{simulate, Population, PopulationConfig};
use std::path::Path;
use tracing::info;

/// Runs the simulate command.
pub fn run(
    flags_path: &Path,
    key: &str,
    size: usize,
    seed: u64,
    env: Option<&str>,
    at: Option<&str>,
    output: OutputFormat,
) -> Result<()> {
    let file = load_flags(flags_path)?;
    let flag = file
        .flags
        .lookup(key)
        .with_context(|| format!("Flag '{key}' is not defined in {}", flags_path.display()))?;
    let timestamp = parse_instant(at)?.unwrap_or_else(Utc::now);

    let mut config = PopulationConfig::default().with_seed(seed).with_size(size);
    if let Some(env) = env {
        config = config.with_environment(env);
    }
    info!("Simulating '{}' over {} subject(s) (seed {})", key, size, seed);
    let population = Population::generate(&config);
    let report = simulate(flag, &file.flags, &population, timestamp);

    match output {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => print!("{report}"),
    }
    Ok(())
}
