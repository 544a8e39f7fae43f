//! Schema command implementation.

use anyhow::{Context, Result};
use flagstone_model::FlagFile;
use std::fs;
use std::path::Path;
use tracing::info;

/// Runs the schema command.
pub fn run(out: Option<&Path>) -> Result<()> {
    let schema = FlagFile::json_schema().context("Failed to build schema")?;
    let schema = serde_json::to_string_pretty(&schema).context("Failed to serialize schema")?;

    match out {
        Some(path) => {
            fs::write(path, schema + "\n")
                .with_context(|| format!("Failed to write schema: {}", path.display()))?;
            info!("Wrote schema to {}", path.display());
        }
        None => println!("{schema}"),
    }
    Ok(())
}
