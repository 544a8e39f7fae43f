//! Validate command implementation.

use super::load_flags;
use anyhow::Result;
use std::path::Path;
use tracing::{info, warn};

/// Runs the validate command.
pub fn run(flags_path: &Path) -> Result<()> {
    info!("Validating flag definitions: {}", flags_path.display());
    let file = load_flags(flags_path)?;

    for flag in &file.flags {
        info!(
            "  {} ({}, {}): {} rule(s), {} variant(s), {} override(s)",
            flag.key,
            flag.flag_type,
            if flag.enabled { "enabled" } else { "disabled" },
            flag.rules.len(),
            flag.variants.len(),
            flag.overrides.len()
        );

        for dependency in &flag.dependencies {
            if !file.flags.iter().any(|other| other.key == *dependency) {
                warn!(
                    "Flag '{}' depends on '{}', which is not defined in this file",
                    flag.key, dependency
                );
            }
        }
    }

    info!("{} flag(s) valid", file.flags.len());
    Ok(())
}
