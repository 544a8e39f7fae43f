//! Eval command implementation.

use super::{load_service, print_json, ContextArgs, OutputFormat};
use anyhow::{Context, Result};
use std::path::Path;
use tracing::debug;

/// Runs the eval command.
pub fn run(flags_path: &Path, key: &str, args: &ContextArgs, output: OutputFormat) -> Result<()> {
    let service = load_service(flags_path)?;
    let context = args.to_context()?;
    debug!("Context: {:?}", context);

    let result = service
        .evaluate_context(key, &context)
        .with_context(|| format!("Failed to evaluate '{key}'"))?;

    match output {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Text => {
            let detail = result
                .rule_id
                .as_deref()
                .map(|rule| format!(" rule={rule}"))
                .or_else(|| {
                    result
                        .variant_key
                        .as_deref()
                        .map(|variant| format!(" variant={variant}"))
                })
                .unwrap_or_default();
            println!(
                "{} = {} ({}{})",
                result.flag_key,
                result.value.to_json(),
                result.reason,
                detail
            );
        }
    }
    Ok(())
}
