//! Batch command implementation.

use super::{load_service, print_json, ContextArgs};
use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

/// Runs the batch command. Without keys, every flag is evaluated.
pub fn run(flags_path: &Path, keys: &[String], args: &ContextArgs) -> Result<()> {
    let service = load_service(flags_path)?;
    let context = args.to_context()?;

    let keys = if keys.is_empty() {
        service.registry().keys()
    } else {
        keys.to_vec()
    };

    let results = service.evaluate_batch_context(&keys, &context);
    for key in keys.iter().filter(|key| !results.contains_key(*key)) {
        warn!("Skipping unknown flag '{}'", key);
    }

    let values: BTreeMap<&str, serde_json::Value> = results
        .iter()
        .map(|(key, result)| (key.as_str(), result.value.to_json()))
        .collect();
    print_json(&values)
}
