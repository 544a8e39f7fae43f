//! History command implementation.
//!
//! Loads the base definition file and then each revision in order into one
//! service, so the flag's change log shows what every revision changed.

use super::{apply_revision, load_flags, load_service, print_json, OutputFormat};
use anyhow::{Context, Result};
use flagstone_store::ChangeEntry;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::info;

/// Runs the history command.
pub fn run(flags_path: &Path, revisions: &[PathBuf], key: &str, output: OutputFormat) -> Result<()> {
    let service = load_service(flags_path)?;

    for revision in revisions {
        let file = load_flags(revision)?;
        let (report, removed) = apply_revision(&service, &file)
            .with_context(|| format!("Failed to apply revision {}", revision.display()))?;
        info!(
            "Applied {}: {} created, {} updated, {} deleted",
            revision.display(),
            report.created.len(),
            report.updated.len(),
            removed.len()
        );
    }

    let entries = service.get_history(key)?;
    match output {
        OutputFormat::Json => print_json(&entries)?,
        OutputFormat::Text => {
            for entry in &entries {
                println!("{}", describe(entry));
            }
        }
    }
    Ok(())
}

/// One line per entry: time, action and the top-level fields that changed.
fn describe(entry: &ChangeEntry) -> String {
    let changed = match (&entry.before, &entry.after) {
        (Some(before), Some(after)) => {
            let before = to_object(before);
            let after = to_object(after);
            let mut fields: Vec<&str> = before
                .keys()
                .chain(after.keys())
                .filter(|field| *field != "updated_at" && before.get(*field) != after.get(*field))
                .map(String::as_str)
                .collect();
            fields.sort_unstable();
            fields.dedup();
            format!(" [{}]", fields.join(", "))
        }
        _ => String::new(),
    };
    format!(
        "{} {:<8} {}{}",
        entry.timestamp.to_rfc3339(),
        entry.action,
        entry.flag_key,
        changed
    )
}

fn to_object<T: serde::Serialize>(value: &T) -> Map<String, Value> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use flagstone_model::{Flag, FlagValue};

    #[test]
    fn describe_lists_changed_fields() {
        let at = Utc.with_ymd_and_hms(2025, 2, 3, 4, 5, 6).unwrap();
        let before = Flag::new("f", FlagValue::Boolean(false));
        let after = before.clone().with_enabled(false).with_dependency("g");
        let line = describe(&ChangeEntry::updated(before, after, at));
        assert_eq!(
            line,
            "2025-02-03T04:05:06+00:00 updated  f [dependencies, enabled]"
        );
    }

    #[test]
    fn describe_creation_has_no_fields() {
        let at = Utc.with_ymd_and_hms(2025, 2, 3, 4, 5, 6).unwrap();
        let line = describe(&ChangeEntry::created(Flag::new("f", FlagValue::from("x")), at));
        assert_eq!(line, "2025-02-03T04:05:06+00:00 created  f");
    }
}
