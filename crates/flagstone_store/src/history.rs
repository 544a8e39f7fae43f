//! Append-only change log.

use chrono::{DateTime, Utc};
use flagstone_model::Flag;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Kind of change recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    /// The flag was registered.
    Created,
    /// The flag was replaced by a new snapshot.
    Updated,
    /// The flag was removed.
    Deleted,
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        })
    }
}

/// One recorded change with full before/after snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// Changed flag.
    pub flag_key: String,
    /// What happened.
    pub action: ChangeAction,
    /// Definition before the change; absent for creations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Flag>,
    /// Definition after the change; absent for deletions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Flag>,
    /// When the change was made.
    pub timestamp: DateTime<Utc>,
}

impl ChangeEntry {
    /// Records a creation.
    pub fn created(after: Flag, timestamp: DateTime<Utc>) -> Self {
        Self {
            flag_key: after.key.clone(),
            action: ChangeAction::Created,
            before: None,
            after: Some(after),
            timestamp,
        }
    }

    /// Records a replacement.
    pub fn updated(before: Flag, after: Flag, timestamp: DateTime<Utc>) -> Self {
        Self {
            flag_key: after.key.clone(),
            action: ChangeAction::Updated,
            before: Some(before),
            after: Some(after),
            timestamp,
        }
    }

    /// Records a deletion.
    pub fn deleted(before: Flag, timestamp: DateTime<Utc>) -> Self {
        Self {
            flag_key: before.key.clone(),
            action: ChangeAction::Deleted,
            before: Some(before),
            after: None,
            timestamp,
        }
    }
}

/// Per-flag change log. Entries are never modified or removed.
#[derive(Debug, Default)]
pub struct ChangeHistory {
    entries: RwLock<HashMap<String, Vec<ChangeEntry>>>,
}

impl ChangeHistory {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry to its flag's log.
    pub fn record(&self, entry: ChangeEntry) {
        self.entries
            .write()
            .entry(entry.flag_key.clone())
            .or_default()
            .push(entry);
    }

    /// Returns a flag's entries, oldest first, or `None` if it has none.
    pub fn get(&self, key: &str) -> Option<Vec<ChangeEntry>> {
        self.entries.read().get(key).cloned()
    }

    /// Total number of recorded entries.
    pub fn len(&self) -> usize {
        self.entries.read().values().map(Vec::len).sum()
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use flagstone_model::FlagValue;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 1, 10, minute, 0).unwrap()
    }

    #[test]
    fn entries_keep_recording_order() {
        let history = ChangeHistory::new();
        let v1 = Flag::new("f", FlagValue::Boolean(false));
        let v2 = v1.clone().with_enabled(false);

        history.record(ChangeEntry::created(v1.clone(), at(0)));
        history.record(ChangeEntry::updated(v1, v2.clone(), at(1)));
        history.record(ChangeEntry::deleted(v2, at(2)));
        history.record(ChangeEntry::created(Flag::new("g", FlagValue::from("x")), at(3)));

        let entries = history.get("f").unwrap();
        let actions: Vec<_> = entries.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            [ChangeAction::Created, ChangeAction::Updated, ChangeAction::Deleted]
        );
        assert!(entries[2].after.is_none());
        assert_eq!(history.len(), 4);
        assert!(history.get("missing").is_none());
    }

    #[test]
    fn entry_serializes_action_in_snake_case() {
        let entry = ChangeEntry::deleted(Flag::new("f", FlagValue::Boolean(true)), at(5));
        let json = serde_json::to_value(&entry).unwrap();
        insta::assert_snapshot!(json["action"], @r###""deleted""###);
        assert!(json.get("after").is_none());
    }
}
