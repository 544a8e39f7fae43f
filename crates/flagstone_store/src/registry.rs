//! Copy-on-write flag registry.
//!
//! The registry holds an immutable map of shared flags behind a reader/writer
//! lock. Writers copy the map (only when a reader still holds the old one),
//! apply their change and swap it in. A snapshot taken by a reader therefore
//! shows either the whole old set or the whole new set.

use crate::error::{Error, Result};
use flagstone_model::Flag;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Immutable view of registered flags, keyed by flag key.
pub type FlagMap = HashMap<String, Arc<Flag>>;

/// In-memory flag store keyed by flag key.
#[derive(Debug, Default)]
pub struct FlagRegistry {
    flags: RwLock<Arc<FlagMap>>,
}

impl FlagRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a flag, replacing any flag with the same key.
    ///
    /// Returns the replaced flag, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the flag fails validation; the registry is left
    /// untouched.
    pub fn add_or_replace(&self, flag: Flag) -> Result<Option<Arc<Flag>>> {
        flag.validate()?;
        let key = flag.key.clone();
        let mut guard = self.flags.write();
        let previous = Arc::make_mut(&mut *guard).insert(key.clone(), Arc::new(flag));
        debug!("Registered flag '{}'", key);
        Ok(previous)
    }

    /// Registers a flag whose key is not yet taken.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] if the key is taken, or a validation
    /// error if the flag is invalid.
    pub fn insert_new(&self, flag: Flag) -> Result<Arc<Flag>> {
        flag.validate()?;
        let mut guard = self.flags.write();
        if guard.contains_key(&flag.key) {
            return Err(Error::AlreadyExists(flag.key));
        }
        let key = flag.key.clone();
        let flag = Arc::new(flag);
        Arc::make_mut(&mut *guard).insert(key.clone(), Arc::clone(&flag));
        debug!("Registered new flag '{}'", key);
        Ok(flag)
    }

    /// Removes a flag, returning it if it was registered.
    pub fn remove(&self, key: &str) -> Option<Arc<Flag>> {
        let mut guard = self.flags.write();
        if !guard.contains_key(key) {
            return None;
        }
        let removed = Arc::make_mut(&mut *guard).remove(key);
        debug!("Removed flag '{}'", key);
        removed
    }

    /// Returns the flag registered under `key`.
    pub fn get(&self, key: &str) -> Option<Arc<Flag>> {
        self.flags.read().get(key).cloned()
    }

    /// Returns true if a flag is registered under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.flags.read().contains_key(key)
    }

    /// Returns a consistent view of every registered flag.
    ///
    /// Later writes never show through an existing snapshot.
    pub fn snapshot(&self) -> Arc<FlagMap> {
        Arc::clone(&*self.flags.read())
    }

    /// Returns the registered keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.flags.read().keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    /// Number of registered flags.
    pub fn len(&self) -> usize {
        self.flags.read().len()
    }

    /// Returns true if no flags are registered.
    pub fn is_empty(&self) -> bool {
        self.flags.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flagstone_engine::{Evaluator, FlagLookup};
    use flagstone_model::{EvaluationContext, FlagValue, Reason};
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::thread;

    fn flag(key: &str, default: bool) -> Flag {
        Flag::new(key, FlagValue::Boolean(default))
    }

    #[test]
    fn insert_new_rejects_duplicates() {
        let registry = FlagRegistry::new();
        registry.insert_new(flag("a", true)).unwrap();
        let err = registry.insert_new(flag("a", false)).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(key) if key == "a"));
        assert_eq!(
            registry.get("a").unwrap().default_value,
            FlagValue::Boolean(true)
        );
    }

    #[test]
    fn invalid_flags_never_enter() {
        let registry = FlagRegistry::new();
        let err = registry
            .add_or_replace(flag("a", true).with_dependency("a"))
            .unwrap_err();
        assert!(matches!(err, Error::Model(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn add_or_replace_returns_previous() {
        let registry = FlagRegistry::new();
        assert!(registry.add_or_replace(flag("a", true)).unwrap().is_none());
        let previous = registry.add_or_replace(flag("a", false)).unwrap().unwrap();
        assert_eq!(previous.default_value, FlagValue::Boolean(true));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_and_keys() {
        let registry = FlagRegistry::new();
        for key in ["c", "a", "b"] {
            registry.add_or_replace(flag(key, true)).unwrap();
        }
        assert_eq!(registry.keys(), vec!["a", "b", "c"]);
        assert!(registry.remove("b").is_some());
        assert!(registry.remove("b").is_none());
        assert!(!registry.contains("b"));
        assert_eq!(registry.keys(), vec!["a", "c"]);
    }

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let registry = FlagRegistry::new();
        registry.add_or_replace(flag("a", true)).unwrap();
        let before = registry.snapshot();

        registry.add_or_replace(flag("a", false)).unwrap();
        registry.add_or_replace(flag("b", true)).unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(
            before.lookup("a").unwrap().default_value,
            FlagValue::Boolean(true)
        );
        assert_eq!(registry.snapshot().len(), 2);
    }

    #[test]
    fn snapshot_drives_dependency_resolution() {
        let registry = FlagRegistry::new();
        registry.add_or_replace(flag("parent", false)).unwrap();
        registry
            .add_or_replace(flag("child", true).with_dependency("parent"))
            .unwrap();

        let snapshot = registry.snapshot();
        let result = Evaluator::new(&*snapshot)
            .evaluate_key("child", &EvaluationContext::new("U1"))
            .unwrap();
        assert_eq!(result.reason, Reason::DependencyNotMet);
    }

    #[test]
    fn readers_see_whole_flags_during_writes() {
        let registry = Arc::new(FlagRegistry::new());
        registry
            .add_or_replace(flag("f", false).with_name("v0").with_description("v0"))
            .unwrap();

        let writer = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for i in 1..=200 {
                    let tag = format!("v{i}");
                    registry
                        .add_or_replace(flag("f", false).with_name(&tag).with_description(&tag))
                        .unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let current = registry.get("f").unwrap();
                        assert_eq!(Some(&current.name), current.description.as_ref());
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(registry.get("f").unwrap().name, "v200");
    }

    proptest! {
        #[test]
        fn keys_track_inserts_and_removals(
            ops in prop::collection::vec((any::<bool>(), "[a-e]"), 0..40)
        ) {
            let registry = FlagRegistry::new();
            let mut model = BTreeSet::new();
            for (insert, key) in ops {
                if insert {
                    registry.add_or_replace(flag(&key, true)).unwrap();
                    model.insert(key);
                } else {
                    prop_assert_eq!(registry.remove(&key).is_some(), model.remove(&key));
                }
            }
            prop_assert_eq!(registry.keys(), model.into_iter().collect::<Vec<_>>());
        }
    }
}
