//! The flag service.
//!
//! Every mutation is a read-modify-write of one flag snapshot: take the
//! current definition, apply the change to a copy, stamp `updated_at`,
//! validate, swap it into the registry and append a history entry. Mutations
//! are serialized by a service-wide write lock so concurrent edits of the same
//! flag cannot lose updates. Evaluations never take that lock.

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::history::{ChangeEntry, ChangeHistory};
use crate::registry::FlagRegistry;
use chrono::Duration;
use flagstone_engine::{Evaluator, EvaluatorOptions};
use flagstone_model::{
    Condition, EvaluationContext, EvaluationResult, Flag, FlagFile, FlagType, FlagValue, Operator,
    Override, OverrideTarget, RolloutStrategy, Schedule, TargetingRule, Variant,
    ENVIRONMENT_PROPERTY,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Prefix of the rule id added by [`FlagService::enable_for_environment`].
const ENVIRONMENT_RULE_PREFIX: &str = "env:";

/// Outcome of [`FlagService::load_file`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Keys registered for the first time.
    pub created: Vec<String>,
    /// Keys whose definition changed.
    pub updated: Vec<String>,
    /// Keys whose definition was already registered as-is.
    pub unchanged: Vec<String>,
}

impl LoadReport {
    /// Returns true if the load changed nothing.
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty()
    }
}

/// Validated flag lifecycle, mutation and evaluation.
pub struct FlagService {
    registry: FlagRegistry,
    history: ChangeHistory,
    clock: Arc<dyn Clock>,
    options: EvaluatorOptions,
    write: Mutex<()>,
}

impl Default for FlagService {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FlagService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlagService")
            .field("flags", &self.registry.len())
            .field("history", &self.history.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl FlagService {
    /// Creates an empty service on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty service on the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            registry: FlagRegistry::new(),
            history: ChangeHistory::new(),
            clock,
            options: EvaluatorOptions::default(),
            write: Mutex::new(()),
        }
    }

    /// Sets the evaluator options used by every evaluation.
    #[must_use]
    pub fn with_evaluator_options(mut self, options: EvaluatorOptions) -> Self {
        self.options = options;
        self
    }

    /// The underlying registry.
    pub const fn registry(&self) -> &FlagRegistry {
        &self.registry
    }

    /// The change log.
    pub const fn history(&self) -> &ChangeHistory {
        &self.history
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Creates a flag, inferring its type from the default value.
    ///
    /// # Errors
    ///
    /// Fails if the key is taken, the key or name is empty, or the default is
    /// null.
    pub fn create_flag(
        &self,
        key: &str,
        name: &str,
        description: Option<&str>,
        default_value: FlagValue,
    ) -> Result<Flag> {
        if name.trim().is_empty() {
            return Err(Error::validation(format!("flag '{key}' needs a name")));
        }

        let now = self.clock.now();
        let mut flag = Flag::new(key, default_value).with_name(name);
        flag.description = description.map(str::to_string);
        flag.created_at = Some(now);
        flag.updated_at = Some(now);

        let _guard = self.write.lock();
        self.registry.insert_new(flag.clone())?;
        self.history.record(ChangeEntry::created(flag.clone(), now));
        info!("Created {} flag '{}'", flag.flag_type, flag.key);
        Ok(flag)
    }

    /// Replaces a flag's name, description and default value.
    ///
    /// # Errors
    ///
    /// Fails if the flag does not exist or the new default's type differs
    /// from the flag's type.
    pub fn update_flag(
        &self,
        key: &str,
        name: &str,
        description: Option<&str>,
        default_value: FlagValue,
    ) -> Result<Flag> {
        if name.trim().is_empty() {
            return Err(Error::validation(format!("flag '{key}' needs a name")));
        }
        self.mutate(key, |flag| {
            check_value_type(flag, &default_value)?;
            flag.name = name.to_string();
            flag.description = description.map(str::to_string);
            flag.default_value = default_value;
            Ok(())
        })
    }

    /// Removes a flag and returns its last definition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the flag does not exist.
    pub fn delete_flag(&self, key: &str) -> Result<Flag> {
        let _guard = self.write.lock();
        let removed = self
            .registry
            .remove(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        let removed = Flag::clone(&removed);

        let dependents: Vec<String> = self
            .registry
            .snapshot()
            .values()
            .filter(|flag| flag.dependencies.iter().any(|d| d == key))
            .map(|flag| flag.key.clone())
            .collect();
        if !dependents.is_empty() {
            warn!(
                "Deleted flag '{}' is still a dependency of: {}",
                key,
                dependents.join(", ")
            );
        }

        self.history
            .record(ChangeEntry::deleted(removed.clone(), self.clock.now()));
        info!("Deleted flag '{}'", key);
        Ok(removed)
    }

    /// Returns a flag's current definition.
    pub fn get_flag(&self, key: &str) -> Option<Flag> {
        self.registry.get(key).map(|flag| flag.as_ref().clone())
    }

    /// Returns every flag, sorted by key.
    pub fn list_flags(&self) -> Vec<Flag> {
        let snapshot = self.registry.snapshot();
        let mut flags: Vec<Flag> = snapshot.values().map(|flag| flag.as_ref().clone()).collect();
        flags.sort_by(|a, b| a.key.cmp(&b.key));
        flags
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Evaluates a flag for a subject at the service clock's current time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the flag does not exist.
    pub fn evaluate(
        &self,
        key: &str,
        subject_id: &str,
        properties: BTreeMap<String, Value>,
    ) -> Result<EvaluationResult> {
        let context = EvaluationContext::new(subject_id).with_properties(properties);
        self.evaluate_context(key, &context)
    }

    /// Evaluates a flag against a full context.
    ///
    /// A context without a timestamp is evaluated at the service clock's
    /// current time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the flag does not exist.
    pub fn evaluate_context(
        &self,
        key: &str,
        context: &EvaluationContext,
    ) -> Result<EvaluationResult> {
        let snapshot = self.registry.snapshot();
        let evaluator = Evaluator::with_options(&*snapshot, self.options);
        if context.timestamp.is_some() {
            return Ok(evaluator.evaluate_key(key, context)?);
        }
        let pinned = context.clone().at(self.clock.now());
        Ok(evaluator.evaluate_key(key, &pinned)?)
    }

    /// Evaluates several flags against one snapshot and one timestamp.
    ///
    /// Unknown keys are skipped.
    pub fn evaluate_batch<I, K>(
        &self,
        keys: I,
        subject_id: &str,
        properties: BTreeMap<String, Value>,
    ) -> BTreeMap<String, FlagValue>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let context = EvaluationContext::new(subject_id).with_properties(properties);
        self.evaluate_batch_context(keys, &context)
            .into_iter()
            .map(|(key, result)| (key, result.value))
            .collect()
    }

    /// Evaluates several flags against one full context, one snapshot and
    /// one timestamp, keeping the full results.
    ///
    /// Unknown keys are skipped.
    pub fn evaluate_batch_context<I, K>(
        &self,
        keys: I,
        context: &EvaluationContext,
    ) -> BTreeMap<String, EvaluationResult>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let context = match context.timestamp {
            Some(_) => context.clone(),
            None => context.clone().at(self.clock.now()),
        };
        let snapshot = self.registry.snapshot();
        let evaluator = Evaluator::with_options(&*snapshot, self.options);

        keys.into_iter()
            .filter_map(|key| match evaluator.evaluate_key(key.as_ref(), &context) {
                Ok(result) => Some((result.flag_key.clone(), result)),
                Err(err) => {
                    debug!("Skipping batch key: {}", err);
                    None
                }
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Rules and variants
    // ------------------------------------------------------------------

    /// Adds a targeting rule.
    ///
    /// # Errors
    ///
    /// Fails if the flag does not exist, the rule id is taken, or the rule's
    /// value does not fit the flag's type.
    pub fn add_targeting_rule(&self, key: &str, rule: TargetingRule) -> Result<Flag> {
        self.mutate(key, |flag| {
            if flag.rules.iter().any(|existing| existing.id == rule.id) {
                return Err(Error::validation(format!(
                    "flag '{}' already has rule '{}'",
                    flag.key, rule.id
                )));
            }
            check_value_type(flag, &rule.value)?;
            flag.rules.push(rule);
            Ok(())
        })
    }

    /// Removes a targeting rule by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the flag or the rule does not exist.
    pub fn remove_targeting_rule(&self, key: &str, rule_id: &str) -> Result<Flag> {
        self.mutate(key, |flag| {
            let before = flag.rules.len();
            flag.rules.retain(|rule| rule.id != rule_id);
            if flag.rules.len() == before {
                return Err(Error::NotFound(format!("rule '{rule_id}' on flag '{key}'")));
            }
            Ok(())
        })
    }

    /// Adds a weighted variant.
    ///
    /// # Errors
    ///
    /// Fails if the flag does not exist, the variant key is taken, or the
    /// variant's value does not fit the flag's type.
    pub fn add_variant(&self, key: &str, variant: Variant) -> Result<Flag> {
        self.mutate(key, |flag| {
            if flag.variants.iter().any(|existing| existing.key == variant.key) {
                return Err(Error::validation(format!(
                    "flag '{}' already has variant '{}'",
                    flag.key, variant.key
                )));
            }
            check_value_type(flag, &variant.value)?;
            flag.variants.push(variant);
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Rollout and schedule
    // ------------------------------------------------------------------

    /// Sets a percentage rollout.
    ///
    /// # Errors
    ///
    /// Fails if the flag does not exist or the percentage is outside 0–100.
    pub fn set_percentage_rollout(&self, key: &str, percentage: f64, sticky: bool) -> Result<Flag> {
        self.set_rollout_strategy(key, RolloutStrategy::Percentage { percentage, sticky })
    }

    /// Sets any rollout strategy.
    ///
    /// # Errors
    ///
    /// Fails if the flag does not exist or the strategy is invalid.
    pub fn set_rollout_strategy(&self, key: &str, strategy: RolloutStrategy) -> Result<Flag> {
        self.mutate(key, |flag| {
            if flag.flag_type != FlagType::Boolean {
                warn!(
                    "Rollout on {} flag '{}' has no effect; rollouts gate boolean flags only",
                    flag.flag_type, flag.key
                );
            }
            flag.rollout_strategy = Some(strategy);
            Ok(())
        })
    }

    /// Removes the rollout strategy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the flag does not exist.
    pub fn clear_rollout(&self, key: &str) -> Result<Flag> {
        self.mutate(key, |flag| {
            flag.rollout_strategy = None;
            Ok(())
        })
    }

    /// Sets the activity schedule.
    ///
    /// # Errors
    ///
    /// Fails if the flag does not exist or the schedule is invalid.
    pub fn set_schedule(&self, key: &str, schedule: Schedule) -> Result<Flag> {
        self.mutate(key, |flag| {
            flag.schedule = Some(schedule);
            Ok(())
        })
    }

    /// Removes the activity schedule.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the flag does not exist.
    pub fn clear_schedule(&self, key: &str) -> Result<Flag> {
        self.mutate(key, |flag| {
            flag.schedule = None;
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Overrides
    // ------------------------------------------------------------------

    /// Forces a value for a subject or group, replacing any override with the
    /// same target. With a `ttl` the override expires that long from now.
    ///
    /// # Errors
    ///
    /// Fails if the flag does not exist, the value does not fit the flag's
    /// type, or the ttl is not positive or overflows the clock.
    pub fn create_override(
        &self,
        key: &str,
        target: OverrideTarget,
        value: FlagValue,
        ttl: Option<Duration>,
    ) -> Result<Flag> {
        let mut entry = Override::new(target, value);
        if let Some(ttl) = ttl {
            if ttl <= Duration::zero() {
                return Err(Error::validation(format!(
                    "override ttl must be positive, got {ttl}"
                )));
            }
            let expires_at = self
                .clock
                .now()
                .checked_add_signed(ttl)
                .ok_or_else(|| Error::validation(format!("override ttl {ttl} is out of range")))?;
            entry = entry.expiring_at(expires_at);
        }

        self.mutate(key, |flag| {
            check_value_type(flag, &entry.value)?;
            flag.overrides.retain(|existing| existing.target != entry.target);
            flag.overrides.push(entry);
            Ok(())
        })
    }

    /// Removes the override for a target.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the flag or the override does not exist.
    pub fn remove_override(&self, key: &str, target: &OverrideTarget) -> Result<Flag> {
        self.mutate(key, |flag| {
            let before = flag.overrides.len();
            flag.overrides.retain(|existing| existing.target != *target);
            if flag.overrides.len() == before {
                return Err(Error::NotFound(format!("override {target} on flag '{key}'")));
            }
            Ok(())
        })
    }

    /// Drops every expired override across all flags.
    ///
    /// Returns the number of overrides removed.
    pub fn prune_expired_overrides(&self) -> usize {
        let now = self.clock.now();
        let stale: Vec<String> = self
            .registry
            .snapshot()
            .values()
            .filter(|flag| flag.overrides.iter().any(|entry| entry.is_expired(now)))
            .map(|flag| flag.key.clone())
            .collect();

        let mut pruned = 0;
        for key in stale {
            let outcome = self.mutate(&key, |flag| {
                let before = flag.overrides.len();
                flag.overrides.retain(|entry| !entry.is_expired(now));
                pruned += before - flag.overrides.len();
                Ok(())
            });
            if let Err(err) = outcome {
                // Deleted between the snapshot and the write.
                debug!("Skipped pruning '{}': {}", key, err);
            }
        }
        if pruned > 0 {
            info!("Pruned {} expired override(s)", pruned);
        }
        pruned
    }

    // ------------------------------------------------------------------
    // Other mutations
    // ------------------------------------------------------------------

    /// Makes `key` depend on `dependency`. Adding an existing dependency is a
    /// no-op change.
    ///
    /// # Errors
    ///
    /// Fails if the flag does not exist or `dependency` is the flag itself.
    pub fn add_dependency(&self, key: &str, dependency: &str) -> Result<Flag> {
        if !self.registry.contains(dependency) {
            warn!(
                "Flag '{}' now depends on unregistered flag '{}'",
                key, dependency
            );
        }
        self.mutate(key, |flag| {
            if !flag.dependencies.iter().any(|d| d == dependency) {
                flag.dependencies.push(dependency.to_string());
            }
            Ok(())
        })
    }

    /// Flips the master switch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the flag does not exist.
    pub fn set_enabled(&self, key: &str, enabled: bool) -> Result<Flag> {
        self.mutate(key, |flag| {
            flag.enabled = enabled;
            Ok(())
        })
    }

    /// Turns a boolean flag on for every context whose `environment`
    /// property equals `environment`.
    ///
    /// Adds (or replaces) the rule `env:<environment>`, which runs before all
    /// other rules.
    ///
    /// # Errors
    ///
    /// Fails if the flag does not exist, is not boolean, or `environment` is
    /// empty.
    pub fn enable_for_environment(&self, key: &str, environment: &str) -> Result<Flag> {
        if environment.trim().is_empty() {
            return Err(Error::validation("environment must not be empty"));
        }
        let rule = TargetingRule::new(
            format!("{ENVIRONMENT_RULE_PREFIX}{environment}"),
            FlagValue::Boolean(true),
        )
        .with_priority(i32::MIN)
        .with_condition(Condition::new(
            ENVIRONMENT_PROPERTY,
            Operator::Equals,
            environment,
        ));

        self.mutate(key, |flag| {
            if flag.flag_type != FlagType::Boolean {
                return Err(Error::validation(format!(
                    "flag '{}' is {}; only boolean flags can be enabled per environment",
                    flag.key, flag.flag_type
                )));
            }
            flag.rules.retain(|existing| existing.id != rule.id);
            flag.rules.push(rule);
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // History and bulk load
    // ------------------------------------------------------------------

    /// Returns a flag's change log, oldest first.
    ///
    /// Deleted flags keep their history.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the key has no history.
    pub fn get_history(&self, key: &str) -> Result<Vec<ChangeEntry>> {
        self.history
            .get(key)
            .ok_or_else(|| Error::NotFound(format!("history for '{key}'")))
    }

    /// Registers every flag in a definition file.
    ///
    /// The file is validated as a whole first, so an invalid file changes
    /// nothing. New keys are historized as created, changed definitions as
    /// updated; identical definitions are left alone. Flags missing from the
    /// file are not removed.
    ///
    /// # Errors
    ///
    /// Fails if the file is invalid or changes the type of a registered
    /// flag.
    pub fn load_file(&self, file: &FlagFile) -> Result<LoadReport> {
        file.validate()?;

        let now = self.clock.now();
        let mut report = LoadReport::default();
        let _guard = self.write.lock();

        for incoming in &file.flags {
            if let Some(current) = self.registry.get(&incoming.key) {
                if incoming.flag_type != current.flag_type {
                    return Err(Error::validation(format!(
                        "flag '{}' is {} and cannot become {}",
                        incoming.key, current.flag_type, incoming.flag_type
                    )));
                }
            }
        }

        for incoming in &file.flags {
            let mut flag = incoming.clone();
            match self.registry.get(&flag.key) {
                None => {
                    flag.created_at = flag.created_at.or(Some(now));
                    flag.updated_at = Some(now);
                    self.registry.add_or_replace(flag.clone())?;
                    self.history.record(ChangeEntry::created(flag, now));
                    report.created.push(incoming.key.clone());
                }
                Some(current) => {
                    flag.created_at = current.created_at;
                    flag.updated_at = current.updated_at;
                    if flag == *current {
                        report.unchanged.push(incoming.key.clone());
                        continue;
                    }
                    flag.updated_at = Some(now);
                    self.registry.add_or_replace(flag.clone())?;
                    self.history
                        .record(ChangeEntry::updated(Flag::clone(&current), flag, now));
                    report.updated.push(incoming.key.clone());
                }
            }
        }

        info!(
            "Loaded {} flag(s): {} created, {} updated, {} unchanged",
            file.flags.len(),
            report.created.len(),
            report.updated.len(),
            report.unchanged.len()
        );
        Ok(report)
    }

    /// Applies `change` to a copy of the flag and swaps the copy in.
    ///
    /// Nothing is written if `change` or validation fails.
    fn mutate<F>(&self, key: &str, change: F) -> Result<Flag>
    where
        F: FnOnce(&mut Flag) -> Result<()>,
    {
        let _guard = self.write.lock();
        let current = self
            .registry
            .get(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;

        let mut next = Flag::clone(&current);
        change(&mut next)?;
        if next == *current {
            debug!("Flag '{}' unchanged", key);
            return Ok(next);
        }

        let now = self.clock.now();
        next.updated_at = Some(now);
        self.registry.add_or_replace(next.clone())?;
        self.history
            .record(ChangeEntry::updated(Flag::clone(&current), next.clone(), now));
        debug!("Updated flag '{}'", key);
        Ok(next)
    }
}

/// Values served by a flag must match its declared type; `json` flags accept
/// any value.
fn check_value_type(flag: &Flag, value: &FlagValue) -> Result<()> {
    let actual = value.flag_type();
    if flag.flag_type == FlagType::Json || actual == flag.flag_type {
        return Ok(());
    }
    Err(Error::validation(format!(
        "flag '{}' is {} but the value is {}",
        flag.key, flag.flag_type, actual
    )))
}
