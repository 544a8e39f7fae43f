//! The evaluation pipeline.
//!
//! Stages run in fixed precedence; each either decides the result or falls
//! through to the next:
//!
//! 1. disabled
//! 2. schedule
//! 3. dependencies
//! 4. overrides
//! 5. targeting rules
//! 6. variants
//! 7. rollout (boolean flags only)
//! 8. default

use crate::error::{Error, Result};
use crate::{rollout, rules, schedule, variant};
use chrono::{DateTime, Utc};
use flagstone_model::{
    EvaluationContext, EvaluationResult, Flag, FlagType, FlagValue, Override, OverrideTarget,
    Reason,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, trace};

/// Default cap on dependency chain length.
pub const DEFAULT_MAX_DEPENDENCY_DEPTH: usize = 16;

/// Read access to the set of flags dependencies are resolved against.
pub trait FlagLookup {
    /// Returns the flag registered under `key`.
    fn lookup(&self, key: &str) -> Option<&Flag>;
}

impl FlagLookup for HashMap<String, Flag> {
    fn lookup(&self, key: &str) -> Option<&Flag> {
        self.get(key)
    }
}

impl FlagLookup for HashMap<String, Arc<Flag>> {
    fn lookup(&self, key: &str) -> Option<&Flag> {
        self.get(key).map(AsRef::as_ref)
    }
}

impl FlagLookup for BTreeMap<String, Flag> {
    fn lookup(&self, key: &str) -> Option<&Flag> {
        self.get(key)
    }
}

impl FlagLookup for [Flag] {
    fn lookup(&self, key: &str) -> Option<&Flag> {
        self.iter().find(|flag| flag.key == key)
    }
}

impl FlagLookup for Vec<Flag> {
    fn lookup(&self, key: &str) -> Option<&Flag> {
        self.as_slice().lookup(key)
    }
}

/// Evaluator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluatorOptions {
    /// Longest dependency chain followed before giving up.
    pub max_dependency_depth: usize,
}

impl Default for EvaluatorOptions {
    fn default() -> Self {
        Self {
            max_dependency_depth: DEFAULT_MAX_DEPENDENCY_DEPTH,
        }
    }
}

/// Evaluates flags against contexts.
///
/// The evaluator borrows a flag set for dependency resolution and never
/// mutates it.
#[derive(Debug)]
pub struct Evaluator<'a, L: FlagLookup + ?Sized> {
    flags: &'a L,
    options: EvaluatorOptions,
}

impl<'a, L: FlagLookup + ?Sized> Evaluator<'a, L> {
    /// Creates an evaluator with default options.
    pub fn new(flags: &'a L) -> Self {
        Self {
            flags,
            options: EvaluatorOptions::default(),
        }
    }

    /// Creates an evaluator with the given options.
    pub const fn with_options(flags: &'a L, options: EvaluatorOptions) -> Self {
        Self { flags, options }
    }

    /// Evaluates the flag registered under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no flag is registered under `key`.
    pub fn evaluate_key(&self, key: &str, context: &EvaluationContext) -> Result<EvaluationResult> {
        let flag = self
            .flags
            .lookup(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        Ok(self.evaluate(flag, context))
    }

    /// Evaluates a flag. Never fails.
    ///
    /// The context timestamp, or the current time if it is unset, is resolved
    /// once and used for every time-based decision in this call.
    pub fn evaluate(&self, flag: &Flag, context: &EvaluationContext) -> EvaluationResult {
        let now = context.timestamp.unwrap_or_else(Utc::now);
        let result = self.resolve(flag, context, now, &mut Walk::default());
        trace!(
            "Evaluated '{}' for '{}': {} ({})",
            flag.key,
            context.subject_id,
            result.value,
            result.reason
        );
        result
    }

    fn resolve(
        &self,
        flag: &Flag,
        context: &EvaluationContext,
        now: DateTime<Utc>,
        walk: &mut Walk,
    ) -> EvaluationResult {
        let fallback =
            |reason| EvaluationResult::new(&flag.key, flag.default_value.clone(), reason, now);

        if !flag.enabled {
            return fallback(Reason::Disabled);
        }

        if let Some(window) = &flag.schedule {
            if !schedule::is_active(window, now) {
                return fallback(Reason::OutsideSchedule);
            }
        }

        if !self.dependencies_met(flag, context, now, walk) {
            return fallback(Reason::DependencyNotMet);
        }

        if let Some(entry) = find_override(&flag.overrides, context, now) {
            trace!("Override {} applies to '{}'", entry.target, flag.key);
            return EvaluationResult::new(&flag.key, entry.value.clone(), Reason::Override, now);
        }

        if let Some(rule) = rules::first_match(&flag.rules, context, now) {
            return EvaluationResult::new(&flag.key, rule.value.clone(), Reason::RuleMatch, now)
                .with_rule_id(&rule.id);
        }

        if let Some(chosen) = variant::select(&context.subject_id, &flag.key, &flag.variants) {
            return EvaluationResult::new(&flag.key, chosen.value.clone(), Reason::Variant, now)
                .with_variant_key(&chosen.key);
        }

        if flag.flag_type == FlagType::Boolean {
            if let Some(strategy) = &flag.rollout_strategy {
                let inside =
                    rollout::is_in_rollout(strategy, &context.subject_id, &flag.key, now);
                return EvaluationResult::new(
                    &flag.key,
                    FlagValue::Boolean(inside),
                    Reason::Rollout,
                    now,
                );
            }
        }

        fallback(Reason::Default)
    }

    /// Evaluates every dependency with the same context and time.
    fn dependencies_met(
        &self,
        flag: &Flag,
        context: &EvaluationContext,
        now: DateTime<Utc>,
        walk: &mut Walk,
    ) -> bool {
        if flag.dependencies.is_empty() {
            return true;
        }

        walk.path.push(flag.key.clone());
        let mut met = true;
        for key in &flag.dependencies {
            if walk.path.iter().any(|seen| seen == key) {
                debug!("Dependency cycle: {} -> {}", walk.path.join(" -> "), key);
                walk.broken = true;
            } else if walk.path.len() >= self.options.max_dependency_depth {
                debug!(
                    "Dependency chain from '{}' exceeds depth {}",
                    walk.path[0], self.options.max_dependency_depth
                );
                walk.broken = true;
            } else if let Some(dependency) = self.flags.lookup(key) {
                met = self.resolve(dependency, context, now, walk).value.is_truthy();
            } else {
                debug!("Flag '{}' depends on missing flag '{}'", flag.key, key);
                met = false;
            }
            if walk.broken || !met {
                met = false;
                break;
            }
        }
        walk.path.pop();
        met
    }
}

/// State of one dependency walk.
///
/// `path` holds the keys currently being resolved; meeting one of them again
/// is a cycle. A cycle or an over-deep chain marks the walk broken, which
/// fails every flag on the path, not just the innermost one.
#[derive(Debug, Default)]
struct Walk {
    path: Vec<String>,
    broken: bool,
}

/// Subject overrides win over group overrides; expired entries are ignored.
fn find_override<'f>(
    overrides: &'f [Override],
    context: &EvaluationContext,
    now: DateTime<Utc>,
) -> Option<&'f Override> {
    let live = || overrides.iter().filter(move |entry| !entry.is_expired(now));

    live()
        .find(|entry| matches!(&entry.target, OverrideTarget::Subject(id) if *id == context.subject_id))
        .or_else(|| {
            live().find(|entry| {
                matches!(&entry.target, OverrideTarget::Group(id) if context.group_ids.contains(id))
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use flagstone_model::{
        Condition, GradualStep, Operator, RolloutStrategy, Schedule, TargetingRule, Variant,
    };
    use proptest::prelude::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap()
    }

    fn registry(flags: Vec<Flag>) -> HashMap<String, Flag> {
        flags.into_iter().map(|f| (f.key.clone(), f)).collect()
    }

    fn ctx(subject: &str) -> EvaluationContext {
        EvaluationContext::new(subject).at(now())
    }

    fn beta_feature() -> Flag {
        Flag::new("beta-feature", FlagValue::Boolean(false)).with_rule(
            TargetingRule::new("beta-users", FlagValue::Boolean(true))
                .with_condition(Condition::new("subject_id", Operator::Equals, "U1")),
        )
    }

    /// A flag with every stage configured.
    fn loaded() -> Flag {
        Flag::new("loaded", FlagValue::Boolean(false))
            .with_override(flagstone_model::Override::new(
                OverrideTarget::Subject("U1".into()),
                FlagValue::Boolean(false),
            ))
            .with_rule(
                TargetingRule::new("u1", FlagValue::Boolean(true))
                    .with_condition(Condition::new("subject_id", Operator::Equals, "U1")),
            )
            .with_variant(Variant::new("on", FlagValue::Boolean(true), 1))
            .with_rollout(RolloutStrategy::percentage(100.0))
    }

    #[test]
    fn targeting_example() {
        let flags = registry(vec![beta_feature()]);
        let evaluator = Evaluator::new(&flags);

        let hit = evaluator.evaluate_key("beta-feature", &ctx("U1")).unwrap();
        assert_eq!(hit.value, FlagValue::Boolean(true));
        assert_eq!(hit.reason, Reason::RuleMatch);
        assert_eq!(hit.rule_id.as_deref(), Some("beta-users"));

        let miss = evaluator.evaluate_key("beta-feature", &ctx("U2")).unwrap();
        assert_eq!(miss.value, FlagValue::Boolean(false));
        assert_eq!(miss.reason, Reason::Default);
        assert!(miss.rule_id.is_none());
    }

    #[test]
    fn unknown_key_is_not_found() {
        let flags = registry(vec![]);
        let err = Evaluator::new(&flags)
            .evaluate_key("nope", &ctx("U1"))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(key) if key == "nope"));
    }

    #[test]
    fn disabled_wins_over_everything() {
        let flag = loaded().with_enabled(false);
        let flags = registry(vec![]);
        for subject in ["U1", "U2", ""] {
            let result = Evaluator::new(&flags).evaluate(&flag, &ctx(subject));
            assert_eq!(result.value, FlagValue::Boolean(false));
            assert_eq!(result.reason, Reason::Disabled);
        }
    }

    #[test]
    fn override_beats_rule() {
        let flags = registry(vec![]);
        let result = Evaluator::new(&flags).evaluate(&loaded(), &ctx("U1"));
        assert_eq!(result.reason, Reason::Override);
        assert_eq!(result.value, FlagValue::Boolean(false));
    }

    #[test]
    fn rule_beats_variant_and_rollout() {
        let mut flag = loaded();
        flag.overrides.clear();
        let flags = registry(vec![]);
        let result = Evaluator::new(&flags).evaluate(&flag, &ctx("U1"));
        assert_eq!(result.reason, Reason::RuleMatch);
    }

    #[test]
    fn variant_beats_rollout() {
        let flags = registry(vec![]);
        let result = Evaluator::new(&flags).evaluate(&loaded(), &ctx("U2"));
        assert_eq!(result.reason, Reason::Variant);
        assert_eq!(result.variant_key.as_deref(), Some("on"));
    }

    #[test]
    fn expired_override_is_ignored() {
        let flag = Flag::new("f", FlagValue::Boolean(false)).with_override(
            flagstone_model::Override::new(
                OverrideTarget::Subject("U1".into()),
                FlagValue::Boolean(true),
            )
            .expiring_at(now() - Duration::minutes(1)),
        );
        let flags = registry(vec![]);
        let result = Evaluator::new(&flags).evaluate(&flag, &ctx("U1"));
        assert_eq!(result.reason, Reason::Default);
    }

    #[test]
    fn group_override_applies_to_members() {
        let flag = Flag::new("f", FlagValue::from("standard"))
            .with_override(flagstone_model::Override::new(
                OverrideTarget::Group("staff".into()),
                FlagValue::from("internal"),
            ))
            .with_override(flagstone_model::Override::new(
                OverrideTarget::Subject("U7".into()),
                FlagValue::from("personal"),
            ));
        let flags = registry(vec![]);
        let evaluator = Evaluator::new(&flags);

        let member = evaluator.evaluate(&flag, &ctx("U1").with_group("staff"));
        assert_eq!(member.value, FlagValue::from("internal"));

        // subject overrides win over group overrides regardless of order
        let both = evaluator.evaluate(&flag, &ctx("U7").with_group("staff"));
        assert_eq!(both.value, FlagValue::from("personal"));

        let outsider = evaluator.evaluate(&flag, &ctx("U2").with_group("guests"));
        assert_eq!(outsider.reason, Reason::Default);
    }

    #[test]
    fn schedule_in_future_is_outside_schedule() {
        let flag = beta_feature()
            .with_schedule(Schedule::new().starting(now() + Duration::hours(1)));
        let flags = registry(vec![]);
        let result = Evaluator::new(&flags).evaluate(&flag, &ctx("U1"));
        assert_eq!(result.value, FlagValue::Boolean(false));
        assert_eq!(result.reason, Reason::OutsideSchedule);
    }

    #[test]
    fn unset_timestamp_uses_wall_clock() {
        let flag = Flag::new("f", FlagValue::Boolean(false))
            .with_schedule(Schedule::new().starting(Utc::now() + Duration::hours(1)));
        let flags = registry(vec![]);
        let result = Evaluator::new(&flags).evaluate(&flag, &EvaluationContext::new("U1"));
        assert_eq!(result.reason, Reason::OutsideSchedule);
    }

    #[test]
    fn json_default_returned_verbatim() {
        let config = json!({"rate_limit": 100, "timeout_ms": 5000});
        let flag = Flag::new("service-config", FlagValue::from(config.clone()));
        let flags = registry(vec![]);
        let result = Evaluator::new(&flags).evaluate(&flag, &ctx("anyone"));
        assert_eq!(result.value, FlagValue::Json(config));
        assert_eq!(result.reason, Reason::Default);
    }

    #[test]
    fn missing_dependency_is_not_met() {
        let flag = beta_feature().with_dependency("parent");
        let flags = registry(vec![]);
        let result = Evaluator::new(&flags).evaluate(&flag, &ctx("U1"));
        assert_eq!(result.reason, Reason::DependencyNotMet);
    }

    #[test]
    fn dependencies_gate_on_truthiness() {
        let parent_off = Flag::new("parent", FlagValue::Boolean(false));
        let parent_on = Flag::new("parent", FlagValue::Boolean(true));
        let child = beta_feature().with_dependency("parent");

        let flags = registry(vec![parent_off]);
        let result = Evaluator::new(&flags).evaluate(&child, &ctx("U1"));
        assert_eq!(result.reason, Reason::DependencyNotMet);

        let flags = registry(vec![parent_on]);
        let result = Evaluator::new(&flags).evaluate(&child, &ctx("U1"));
        assert_eq!(result.reason, Reason::RuleMatch);
    }

    #[test]
    fn dependency_sees_same_context() {
        let parent = Flag::new("parent", FlagValue::Boolean(false)).with_rule(
            TargetingRule::new("pro", FlagValue::Boolean(true))
                .with_condition(Condition::new("plan", Operator::Equals, "pro")),
        );
        let child = Flag::new("child", FlagValue::Boolean(false))
            .with_dependency("parent")
            .with_rollout(RolloutStrategy::percentage(100.0));
        let flags = registry(vec![parent, child]);
        let evaluator = Evaluator::new(&flags);

        let pro = evaluator
            .evaluate_key("child", &ctx("U1").with_property("plan", "pro"))
            .unwrap();
        assert_eq!(pro.reason, Reason::Rollout);
        assert_eq!(pro.value, FlagValue::Boolean(true));

        let free = evaluator
            .evaluate_key("child", &ctx("U1").with_property("plan", "free"))
            .unwrap();
        assert_eq!(free.reason, Reason::DependencyNotMet);
    }

    #[test]
    fn non_boolean_dependency_only_needs_to_exist() {
        let parent = Flag::new("theme", FlagValue::from("dark"));
        let child = beta_feature().with_dependency("theme");
        let flags = registry(vec![parent]);
        let result = Evaluator::new(&flags).evaluate(&child, &ctx("U1"));
        assert_eq!(result.reason, Reason::RuleMatch);
    }

    #[test]
    fn dependency_cycle_terminates() {
        let a = Flag::new("a", FlagValue::Boolean(true)).with_dependency("b");
        let b = Flag::new("b", FlagValue::Boolean(true)).with_dependency("a");
        let flags = registry(vec![a, b]);
        let evaluator = Evaluator::new(&flags);

        let result = evaluator.evaluate_key("a", &ctx("U1")).unwrap();
        assert_eq!(result.reason, Reason::DependencyNotMet);
        assert_eq!(result.value, FlagValue::Boolean(true));
    }

    #[test]
    fn dependency_depth_is_capped() {
        let chain: Vec<Flag> = (0..10)
            .map(|i| {
                let flag = Flag::new(format!("f{i}"), FlagValue::Boolean(true));
                if i < 9 {
                    flag.with_dependency(format!("f{}", i + 1))
                } else {
                    flag
                }
            })
            .collect();
        let flags = registry(chain);

        let shallow = Evaluator::with_options(
            &flags,
            EvaluatorOptions {
                max_dependency_depth: 4,
            },
        );
        assert_eq!(
            shallow.evaluate_key("f0", &ctx("U1")).unwrap().reason,
            Reason::DependencyNotMet
        );

        let deep = Evaluator::new(&flags);
        assert_eq!(
            deep.evaluate_key("f0", &ctx("U1")).unwrap().reason,
            Reason::Default
        );
    }

    #[test]
    fn rollout_only_gates_boolean_flags() {
        let flag = Flag::new("copy", FlagValue::from("old"))
            .with_rollout(RolloutStrategy::percentage(100.0));
        let flags = registry(vec![]);
        let result = Evaluator::new(&flags).evaluate(&flag, &ctx("U1"));
        assert_eq!(result.reason, Reason::Default);
        assert_eq!(result.value, FlagValue::from("old"));
    }

    #[test]
    fn rollout_out_yields_false() {
        let flag = Flag::new("f", FlagValue::Boolean(true))
            .with_rollout(RolloutStrategy::percentage(0.0));
        let flags = registry(vec![]);
        let result = Evaluator::new(&flags).evaluate(&flag, &ctx("U1"));
        assert_eq!(result.reason, Reason::Rollout);
        assert_eq!(result.value, FlagValue::Boolean(false));
    }

    #[test]
    fn gradual_rollout_through_pipeline() {
        let flag = Flag::new("f", FlagValue::Boolean(false)).with_rollout(
            RolloutStrategy::Gradual {
                increments: vec![GradualStep::new(now() + Duration::days(1), 100.0)],
            },
        );
        let flags = registry(vec![]);
        let evaluator = Evaluator::new(&flags);
        let before = evaluator.evaluate(&flag, &ctx("U1"));
        let after = evaluator.evaluate(&flag, &ctx("U1").at(now() + Duration::days(2)));
        assert_eq!(before.value, FlagValue::Boolean(false));
        assert_eq!(after.value, FlagValue::Boolean(true));
    }

    #[test]
    fn distribution_within_tolerance() {
        let flag = Flag::new("checkout-v2", FlagValue::Boolean(false))
            .with_rollout(RolloutStrategy::percentage(30.0));
        let flags = registry(vec![]);
        let evaluator = Evaluator::new(&flags);
        let inside = (0..1000)
            .filter(|i| {
                evaluator.evaluate(&flag, &ctx(&format!("user-{i}"))).value
                    == FlagValue::Boolean(true)
            })
            .count();
        assert!((200..=400).contains(&inside), "observed {inside} of 1000");
    }

    #[test]
    fn variant_coverage() {
        let flag = Flag::new("button-color", FlagValue::from("red"))
            .with_variant(Variant::new("red", FlagValue::from("red"), 33))
            .with_variant(Variant::new("green", FlagValue::from("green"), 33))
            .with_variant(Variant::new("blue", FlagValue::from("blue"), 34));
        let flags = registry(vec![]);
        let evaluator = Evaluator::new(&flags);

        let mut counts: HashMap<String, usize> = HashMap::new();
        for i in 0..1000 {
            let result = evaluator.evaluate(&flag, &ctx(&format!("user-{i}")));
            assert_eq!(result.reason, Reason::Variant);
            *counts.entry(result.variant_key.unwrap()).or_default() += 1;
        }
        assert_eq!(counts.len(), 3);
        for (key, count) in counts {
            assert!((230..=440).contains(&count), "{key} selected {count} times");
        }
    }

    proptest! {
        #[test]
        fn evaluation_is_deterministic(subject in "[A-Za-z0-9-]{0,16}", plan in "(free|pro|team)") {
            let flag = loaded();
            let flags = registry(vec![]);
            let evaluator = Evaluator::new(&flags);
            let context = ctx(&subject).with_property("plan", plan);
            let first = evaluator.evaluate(&flag, &context);
            for _ in 0..5 {
                prop_assert_eq!(&evaluator.evaluate(&flag, &context), &first);
            }
        }

        #[test]
        fn sticky_rollout_ignores_timestamp(subject in "[a-z0-9]{1,12}", offset in 0i64..10_000_000) {
            let flag = Flag::new("sticky", FlagValue::Boolean(false))
                .with_rollout(RolloutStrategy::percentage(50.0));
            let flags = registry(vec![]);
            let evaluator = Evaluator::new(&flags);
            let early = evaluator.evaluate(&flag, &ctx(&subject));
            let late = evaluator.evaluate(&flag, &ctx(&subject).at(now() + Duration::seconds(offset)));
            prop_assert_eq!(early.value, late.value);
        }

        #[test]
        fn disabled_always_default(subject in ".{0,8}", group in "[a-z]{1,6}") {
            let flag = loaded().with_enabled(false);
            let flags = registry(vec![]);
            let result = Evaluator::new(&flags).evaluate(&flag, &ctx(&subject).with_group(group));
            prop_assert_eq!(result.reason, Reason::Disabled);
            prop_assert_eq!(result.value, FlagValue::Boolean(false));
        }
    }
}
