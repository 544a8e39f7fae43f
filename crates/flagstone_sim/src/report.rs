//! Simulation runs and their reports.

use crate::population::Population;
use chrono::{DateTime, Utc};
use flagstone_engine::{Evaluator, FlagLookup};
use flagstone_model::{Flag, Reason};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Occurrences of one outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Tally {
    /// Subjects with this outcome.
    pub count: usize,
    /// Percentage of the population, 0–100.
    pub share: f64,
}

/// Observed distribution of one flag over a population.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationReport {
    /// Simulated flag.
    pub flag_key: String,
    /// Population size.
    pub subjects: usize,
    /// Logical time every subject was evaluated at.
    pub timestamp: DateTime<Utc>,
    /// Outcomes by served value, keyed by its display form.
    pub values: BTreeMap<String, Tally>,
    /// Outcomes by deciding stage.
    pub reasons: BTreeMap<Reason, Tally>,
    /// Outcomes by selected variant.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub variants: BTreeMap<String, Tally>,
    /// Outcomes by matching rule.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub rules: BTreeMap<String, Tally>,
}

impl SimulationReport {
    /// Count of subjects decided by `reason`.
    pub fn reason_count(&self, reason: Reason) -> usize {
        self.reasons.get(&reason).map_or(0, |tally| tally.count)
    }

    /// Count of subjects served the value whose display form is `value`.
    pub fn value_count(&self, value: &str) -> usize {
        self.values.get(value).map_or(0, |tally| tally.count)
    }
}

/// Evaluates `flag` for every subject in `population` at `timestamp`.
///
/// Dependencies resolve against `flags`. Context timestamps are replaced by
/// `timestamp` so the whole run observes one instant.
pub fn simulate<L: FlagLookup + ?Sized>(
    flag: &Flag,
    flags: &L,
    population: &Population,
    timestamp: DateTime<Utc>,
) -> SimulationReport {
    let evaluator = Evaluator::new(flags);
    let mut values: BTreeMap<String, usize> = BTreeMap::new();
    let mut reasons: BTreeMap<Reason, usize> = BTreeMap::new();
    let mut variants: BTreeMap<String, usize> = BTreeMap::new();
    let mut rules: BTreeMap<String, usize> = BTreeMap::new();

    for context in population.contexts() {
        let context = context.clone().at(timestamp);
        let result = evaluator.evaluate(flag, &context);
        *values.entry(result.value.to_string()).or_default() += 1;
        *reasons.entry(result.reason).or_default() += 1;
        if let Some(variant) = result.variant_key {
            *variants.entry(variant).or_default() += 1;
        }
        if let Some(rule) = result.rule_id {
            *rules.entry(rule).or_default() += 1;
        }
    }

    let subjects = population.len();
    debug!("Simulated '{}' over {} subject(s)", flag.key, subjects);
    SimulationReport {
        flag_key: flag.key.clone(),
        subjects,
        timestamp,
        values: tally(values, subjects),
        reasons: tally(reasons, subjects),
        variants: tally(variants, subjects),
        rules: tally(rules, subjects),
    }
}

#[allow(clippy::cast_precision_loss)]
fn tally<K: Ord>(counts: BTreeMap<K, usize>, total: usize) -> BTreeMap<K, Tally> {
    counts
        .into_iter()
        .map(|(key, count)| {
            let share = if total == 0 {
                0.0
            } else {
                count as f64 * 100.0 / total as f64
            };
            (key, Tally { count, share })
        })
        .collect()
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} over {} subject(s) at {}",
            self.flag_key,
            self.subjects,
            self.timestamp.to_rfc3339()
        )?;
        write_section(f, "values", &self.values)?;
        let reasons: BTreeMap<&str, Tally> = self
            .reasons
            .iter()
            .map(|(reason, tally)| (reason.as_str(), *tally))
            .collect();
        write_section(f, "reasons", &reasons)?;
        if !self.variants.is_empty() {
            write_section(f, "variants", &self.variants)?;
        }
        if !self.rules.is_empty() {
            write_section(f, "rules", &self.rules)?;
        }
        Ok(())
    }
}

fn write_section<K: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    title: &str,
    tallies: &BTreeMap<K, Tally>,
) -> fmt::Result {
    writeln!(f, "  {title}:")?;
    for (key, tally) in tallies {
        writeln!(f, "    {key:<24} {:>7} {:>6.2}%", tally.count, tally.share)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::population::PopulationConfig;
    use chrono::TimeZone;
    use flagstone_model::{
        Condition, FlagValue, Operator, RolloutStrategy, TargetingRule, Variant,
    };
    use std::collections::HashMap;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap()
    }

    fn population(size: usize) -> Population {
        Population::generate(&PopulationConfig::default().with_size(size))
    }

    fn no_flags() -> HashMap<String, Flag> {
        HashMap::new()
    }

    #[test]
    fn rollout_share_tracks_percentage() {
        let flag = Flag::new("checkout-v2", FlagValue::Boolean(false))
            .with_rollout(RolloutStrategy::percentage(20.0));
        let report = simulate(&flag, &no_flags(), &population(2000), at());

        assert_eq!(report.subjects, 2000);
        assert_eq!(report.reason_count(Reason::Rollout), 2000);
        let share = report.values["true"].share;
        assert!((10.0..=30.0).contains(&share), "observed {share}%");
    }

    #[test]
    fn rules_and_variants_are_attributed() {
        let flag = Flag::new("pricing-page", FlagValue::from("classic"))
            .with_rule(
                TargetingRule::new("enterprise", FlagValue::from("sales"))
                    .with_condition(Condition::new("plan", Operator::Equals, "enterprise")),
            )
            .with_variant(Variant::new("classic", FlagValue::from("classic"), 50))
            .with_variant(Variant::new("modern", FlagValue::from("modern"), 50));
        let report = simulate(&flag, &no_flags(), &population(1000), at());

        let rule_hits = report.rules["enterprise"].count;
        assert_eq!(rule_hits, report.reason_count(Reason::RuleMatch));
        assert_eq!(rule_hits, report.value_count("sales"));
        assert_eq!(
            report.variants.values().map(|t| t.count).sum::<usize>() + rule_hits,
            1000
        );
        assert_eq!(report.variants.len(), 2);
    }

    #[test]
    fn simulation_is_reproducible() {
        let flag = Flag::new("f", FlagValue::Boolean(false))
            .with_rollout(RolloutStrategy::percentage(50.0));
        let a = simulate(&flag, &no_flags(), &population(300), at());
        let b = simulate(&flag, &no_flags(), &population(300), at());
        assert_eq!(a, b);
    }

    #[test]
    fn empty_population_has_no_shares() {
        let flag = Flag::new("f", FlagValue::Boolean(true));
        let report = simulate(&flag, &no_flags(), &Population::from_contexts(vec![]), at());
        assert_eq!(report.subjects, 0);
        assert!(report.values.is_empty());
    }

    #[test]
    fn text_report_layout() {
        let flag = Flag::new("kill-switch", FlagValue::Boolean(true)).with_enabled(false);
        let report = simulate(&flag, &no_flags(), &population(4), at());
        insta::assert_snapshot!(report.to_string(), @r###"
        kill-switch over 4 subject(s) at 2025-08-01T00:00:00+00:00
          values:
            true                           4 100.00%
          reasons:
            disabled                       4 100.00%
        "###);
    }
}
