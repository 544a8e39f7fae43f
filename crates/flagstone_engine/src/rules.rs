//! Targeting rule resolution.

use crate::condition;
use chrono::{DateTime, Utc};
use flagstone_model::{EvaluationContext, TargetingRule};

/// Returns enabled rules in evaluation order.
///
/// Lower priority numbers come first; the sort is stable, so rules sharing a
/// priority keep their definition order.
pub fn ordered(rules: &[TargetingRule]) -> Vec<&TargetingRule> {
    let mut active: Vec<&TargetingRule> = rules.iter().filter(|r| r.enabled).collect();
    active.sort_by_key(|r| r.priority);
    active
}

/// Returns true when every condition of the rule holds.
///
/// A rule without conditions matches everything.
pub fn matches(rule: &TargetingRule, context: &EvaluationContext, now: DateTime<Utc>) -> bool {
    rule.conditions
        .iter()
        .all(|c| condition::evaluate(c, context, now))
}

/// Returns the first matching rule, if any.
pub fn first_match<'a>(
    rules: &'a [TargetingRule],
    context: &EvaluationContext,
    now: DateTime<Utc>,
) -> Option<&'a TargetingRule> {
    ordered(rules)
        .into_iter()
        .find(|rule| matches(rule, context, now))
}
