//! Property-based generators for flags and contexts.
//!
//! Every generated flag passes `Flag::validate`, so properties can exercise
//! the evaluator directly.

use chrono::{DateTime, Duration, TimeZone, Utc};
use flagstone_model::{
    Condition, EvaluationContext, Flag, FlagType, FlagValue, GradualStep, Operator, Override,
    OverrideTarget, RolloutStrategy, TargetingRule, Variant,
};
use proptest::prelude::*;
use serde_json::{json, Value};

/// Property names drawn by [`condition`] and [`context`].
pub const PROPERTY_NAMES: [&str; 4] = ["plan", "country", "age", "beta"];

fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_735_689_600, 0)
        .single()
        .unwrap_or_default()
}

/// Strategy for evaluation instants within one year of 2025-01-01.
pub fn instant() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..365 * 24 * 3600).prop_map(|secs| epoch() + Duration::seconds(secs))
}

/// Strategy for subject identifiers, including the empty subject.
pub fn subject_id() -> impl Strategy<Value = String> {
    prop_oneof![
        9 => "[a-z]{1,6}-[0-9]{1,5}",
        1 => Just(String::new()),
    ]
}

/// Strategy for values of the given type.
pub fn flag_value(flag_type: FlagType) -> BoxedStrategy<FlagValue> {
    match flag_type {
        FlagType::Boolean => any::<bool>().prop_map(FlagValue::Boolean).boxed(),
        FlagType::String => "[a-z]{1,8}".prop_map(FlagValue::String).boxed(),
        FlagType::Number => (-1000i64..1000).prop_map(FlagValue::from).boxed(),
        FlagType::Json => (0u32..1000, "[a-z]{1,6}")
            .prop_map(|(limit, name)| FlagValue::Json(json!({"limit": limit, "name": name})))
            .boxed(),
    }
}

/// Strategy for flag types.
pub fn flag_type() -> impl Strategy<Value = FlagType> {
    prop_oneof![
        5 => Just(FlagType::Boolean),
        2 => Just(FlagType::String),
        2 => Just(FlagType::Number),
        1 => Just(FlagType::Json),
    ]
}

/// Strategy for operators.
pub fn operator() -> impl Strategy<Value = Operator> {
    prop::sample::select(Operator::ALL.to_vec())
}

/// Strategy for condition operands that fit the operator.
fn operand(operator: Operator) -> BoxedStrategy<Value> {
    match operator {
        Operator::In | Operator::NotIn => {
            prop::collection::vec(prop_oneof!["(free|pro|team)", "(NZ|US|DE)"], 0..4)
                .prop_map(Value::from)
                .boxed()
        }
        Operator::Before | Operator::After => instant()
            .prop_map(|at| Value::from(at.to_rfc3339()))
            .boxed(),
        Operator::GreaterThan
        | Operator::GreaterThanOrEqual
        | Operator::LessThan
        | Operator::LessThanOrEqual => (0i64..100).prop_map(Value::from).boxed(),
        _ => prop_oneof![
            "(free|pro|team|NZ|US)".prop_map(Value::from),
            (0i64..100).prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
        ]
        .boxed(),
    }
}

/// Strategy for conditions over [`PROPERTY_NAMES`] and the reserved names.
pub fn condition() -> impl Strategy<Value = Condition> {
    let property = prop::sample::select(
        PROPERTY_NAMES
            .iter()
            .copied()
            .chain(["subject_id", "timestamp"])
            .collect::<Vec<_>>(),
    );
    (property, operator())
        .prop_flat_map(|(property, operator)| {
            operand(operator).prop_map(move |value| Condition::new(property, operator, value))
        })
}

/// Strategy for rules serving values of the given type. Ids are assigned by
/// [`flag`].
pub fn targeting_rule(flag_type: FlagType) -> impl Strategy<Value = TargetingRule> {
    (
        -10i32..10,
        prop::collection::vec(condition(), 0..3),
        flag_value(flag_type),
        prop::bool::weighted(0.9),
    )
        .prop_map(|(priority, conditions, value, enabled)| {
            let mut rule = TargetingRule::new("rule", value)
                .with_priority(priority)
                .with_enabled(enabled);
            rule.conditions = conditions;
            rule
        })
}

/// Strategy for percentages in half-point steps, exact in any text format.
pub fn percentage() -> impl Strategy<Value = f64> {
    (0u32..=200).prop_map(|halves| f64::from(halves) / 2.0)
}

/// Strategy for rollout strategies.
pub fn rollout_strategy() -> impl Strategy<Value = RolloutStrategy> {
    prop_oneof![
        6 => (percentage(), prop::bool::weighted(0.8))
            .prop_map(|(percentage, sticky)| RolloutStrategy::Percentage { percentage, sticky }),
        2 => (prop::option::of(instant()), prop::option::of(instant())).prop_map(|(a, b)| {
            let (start_date, end_date) = match (a, b) {
                (Some(a), Some(b)) if a > b => (Some(b), Some(a)),
                other => other,
            };
            RolloutStrategy::Scheduled { start_date, end_date }
        }),
        2 => prop::collection::vec((instant(), percentage()), 0..4).prop_map(|steps| {
            RolloutStrategy::Gradual {
                increments: steps
                    .into_iter()
                    .map(|(date, percentage)| GradualStep::new(date, percentage))
                    .collect(),
            }
        }),
    ]
}

/// Strategy for overrides serving values of the given type.
pub fn override_entry(flag_type: FlagType) -> impl Strategy<Value = Override> {
    (
        prop_oneof![
            subject_id().prop_map(OverrideTarget::Subject),
            "(staff|beta-testers)".prop_map(OverrideTarget::Group),
        ],
        flag_value(flag_type),
        prop::option::of(instant()),
    )
        .prop_filter("override target must not be empty", |(target, _, _)| {
            !target.id().is_empty()
        })
        .prop_map(|(target, value, expires_at)| {
            let entry = Override::new(target, value);
            match expires_at {
                Some(at) => entry.expiring_at(at),
                None => entry,
            }
        })
}

/// Strategy for valid, dependency-free flags.
pub fn flag() -> impl Strategy<Value = Flag> {
    flag_type().prop_flat_map(|flag_type| {
        (
            "[a-z][a-z0-9-]{2,12}",
            flag_value(flag_type),
            prop::bool::weighted(0.9),
            prop::collection::vec(targeting_rule(flag_type), 0..4),
            prop::collection::vec((flag_value(flag_type), 0u32..100), 0..4),
            prop::option::of(rollout_strategy()),
            prop::collection::vec(override_entry(flag_type), 0..3),
        )
            .prop_map(
                move |(key, default_value, enabled, rules, variants, rollout, overrides)| {
                    let mut flag = Flag::new(key, default_value).with_enabled(enabled);
                    flag.flag_type = flag_type;
                    for (i, mut rule) in rules.into_iter().enumerate() {
                        rule.id = format!("r{i}");
                        flag = flag.with_rule(rule);
                    }
                    for (i, (value, weight)) in variants.into_iter().enumerate() {
                        flag = flag.with_variant(Variant::new(format!("v{i}"), value, weight));
                    }
                    flag.rollout_strategy = rollout;
                    flag.overrides = overrides;
                    flag
                },
            )
    })
}

/// Strategy for contexts over [`PROPERTY_NAMES`], pinned to an instant.
pub fn context() -> impl Strategy<Value = EvaluationContext> {
    (
        subject_id(),
        prop::option::of("(free|pro|team)"),
        prop::option::of("(NZ|US|DE)"),
        prop::option::of(0i64..100),
        prop::option::of(any::<bool>()),
        prop::collection::btree_set("(staff|beta-testers)", 0..2),
        instant(),
    )
        .prop_map(|(subject, plan, country, age, beta, groups, at)| {
            let mut context = EvaluationContext::new(subject).at(at);
            if let Some(plan) = plan {
                context = context.with_property("plan", plan);
            }
            if let Some(country) = country {
                context = context.with_property("country", country);
            }
            if let Some(age) = age {
                context = context.with_property("age", age);
            }
            if let Some(beta) = beta {
                context = context.with_property("beta", beta);
            }
            context.group_ids = groups;
            context
        })
}
