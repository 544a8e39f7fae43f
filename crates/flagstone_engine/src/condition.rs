//! Condition evaluation.
//!
//! A condition never errors: a missing property or an operand that cannot be
//! coerced makes it evaluate to `false`.

use chrono::{DateTime, SecondsFormat, Utc};
use flagstone_model::{Condition, EvaluationContext, Operator};
use serde_json::Value;
use std::borrow::Cow;
use tracing::trace;

/// Reserved property resolving to the context's subject.
pub const SUBJECT_ID_PROPERTY: &str = "subject_id";

/// Reserved property resolving to the evaluation time.
pub const TIMESTAMP_PROPERTY: &str = "timestamp";

/// Evaluates one condition against a context at the resolved evaluation time.
pub fn evaluate(condition: &Condition, context: &EvaluationContext, now: DateTime<Utc>) -> bool {
    let Some(actual) = resolve(&condition.property, context, now) else {
        trace!("Property '{}' not found", condition.property);
        return false;
    };
    let expected = &condition.value;

    match condition.operator {
        Operator::Equals => canonical(&actual) == canonical(expected),
        Operator::NotEquals => canonical(&actual) != canonical(expected),
        Operator::GreaterThan => compare_numbers(&actual, expected, |a, b| a > b),
        Operator::GreaterThanOrEqual => compare_numbers(&actual, expected, |a, b| a >= b),
        Operator::LessThan => compare_numbers(&actual, expected, |a, b| a < b),
        Operator::LessThanOrEqual => compare_numbers(&actual, expected, |a, b| a <= b),
        Operator::In => list_contains(&actual, expected).unwrap_or(false),
        Operator::NotIn => list_contains(&actual, expected).is_some_and(|found| !found),
        Operator::Contains => canonical(&actual).contains(&*canonical(expected)),
        Operator::NotContains => !canonical(&actual).contains(&*canonical(expected)),
        Operator::Before => compare_times(&actual, expected, |a, b| a < b),
        Operator::After => compare_times(&actual, expected, |a, b| a > b),
    }
}

/// Resolves a property: reserved names first, then an exact key, then a dot-path walk.
///
/// JSON `null` counts as missing.
pub fn resolve<'a>(
    property: &str,
    context: &'a EvaluationContext,
    now: DateTime<Utc>,
) -> Option<Cow<'a, Value>> {
    match property {
        SUBJECT_ID_PROPERTY => {
            return Some(Cow::Owned(Value::String(context.subject_id.clone())));
        }
        TIMESTAMP_PROPERTY => {
            return Some(Cow::Owned(Value::String(
                now.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            )));
        }
        _ => {}
    }

    if let Some(value) = context.properties.get(property) {
        return present(value).map(Cow::Borrowed);
    }

    let mut segments = property.split('.');
    let mut current = context.properties.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    present(current).map(Cow::Borrowed)
}

const fn present(value: &Value) -> Option<&Value> {
    match value {
        Value::Null => None,
        other => Some(other),
    }
}

/// Canonical string form used by equality, membership and substring operators.
///
/// Integral numbers print without a fraction so `1`, `1.0` and `"1"` agree.
pub fn canonical(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s),
        Value::Bool(b) => Cow::Borrowed(if *b { "true" } else { "false" }),
        Value::Null => Cow::Borrowed(""),
        Value::Number(n) => Cow::Owned(canonical_number(n)),
        Value::Array(_) | Value::Object(_) => Cow::Owned(value.to_string()),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn canonical_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 => (f as i64).to_string(),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

/// Coerces a value to a finite number.
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Coerces a value to a timestamp.
pub fn to_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

fn compare_numbers(actual: &Value, expected: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (to_number(actual), to_number(expected)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn compare_times(
    actual: &Value,
    expected: &Value,
    cmp: impl Fn(DateTime<Utc>, DateTime<Utc>) -> bool,
) -> bool {
    match (to_timestamp(actual), to_timestamp(expected)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

/// `None` when the operand is not a list.
fn list_contains(actual: &Value, list: &Value) -> Option<bool> {
    let items = list.as_array()?;
    let needle = canonical(actual);
    Some(items.iter().any(|item| canonical(item) == needle))
}
