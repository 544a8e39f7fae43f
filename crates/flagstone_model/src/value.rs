//! Flag values and flag types.
//!
//! Every value a flag can produce is one of four shapes. Consumers match on
//! [`FlagValue`] exhaustively instead of inspecting runtime types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The declared type of a flag, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FlagType {
    /// `true` / `false` toggle.
    Boolean,
    /// Free-form string.
    String,
    /// Floating-point number.
    Number,
    /// Arbitrary structured value.
    Json,
}

impl FlagType {
    /// Returns the canonical lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Number => "number",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for FlagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value served by a flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum FlagValue {
    /// Boolean value.
    Boolean(bool),
    /// String value.
    String(String),
    /// Numeric value.
    Number(f64),
    /// Structured value (objects, arrays, null).
    Json(serde_json::Value),
}

impl FlagValue {
    /// Converts a JSON value into a flag value, inferring the variant from its shape.
    #[must_use]
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Bool(b) => Self::Boolean(b),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => Self::Number(f),
                None => Self::Json(serde_json::Value::Number(n)),
            },
            other => Self::Json(other),
        }
    }

    /// Converts this value into a JSON value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Boolean(b) => serde_json::Value::Bool(*b),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Number(n) => number_to_json(*n),
            Self::Json(v) => v.clone(),
        }
    }

    /// Returns the flag type this value implies.
    #[must_use]
    pub const fn flag_type(&self) -> FlagType {
        match self {
            Self::Boolean(_) => FlagType::Boolean,
            Self::String(_) => FlagType::String,
            Self::Number(_) => FlagType::Number,
            Self::Json(_) => FlagType::Json,
        }
    }

    /// Returns whether the value satisfies a dependency.
    ///
    /// Only `Boolean(false)` is falsy.
    #[must_use]
    pub const fn is_truthy(&self) -> bool {
        match self {
            Self::Boolean(b) => *b,
            Self::String(_) | Self::Number(_) | Self::Json(_) => true,
        }
    }

    /// Returns true for a JSON `null`, which never counts as a usable default.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Json(serde_json::Value::Null))
    }

    /// Returns the boolean value, if this is a boolean.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the string value, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the numeric value, if this is a number.
    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the structured value, if this is JSON.
    #[must_use]
    pub const fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }
}

/// Integral floats become JSON integers so `100.0` prints as `100`.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return serde_json::Value::from(n as i64);
    }
    serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{b}"),
            Self::String(s) => f.write_str(s),
            Self::Number(_) => write!(f, "{}", self.to_json()),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FlagValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<f64> for FlagValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for FlagValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<serde_json::Value> for FlagValue {
    fn from(value: serde_json::Value) -> Self {
        Self::from_json(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn infers_type_from_json_shape() {
        assert_eq!(FlagValue::from_json(json!(true)).flag_type(), FlagType::Boolean);
        assert_eq!(FlagValue::from_json(json!("on")).flag_type(), FlagType::String);
        assert_eq!(FlagValue::from_json(json!(42)).flag_type(), FlagType::Number);
        assert_eq!(FlagValue::from_json(json!([1, 2])).flag_type(), FlagType::Json);
        assert_eq!(
            FlagValue::from_json(json!({"rate_limit": 100})).flag_type(),
            FlagType::Json
        );
    }

    #[test]
    fn only_false_is_falsy() {
        assert!(!FlagValue::Boolean(false).is_truthy());
        assert!(FlagValue::Boolean(true).is_truthy());
        assert!(FlagValue::Number(0.0).is_truthy());
        assert!(FlagValue::String(String::new()).is_truthy());
    }

    #[test]
    fn untagged_deserialization_picks_natural_variant() {
        let value: FlagValue = serde_json::from_str("true").unwrap();
        assert_eq!(value, FlagValue::Boolean(true));

        let value: FlagValue = serde_json::from_str("12").unwrap();
        assert_eq!(value, FlagValue::Number(12.0));

        let value: FlagValue = serde_json::from_str(r#"{"timeout_ms":5000}"#).unwrap();
        assert_eq!(value, FlagValue::Json(json!({"timeout_ms": 5000})));

        let value: FlagValue = serde_json::from_str("null").unwrap();
        assert!(value.is_null());
    }

    #[test]
    fn display_uses_canonical_forms() {
        assert_eq!(FlagValue::Number(100.0).to_string(), "100");
        assert_eq!(FlagValue::Number(0.25).to_string(), "0.25");
        assert_eq!(FlagValue::from("blue").to_string(), "blue");
        insta::assert_snapshot!(
            FlagValue::Json(json!({"a": [1, 2]})).to_string(),
            @r###"{"a":[1,2]}"###
        );
    }

    proptest! {
        #[test]
        fn scalar_values_survive_json(value in prop_oneof![
            any::<bool>().prop_map(FlagValue::Boolean),
            "\\PC{0,12}".prop_map(FlagValue::String),
            (-1_000_000i64..1_000_000).prop_map(FlagValue::from),
        ]) {
            prop_assert_eq!(FlagValue::from_json(value.to_json()), value);
        }

        #[test]
        fn truthiness_only_rejects_false(value in prop_oneof![
            any::<bool>().prop_map(FlagValue::Boolean),
            "[a-z]{0,4}".prop_map(FlagValue::String),
        ]) {
            prop_assert_eq!(value.is_truthy(), value != FlagValue::Boolean(false));
        }
    }
}
