//! Per-call evaluation input and output.

use crate::value::FlagValue;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Reserved property carrying the deployment environment.
pub const ENVIRONMENT_PROPERTY: &str = "environment";

/// Read-only input to one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EvaluationContext {
    /// Identity used for sticky bucketing.
    #[serde(default)]
    pub subject_id: String,
    /// Arbitrary properties; nested objects are reachable through dot paths.
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    /// Groups the subject belongs to.
    #[serde(default)]
    pub group_ids: BTreeSet<String>,
    /// Logical evaluation time; wall-clock time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl EvaluationContext {
    /// Creates a context for a subject.
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            ..Self::default()
        }
    }

    /// Adds a property.
    #[must_use]
    pub fn with_property(
        mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Replaces all properties.
    #[must_use]
    pub fn with_properties(mut self, properties: BTreeMap<String, serde_json::Value>) -> Self {
        self.properties = properties;
        self
    }

    /// Adds a group membership.
    #[must_use]
    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_ids.insert(group_id.into());
        self
    }

    /// Pins the logical evaluation time.
    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the reserved `environment` property.
    #[must_use]
    pub fn with_environment(self, environment: impl Into<String>) -> Self {
        self.with_property(ENVIRONMENT_PROPERTY, environment.into())
    }
}

/// Which precedence stage decided an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// The flag's master switch is off.
    Disabled,
    /// The evaluation time is outside the flag's schedule.
    OutsideSchedule,
    /// A dependency is missing, falsy or cyclic.
    DependencyNotMet,
    /// A subject or group override applied.
    Override,
    /// A targeting rule matched.
    RuleMatch,
    /// A weighted variant was selected.
    Variant,
    /// The rollout gate decided a boolean flag.
    Rollout,
    /// Nothing else applied.
    Default,
}

impl Reason {
    /// Returns the snake_case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::OutsideSchedule => "outside_schedule",
            Self::DependencyNotMet => "dependency_not_met",
            Self::Override => "override",
            Self::RuleMatch => "rule_match",
            Self::Variant => "variant",
            Self::Rollout => "rollout",
            Self::Default => "default",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EvaluationResult {
    /// Evaluated flag.
    pub flag_key: String,
    /// Resolved value.
    pub value: FlagValue,
    /// Deciding stage.
    pub reason: Reason,
    /// Matching rule, for [`Reason::RuleMatch`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    /// Selected variant, for [`Reason::Variant`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_key: Option<String>,
    /// Logical time the decision was made at.
    pub timestamp: DateTime<Utc>,
}

impl EvaluationResult {
    /// Creates a result without rule or variant attribution.
    pub fn new(
        flag_key: impl Into<String>,
        value: FlagValue,
        reason: Reason,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            flag_key: flag_key.into(),
            value,
            reason,
            rule_id: None,
            variant_key: None,
            timestamp,
        }
    }

    /// Attributes the result to a rule.
    #[must_use]
    pub fn with_rule_id(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = Some(rule_id.into());
        self
    }

    /// Attributes the result to a variant.
    #[must_use]
    pub fn with_variant_key(mut self, variant_key: impl Into<String>) -> Self {
        self.variant_key = Some(variant_key.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn environment_is_a_plain_property() {
        let ctx = EvaluationContext::new("U1").with_environment("staging");
        assert_eq!(
            ctx.properties.get(ENVIRONMENT_PROPERTY),
            Some(&serde_json::Value::from("staging"))
        );
    }

    #[test]
    fn result_serializes_compactly() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap();
        let result = EvaluationResult::new("beta-feature", FlagValue::Boolean(true), Reason::RuleMatch, ts)
            .with_rule_id("beta-users");
        insta::assert_snapshot!(
            serde_json::to_string(&result).unwrap(),
            @r###"{"flag_key":"beta-feature","value":true,"reason":"rule_match","rule_id":"beta-users","timestamp":"2025-03-01T09:30:00Z"}"###
        );
    }

    #[test]
    fn context_deserializes_with_defaults() {
        let ctx: EvaluationContext =
            serde_json::from_str(r#"{"subject_id":"U9","properties":{"plan":"pro"}}"#).unwrap();
        assert_eq!(ctx.subject_id, "U9");
        assert!(ctx.group_ids.is_empty());
        assert!(ctx.timestamp.is_none());
    }
}
