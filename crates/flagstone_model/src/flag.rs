//! Flag definitions.
//!
//! These types describe a flag as it is stored and shipped around. They carry
//! no evaluation logic; `flagstone_engine` interprets them.

use crate::error::{Error, Result};
use crate::value::{FlagType, FlagValue};
use chrono::{DateTime, NaiveTime, Utc, Weekday};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

const fn default_true() -> bool {
    true
}

const fn default_weight() -> u32 {
    1
}

/// A feature flag definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Flag {
    /// Unique, immutable identifier.
    pub key: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declared value type, fixed at creation.
    #[serde(rename = "type")]
    pub flag_type: FlagType,
    /// Value served when no other stage decides.
    pub default_value: FlagValue,
    /// Master kill switch.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Targeting rules, lowest priority number first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<TargetingRule>,
    /// Weighted alternative values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<Variant>,
    /// Optional rollout gate for boolean flags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout_strategy: Option<RolloutStrategy>,
    /// Optional activity window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    /// Keys of flags that must be met before this one is considered.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Forced values for subjects or groups.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<Override>,
    /// Creation time, stamped by the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last modification time, stamped by the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Flag {
    /// Creates an enabled flag, inferring its type from the default value.
    ///
    /// # Examples
    ///
    /// ```
    /// use flagstone_model::{Flag, FlagType, FlagValue};
    ///
    /// let flag = Flag::new("new-ui", FlagValue::Boolean(false));
    /// assert_eq!(flag.flag_type, FlagType::Boolean);
    /// assert!(flag.enabled);
    /// ```
    pub fn new(key: impl Into<String>, default_value: FlagValue) -> Self {
        let key = key.into();
        Self {
            name: key.clone(),
            key,
            description: None,
            flag_type: default_value.flag_type(),
            default_value,
            enabled: true,
            rules: Vec::new(),
            variants: Vec::new(),
            rollout_strategy: None,
            schedule: None,
            dependencies: Vec::new(),
            overrides: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a targeting rule.
    #[must_use]
    pub fn with_rule(mut self, rule: TargetingRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Adds a variant.
    #[must_use]
    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.variants.push(variant);
        self
    }

    /// Sets the rollout strategy.
    #[must_use]
    pub fn with_rollout(mut self, strategy: RolloutStrategy) -> Self {
        self.rollout_strategy = Some(strategy);
        self
    }

    /// Sets the schedule.
    #[must_use]
    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Adds a dependency on another flag.
    #[must_use]
    pub fn with_dependency(mut self, key: impl Into<String>) -> Self {
        self.dependencies.push(key.into());
        self
    }

    /// Adds an override.
    #[must_use]
    pub fn with_override(mut self, entry: Override) -> Self {
        self.overrides.push(entry);
        self
    }

    /// Sets the master switch.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Checks every invariant a flag must hold before it can be registered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the first violated invariant.
    pub fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(Error::validation("flag key must not be empty"));
        }
        if self.default_value.is_null() {
            return Err(Error::validation(format!(
                "flag '{}' has no default value",
                self.key
            )));
        }
        let inferred = self.default_value.flag_type();
        if self.flag_type != FlagType::Json && inferred != self.flag_type {
            return Err(Error::validation(format!(
                "flag '{}' is declared {} but its default value is {}",
                self.key, self.flag_type, inferred
            )));
        }

        for rule in &self.rules {
            self.check_served(&rule.value, "rule", &rule.id)?;
        }
        for variant in &self.variants {
            self.check_served(&variant.value, "variant", &variant.key)?;
        }
        for entry in &self.overrides {
            self.check_served(&entry.value, "override", &entry.target.to_string())?;
        }

        let mut rule_ids = HashSet::new();
        for rule in &self.rules {
            if rule.id.trim().is_empty() {
                return Err(Error::validation(format!(
                    "flag '{}' has a rule with an empty id",
                    self.key
                )));
            }
            if !rule_ids.insert(rule.id.as_str()) {
                return Err(Error::validation(format!(
                    "flag '{}' has duplicate rule id '{}'",
                    self.key, rule.id
                )));
            }
        }

        let mut variant_keys = HashSet::new();
        for variant in &self.variants {
            if variant.key.trim().is_empty() {
                return Err(Error::validation(format!(
                    "flag '{}' has a variant with an empty key",
                    self.key
                )));
            }
            if !variant_keys.insert(variant.key.as_str()) {
                return Err(Error::validation(format!(
                    "flag '{}' has duplicate variant '{}'",
                    self.key, variant.key
                )));
            }
        }

        if let Some(strategy) = &self.rollout_strategy {
            strategy.validate()?;
        }
        if let Some(schedule) = &self.schedule {
            schedule.validate()?;
        }

        for dependency in &self.dependencies {
            if dependency.trim().is_empty() {
                return Err(Error::validation(format!(
                    "flag '{}' has an empty dependency key",
                    self.key
                )));
            }
            if *dependency == self.key {
                return Err(Error::validation(format!(
                    "flag '{}' cannot depend on itself",
                    self.key
                )));
            }
        }

        for entry in &self.overrides {
            if entry.target.id().trim().is_empty() {
                return Err(Error::validation(format!(
                    "flag '{}' has an override with an empty target",
                    self.key
                )));
            }
        }

        Ok(())
    }

    /// Served values must match the declared type; `json` flags accept any.
    fn check_served(&self, value: &FlagValue, kind: &str, id: &str) -> Result<()> {
        let actual = value.flag_type();
        if self.flag_type == FlagType::Json || actual == self.flag_type {
            return Ok(());
        }
        Err(Error::validation(format!(
            "flag '{}' is {} but {kind} '{id}' serves {actual}",
            self.key, self.flag_type
        )))
    }
}

/// An ordered, condition-gated value for matching contexts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TargetingRule {
    /// Rule identifier, unique within its flag.
    pub id: String,
    /// Evaluation order; lower runs first. Ties keep insertion order.
    #[serde(default)]
    pub priority: i32,
    /// Disabled rules are skipped.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Conditions, all of which must hold.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Value served on match.
    pub value: FlagValue,
}

impl TargetingRule {
    /// Creates an enabled rule with priority 0 and no conditions.
    pub fn new(id: impl Into<String>, value: FlagValue) -> Self {
        Self {
            id: id.into(),
            priority: 0,
            enabled: true,
            conditions: Vec::new(),
            value,
        }
    }

    /// Sets the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Adds a condition.
    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Sets whether the rule participates in evaluation.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// A single property comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Condition {
    /// Property name; dots walk into nested objects.
    pub property: String,
    /// Comparison operator.
    pub operator: Operator,
    /// Right-hand operand.
    pub value: serde_json::Value,
}

impl Condition {
    /// Creates a condition from a typed operator.
    pub fn new(
        property: impl Into<String>,
        operator: Operator,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            property: property.into(),
            operator,
            value: value.into(),
        }
    }

    /// Creates a condition from an operator name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownOperator`] if the operator is not supported.
    pub fn parse(
        property: impl Into<String>,
        operator: &str,
        value: impl Into<serde_json::Value>,
    ) -> Result<Self> {
        let operator = operator.parse()?;
        Ok(Self::new(property, operator, value))
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// String-form equality.
    #[serde(alias = "==")]
    Equals,
    /// String-form inequality.
    #[serde(alias = "!=")]
    NotEquals,
    /// Numeric `>`.
    #[serde(alias = ">")]
    GreaterThan,
    /// Numeric `>=`.
    #[serde(alias = ">=")]
    GreaterThanOrEqual,
    /// Numeric `<`.
    #[serde(alias = "<")]
    LessThan,
    /// Numeric `<=`.
    #[serde(alias = "<=")]
    LessThanOrEqual,
    /// Membership in a list operand.
    In,
    /// Non-membership in a list operand.
    NotIn,
    /// Substring match.
    Contains,
    /// Substring absence.
    NotContains,
    /// Timestamp strictly earlier than the operand.
    Before,
    /// Timestamp strictly later than the operand.
    After,
}

impl Operator {
    /// All supported operators.
    pub const ALL: [Self; 12] = [
        Self::Equals,
        Self::NotEquals,
        Self::GreaterThan,
        Self::GreaterThanOrEqual,
        Self::LessThan,
        Self::LessThanOrEqual,
        Self::In,
        Self::NotIn,
        Self::Contains,
        Self::NotContains,
        Self::Before,
        Self::After,
    ];

    /// Returns the canonical snake_case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::GreaterThan => "greater_than",
            Self::GreaterThanOrEqual => "greater_than_or_equal",
            Self::LessThan => "less_than",
            Self::LessThanOrEqual => "less_than_or_equal",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::Before => "before",
            Self::After => "after",
        }
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let operator = match s.trim() {
            "==" => Self::Equals,
            "!=" => Self::NotEquals,
            ">" => Self::GreaterThan,
            ">=" => Self::GreaterThanOrEqual,
            "<" => Self::LessThan,
            "<=" => Self::LessThanOrEqual,
            other => Self::ALL
                .into_iter()
                .find(|op| op.as_str() == other)
                .ok_or_else(|| Error::UnknownOperator(other.to_string()))?,
        };
        Ok(operator)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, weighted alternative value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Variant {
    /// Variant key, unique within its flag.
    pub key: String,
    /// Value served when selected.
    pub value: FlagValue,
    /// Relative weight; weights are normalized at selection time.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

impl Variant {
    /// Creates a variant.
    pub fn new(key: impl Into<String>, value: FlagValue, weight: u32) -> Self {
        Self {
            key: key.into(),
            value,
            weight,
        }
    }
}

/// A policy gating a boolean flag over a population or over time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RolloutStrategy {
    /// A fixed share of subjects.
    Percentage {
        /// Share of subjects in the rollout (0 to 100).
        percentage: f64,
        /// Sticky buckets ignore the evaluation time.
        #[serde(default = "default_true")]
        sticky: bool,
    },
    /// Everyone, within a time window.
    Scheduled {
        /// Inclusive start; unbounded when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_date: Option<DateTime<Utc>>,
        /// Inclusive end; unbounded when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_date: Option<DateTime<Utc>>,
    },
    /// A percentage that steps up over time.
    Gradual {
        /// Steps; the latest one already reached applies.
        increments: Vec<GradualStep>,
    },
}

impl RolloutStrategy {
    /// Sticky percentage rollout.
    #[must_use]
    pub const fn percentage(percentage: f64) -> Self {
        Self::Percentage {
            percentage,
            sticky: true,
        }
    }

    /// Validates percentages and date ordering.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] on an out-of-range percentage or an inverted window.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Percentage { percentage, .. } => check_percentage(*percentage),
            Self::Scheduled {
                start_date: Some(start),
                end_date: Some(end),
            } if start > end => Err(Error::validation(format!(
                "rollout window starts ({start}) after it ends ({end})"
            ))),
            Self::Scheduled { .. } => Ok(()),
            Self::Gradual { increments } => increments
                .iter()
                .try_for_each(|step| check_percentage(step.percentage)),
        }
    }
}

fn check_percentage(percentage: f64) -> Result<()> {
    if percentage.is_finite() && (0.0..=100.0).contains(&percentage) {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "rollout percentage must be between 0 and 100, got {percentage}"
        )))
    }
}

/// One step of a gradual rollout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GradualStep {
    /// When this step takes effect.
    pub date: DateTime<Utc>,
    /// Share of subjects in the rollout from `date` on.
    pub percentage: f64,
}

impl GradualStep {
    /// Creates a step.
    pub const fn new(date: DateTime<Utc>, percentage: f64) -> Self {
        Self { date, percentage }
    }
}

/// An activity window for a flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Schedule {
    /// Inclusive start; unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// Inclusive end; unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Allowed days (UTC). Empty allows every day.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub days_of_week: Vec<Weekday>,
    /// Allowed time of day (UTC).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,
}

impl Schedule {
    /// Creates an unbounded schedule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the start.
    #[must_use]
    pub const fn starting(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self
    }

    /// Sets the end.
    #[must_use]
    pub const fn ending(mut self, end: DateTime<Utc>) -> Self {
        self.end_time = Some(end);
        self
    }

    /// Restricts to the given days.
    #[must_use]
    pub fn on_days(mut self, days: impl IntoIterator<Item = Weekday>) -> Self {
        self.days_of_week = days.into_iter().collect();
        self
    }

    /// Restricts to a time-of-day window.
    #[must_use]
    pub const fn between(mut self, start: NaiveTime, end: NaiveTime) -> Self {
        self.time_window = Some(TimeWindow { start, end });
        self
    }

    /// Validates window ordering.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the start is after the end.
    pub fn validate(&self) -> Result<()> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) if start > end => Err(Error::validation(format!(
                "schedule starts ({start}) after it ends ({end})"
            ))),
            _ => Ok(()),
        }
    }
}

/// A time-of-day window. `start > end` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TimeWindow {
    /// Inclusive start.
    pub start: NaiveTime,
    /// Inclusive end.
    pub end: NaiveTime,
}

/// A forced value for one subject or group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Override {
    /// Who the override applies to.
    pub target: OverrideTarget,
    /// Forced value.
    pub value: FlagValue,
    /// Expiry; never expires when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Override {
    /// Creates a non-expiring override.
    pub const fn new(target: OverrideTarget, value: FlagValue) -> Self {
        Self {
            target,
            value,
            expires_at: None,
        }
    }

    /// Sets the expiry.
    #[must_use]
    pub const fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Returns true once `at` reaches the expiry.
    #[must_use]
    pub fn is_expired(&self, at: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= at)
    }
}

/// Override target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum OverrideTarget {
    /// A single subject.
    Subject(String),
    /// Every member of a group.
    Group(String),
}

impl OverrideTarget {
    /// Returns the subject or group identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Subject(id) | Self::Group(id) => id,
        }
    }
}

impl fmt::Display for OverrideTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subject(id) => write!(f, "subject:{id}"),
            Self::Group(id) => write!(f, "group:{id}"),
        }
    }
}
