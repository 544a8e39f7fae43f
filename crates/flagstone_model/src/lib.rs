//! Typed flag model for Flagstone.
//!
//! This crate provides:
//! - The closed [`FlagValue`] sum type carried through flags, rules, variants and results
//! - Flag definitions with targeting rules, variants, rollout strategies, schedules and overrides
//! - Per-call [`EvaluationContext`] and [`EvaluationResult`] records
//! - The YAML/JSON flag definition file format
//!
//! # Example
//!
//! ```rust,ignore
//! use flagstone_model::{Flag, FlagValue, TargetingRule, Condition, Operator};
//!
//! let flag = Flag::new("beta-feature", FlagValue::Boolean(false)).with_rule(
//!     TargetingRule::new("beta-users", FlagValue::Boolean(true))
//!         .with_condition(Condition::new("subject_id", Operator::Equals, "U1")),
//! );
//! flag.validate()?;
//! ```

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod context;
pub mod error;
pub mod file;
pub mod flag;
pub mod value;

pub use context::{EvaluationContext, EvaluationResult, Reason, ENVIRONMENT_PROPERTY};
pub use error::{Error, Result};
pub use file::FlagFile;
pub use flag::{
    Condition, Flag, GradualStep, Operator, Override, OverrideTarget, RolloutStrategy, Schedule,
    TargetingRule, TimeWindow, Variant,
};
pub use value::{FlagType, FlagValue};
