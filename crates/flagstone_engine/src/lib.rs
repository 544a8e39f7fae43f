//! Flag evaluation engine for Flagstone.
//!
//! This crate is **pure and deterministic**:
//! - No I/O, no locks
//! - Time comes from the evaluation context, never from the wall clock
//!   unless the context leaves it unset
//! - Same flag and same context always produce the same result
//!
//! # Example
//!
//! ```rust,ignore
//! use flagstone_engine::Evaluator;
//! use flagstone_model::EvaluationContext;
//!
//! let evaluator = Evaluator::new(&flags);
//! let result = evaluator.evaluate_key("beta-feature", &EvaluationContext::new("U1"))?;
//! println!("{} ({})", result.value, result.reason);
//! ```

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod bucket;
pub mod condition;
pub mod error;
pub mod evaluator;
pub mod rollout;
pub mod rules;
pub mod schedule;
pub mod variant;

pub use bucket::{bucket, bucket_in, BUCKET_COUNT};
pub use error::{Error, Result};
pub use evaluator::{Evaluator, EvaluatorOptions, FlagLookup, DEFAULT_MAX_DEPENDENCY_DEPTH};
