//! In-memory flag storage and the flag service for Flagstone.
//!
//! This crate owns every piece of mutable state:
//! - [`FlagRegistry`]: copy-on-write flag map behind a reader/writer lock
//! - [`ChangeHistory`]: append-only per-flag change log
//! - [`FlagService`]: validated lifecycle, mutation and evaluation calls
//!
//! Evaluation itself is delegated to `flagstone_engine` against a registry
//! snapshot, so readers never block each other and never see a half-applied
//! write.
//!
//! # Example
//!
//! ```rust,ignore
//! use flagstone_model::FlagValue;
//! use flagstone_store::FlagService;
//!
//! let service = FlagService::new();
//! service.create_flag("new-ui", "New UI", None, FlagValue::Boolean(false))?;
//! service.set_percentage_rollout("new-ui", 25.0, true)?;
//!
//! let result = service.evaluate("new-ui", "user-42", Default::default())?;
//! println!("{} ({})", result.value, result.reason);
//! ```

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod clock;
pub mod error;
pub mod history;
pub mod registry;
pub mod service;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{Error, Result};
pub use history::{ChangeAction, ChangeEntry, ChangeHistory};
pub use registry::{FlagMap, FlagRegistry};
pub use service::{FlagService, LoadReport};
