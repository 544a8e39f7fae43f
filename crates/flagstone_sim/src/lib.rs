//! Population simulation for Flagstone.
//!
//! This crate answers "what would this flag do to my traffic?" before a flag
//! ships:
//! 1. **Population**: a seeded, reproducible set of synthetic contexts
//! 2. **Simulation**: every context is evaluated at one logical time and the
//!    observed values and reasons are tallied
//! 3. **Generators**: proptest strategies for flags and contexts
//!
//! Same seed, same flag and same timestamp always produce the same report.
//!
//! # Example
//!
//! ```rust,ignore
//! use flagstone_sim::{simulate, Population, PopulationConfig};
//!
//! let population = Population::generate(&PopulationConfig::default().with_size(10_000));
//! let report = simulate(&flag, &flags, &population, timestamp);
//! println!("{report}");
//! ```

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod generators;
pub mod population;
pub mod report;

pub use population::{Population, PopulationConfig, PropertySpec};
pub use report::{simulate, SimulationReport, Tally};
