//! Experiment Engine
//!
//! Controlled A/B comparisons between a base template and its variants:
//! deterministic traffic bucketing, append-only metric samples and
//! two-sample significance testing.

#![warn(missing_docs)]

pub mod engine;
pub mod stats;

pub use engine::{ArmSummary, Evaluation, ExperimentEngine, VariantResult};
pub use stats::{two_proportion_test, welch_t_test, TestResult};
