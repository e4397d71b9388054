//! Evolutionary Optimizer
//!
//! Searches prompt-variant space for a base template: seeded mutation,
//! bounded-concurrency fitness evaluation with a per-generation barrier,
//! and winners fed back into the template repository as drafts.

#![warn(missing_docs)]

pub mod fitness;
pub mod operator;
pub mod optimizer;

pub use fitness::{FitnessEvaluator, FitnessFn};
pub use operator::{MutationOperator, SeededMutation};
pub use optimizer::{CancelFlag, Optimizer, OptimizerConfig};
