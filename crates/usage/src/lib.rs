//! Usage recording and effectiveness scoring.
//!
//! Every template invocation produces a usage record; completed records
//! feed the effectiveness calculator, which maintains the per-template
//! statistics the matcher and optimizer rank by.

#![warn(missing_docs)]

pub mod effectiveness;
pub mod recorder;

pub use effectiveness::EffectivenessCalculator;
pub use recorder::{RenderedUsage, RetryPolicy, UsageRecorder};
