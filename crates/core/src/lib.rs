//! PromptForge core data models.
//!
//! This crate defines the fundamental data structures for the prompt
//! lifecycle and optimization engine.

#![warn(missing_docs)]

// Core identities
mod id;

// Errors and configuration
mod config;
mod error;

// Template lifecycle
mod template;
mod usage;

// Selection and experimentation
mod context;
mod experiment;
mod optimize;

// Re-exports
pub use id::*;

pub use config::ScoringConfig;
pub use error::{Error, Result};

// Templates & usage
pub use template::{TemplateMetadata, TemplateStatus, TemplateVersion, VariableSpec};
pub use usage::{Feedback, QualityScores, UsageMetrics, UsageRecord, UsageStatus};

// Matching
pub use context::{ContextDescriptor, MatchKind, MatchRule};

// Experiments
pub use experiment::{Assignment, Experiment, ExperimentStatus, MetricSample};

// Optimization
pub use optimize::{GenerationRecord, OptimizationRun, RunStatus, TerminationReason};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
