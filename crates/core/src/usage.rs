//! Usage records: one entry per template invocation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{TemplateVersionId, Time, UsageId};

/// Lifecycle status of a usage record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageStatus {
    /// Rendered, outcome not yet reported
    Open,
    /// Outcome reported; terminal except for attached feedback
    Complete,
}

/// Quality sub-scores reported for a completed usage. Each is clamped
/// to [0, 1] on construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScores {
    /// How relevant the response was to the request
    pub relevance: f64,
    /// How coherent the response text was
    pub coherence: f64,
    /// How completely the response covered the request
    pub completeness: f64,
    /// Overall quality
    pub overall: f64,
}

impl QualityScores {
    /// Build scores, clamping every component to [0, 1].
    pub fn new(relevance: f64, coherence: f64, completeness: f64, overall: f64) -> Self {
        Self {
            relevance: relevance.clamp(0.0, 1.0),
            coherence: coherence.clamp(0.0, 1.0),
            completeness: completeness.clamp(0.0, 1.0),
            overall: overall.clamp(0.0, 1.0),
        }
    }
}

/// Runtime metrics reported when a usage completes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageMetrics {
    /// Wall-clock latency in milliseconds
    pub latency_ms: u64,

    /// Tokens consumed by the rendered prompt
    pub prompt_tokens: u32,

    /// Tokens produced by the response
    pub completion_tokens: u32,

    /// Estimated cost in account currency units
    pub cost_estimate: f64,

    /// Quality sub-scores, when the caller evaluated the response
    pub quality: Option<QualityScores>,
}

/// Feedback attached after completion. Attaching feedback never reopens
/// the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    /// Rating on the 1..=5 scale
    pub rating: u8,

    /// Free-form notes
    pub notes: String,

    /// When the feedback arrived
    pub created_at: Time,
}

/// One template invocation and its outcome.
///
/// Records are append-only: terminal fields are written exactly once when
/// the record completes, and only feedback may be attached afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Unique id
    pub id: UsageId,

    /// Template version that was rendered
    pub template_version: TemplateVersionId,

    /// Template name, denormalized for aggregation
    pub template_name: String,

    /// Context type the caller reported
    pub context_type: String,

    /// Input variables supplied at render time
    pub input_vars: HashMap<String, String>,

    /// Rendered prompt text
    pub rendered: String,

    /// Response text, set on completion
    pub response: Option<String>,

    /// Whether the invocation succeeded, set on completion
    pub success: Option<bool>,

    /// Runtime metrics, set on completion
    pub metrics: Option<UsageMetrics>,

    /// Lifecycle status
    pub status: UsageStatus,

    /// Feedback attached after completion
    pub feedback: Option<Feedback>,

    /// When the usage began
    pub started_at: Time,

    /// When the usage completed
    pub completed_at: Option<Time>,
}

impl UsageRecord {
    /// Open a new record for a rendered invocation.
    pub fn open(
        template_version: TemplateVersionId,
        template_name: impl Into<String>,
        context_type: impl Into<String>,
        input_vars: HashMap<String, String>,
        rendered: impl Into<String>,
    ) -> Self {
        Self {
            id: UsageId::new(),
            template_version,
            template_name: template_name.into(),
            context_type: context_type.into(),
            input_vars,
            rendered: rendered.into(),
            response: None,
            success: None,
            metrics: None,
            status: UsageStatus::Open,
            feedback: None,
            started_at: chrono::Utc::now(),
            completed_at: None,
        }
    }

    /// Whether the record has completed.
    pub fn is_complete(&self) -> bool {
        self.status == UsageStatus::Complete
    }
}
