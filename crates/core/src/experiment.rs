//! A/B experiments over template variants.

use serde::{Deserialize, Serialize};

use crate::{AssignmentId, ExperimentId, TemplateVersionId, Time};

/// Lifecycle status of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    /// Defined, not yet taking traffic
    Draft,
    /// Assigning subjects and collecting samples
    Running,
    /// Decided; results frozen
    Completed,
    /// Abandoned; terminal
    Cancelled,
}

impl ExperimentStatus {
    /// Whether the experiment can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(self, ExperimentStatus::Completed | ExperimentStatus::Cancelled)
    }
}

impl std::fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExperimentStatus::Draft => "draft",
            ExperimentStatus::Running => "running",
            ExperimentStatus::Completed => "completed",
            ExperimentStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Controlled comparison of a base template against variants.
///
/// The traffic split covers every arm in order, base first; fractions sum
/// to 1.0. Arm 0 is always the control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    /// Unique id
    pub id: ExperimentId,

    /// Natural key; restarting with the same name is idempotent
    pub name: String,

    /// Control template version
    pub base: TemplateVersionId,

    /// Ordered variant versions
    pub variants: Vec<TemplateVersionId>,

    /// Traffic fractions over base + variants, summing to 1.0
    pub split: Vec<f64>,

    /// Minimum samples per arm before the experiment can be decided
    pub min_sample_size: u64,

    /// Confidence level, e.g. 0.95
    pub confidence_level: f64,

    /// Lifecycle status
    pub status: ExperimentStatus,

    /// Winning version once completed
    pub winner: Option<TemplateVersionId>,

    /// Creation time
    pub created_at: Time,

    /// When the experiment started taking traffic
    pub started_at: Option<Time>,

    /// When the experiment reached a terminal state
    pub ended_at: Option<Time>,
}

impl Experiment {
    /// All arms in bucket order: control first, then variants.
    pub fn arms(&self) -> Vec<TemplateVersionId> {
        std::iter::once(self.base).chain(self.variants.iter().copied()).collect()
    }

    /// Number of arms.
    pub fn arm_count(&self) -> usize {
        self.variants.len() + 1
    }

    /// Significance threshold derived from the confidence level.
    pub fn significance_level(&self) -> f64 {
        1.0 - self.confidence_level
    }
}

/// A subject's sticky bucket within an experiment.
///
/// Created once per (experiment, subject); never reassigned, even if the
/// split later changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    /// Unique id
    pub id: AssignmentId,

    /// Owning experiment
    pub experiment: ExperimentId,

    /// Subject key (user id, session id, ...)
    pub subject: String,

    /// Arm index: 0 is control
    pub arm: usize,

    /// When the assignment was created
    pub assigned_at: Time,
}

/// One observed metric value for an assignment. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    /// Assignment the sample belongs to
    pub assignment: AssignmentId,

    /// Owning experiment, denormalized for aggregation
    pub experiment: ExperimentId,

    /// Arm index, denormalized for aggregation
    pub arm: usize,

    /// Metric name, e.g. "success" or "latency_ms"
    pub metric: String,

    /// Observed value
    pub value: f64,

    /// When the sample was recorded
    pub recorded_at: Time,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arms_order_control_first() {
        let base = TemplateVersionId::new();
        let v1 = TemplateVersionId::new();
        let exp = Experiment {
            id: ExperimentId::new(),
            name: "exp".into(),
            base,
            variants: vec![v1],
            split: vec![0.5, 0.5],
            min_sample_size: 100,
            confidence_level: 0.95,
            status: ExperimentStatus::Draft,
            winner: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            ended_at: None,
        };
        assert_eq!(exp.arms(), vec![base, v1]);
        assert_eq!(exp.arm_count(), 2);
        assert!((exp.significance_level() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ExperimentStatus::Completed.is_terminal());
        assert!(ExperimentStatus::Cancelled.is_terminal());
        assert!(!ExperimentStatus::Running.is_terminal());
    }
}
