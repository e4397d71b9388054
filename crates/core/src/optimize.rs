//! Optimization runs: evolutionary search over prompt variants.

use serde::{Deserialize, Serialize};

use crate::{RunId, TemplateVersionId, Time};

/// Lifecycle status of an optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, not yet started
    Pending,
    /// Evaluating generations
    Running,
    /// Finished with a best candidate
    Completed,
    /// Aborted by an unrecoverable error
    Failed,
    /// Cancelled cooperatively
    Cancelled,
}

impl RunStatus {
    /// Whether the run can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Which condition ended the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Best fitness stopped improving beyond epsilon
    Converged,
    /// Generation cap reached
    MaxGenerations,
    /// Evaluation budget ran out; terminal state, not a failure
    BudgetExhausted,
    /// Cooperative cancellation
    Cancelled,
}

/// Audit entry appended once per generation. Never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRecord {
    /// Generation number, starting at 0 for the initial population
    pub generation: u32,

    /// Best fitness observed in the generation
    pub best_fitness: f64,

    /// Mean fitness over candidates that evaluated successfully
    pub mean_fitness: f64,

    /// Candidates evaluated this generation
    pub evaluated: usize,

    /// Candidates whose evaluation failed (absorbed as worst fitness)
    pub failed: usize,

    /// When the generation finished
    pub recorded_at: Time,
}

/// State of one evolutionary search over a base template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationRun {
    /// Unique id
    pub id: RunId,

    /// Template version the search starts from
    pub base: TemplateVersionId,

    /// Metric the search maximizes (informational)
    pub goal_metric: String,

    /// Population size
    pub population: usize,

    /// Generation cap
    pub max_generations: u32,

    /// Mutation probability per refilled candidate
    pub mutation_rate: f64,

    /// Fraction of the population carried over unchanged
    pub elite_fraction: f64,

    /// Last generation that finished
    pub current_generation: u32,

    /// Best candidate content found so far
    pub best_content: Option<String>,

    /// Best fitness found so far
    pub best_score: Option<f64>,

    /// Whether the run converged (vs. hitting a cap)
    pub converged: bool,

    /// What ended the run
    pub termination: Option<TerminationReason>,

    /// Lifecycle status
    pub status: RunStatus,

    /// Draft version proposed from the winning candidate
    pub proposed_version: Option<TemplateVersionId>,

    /// Append-only per-generation history
    pub history: Vec<GenerationRecord>,

    /// Creation time
    pub created_at: Time,

    /// Last update time
    pub updated_at: Time,
}

impl OptimizationRun {
    /// Create a pending run.
    pub fn new(
        base: TemplateVersionId,
        goal_metric: impl Into<String>,
        population: usize,
        max_generations: u32,
        mutation_rate: f64,
        elite_fraction: f64,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: RunId::new(),
            base,
            goal_metric: goal_metric.into(),
            population,
            max_generations,
            mutation_rate,
            elite_fraction,
            current_generation: 0,
            best_content: None,
            best_score: None,
            converged: false,
            termination: None,
            status: RunStatus::Pending,
            proposed_version: None,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
