//! Experiment lifecycle and evaluation.
//!
//! State machine: draft -> running -> {completed, cancelled}. Subjects get
//! deterministic, sticky bucket assignments; outcomes append to a metric
//! log; evaluation runs two-sample tests of every variant against the
//! control arm.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use promptforge_core::{
    Assignment, AssignmentId, Error, Experiment, ExperimentId, ExperimentStatus, MetricSample,
    Result, TemplateVersionId,
};
use promptforge_storage::Store;
use tracing::{debug, info};

use crate::stats::{self, two_proportion_test, welch_t_test};

const SPLIT_EPSILON: f64 = 1e-6;

/// Per-arm descriptive statistics.
#[derive(Debug, Clone)]
pub struct ArmSummary {
    /// Arm index (0 = control)
    pub arm: usize,
    /// Template version serving the arm
    pub template: TemplateVersionId,
    /// Sample count
    pub count: u64,
    /// Sample mean
    pub mean: f64,
    /// Sample variance
    pub variance: f64,
}

/// Significance test outcome for one variant against control.
#[derive(Debug, Clone)]
pub struct VariantResult {
    /// Variant arm index (>= 1)
    pub arm: usize,
    /// Two-sided p-value against control
    pub p_value: f64,
    /// Difference in means (variant minus control)
    pub effect_size: f64,
    /// Whether the variant clears the significance threshold
    pub significant: bool,
}

/// Result of evaluating a running experiment.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Experiment id
    pub experiment: ExperimentId,
    /// Metric the decision is based on
    pub metric: String,
    /// Per-arm statistics
    pub arms: Vec<ArmSummary>,
    /// Per-variant test results
    pub variants: Vec<VariantResult>,
    /// Whether the experiment is statistically decided
    pub decided: bool,
    /// Leading variant arm, if any variant beats control
    pub leader: Option<usize>,
}

/// Runs controlled A/B comparisons between template variants.
pub struct ExperimentEngine {
    store: Arc<dyn Store>,
}

impl ExperimentEngine {
    /// Create an engine over a storage backend.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Validate and start an experiment. Idempotent on the name: if an
    /// experiment with this name exists, it is returned unchanged.
    #[allow(clippy::too_many_arguments)]
    pub async fn start(
        &self,
        name: &str,
        base: TemplateVersionId,
        variants: Vec<TemplateVersionId>,
        split: Vec<f64>,
        min_sample_size: u64,
        confidence_level: f64,
    ) -> Result<Experiment> {
        if let Some(existing) = self.store.find_experiment(name).await? {
            debug!(name, id = %existing.id, "experiment already exists; reusing");
            return Ok(existing);
        }

        if variants.is_empty() {
            return Err(Error::Validation("experiment needs at least one variant".into()));
        }
        if split.len() != variants.len() + 1 {
            return Err(Error::Validation(format!(
                "split must cover base + {} variant(s), got {} fraction(s)",
                variants.len(),
                split.len()
            )));
        }
        if split.iter().any(|f| !(0.0..=1.0).contains(f)) {
            return Err(Error::Validation("split fractions must lie in [0, 1]".into()));
        }
        let sum: f64 = split.iter().sum();
        if (sum - 1.0).abs() > SPLIT_EPSILON {
            return Err(Error::Validation(format!(
                "split fractions must sum to 1.0, got {sum}"
            )));
        }
        if !(0.0..1.0).contains(&confidence_level) || confidence_level <= 0.5 {
            return Err(Error::Validation(format!(
                "confidence level must lie in (0.5, 1.0), got {confidence_level}"
            )));
        }
        if min_sample_size == 0 {
            return Err(Error::Validation("min sample size must be positive".into()));
        }

        let now = Utc::now();
        let experiment = Experiment {
            id: ExperimentId::new(),
            name: name.to_string(),
            base,
            variants,
            split,
            min_sample_size,
            confidence_level,
            status: ExperimentStatus::Running,
            winner: None,
            created_at: now,
            started_at: Some(now),
            ended_at: None,
        };
        self.store.save_experiment(&experiment).await?;
        info!(name, id = %experiment.id, arms = experiment.arm_count(), "experiment started");
        Ok(experiment)
    }

    /// Assign a subject to an arm.
    ///
    /// The bucket is a pure function of the subject id and the split, and
    /// the store inserts if-absent, so the first assignment sticks for the
    /// life of the experiment no matter how many times or how concurrently
    /// this is called.
    pub async fn assign(&self, experiment_id: ExperimentId, subject: &str) -> Result<Assignment> {
        let experiment = self.load(experiment_id).await?;
        if experiment.status != ExperimentStatus::Running {
            return Err(Error::State {
                entity: "experiment".into(),
                from: experiment.status.to_string(),
                to: "assigning".into(),
            });
        }

        let arm = bucket_for(&experiment.split, fnv1a64(subject));
        let candidate = Assignment {
            id: AssignmentId::new(),
            experiment: experiment_id,
            subject: subject.to_string(),
            arm,
            assigned_at: Utc::now(),
        };
        self.store.insert_assignment(candidate).await
    }

    /// Append one observed metric value for an assignment. Prior samples
    /// are never edited.
    pub async fn record_outcome(
        &self,
        assignment_id: AssignmentId,
        metric: &str,
        value: f64,
    ) -> Result<()> {
        let assignment = self
            .store
            .load_assignment(assignment_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("assignment {assignment_id}")))?;

        let experiment = self.load(assignment.experiment).await?;
        match experiment.status {
            ExperimentStatus::Running => {}
            ExperimentStatus::Completed => {
                return Err(Error::AlreadyCompleted(experiment.id.to_string()))
            }
            other => {
                return Err(Error::State {
                    entity: "experiment".into(),
                    from: other.to_string(),
                    to: "recording".into(),
                })
            }
        }

        self.store
            .append_sample(&MetricSample {
                assignment: assignment_id,
                experiment: assignment.experiment,
                arm: assignment.arm,
                metric: metric.to_string(),
                value,
                recorded_at: Utc::now(),
            })
            .await
    }

    /// Evaluate a running experiment: per-arm statistics plus each variant
    /// tested against control on the decision metric (the metric with the
    /// most samples; "success"-style binary metrics use a proportion test,
    /// continuous metrics use Welch's t).
    pub async fn evaluate(&self, experiment_id: ExperimentId) -> Result<Evaluation> {
        let experiment = self.load(experiment_id).await?;
        match experiment.status {
            ExperimentStatus::Running => {}
            ExperimentStatus::Completed => {
                return Err(Error::AlreadyCompleted(experiment_id.to_string()))
            }
            other => {
                return Err(Error::State {
                    entity: "experiment".into(),
                    from: other.to_string(),
                    to: "evaluating".into(),
                })
            }
        }

        let samples = self.store.list_samples(experiment_id).await?;
        self.evaluate_samples(&experiment, &samples)
    }

    /// Freeze a running experiment: pick the winner (control unless a
    /// variant is significantly better) and mark it completed.
    pub async fn complete(&self, experiment_id: ExperimentId) -> Result<Experiment> {
        let mut experiment = self.load(experiment_id).await?;
        match experiment.status {
            ExperimentStatus::Running => {}
            ExperimentStatus::Completed => {
                return Err(Error::AlreadyCompleted(experiment_id.to_string()))
            }
            other => {
                return Err(Error::State {
                    entity: "experiment".into(),
                    from: other.to_string(),
                    to: ExperimentStatus::Completed.to_string(),
                })
            }
        }

        let samples = self.store.list_samples(experiment_id).await?;
        let evaluation = self.evaluate_samples(&experiment, &samples)?;

        let arms = experiment.arms();
        let winner_arm = if evaluation.decided {
            evaluation.leader.unwrap_or(0)
        } else {
            0
        };
        experiment.winner = Some(arms[winner_arm]);
        experiment.status = ExperimentStatus::Completed;
        experiment.ended_at = Some(Utc::now());
        self.store.save_experiment(&experiment).await?;
        info!(
            id = %experiment.id,
            winner_arm,
            decided = evaluation.decided,
            "experiment completed"
        );
        Ok(experiment)
    }

    /// Cancel a running experiment. Terminal; collected samples remain for
    /// audit but the experiment decides nothing.
    pub async fn cancel(&self, experiment_id: ExperimentId) -> Result<Experiment> {
        let mut experiment = self.load(experiment_id).await?;
        match experiment.status {
            ExperimentStatus::Running => {}
            ExperimentStatus::Completed => {
                return Err(Error::AlreadyCompleted(experiment_id.to_string()))
            }
            other => {
                return Err(Error::State {
                    entity: "experiment".into(),
                    from: other.to_string(),
                    to: ExperimentStatus::Cancelled.to_string(),
                })
            }
        }

        experiment.status = ExperimentStatus::Cancelled;
        experiment.ended_at = Some(Utc::now());
        self.store.save_experiment(&experiment).await?;
        info!(id = %experiment.id, "experiment cancelled");
        Ok(experiment)
    }

    fn evaluate_samples(
        &self,
        experiment: &Experiment,
        samples: &[MetricSample],
    ) -> Result<Evaluation> {
        let metric = decision_metric(samples);
        let arms_templates = experiment.arms();

        let mut per_arm: Vec<Vec<f64>> = vec![Vec::new(); experiment.arm_count()];
        for sample in samples.iter().filter(|s| s.metric == metric) {
            if let Some(values) = per_arm.get_mut(sample.arm) {
                values.push(sample.value);
            }
        }

        let arms: Vec<ArmSummary> = per_arm
            .iter()
            .enumerate()
            .map(|(arm, values)| ArmSummary {
                arm,
                template: arms_templates[arm],
                count: values.len() as u64,
                mean: stats::mean(values),
                variance: stats::variance(values),
            })
            .collect();

        let binary = per_arm
            .iter()
            .flatten()
            .all(|v| *v == 0.0 || *v == 1.0);
        let significance = experiment.significance_level();

        let control = &per_arm[0];
        let mut variants = Vec::new();
        for arm in 1..experiment.arm_count() {
            let treatment = &per_arm[arm];
            let result = if binary {
                two_proportion_test(
                    control.iter().filter(|v| **v == 1.0).count() as u64,
                    control.len() as u64,
                    treatment.iter().filter(|v| **v == 1.0).count() as u64,
                    treatment.len() as u64,
                )
            } else {
                welch_t_test(control, treatment)
            };
            variants.push(VariantResult {
                arm,
                p_value: result.p_value,
                effect_size: result.effect_size,
                significant: result.p_value < significance,
            });
        }

        // Leader: the variant with the largest positive effect.
        let leader = variants
            .iter()
            .filter(|v| v.effect_size > 0.0)
            .max_by(|a, b| {
                a.effect_size
                    .partial_cmp(&b.effect_size)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|v| v.arm);

        let decided = leader
            .map(|arm| {
                let variant = &variants[arm - 1];
                let enough = arms[arm].count >= experiment.min_sample_size
                    && arms[0].count >= experiment.min_sample_size;
                variant.significant && enough
            })
            .unwrap_or(false);

        Ok(Evaluation {
            experiment: experiment.id,
            metric,
            arms,
            variants,
            decided,
            leader,
        })
    }

    async fn load(&self, id: ExperimentId) -> Result<Experiment> {
        self.store
            .load_experiment(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("experiment {id}")))
    }
}

/// The metric carrying the most samples decides the experiment; name order
/// breaks ties so the choice is reproducible.
fn decision_metric(samples: &[MetricSample]) -> String {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for sample in samples {
        *counts.entry(sample.metric.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(a.0)))
        .map(|(name, _)| name.to_string())
        .unwrap_or_else(|| "success".to_string())
}

/// Map a subject hash onto the cumulative split boundaries.
fn bucket_for(split: &[f64], hash: u64) -> usize {
    let point = hash as f64 / (u64::MAX as f64 + 1.0);
    let mut cumulative = 0.0;
    for (arm, fraction) in split.iter().enumerate() {
        cumulative += fraction;
        if point < cumulative {
            return arm;
        }
    }
    split.len() - 1
}

/// FNV-1a: stable across processes, unlike the std hasher.
fn fnv1a64(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in s.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
