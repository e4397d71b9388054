//! Engine facade.
//!
//! [`PromptService`] wires the repository, recorder, matcher, experiment
//! engine and optimizer over one shared storage backend and exposes the
//! whole lifecycle behind a single type. Embedders and the CLI construct
//! this instead of assembling the components by hand.

#![warn(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;

use promptforge_core::{
    AssignmentId, ContextDescriptor, Experiment, ExperimentId, OptimizationRun, Result,
    ScoringConfig, TemplateMetadata, TemplateVersion, TemplateVersionId, UsageId, UsageMetrics,
};
use promptforge_evolve::{
    CancelFlag, FitnessEvaluator, MutationOperator, Optimizer, OptimizerConfig, SeededMutation,
};
use promptforge_experiment::{Evaluation, ExperimentEngine};
use promptforge_matcher::{ContextMatcher, Match};
use promptforge_registry::{SimpleRenderer, TemplateRepository};
use promptforge_storage::Store;
use promptforge_usage::{EffectivenessCalculator, RenderedUsage, UsageRecorder};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Facade-level configuration, shared by every component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Weights for effectiveness and selection confidence
    #[serde(default)]
    pub scoring: ScoringConfig,
}

/// One handle over the whole prompt lifecycle: versioning, rendering,
/// usage recording, selection, experiments and optimization.
pub struct PromptService {
    store: Arc<dyn Store>,
    repository: Arc<TemplateRepository>,
    recorder: UsageRecorder,
    calculator: Arc<EffectivenessCalculator>,
    matcher: ContextMatcher,
    experiments: ExperimentEngine,
}

impl PromptService {
    /// Assemble the service over a storage backend with default scoring.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_config(store, ServiceConfig::default())
    }

    /// Assemble the service with explicit configuration.
    pub fn with_config(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let repository = Arc::new(TemplateRepository::new(store.clone()));
        let calculator = Arc::new(EffectivenessCalculator::with_config(
            store.clone(),
            config.scoring,
        ));
        let recorder = UsageRecorder::new(store.clone(), Arc::new(SimpleRenderer), calculator.clone());
        let matcher = ContextMatcher::with_config(store.clone(), config.scoring);
        let experiments = ExperimentEngine::new(store.clone());
        Self {
            store,
            repository,
            recorder,
            calculator,
            matcher,
            experiments,
        }
    }

    /// The shared storage backend.
    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// The template repository, for callers that need version plumbing
    /// beyond the facade methods.
    pub fn repository(&self) -> Arc<TemplateRepository> {
        self.repository.clone()
    }

    // --- Template lifecycle ---

    /// Propose content for a template name. Identical content is a no-op
    /// returning the existing version.
    pub async fn propose_template(
        &self,
        name: &str,
        content: &str,
        meta: TemplateMetadata,
    ) -> Result<TemplateVersion> {
        self.repository.propose(name, content, meta).await
    }

    /// Advance a version one lifecycle step (draft to testing, testing to
    /// active).
    pub async fn promote_template(&self, id: TemplateVersionId) -> Result<TemplateVersion> {
        self.repository.promote(id).await
    }

    /// Deprecate an active version.
    pub async fn deprecate_template(&self, id: TemplateVersionId) -> Result<TemplateVersion> {
        self.repository.deprecate(id).await
    }

    /// Archive a deprecated version.
    pub async fn archive_template(&self, id: TemplateVersionId) -> Result<TemplateVersion> {
        self.repository.archive(id).await
    }

    /// Latest active version of a name.
    pub async fn latest_template(&self, name: &str) -> Result<TemplateVersion> {
        self.repository.get_latest(name).await
    }

    /// A specific version snapshot of a name.
    pub async fn template_version(&self, name: &str, version: u32) -> Result<TemplateVersion> {
        self.repository.get_version(name, version).await
    }

    /// Every stored version, across names.
    pub async fn list_templates(&self) -> Result<Vec<TemplateVersion>> {
        self.store.list_templates().await
    }

    /// All versions of one name, oldest first.
    pub async fn list_versions(&self, name: &str) -> Result<Vec<TemplateVersion>> {
        let mut versions = self.store.list_versions(name).await?;
        versions.sort_by_key(|v| v.version);
        Ok(versions)
    }

    // --- Context matching ---

    /// Register or update a context descriptor.
    pub async fn register_context(&self, descriptor: &ContextDescriptor) -> Result<()> {
        self.store.save_context(descriptor).await
    }

    /// Rank up to `k` usable templates for a context.
    pub async fn select_template(
        &self,
        context_type: &str,
        payload: &serde_json::Value,
        k: usize,
    ) -> Result<Vec<Match>> {
        self.matcher.select(context_type, payload, k).await
    }

    /// The end-to-end hot path: pick the best template for the context,
    /// render it with the given variables, and open a usage record.
    pub async fn select_and_render(
        &self,
        context_type: &str,
        payload: &serde_json::Value,
        vars: HashMap<String, String>,
    ) -> Result<RenderedUsage> {
        let ranked = self.matcher.select(context_type, payload, 1).await?;
        let best = &ranked[0].template;
        info!(
            context_type,
            template = %best.name,
            version = best.version,
            confidence = ranked[0].confidence,
            "selected template"
        );
        self.recorder.begin(best.id, context_type, vars).await
    }

    // --- Usage recording ---

    /// Render a specific version and open a usage record for it.
    pub async fn begin_usage(
        &self,
        version: TemplateVersionId,
        context_type: &str,
        vars: HashMap<String, String>,
    ) -> Result<RenderedUsage> {
        self.recorder.begin(version, context_type, vars).await
    }

    /// Close a usage with its outcome. Schedules the owning template's
    /// effectiveness recompute in the background.
    pub async fn complete_usage(
        &self,
        usage_id: UsageId,
        response: String,
        success: bool,
        metrics: UsageMetrics,
    ) -> Result<()> {
        self.recorder
            .complete(usage_id, response, success, metrics)
            .await
    }

    /// Attach a 1-5 rating and notes to a completed usage.
    pub async fn submit_feedback(
        &self,
        usage_id: UsageId,
        rating: u8,
        notes: String,
    ) -> Result<()> {
        self.recorder.attach_feedback(usage_id, rating, notes).await
    }

    /// Recompute a template's statistics synchronously and return the
    /// refreshed version.
    pub async fn refresh_effectiveness(
        &self,
        version: TemplateVersionId,
    ) -> Result<TemplateVersion> {
        self.calculator.recompute(version).await
    }

    /// Success rate over a trailing window of days, if the window holds
    /// any completed usage.
    pub async fn windowed_success_rate(
        &self,
        version: TemplateVersionId,
        days: i64,
    ) -> Result<Option<f64>> {
        self.calculator.windowed_success_rate(version, days).await
    }

    // --- Experiments ---

    /// Start an A/B experiment between a base version and its variants.
    /// Idempotent on the name.
    pub async fn start_experiment(
        &self,
        name: &str,
        base: TemplateVersionId,
        variants: Vec<TemplateVersionId>,
        split: Vec<f64>,
        min_sample_size: u64,
        confidence_level: f64,
    ) -> Result<Experiment> {
        self.experiments
            .start(name, base, variants, split, min_sample_size, confidence_level)
            .await
    }

    /// Sticky, deterministic arm assignment for a subject.
    pub async fn assign_subject(
        &self,
        experiment: ExperimentId,
        subject: &str,
    ) -> Result<promptforge_core::Assignment> {
        self.experiments.assign(experiment, subject).await
    }

    /// Append one observed metric value for an assignment.
    pub async fn record_outcome(
        &self,
        assignment: AssignmentId,
        metric: &str,
        value: f64,
    ) -> Result<()> {
        self.experiments.record_outcome(assignment, metric, value).await
    }

    /// Per-arm statistics and significance tests for a running experiment.
    pub async fn evaluate_experiment(&self, experiment: ExperimentId) -> Result<Evaluation> {
        self.experiments.evaluate(experiment).await
    }

    /// Freeze a running experiment and pick the winner.
    pub async fn complete_experiment(&self, experiment: ExperimentId) -> Result<Experiment> {
        self.experiments.complete(experiment).await
    }

    /// Cancel a running experiment without deciding anything.
    pub async fn cancel_experiment(&self, experiment: ExperimentId) -> Result<Experiment> {
        self.experiments.cancel(experiment).await
    }

    // --- Optimization ---

    /// Run evolutionary optimization from a base version with the default
    /// seeded mutation operator. The winner, if any, lands in the
    /// repository as a draft.
    pub async fn optimize(
        &self,
        base: TemplateVersionId,
        evaluator: Arc<dyn FitnessEvaluator>,
        config: OptimizerConfig,
    ) -> Result<OptimizationRun> {
        let operator = Arc::new(SeededMutation::new(config.seed));
        self.optimize_with(base, operator, evaluator, config, CancelFlag::new())
            .await
    }

    /// Run optimization with an explicit operator and cancellation flag.
    pub async fn optimize_with(
        &self,
        base: TemplateVersionId,
        operator: Arc<dyn MutationOperator>,
        evaluator: Arc<dyn FitnessEvaluator>,
        config: OptimizerConfig,
        cancel: CancelFlag,
    ) -> Result<OptimizationRun> {
        let optimizer = Optimizer::new(
            self.store.clone(),
            self.repository.clone(),
            operator,
            evaluator,
            config,
        );
        optimizer.run_with(base, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptforge_core::{
        ExperimentStatus, MatchRule, QualityScores, RunStatus, TemplateStatus, VariableSpec,
    };
    use promptforge_evolve::FitnessFn;
    use promptforge_storage::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    fn service() -> PromptService {
        PromptService::new(Arc::new(MemoryStore::new()))
    }

    fn review_meta() -> TemplateMetadata {
        TemplateMetadata {
            engine: "simple".into(),
            category: "review".into(),
            variables: vec![VariableSpec::required("code", "Code under review")],
        }
    }

    async fn activate(svc: &PromptService, id: TemplateVersionId) -> TemplateVersion {
        let v = svc.promote_template(id).await.unwrap();
        svc.promote_template(v.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_full_lifecycle_round_trip() {
        let svc = service();

        // Propose and activate.
        let v1 = svc
            .propose_template("code_review", "Review:\n{{code}}", review_meta())
            .await
            .unwrap();
        assert_eq!(v1.status, TemplateStatus::Draft);
        let v1 = activate(&svc, v1.id).await;
        assert_eq!(v1.status, TemplateStatus::Active);

        // Register a context pointing at the template.
        let descriptor = ContextDescriptor::new("review")
            .with_rule(MatchRule::equals("language", "rust", 1.0))
            .with_recommended("code_review");
        svc.register_context(&descriptor).await.unwrap();

        // Select, render, record.
        let mut vars = HashMap::new();
        vars.insert("code".to_string(), "fn f() {}".to_string());
        let rendered = svc
            .select_and_render("review", &json!({"language": "rust"}), vars)
            .await
            .unwrap();
        assert_eq!(rendered.prompt_text, "Review:\nfn f() {}");

        // Close the loop with outcome and feedback.
        let metrics = UsageMetrics {
            quality: Some(QualityScores::new(0.9, 0.9, 0.9, 0.9)),
            ..Default::default()
        };
        svc.complete_usage(rendered.usage_id, "looks fine".into(), true, metrics)
            .await
            .unwrap();
        svc.submit_feedback(rendered.usage_id, 5, "useful".into())
            .await
            .unwrap();

        // The background recompute lands eventually; force one to be sure.
        let refreshed = svc.refresh_effectiveness(v1.id).await.unwrap();
        assert_eq!(refreshed.usage_count, 1);
        assert_eq!(refreshed.success_rate, 100.0);
        assert!(refreshed.effectiveness > 0.0);
        assert_eq!(refreshed.avg_rating, 5.0);
    }

    #[tokio::test]
    async fn test_experiment_round_trip() {
        let svc = service();

        let v1 = svc
            .propose_template("greet", "Hello {{code}}", review_meta())
            .await
            .unwrap();
        let v1 = activate(&svc, v1.id).await;
        let v2 = svc
            .propose_template("greet", "Hi there {{code}}", review_meta())
            .await
            .unwrap();

        let exp = svc
            .start_experiment("greet-tone", v1.id, vec![v2.id], vec![0.5, 0.5], 3, 0.95)
            .await
            .unwrap();
        assert_eq!(exp.status, ExperimentStatus::Running);

        // Deterministic sticky assignment.
        let first = svc.assign_subject(exp.id, "subject-7").await.unwrap();
        let again = svc.assign_subject(exp.id, "subject-7").await.unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(first.arm, again.arm);

        // Feed a clear separation: control fails, variant succeeds.
        for i in 0..100 {
            let assignment = svc
                .assign_subject(exp.id, &format!("subject-{i}"))
                .await
                .unwrap();
            let value = if assignment.arm == 0 { 0.0 } else { 1.0 };
            svc.record_outcome(assignment.id, "success", value)
                .await
                .unwrap();
        }

        let evaluation = svc.evaluate_experiment(exp.id).await.unwrap();
        assert_eq!(evaluation.metric, "success");
        assert_eq!(evaluation.arms.len(), 2);

        let done = svc.complete_experiment(exp.id).await.unwrap();
        assert_eq!(done.status, ExperimentStatus::Completed);
        assert!(done.winner.is_some());

        // Completed experiments are frozen.
        assert!(svc.evaluate_experiment(exp.id).await.is_err());
        assert!(svc.assign_subject(exp.id, "late").await.is_err());
    }

    #[tokio::test]
    async fn test_winning_variant_outperforms_base() {
        let svc = service();

        // Base: 8/10 successful at quality 0.8, effectiveness lands at 80.
        let v1 = svc
            .propose_template("code_review", "Review:\n{{code}}", review_meta())
            .await
            .unwrap();
        let v1 = activate(&svc, v1.id).await;
        record_usages(&svc, v1.id, 10, 8, 0.8).await;
        let v1 = svc.refresh_effectiveness(v1.id).await.unwrap();
        assert!((v1.effectiveness - 80.0).abs() < 1e-9);

        // Challenger runs at a true 95% success rate.
        let v2 = svc
            .propose_template("code_review", "Review carefully:\n{{code}}", review_meta())
            .await
            .unwrap();
        record_usages(&svc, v2.id, 100, 95, 0.9).await;

        let exp = svc
            .start_experiment("review-rollout", v1.id, vec![v2.id], vec![0.5, 0.5], 30, 0.95)
            .await
            .unwrap();
        // Roughly 500 subjects per arm under the even split.
        for i in 0..1000 {
            let assignment = svc
                .assign_subject(exp.id, &format!("subject-{i}"))
                .await
                .unwrap();
            // Deterministic outcome streams per arm: 80% vs 95%.
            let success = if assignment.arm == 0 { i % 10 < 8 } else { i % 20 != 0 };
            svc.record_outcome(assignment.id, "success", if success { 1.0 } else { 0.0 })
                .await
                .unwrap();
        }

        let done = svc.complete_experiment(exp.id).await.unwrap();
        assert_eq!(done.winner, Some(v2.id), "the stronger variant must win");

        // Roll the winner out; its recomputed effectiveness beats the base.
        let v2 = activate(&svc, v2.id).await;
        let v2 = svc.refresh_effectiveness(v2.id).await.unwrap();
        assert!(v2.effectiveness > 80.0);
        assert_eq!(svc.latest_template("code_review").await.unwrap().id, v2.id);
    }

    async fn record_usages(
        svc: &PromptService,
        version: TemplateVersionId,
        total: usize,
        successes: usize,
        quality: f64,
    ) {
        for i in 0..total {
            let mut vars = HashMap::new();
            vars.insert("code".to_string(), format!("fn f{i}() {{}}"));
            let rendered = svc.begin_usage(version, "review", vars).await.unwrap();
            let metrics = UsageMetrics {
                quality: Some(QualityScores::new(quality, quality, quality, quality)),
                ..Default::default()
            };
            svc.complete_usage(rendered.usage_id, "done".into(), i < successes, metrics)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_optimize_proposes_draft() {
        let svc = service();
        let v1 = svc
            .propose_template("code_review", "Review:\n{{code}}\nBe brief.", review_meta())
            .await
            .unwrap();

        let config = OptimizerConfig {
            max_generations: 2,
            ..Default::default()
        };
        let run = svc
            .optimize(
                v1.id,
                Arc::new(FitnessFn(|content: &str| Ok(content.len() as f64))),
                config,
            )
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        let proposed = run.proposed_version.unwrap();
        let draft = svc.repository().get_by_id(proposed).await.unwrap();
        assert_eq!(draft.status, TemplateStatus::Draft);
        assert!(draft.content.contains("{{code}}"));
    }

    #[tokio::test]
    async fn test_background_recompute_lands() {
        let svc = service();
        let v1 = svc
            .propose_template("code_review", "Review:\n{{code}}", review_meta())
            .await
            .unwrap();
        let v1 = activate(&svc, v1.id).await;

        let mut vars = HashMap::new();
        vars.insert("code".to_string(), "x".to_string());
        let rendered = svc.begin_usage(v1.id, "review", vars).await.unwrap();
        svc.complete_usage(rendered.usage_id, "ok".into(), true, UsageMetrics::default())
            .await
            .unwrap();

        for _ in 0..100 {
            let t = svc.store().load_template(v1.id).await.unwrap().unwrap();
            if t.usage_count == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("background recompute never landed");
    }
}
