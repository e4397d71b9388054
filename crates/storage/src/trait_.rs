//! Storage trait abstraction.

use async_trait::async_trait;
use promptforge_core::{
    Assignment, AssignmentId, ContextDescriptor, Experiment, ExperimentId, MetricSample,
    OptimizationRun, Result, RunId, TemplateVersion, TemplateVersionId, UsageId, UsageRecord,
};

/// Storage abstraction for engine data.
///
/// Methods take `&self`; implementations use interior mutability so that
/// independent callers never serialize through a single writer lock.
/// Append-only collections (usages, metric samples, run history) must
/// never overwrite prior entries.
#[async_trait]
pub trait Store: Send + Sync {
    // === Template versions ===

    /// Save a template version (create or update).
    async fn save_template(&self, version: &TemplateVersion) -> Result<()>;

    /// Load a template version by id.
    async fn load_template(&self, id: TemplateVersionId) -> Result<Option<TemplateVersion>>;

    /// List every version of a template name, any order.
    async fn list_versions(&self, name: &str) -> Result<Vec<TemplateVersion>>;

    /// List all template versions across all names.
    async fn list_templates(&self) -> Result<Vec<TemplateVersion>>;

    // === Usage records ===

    /// Save a usage record (create or update).
    async fn save_usage(&self, record: &UsageRecord) -> Result<()>;

    /// Load a usage record by id.
    async fn load_usage(&self, id: UsageId) -> Result<Option<UsageRecord>>;

    /// List usage records for a template version.
    async fn list_usages(&self, version: TemplateVersionId) -> Result<Vec<UsageRecord>>;

    // === Context descriptors ===

    /// Save a context descriptor.
    async fn save_context(&self, descriptor: &ContextDescriptor) -> Result<()>;

    /// List descriptors declared for a context type.
    async fn list_contexts(&self, context_type: &str) -> Result<Vec<ContextDescriptor>>;

    // === Experiments ===

    /// Save an experiment (create or update).
    async fn save_experiment(&self, experiment: &Experiment) -> Result<()>;

    /// Load an experiment by id.
    async fn load_experiment(&self, id: ExperimentId) -> Result<Option<Experiment>>;

    /// Find an experiment by its natural-key name.
    async fn find_experiment(&self, name: &str) -> Result<Option<Experiment>>;

    /// Insert an assignment unless the (experiment, subject) pair already
    /// has one; returns the winning assignment either way. Must be atomic
    /// under simultaneous first-touch.
    async fn insert_assignment(&self, assignment: Assignment) -> Result<Assignment>;

    /// Load an assignment by id.
    async fn load_assignment(&self, id: AssignmentId) -> Result<Option<Assignment>>;

    /// Append a metric sample. Samples are never edited or removed.
    async fn append_sample(&self, sample: &MetricSample) -> Result<()>;

    /// List all metric samples recorded for an experiment.
    async fn list_samples(&self, experiment: ExperimentId) -> Result<Vec<MetricSample>>;

    // === Optimization runs ===

    /// Save an optimization run (create or update).
    async fn save_run(&self, run: &OptimizationRun) -> Result<()>;

    /// Load an optimization run by id.
    async fn load_run(&self, id: RunId) -> Result<Option<OptimizationRun>>;
}
