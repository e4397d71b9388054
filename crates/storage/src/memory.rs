//! In-process storage backend.

use std::collections::HashMap;

use async_trait::async_trait;
use promptforge_core::{
    Assignment, AssignmentId, ContextDescriptor, ContextId, Experiment, ExperimentId,
    MetricSample, OptimizationRun, Result, RunId, TemplateVersion, TemplateVersionId, UsageId,
    UsageRecord,
};
use tokio::sync::RwLock;

use crate::Store;

/// In-memory backend. The default for tests and embedded use.
#[derive(Default)]
pub struct MemoryStore {
    templates: RwLock<HashMap<TemplateVersionId, TemplateVersion>>,
    usages: RwLock<HashMap<UsageId, UsageRecord>>,
    contexts: RwLock<HashMap<ContextId, ContextDescriptor>>,
    experiments: RwLock<HashMap<ExperimentId, Experiment>>,
    assignments: RwLock<AssignmentTable>,
    samples: RwLock<Vec<MetricSample>>,
    runs: RwLock<HashMap<RunId, OptimizationRun>>,
}

#[derive(Default)]
struct AssignmentTable {
    by_id: HashMap<AssignmentId, Assignment>,
    by_pair: HashMap<(ExperimentId, String), AssignmentId>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_template(&self, version: &TemplateVersion) -> Result<()> {
        self.templates
            .write()
            .await
            .insert(version.id, version.clone());
        Ok(())
    }

    async fn load_template(&self, id: TemplateVersionId) -> Result<Option<TemplateVersion>> {
        Ok(self.templates.read().await.get(&id).cloned())
    }

    async fn list_versions(&self, name: &str) -> Result<Vec<TemplateVersion>> {
        Ok(self
            .templates
            .read()
            .await
            .values()
            .filter(|v| v.name == name)
            .cloned()
            .collect())
    }

    async fn list_templates(&self) -> Result<Vec<TemplateVersion>> {
        Ok(self.templates.read().await.values().cloned().collect())
    }

    async fn save_usage(&self, record: &UsageRecord) -> Result<()> {
        self.usages.write().await.insert(record.id, record.clone());
        Ok(())
    }

    async fn load_usage(&self, id: UsageId) -> Result<Option<UsageRecord>> {
        Ok(self.usages.read().await.get(&id).cloned())
    }

    async fn list_usages(&self, version: TemplateVersionId) -> Result<Vec<UsageRecord>> {
        Ok(self
            .usages
            .read()
            .await
            .values()
            .filter(|u| u.template_version == version)
            .cloned()
            .collect())
    }

    async fn save_context(&self, descriptor: &ContextDescriptor) -> Result<()> {
        self.contexts
            .write()
            .await
            .insert(descriptor.id, descriptor.clone());
        Ok(())
    }

    async fn list_contexts(&self, context_type: &str) -> Result<Vec<ContextDescriptor>> {
        Ok(self
            .contexts
            .read()
            .await
            .values()
            .filter(|c| c.context_type == context_type)
            .cloned()
            .collect())
    }

    async fn save_experiment(&self, experiment: &Experiment) -> Result<()> {
        self.experiments
            .write()
            .await
            .insert(experiment.id, experiment.clone());
        Ok(())
    }

    async fn load_experiment(&self, id: ExperimentId) -> Result<Option<Experiment>> {
        Ok(self.experiments.read().await.get(&id).cloned())
    }

    async fn find_experiment(&self, name: &str) -> Result<Option<Experiment>> {
        Ok(self
            .experiments
            .read()
            .await
            .values()
            .find(|e| e.name == name)
            .cloned())
    }

    async fn insert_assignment(&self, assignment: Assignment) -> Result<Assignment> {
        let mut table = self.assignments.write().await;
        let pair = (assignment.experiment, assignment.subject.clone());
        if let Some(existing_id) = table.by_pair.get(&pair) {
            // First writer wins; later calls observe the original bucket.
            return Ok(table.by_id[existing_id].clone());
        }
        table.by_pair.insert(pair, assignment.id);
        table.by_id.insert(assignment.id, assignment.clone());
        Ok(assignment)
    }

    async fn load_assignment(&self, id: AssignmentId) -> Result<Option<Assignment>> {
        Ok(self.assignments.read().await.by_id.get(&id).cloned())
    }

    async fn append_sample(&self, sample: &MetricSample) -> Result<()> {
        self.samples.write().await.push(sample.clone());
        Ok(())
    }

    async fn list_samples(&self, experiment: ExperimentId) -> Result<Vec<MetricSample>> {
        Ok(self
            .samples
            .read()
            .await
            .iter()
            .filter(|s| s.experiment == experiment)
            .cloned()
            .collect())
    }

    async fn save_run(&self, run: &OptimizationRun) -> Result<()> {
        self.runs.write().await.insert(run.id, run.clone());
        Ok(())
    }

    async fn load_run(&self, id: RunId) -> Result<Option<OptimizationRun>> {
        Ok(self.runs.read().await.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptforge_core::TemplateMetadata;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_template_roundtrip() {
        let store = MemoryStore::new();
        let v = TemplateVersion::first("greet", "Hello", TemplateMetadata::default());
        store.save_template(&v).await.unwrap();

        let loaded = store.load_template(v.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "greet");
        assert_eq!(store.list_versions("greet").await.unwrap().len(), 1);
        assert!(store.list_versions("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_assignment_is_idempotent() {
        let store = MemoryStore::new();
        let exp = ExperimentId::new();

        let first = store
            .insert_assignment(Assignment {
                id: AssignmentId::new(),
                experiment: exp,
                subject: "user-1".into(),
                arm: 1,
                assigned_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let second = store
            .insert_assignment(Assignment {
                id: AssignmentId::new(),
                experiment: exp,
                subject: "user-1".into(),
                arm: 0,
                assigned_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.arm, 1);
    }

    #[tokio::test]
    async fn test_insert_assignment_under_contention() {
        let store = Arc::new(MemoryStore::new());
        let exp = ExperimentId::new();

        let mut handles = Vec::new();
        for arm in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .insert_assignment(Assignment {
                        id: AssignmentId::new(),
                        experiment: exp,
                        subject: "racer".into(),
                        arm: arm % 3,
                        assigned_at: chrono::Utc::now(),
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut ids = std::collections::HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap().id);
        }
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn test_samples_append_only() {
        let store = MemoryStore::new();
        let exp = ExperimentId::new();
        let assignment = AssignmentId::new();

        for value in [1.0, 0.0, 1.0] {
            store
                .append_sample(&MetricSample {
                    assignment,
                    experiment: exp,
                    arm: 0,
                    metric: "success".into(),
                    value,
                    recorded_at: chrono::Utc::now(),
                })
                .await
                .unwrap();
        }

        let samples = store.list_samples(exp).await.unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples.iter().map(|s| s.value).sum::<f64>(), 2.0);
    }
}
