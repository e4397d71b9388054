//! JSON file storage backend.
//!
//! Stores each entity as a JSON file under a root directory (one
//! subdirectory per kind). Assignments and metric samples are grouped per
//! experiment; a write mutex keeps their read-modify-write cycles atomic,
//! which is what the insert-if-absent contract needs on a filesystem.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use promptforge_core::{
    Assignment, AssignmentId, ContextDescriptor, Experiment, ExperimentId, MetricSample,
    OptimizationRun, Result, RunId, TemplateVersion, TemplateVersionId, UsageId, UsageRecord,
};
use tokio::fs;
use tokio::sync::Mutex;

use crate::Store;

const KINDS: &[&str] = &[
    "templates",
    "usages",
    "contexts",
    "experiments",
    "assignments",
    "samples",
    "runs",
];

/// File-based JSON storage backend.
pub struct JsonStore {
    root: PathBuf,
    // Guards read-modify-write of the per-experiment group files.
    group_write: Mutex<()>,
}

impl JsonStore {
    /// Create storage rooted at `root`, creating the per-kind directories.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for kind in KINDS {
            fs::create_dir_all(root.join(kind)).await?;
        }
        Ok(Self {
            root,
            group_write: Mutex::new(()),
        })
    }

    fn template_path(&self, id: TemplateVersionId) -> PathBuf {
        self.root.join("templates").join(format!("{}.json", id))
    }

    fn usage_path(&self, id: UsageId) -> PathBuf {
        self.root.join("usages").join(format!("{}.json", id))
    }

    fn context_path(&self, id: promptforge_core::ContextId) -> PathBuf {
        self.root.join("contexts").join(format!("{}.json", id))
    }

    fn experiment_path(&self, id: ExperimentId) -> PathBuf {
        self.root.join("experiments").join(format!("{}.json", id))
    }

    fn assignments_path(&self, experiment: ExperimentId) -> PathBuf {
        self.root.join("assignments").join(format!("{}.json", experiment))
    }

    fn samples_path(&self, experiment: ExperimentId) -> PathBuf {
        self.root.join("samples").join(format!("{}.json", experiment))
    }

    fn run_path(&self, id: RunId) -> PathBuf {
        self.root.join("runs").join(format!("{}.json", id))
    }

    async fn write_json<T: serde::Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        fs::write(path, json.as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for JsonStore {
    async fn save_template(&self, version: &TemplateVersion) -> Result<()> {
        self.write_json(&self.template_path(version.id), version).await
    }

    async fn load_template(&self, id: TemplateVersionId) -> Result<Option<TemplateVersion>> {
        read_json(&self.template_path(id)).await
    }

    async fn list_versions(&self, name: &str) -> Result<Vec<TemplateVersion>> {
        let all: Vec<TemplateVersion> = list_dir(&self.root.join("templates")).await?;
        Ok(all.into_iter().filter(|v| v.name == name).collect())
    }

    async fn list_templates(&self) -> Result<Vec<TemplateVersion>> {
        list_dir(&self.root.join("templates")).await
    }

    async fn save_usage(&self, record: &UsageRecord) -> Result<()> {
        self.write_json(&self.usage_path(record.id), record).await
    }

    async fn load_usage(&self, id: UsageId) -> Result<Option<UsageRecord>> {
        read_json(&self.usage_path(id)).await
    }

    async fn list_usages(&self, version: TemplateVersionId) -> Result<Vec<UsageRecord>> {
        let all: Vec<UsageRecord> = list_dir(&self.root.join("usages")).await?;
        Ok(all
            .into_iter()
            .filter(|u| u.template_version == version)
            .collect())
    }

    async fn save_context(&self, descriptor: &ContextDescriptor) -> Result<()> {
        self.write_json(&self.context_path(descriptor.id), descriptor)
            .await
    }

    async fn list_contexts(&self, context_type: &str) -> Result<Vec<ContextDescriptor>> {
        let all: Vec<ContextDescriptor> = list_dir(&self.root.join("contexts")).await?;
        Ok(all
            .into_iter()
            .filter(|c| c.context_type == context_type)
            .collect())
    }

    async fn save_experiment(&self, experiment: &Experiment) -> Result<()> {
        self.write_json(&self.experiment_path(experiment.id), experiment)
            .await
    }

    async fn load_experiment(&self, id: ExperimentId) -> Result<Option<Experiment>> {
        read_json(&self.experiment_path(id)).await
    }

    async fn find_experiment(&self, name: &str) -> Result<Option<Experiment>> {
        let all: Vec<Experiment> = list_dir(&self.root.join("experiments")).await?;
        Ok(all.into_iter().find(|e| e.name == name))
    }

    async fn insert_assignment(&self, assignment: Assignment) -> Result<Assignment> {
        let _guard = self.group_write.lock().await;

        let path = self.assignments_path(assignment.experiment);
        let mut table: HashMap<String, Assignment> =
            read_json(&path).await?.unwrap_or_default();

        if let Some(existing) = table.get(&assignment.subject) {
            return Ok(existing.clone());
        }
        table.insert(assignment.subject.clone(), assignment.clone());
        self.write_json(&path, &table).await?;
        Ok(assignment)
    }

    async fn load_assignment(&self, id: AssignmentId) -> Result<Option<Assignment>> {
        // Assignments are grouped per experiment; scan the group files.
        let tables: Vec<HashMap<String, Assignment>> =
            list_dir(&self.root.join("assignments")).await?;
        for table in tables {
            if let Some(found) = table.into_values().find(|a| a.id == id) {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    async fn append_sample(&self, sample: &MetricSample) -> Result<()> {
        let _guard = self.group_write.lock().await;

        let path = self.samples_path(sample.experiment);
        let mut samples: Vec<MetricSample> = read_json(&path).await?.unwrap_or_default();
        samples.push(sample.clone());
        self.write_json(&path, &samples).await
    }

    async fn list_samples(&self, experiment: ExperimentId) -> Result<Vec<MetricSample>> {
        Ok(read_json(&self.samples_path(experiment))
            .await?
            .unwrap_or_default())
    }

    async fn save_run(&self, run: &OptimizationRun) -> Result<()> {
        self.write_json(&self.run_path(run.id), run).await
    }

    async fn load_run(&self, id: RunId) -> Result<Option<OptimizationRun>> {
        read_json(&self.run_path(id)).await
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        if let Ok(Some(item)) = read_json(&entry.path()).await {
            items.push(item);
        }
    }
    Ok(items)
}
