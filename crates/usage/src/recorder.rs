//! Usage recorder.
//!
//! `begin` renders and opens a record; `complete` writes the terminal
//! fields and schedules an asynchronous effectiveness recompute for the
//! owning template. The recompute never blocks the caller; failures are
//! logged and retried with backoff, and the usage record itself is never
//! dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use promptforge_core::{
    Error, Feedback, QualityScores, Result, TemplateVersionId, UsageId, UsageMetrics,
    UsageRecord, UsageStatus,
};
use promptforge_registry::Renderer;
use promptforge_storage::Store;
use tracing::{debug, error, warn};

use crate::EffectivenessCalculator;

/// Result of beginning a usage: the id to report against plus the
/// rendered prompt text.
#[derive(Debug, Clone)]
pub struct RenderedUsage {
    /// Usage record id
    pub usage_id: UsageId,
    /// Rendered prompt text
    pub prompt_text: String,
}

/// Retry schedule for the asynchronous recompute.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts before giving up
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

/// Records template invocations and their outcomes.
pub struct UsageRecorder {
    store: Arc<dyn Store>,
    renderer: Arc<dyn Renderer>,
    calculator: Arc<EffectivenessCalculator>,
    retry: RetryPolicy,
}

impl UsageRecorder {
    /// Create a recorder.
    pub fn new(
        store: Arc<dyn Store>,
        renderer: Arc<dyn Renderer>,
        calculator: Arc<EffectivenessCalculator>,
    ) -> Self {
        Self {
            store,
            renderer,
            calculator,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the recompute retry schedule.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Validate variables, render the prompt and open a usage record.
    pub async fn begin(
        &self,
        version: TemplateVersionId,
        context_type: &str,
        vars: HashMap<String, String>,
    ) -> Result<RenderedUsage> {
        let template = self
            .store
            .load_template(version)
            .await?
            .ok_or_else(|| Error::NotFound(format!("template version {version}")))?;

        let prompt_text = self.renderer.render(&template, &vars)?;

        let record = UsageRecord::open(
            version,
            template.name.clone(),
            context_type,
            vars,
            prompt_text.clone(),
        );
        self.store.save_usage(&record).await?;
        debug!(usage = %record.id, template = %template.name, "usage opened");

        Ok(RenderedUsage {
            usage_id: record.id,
            prompt_text,
        })
    }

    /// Write the terminal fields of a usage and schedule the owning
    /// template's effectiveness recompute (fire-and-forget).
    pub async fn complete(
        &self,
        usage_id: UsageId,
        response: String,
        success: bool,
        mut metrics: UsageMetrics,
    ) -> Result<()> {
        let mut record = self.load(usage_id).await?;
        if record.is_complete() {
            return Err(Error::State {
                entity: "usage".into(),
                from: "complete".into(),
                to: "complete".into(),
            });
        }

        // Re-clamp quality sub-scores; callers may bypass the constructor.
        metrics.quality = metrics
            .quality
            .map(|q| QualityScores::new(q.relevance, q.coherence, q.completeness, q.overall));

        record.response = Some(response);
        record.success = Some(success);
        record.metrics = Some(metrics);
        record.status = UsageStatus::Complete;
        record.completed_at = Some(chrono::Utc::now());
        self.store.save_usage(&record).await?;
        debug!(usage = %usage_id, success, "usage completed");

        self.schedule_recompute(record.template_version);
        Ok(())
    }

    /// Attach feedback to a completed usage. Never reopens the record.
    pub async fn attach_feedback(
        &self,
        usage_id: UsageId,
        rating: u8,
        notes: String,
    ) -> Result<()> {
        if !(1..=5).contains(&rating) {
            return Err(Error::Validation(format!(
                "rating must be 1..=5, got {rating}"
            )));
        }

        let mut record = self.load(usage_id).await?;
        if !record.is_complete() {
            return Err(Error::State {
                entity: "usage".into(),
                from: "open".into(),
                to: "feedback".into(),
            });
        }

        record.feedback = Some(Feedback {
            rating,
            notes,
            created_at: chrono::Utc::now(),
        });
        self.store.save_usage(&record).await?;

        // Ratings feed avg_rating, so refresh the template stats too.
        self.schedule_recompute(record.template_version);
        Ok(())
    }

    async fn load(&self, usage_id: UsageId) -> Result<UsageRecord> {
        self.store
            .load_usage(usage_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("usage {usage_id}")))
    }

    fn schedule_recompute(&self, version: TemplateVersionId) {
        let calculator = self.calculator.clone();
        let retry = self.retry;
        tokio::spawn(async move {
            let mut delay = retry.base_delay;
            for attempt in 1..=retry.max_attempts {
                match calculator.recompute(version).await {
                    Ok(_) => return,
                    Err(e) if attempt < retry.max_attempts => {
                        warn!(version = %version, attempt, error = %e, "recompute failed; retrying");
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                    Err(e) => {
                        error!(version = %version, error = %e, "recompute failed after retries");
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptforge_core::{TemplateMetadata, VariableSpec};
    use promptforge_registry::{SimpleRenderer, TemplateRepository};
    use promptforge_storage::MemoryStore;

    struct Fixture {
        store: Arc<dyn Store>,
        recorder: UsageRecorder,
        calculator: Arc<EffectivenessCalculator>,
        version: TemplateVersionId,
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let repo = TemplateRepository::new(store.clone());
        let meta = TemplateMetadata {
            engine: "simple".into(),
            category: "review".into(),
            variables: vec![VariableSpec::required("code", "Code to review")],
        };
        let version = repo
            .propose("code_review", "Review this:\n{{code}}", meta)
            .await
            .unwrap();

        let calculator = Arc::new(EffectivenessCalculator::new(store.clone()));
        let recorder = UsageRecorder::new(
            store.clone(),
            Arc::new(SimpleRenderer),
            calculator.clone(),
        );
        Fixture {
            store,
            recorder,
            calculator,
            version: version.id,
        }
    }

    fn vars() -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("code".to_string(), "fn main() {}".to_string());
        m
    }

    #[tokio::test]
    async fn test_begin_renders_and_opens() {
        let fx = fixture().await;
        let rendered = fx.recorder.begin(fx.version, "chat", vars()).await.unwrap();
        assert_eq!(rendered.prompt_text, "Review this:\nfn main() {}");

        let record = fx.store.load_usage(rendered.usage_id).await.unwrap().unwrap();
        assert_eq!(record.status, UsageStatus::Open);
        assert_eq!(record.context_type, "chat");
    }

    #[tokio::test]
    async fn test_begin_rejects_missing_required_variable() {
        let fx = fixture().await;
        let err = fx
            .recorder
            .begin(fx.version, "chat", HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingVariable { .. }));
    }

    #[tokio::test]
    async fn test_begin_unknown_version() {
        let fx = fixture().await;
        let err = fx
            .recorder
            .begin(TemplateVersionId::new(), "chat", vars())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_complete_is_terminal() {
        let fx = fixture().await;
        let rendered = fx.recorder.begin(fx.version, "chat", vars()).await.unwrap();

        fx.recorder
            .complete(rendered.usage_id, "done".into(), true, UsageMetrics::default())
            .await
            .unwrap();

        let err = fx
            .recorder
            .complete(rendered.usage_id, "again".into(), false, UsageMetrics::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::State { .. }));
    }

    #[tokio::test]
    async fn test_complete_triggers_async_recompute() {
        let fx = fixture().await;
        let rendered = fx.recorder.begin(fx.version, "chat", vars()).await.unwrap();
        fx.recorder
            .complete(rendered.usage_id, "ok".into(), true, UsageMetrics::default())
            .await
            .unwrap();

        // The recompute is fire-and-forget; poll until it lands.
        for _ in 0..100 {
            let t = fx.store.load_template(fx.version).await.unwrap().unwrap();
            if t.usage_count == 1 {
                assert_eq!(t.success_rate, 100.0);
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("recompute never materialized");
    }

    #[tokio::test]
    async fn test_feedback_requires_completion() {
        let fx = fixture().await;
        let rendered = fx.recorder.begin(fx.version, "chat", vars()).await.unwrap();

        let err = fx
            .recorder
            .attach_feedback(rendered.usage_id, 5, "great".into())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::State { .. }));

        fx.recorder
            .complete(rendered.usage_id, "ok".into(), true, UsageMetrics::default())
            .await
            .unwrap();
        fx.recorder
            .attach_feedback(rendered.usage_id, 4, "good".into())
            .await
            .unwrap();

        // Feedback did not reopen the record.
        let record = fx.store.load_usage(rendered.usage_id).await.unwrap().unwrap();
        assert!(record.is_complete());
        assert_eq!(record.feedback.as_ref().unwrap().rating, 4);

        let _ = fx.calculator.recompute(fx.version).await.unwrap();
    }

    #[tokio::test]
    async fn test_feedback_rating_bounds() {
        let fx = fixture().await;
        let rendered = fx.recorder.begin(fx.version, "chat", vars()).await.unwrap();
        fx.recorder
            .complete(rendered.usage_id, "ok".into(), true, UsageMetrics::default())
            .await
            .unwrap();

        for bad in [0u8, 6] {
            let err = fx
                .recorder
                .attach_feedback(rendered.usage_id, bad, String::new())
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        }
    }
}
