//! Effectiveness scoring.
//!
//! Aggregates completed usages into per-template statistics. Recomputes
//! are idempotent (same inputs, same output) and serialize per template
//! id; different templates never contend.

use std::sync::Arc;

use chrono::{Duration, Utc};
use promptforge_core::{Error, Result, ScoringConfig, TemplateVersion, TemplateVersionId, UsageRecord};
use promptforge_storage::{KeyedLocks, Store};
use tracing::debug;

/// Aggregates usage and feedback into a per-template effectiveness score.
pub struct EffectivenessCalculator {
    store: Arc<dyn Store>,
    locks: KeyedLocks,
    config: ScoringConfig,
}

impl EffectivenessCalculator {
    /// Create a calculator with default scoring weights.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_config(store, ScoringConfig::default())
    }

    /// Create a calculator with explicit weights.
    pub fn with_config(store: Arc<dyn Store>, config: ScoringConfig) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
            config,
        }
    }

    /// Recompute and persist the statistics of one template version.
    ///
    /// Single-writer per template id: concurrent recomputes of the same
    /// version serialize, so no update is lost.
    pub async fn recompute(&self, version: TemplateVersionId) -> Result<TemplateVersion> {
        let _guard = self.locks.acquire(&version.to_string()).await;

        let mut template = self
            .store
            .load_template(version)
            .await?
            .ok_or_else(|| Error::NotFound(format!("template version {version}")))?;

        let usages = self.store.list_usages(version).await?;
        let stats = Stats::from_usages(&usages);

        template.usage_count = stats.completed;
        template.success_rate = stats.success_rate;
        template.avg_quality = stats.avg_quality;
        template.avg_rating = stats.avg_rating;
        template.last_used = stats.last_used;
        template.effectiveness = self
            .config
            .effectiveness(stats.success_rate, stats.avg_quality);

        self.store.save_template(&template).await?;
        debug!(
            version = %version,
            effectiveness = template.effectiveness,
            completed = stats.completed,
            "recomputed effectiveness"
        );
        Ok(template)
    }

    /// Success rate over a trailing window of days, for trend queries.
    /// Returns `None` when the window holds no completed usages. Nothing
    /// is persisted.
    pub async fn windowed_success_rate(
        &self,
        version: TemplateVersionId,
        days: i64,
    ) -> Result<Option<f64>> {
        let cutoff = Utc::now() - Duration::days(days);
        let usages = self.store.list_usages(version).await?;
        let windowed: Vec<UsageRecord> = usages
            .into_iter()
            .filter(|u| u.completed_at.map(|t| t >= cutoff).unwrap_or(false))
            .collect();

        let stats = Stats::from_usages(&windowed);
        if stats.completed == 0 {
            return Ok(None);
        }
        Ok(Some(stats.success_rate))
    }
}

struct Stats {
    completed: u64,
    success_rate: f64,
    avg_quality: f64,
    avg_rating: f64,
    last_used: Option<promptforge_core::Time>,
}

impl Stats {
    fn from_usages(usages: &[UsageRecord]) -> Self {
        let completed: Vec<&UsageRecord> = usages.iter().filter(|u| u.is_complete()).collect();

        let total = completed.len() as u64;
        let successes = completed
            .iter()
            .filter(|u| u.success == Some(true))
            .count() as f64;
        let success_rate = if total > 0 {
            successes / total as f64 * 100.0
        } else {
            0.0
        };

        let qualities: Vec<f64> = completed
            .iter()
            .filter_map(|u| u.metrics.as_ref().and_then(|m| m.quality))
            .map(|q| q.overall)
            .collect();
        let avg_quality = mean(&qualities);

        let ratings: Vec<f64> = completed
            .iter()
            .filter_map(|u| u.feedback.as_ref())
            .map(|f| f.rating as f64)
            .collect();
        let avg_rating = mean(&ratings);

        let last_used = completed.iter().filter_map(|u| u.completed_at).max();

        Self {
            completed: total,
            success_rate,
            avg_quality,
            avg_rating,
            last_used,
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
