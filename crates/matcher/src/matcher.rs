//! Template selection.
//!
//! `select` consults the declared context descriptors first, then falls
//! back to the best templates of the category (the context type doubles as
//! the category key). Scoring is deterministic: identical inputs produce
//! an identical ranking.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use promptforge_core::{
    ContextDescriptor, Error, MatchKind, Result, ScoringConfig, TemplateVersion,
    TemplateVersionId,
};
use promptforge_storage::Store;
use regex::Regex;
use tracing::{debug, warn};

/// A ranked selection candidate.
#[derive(Debug, Clone)]
pub struct Match {
    /// The candidate template version
    pub template: TemplateVersion,
    /// Blended selection confidence (0-1)
    pub confidence: f64,
}

/// Ranks candidate templates for a given situation.
pub struct ContextMatcher {
    store: Arc<dyn Store>,
    config: ScoringConfig,
}

impl ContextMatcher {
    /// Create a matcher with default scoring weights.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_config(store, ScoringConfig::default())
    }

    /// Create a matcher with explicit weights.
    pub fn with_config(store: Arc<dyn Store>, config: ScoringConfig) -> Self {
        Self { store, config }
    }

    /// Rank up to `k` usable templates for the context.
    ///
    /// Descriptor recommendations come first; the remainder is filled from
    /// the category's templates by effectiveness. `NotFound` only when the
    /// category has no usable template at all.
    pub async fn select(
        &self,
        context_type: &str,
        payload: &serde_json::Value,
        k: usize,
    ) -> Result<Vec<Match>> {
        // Latest usable version per name.
        let usable: HashMap<String, TemplateVersion> = self
            .store
            .list_templates()
            .await?
            .into_iter()
            .filter(|v| v.is_latest && v.status.is_usable())
            .map(|v| (v.name.clone(), v))
            .collect();

        let mut descriptors = self.store.list_contexts(context_type).await?;
        descriptors.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

        let mut candidates: HashMap<TemplateVersionId, Match> = HashMap::new();
        for descriptor in &descriptors {
            let accuracy = match_accuracy(descriptor, payload);
            for name in [&descriptor.recommended, &descriptor.fallback]
                .into_iter()
                .flatten()
            {
                if let Some(template) = usable.get(name) {
                    let confidence = self.config.confidence(
                        template.success_rate,
                        template.avg_rating,
                        accuracy,
                    );
                    candidates
                        .entry(template.id)
                        .and_modify(|m| m.confidence = m.confidence.max(confidence))
                        .or_insert_with(|| Match {
                            template: template.clone(),
                            confidence,
                        });
                }
            }
        }

        // Category fallback: every usable template of the category, scored
        // with zero context accuracy, fills out the ranking.
        for template in usable.values() {
            if template.category != context_type || candidates.contains_key(&template.id) {
                continue;
            }
            let confidence =
                self.config
                    .confidence(template.success_rate, template.avg_rating, 0.0);
            candidates.insert(
                template.id,
                Match {
                    template: template.clone(),
                    confidence,
                },
            );
        }

        if candidates.is_empty() {
            return Err(Error::NotFound(format!(
                "no usable template for context '{context_type}'"
            )));
        }

        let mut ranked: Vec<Match> = candidates.into_values().collect();
        ranked.sort_by(compare_matches);
        ranked.truncate(k);
        debug!(context_type, results = ranked.len(), "selection ranked");
        Ok(ranked)
    }
}

/// Total order: confidence desc, usage_count desc, last_used desc (missing
/// last), then name asc so equal candidates still rank reproducibly.
fn compare_matches(a: &Match, b: &Match) -> Ordering {
    b.confidence
        .partial_cmp(&a.confidence)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.template.usage_count.cmp(&a.template.usage_count))
        .then_with(|| b.template.last_used.cmp(&a.template.last_used))
        .then_with(|| a.template.name.cmp(&b.template.name))
}

/// Weighted fraction of a descriptor's rules satisfied by the payload.
/// Deterministic: same descriptor and payload, same value. Descriptors
/// without rules fall back to their recorded accuracy figure.
fn match_accuracy(descriptor: &ContextDescriptor, payload: &serde_json::Value) -> f64 {
    if descriptor.rules.is_empty() {
        return descriptor.match_accuracy.clamp(0.0, 1.0);
    }

    let total: f64 = descriptor.rules.iter().map(|r| r.weight.max(0.0)).sum();
    if total <= 0.0 {
        return 0.0;
    }

    let matched: f64 = descriptor
        .rules
        .iter()
        .filter(|rule| rule_matches(rule, payload))
        .map(|r| r.weight.max(0.0))
        .sum();
    matched / total
}

fn rule_matches(rule: &promptforge_core::MatchRule, payload: &serde_json::Value) -> bool {
    let Some(field) = payload.get(&rule.field) else {
        return false;
    };
    let text = match field.as_str() {
        Some(s) => s.to_string(),
        None => field.to_string(),
    };

    match &rule.kind {
        MatchKind::Equals(value) => text == *value,
        MatchKind::Contains(value) => text.contains(value.as_str()),
        MatchKind::Pattern(pattern) => match Regex::new(pattern) {
            Ok(re) => re.is_match(&text),
            Err(e) => {
                warn!(pattern, error = %e, "invalid match pattern; treating as no match");
                false
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptforge_core::{MatchRule, TemplateMetadata, TemplateStatus};
    use promptforge_storage::MemoryStore;
    use serde_json::json;

    async fn seed(
        store: &Arc<dyn Store>,
        name: &str,
        category: &str,
        success_rate: f64,
        usage_count: u64,
    ) -> TemplateVersion {
        let mut v = TemplateVersion::first(
            name,
            "content",
            TemplateMetadata {
                engine: "simple".into(),
                category: category.into(),
                variables: vec![],
            },
        );
        v.status = TemplateStatus::Active;
        v.success_rate = success_rate;
        v.usage_count = usage_count;
        v.effectiveness = success_rate;
        store.save_template(&v).await.unwrap();
        v
    }

    #[tokio::test]
    async fn test_descriptor_recommendation_ranks_first() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        seed(&store, "generic", "review", 90.0, 10).await;
        seed(&store, "special", "review", 50.0, 5).await;

        let descriptor = ContextDescriptor::new("review")
            .with_rule(MatchRule::equals("language", "rust", 1.0))
            .with_recommended("special");
        store.save_context(&descriptor).await.unwrap();

        let matcher = ContextMatcher::new(store);
        let payload = json!({"language": "rust"});
        let ranked = matcher.select("review", &payload, 5).await.unwrap();

        // special: 0.4*0.5 + 0.3*1.0 = 0.5; generic: 0.4*0.9 = 0.36
        assert_eq!(ranked[0].template.name, "special");
        assert_eq!(ranked[1].template.name, "generic");
        assert!(ranked[0].confidence > ranked[1].confidence);
    }

    #[tokio::test]
    async fn test_selection_is_reproducible() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        for name in ["a", "b", "c", "d"] {
            seed(&store, name, "chat", 70.0, 3).await;
        }

        let matcher = ContextMatcher::new(store);
        let payload = json!({});
        let first: Vec<String> = matcher
            .select("chat", &payload, 5)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.template.name)
            .collect();
        let second: Vec<String> = matcher
            .select("chat", &payload, 5)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.template.name)
            .collect();

        assert_eq!(first, second);
        // Identical stats: names break the tie alphabetically.
        assert_eq!(first, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_ties_break_on_usage_count() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        seed(&store, "young", "chat", 70.0, 2).await;
        seed(&store, "veteran", "chat", 70.0, 200).await;

        let matcher = ContextMatcher::new(store);
        let ranked = matcher.select("chat", &json!({}), 5).await.unwrap();
        assert_eq!(ranked[0].template.name, "veteran");
    }

    #[tokio::test]
    async fn test_k_truncates() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        for name in ["a", "b", "c", "d", "e", "f"] {
            seed(&store, name, "chat", 50.0, 1).await;
        }
        let matcher = ContextMatcher::new(store);
        let ranked = matcher.select("chat", &json!({}), 2).await.unwrap();
        assert_eq!(ranked.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_category_is_not_found() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let matcher = ContextMatcher::new(store);
        let err = matcher.select("void", &json!({}), 5).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_draft_templates_are_not_selectable() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let v = TemplateVersion::first(
            "draft_only",
            "content",
            TemplateMetadata {
                engine: "simple".into(),
                category: "chat".into(),
                variables: vec![],
            },
        );
        store.save_template(&v).await.unwrap();

        let matcher = ContextMatcher::new(store);
        assert!(matcher.select("chat", &json!({}), 5).await.is_err());
    }

    #[test]
    fn test_match_accuracy_weighted_rules() {
        let descriptor = ContextDescriptor::new("review")
            .with_rule(MatchRule::equals("language", "rust", 3.0))
            .with_rule(MatchRule::contains("path", "src/", 1.0))
            .with_rule(MatchRule::pattern("branch", "^feature/", 1.0));

        let payload = json!({"language": "rust", "path": "docs/readme", "branch": "feature/x"});
        let accuracy = match_accuracy(&descriptor, &payload);
        // equals (3.0) + pattern (1.0) out of 5.0
        assert!((accuracy - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_match_accuracy_without_rules_uses_recorded_figure() {
        let mut descriptor = ContextDescriptor::new("review");
        descriptor.match_accuracy = 0.65;
        assert_eq!(match_accuracy(&descriptor, &json!({})), 0.65);
    }
}
