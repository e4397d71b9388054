//! Scoring configuration.
//!
//! The effectiveness weights and rating scale are tunable defaults, not
//! fixed law. Components take a [`ScoringConfig`] instead of hard-coding
//! them.

use serde::{Deserialize, Serialize};

/// Weights used when blending usage statistics into scores.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Weight of success rate in the effectiveness score
    pub success_weight: f64,

    /// Weight of average quality in the effectiveness score
    pub quality_weight: f64,

    /// Maximum feedback rating (ratings are normalized against this)
    pub rating_scale: f64,

    /// Weight of success rate in match confidence
    pub confidence_success_weight: f64,

    /// Weight of normalized rating in match confidence
    pub confidence_rating_weight: f64,

    /// Weight of context match accuracy in match confidence
    pub confidence_context_weight: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            success_weight: 0.6,
            quality_weight: 0.4,
            rating_scale: 5.0,
            confidence_success_weight: 0.4,
            confidence_rating_weight: 0.3,
            confidence_context_weight: 0.3,
        }
    }
}

impl ScoringConfig {
    /// Blend a success rate (0-100) and an average quality (0-1) into an
    /// effectiveness score on the 0-100 scale.
    pub fn effectiveness(&self, success_rate: f64, avg_quality: f64) -> f64 {
        self.success_weight * success_rate + self.quality_weight * avg_quality * 100.0
    }

    /// Blend historical stats and a context match accuracy into a selection
    /// confidence on the 0-1 scale.
    pub fn confidence(&self, success_rate: f64, avg_rating: f64, match_accuracy: f64) -> f64 {
        self.confidence_success_weight * (success_rate / 100.0)
            + self.confidence_rating_weight * (avg_rating / self.rating_scale)
            + self.confidence_context_weight * match_accuracy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_effectiveness_blend() {
        let config = ScoringConfig::default();
        // 80% success, 0.8 quality -> 0.6*80 + 0.4*80 = 80
        let score = config.effectiveness(80.0, 0.8);
        assert!((score - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_blend() {
        let config = ScoringConfig::default();
        let c = config.confidence(100.0, 5.0, 1.0);
        assert!((c - 1.0).abs() < 1e-9);
    }
}
