//! Answer confidence from the scores of the ranked sources.

use crate::config::RagConfig;
use crate::document::SearchResult;
use crate::error::{RagError, Result};

/// Turns a ranked result list into a confidence in `[0, 1]`.
pub trait ConfidenceScorer: Send + Sync {
    /// `results` are in rank order. An empty list scores 0.
    fn score(&self, results: &[SearchResult]) -> f32;
}

/// Weighted mean of the top-N final scores with geometric rank weights.
///
/// The result at rank `i` (0-based) weighs `decay^i`, so the best source
/// dominates and later ones contribute progressively less.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankDecayConfidence {
    decay: f32,
    top_n: usize,
}

impl RankDecayConfidence {
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] unless `0 < decay <= 1` and `top_n >= 1`.
    pub fn new(decay: f32, top_n: usize) -> Result<Self> {
        if !(decay > 0.0 && decay <= 1.0) {
            return Err(RagError::InvalidConfiguration(format!(
                "confidence decay must be in (0, 1], got {decay}"
            )));
        }
        if top_n == 0 {
            return Err(RagError::InvalidConfiguration(
                "confidence top_n must be at least 1".into(),
            ));
        }
        Ok(Self { decay, top_n })
    }

    /// Decay and top-N taken from `config`.
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        Self::new(config.confidence_decay, config.confidence_top_n)
    }
}

impl Default for RankDecayConfidence {
    fn default() -> Self {
        Self { decay: 0.7, top_n: 5 }
    }
}

impl ConfidenceScorer for RankDecayConfidence {
    fn score(&self, results: &[SearchResult]) -> f32 {
        let mut weighted = 0.0f32;
        let mut total = 0.0f32;
        let mut weight = 1.0f32;
        for result in results.iter().take(self.top_n) {
            weighted += weight * result.score;
            total += weight;
            weight *= self.decay;
        }
        if total == 0.0 {
            return 0.0;
        }
        let confidence = weighted / total;
        if confidence.is_nan() { 0.0 } else { confidence.clamp(0.0, 1.0) }
    }
}
