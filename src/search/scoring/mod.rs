#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::database::sqlite::ServiceRecord;
use crate::normalizer::manifest::has_accept_options;

/// Weights for the composite relevance score.
///
/// The foundation score is a data-quality heuristic over the stored record;
/// the final score blends it with query similarity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringPolicy {
    pub base: f64,
    pub description_bonus: f64,
    /// Descriptions must be strictly longer than this to earn the bonus
    pub description_min_chars: usize,
    pub origin_title_bonus: f64,
    pub accepts_bonus: f64,
    pub foundation_weight: f64,
    pub similarity_weight: f64,
}

impl Default for ScoringPolicy {
    #[inline]
    fn default() -> Self {
        Self {
            base: 0.5,
            description_bonus: 0.2,
            description_min_chars: 10,
            origin_title_bonus: 0.15,
            accepts_bonus: 0.15,
            foundation_weight: 0.5,
            similarity_weight: 0.5,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("Invalid scoring weight {name}: {value} (must be finite and non-negative)")]
pub struct InvalidWeight {
    pub name: &'static str,
    pub value: f64,
}

impl ScoringPolicy {
    #[inline]
    pub fn validate(&self) -> Result<(), InvalidWeight> {
        let weights = [
            ("base", self.base),
            ("description_bonus", self.description_bonus),
            ("origin_title_bonus", self.origin_title_bonus),
            ("accepts_bonus", self.accepts_bonus),
            ("foundation_weight", self.foundation_weight),
            ("similarity_weight", self.similarity_weight),
        ];

        match weights
            .into_iter()
            .find(|(_, value)| !value.is_finite() || *value < 0.0)
        {
            Some((name, value)) => Err(InvalidWeight { name, value }),
            None => Ok(()),
        }
    }

    /// Data-quality score of a record, capped at 1.0
    #[inline]
    pub fn foundation_score(&self, record: &ServiceRecord) -> f64 {
        let mut score = self.base;

        if record.service.description.chars().count() > self.description_min_chars {
            score += self.description_bonus;
        }

        if record.has_origin_title() {
            score += self.origin_title_bonus;
        }

        if has_accept_options(&record.service.manifest) {
            score += self.accepts_bonus;
        }

        score.min(1.0)
    }

    #[inline]
    pub fn final_score(&self, foundation: f64, similarity: f64) -> f64 {
        foundation.mul_add(self.foundation_weight, similarity * self.similarity_weight)
    }
}
