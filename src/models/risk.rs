//! Malignancy risk scoring over the ensemble distribution.

use serde::Serialize;

/// Derived risk figure for one prediction.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RiskAssessment {
    /// Summed probability mass over the malignant class indices
    pub probability: f64,
    /// Whether the probability exceeds the configured threshold
    pub flagged: bool,
}

/// Sums distribution mass over a configured set of class indices and
/// compares it against a fixed threshold. Pure, no side effects.
#[derive(Debug, Clone)]
pub struct RiskScorer {
    indices: Vec<usize>,
    threshold: f64,
}

impl RiskScorer {
    /// Create a scorer over `indices` with the given decision threshold.
    pub fn new(indices: Vec<usize>, threshold: f64) -> Self {
        Self { indices, threshold }
    }

    /// Score one probability distribution.
    ///
    /// Indices outside the distribution are skipped rather than erroring,
    /// so a scorer configured for a larger label space degrades cleanly.
    pub fn assess(&self, probabilities: &[f64]) -> RiskAssessment {
        let probability: f64 = self
            .indices
            .iter()
            .filter_map(|&i| probabilities.get(i))
            .sum::<f64>()
            .clamp(0.0, 1.0);

        RiskAssessment {
            probability,
            flagged: probability > self.threshold,
        }
    }

    /// Configured decision threshold.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_mass_on_risk_index() {
        let scorer = RiskScorer::new(vec![0, 1], 0.9);
        let assessment = scorer.assess(&[1.0, 0.0, 0.0]);
        assert!((assessment.probability - 1.0).abs() < 1e-12);
        assert!(assessment.flagged);
    }

    #[test]
    fn test_out_of_range_indices_are_skipped() {
        let scorer = RiskScorer::new(vec![0, 10, 99], 0.5);
        let assessment = scorer.assess(&[0.2, 0.8]);
        assert!((assessment.probability - 0.2).abs() < 1e-12);
        assert!(!assessment.flagged);
    }

    #[test]
    fn test_threshold_is_strict() {
        let scorer = RiskScorer::new(vec![0], 0.5);
        assert!(!scorer.assess(&[0.5, 0.5]).flagged);
        assert!(scorer.assess(&[0.500_1, 0.499_9]).flagged);
    }

    #[test]
    fn test_empty_indices_score_zero() {
        let scorer = RiskScorer::new(Vec::new(), 0.5);
        let assessment = scorer.assess(&[0.3, 0.7]);
        assert_eq!(assessment.probability, 0.0);
        assert!(!assessment.flagged);
    }
}
