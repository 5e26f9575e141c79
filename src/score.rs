//! Weighted score roll-up and verdict assignment.
//!
//! A pure function from per-dimension evaluations to `(overall score,
//! verdict)`: identical inputs always produce identical outputs. Rubric
//! weights are validated once at construction.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{validate_dimensions, QualityDimension};
use crate::error::Result;
use crate::judge::DimensionEvaluation;
use crate::types::{DimensionScore, ReviewWarning, Severity, Verdict, WarningCode};

/// Overall score below which the verdict is `reject`.
pub const REJECT_THRESHOLD: f64 = 60.0;

/// Default ship threshold.
pub const DEFAULT_SHIP_THRESHOLD: f64 = 85.0;

/// The weighted roll-up of one review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredReview {
    /// Weighted overall score, rounded to the nearest integer value
    pub overall_score: f64,
    /// Verdict under the ship rule
    pub verdict: Verdict,
    /// Per-dimension scores after clamping, in rubric order
    pub dimensions: Vec<DimensionScore>,
    /// Clamp warnings and rubric mismatches
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ReviewWarning>,
}

/// Rolls dimensional evaluations up into an overall score and verdict.
pub struct ScoreAssembler {
    rubric: Vec<QualityDimension>,
    ship_threshold: f64,
}

impl ScoreAssembler {
    /// Create an assembler over a validated rubric.
    pub fn new(rubric: Vec<QualityDimension>, ship_threshold: f64) -> Result<Self> {
        validate_dimensions(&rubric)?;
        Ok(Self {
            rubric,
            ship_threshold: ship_threshold.clamp(0.0, 100.0),
        })
    }

    /// The rubric this assembler scores against.
    pub fn rubric(&self) -> &[QualityDimension] {
        &self.rubric
    }

    /// Roll up evaluations into `(overall score, verdict)`.
    ///
    /// Scores outside 0..=100 are clamped with a `ScoreClamped` warning.
    /// The overall score is normalized over the weights of the dimensions
    /// actually evaluated, so a judge that skips a dimension does not drag
    /// the average down; a skipped `required` dimension still blocks `pass`.
    pub fn assemble(
        &self,
        evaluations: &[DimensionEvaluation],
        has_critical_issues: bool,
    ) -> ScoredReview {
        self.assemble_with_threshold(evaluations, has_critical_issues, self.ship_threshold)
    }

    /// Roll up with a per-session ship threshold (sessions can raise or
    /// lower the bar via inline configuration).
    pub fn assemble_with_threshold(
        &self,
        evaluations: &[DimensionEvaluation],
        has_critical_issues: bool,
        ship_threshold: f64,
    ) -> ScoredReview {
        let mut warnings = Vec::new();
        let mut dimensions = Vec::new();
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        let mut required_met = true;

        for dim in &self.rubric {
            let eval = evaluations.iter().find(|e| e.dimension_id == dim.id);
            match eval {
                Some(eval) => {
                    let score = clamp_score(eval.score, &dim.id, &mut warnings);
                    weighted_sum += dim.weight * score;
                    weight_total += dim.weight;
                    if dim.required && score < dim.min_threshold {
                        required_met = false;
                    }
                    dimensions.push(DimensionScore::new(dim.name.clone(), score));
                }
                None if dim.required => {
                    // A required dimension the judge never scored cannot be
                    // assumed to meet its threshold.
                    required_met = false;
                    warnings.push(ReviewWarning::new(
                        WarningCode::ScoreClamped,
                        format!("required dimension '{}' was not evaluated", dim.id),
                    ));
                }
                None => {}
            }
        }

        for eval in evaluations {
            if !self.rubric.iter().any(|d| d.id == eval.dimension_id) {
                warnings.push(ReviewWarning::new(
                    WarningCode::ScoreClamped,
                    format!("evaluation for unknown dimension '{}' ignored", eval.dimension_id),
                ));
            }
        }

        let overall_score = if weight_total > 0.0 {
            (weighted_sum / weight_total).round()
        } else {
            0.0
        };

        let critical = has_critical_issues
            || evaluations
                .iter()
                .flat_map(|e| e.findings.iter())
                .any(|f| f.severity == Severity::Critical);

        let verdict = if overall_score >= ship_threshold.clamp(0.0, 100.0) && !critical && required_met {
            Verdict::Pass
        } else if overall_score < REJECT_THRESHOLD {
            Verdict::Reject
        } else {
            Verdict::Revise
        };

        if !warnings.is_empty() {
            warn!(count = warnings.len(), "score assembly produced warnings");
        }

        ScoredReview {
            overall_score,
            verdict,
            dimensions,
            warnings,
        }
    }
}

fn clamp_score(score: f64, dimension_id: &str, warnings: &mut Vec<ReviewWarning>) -> f64 {
    if (0.0..=100.0).contains(&score) {
        return score;
    }
    let clamped = score.clamp(0.0, 100.0);
    warnings.push(ReviewWarning::new(
        WarningCode::ScoreClamped,
        format!(
            "dimension '{}' score {} clamped to {}",
            dimension_id, score, clamped
        ),
    ));
    clamped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_dimensions;
    use crate::judge::Finding;
    use proptest::prelude::*;

    fn assembler() -> ScoreAssembler {
        ScoreAssembler::new(default_dimensions(), DEFAULT_SHIP_THRESHOLD).unwrap()
    }

    fn evals(score: f64) -> Vec<DimensionEvaluation> {
        default_dimensions()
            .iter()
            .map(|d| DimensionEvaluation::new(d.id.clone(), score))
            .collect()
    }

    #[test]
    fn test_uniform_scores_roll_up_exactly() {
        let scored = assembler().assemble(&evals(70.0), false);
        assert_eq!(scored.overall_score, 70.0);
        assert_eq!(scored.verdict, Verdict::Revise);
        assert_eq!(scored.dimensions.len(), default_dimensions().len());
    }

    #[test]
    fn test_pass_requires_threshold_and_no_criticals() {
        let scored = assembler().assemble(&evals(96.0), false);
        assert_eq!(scored.verdict, Verdict::Pass);

        let scored = assembler().assemble(&evals(96.0), true);
        assert_eq!(scored.verdict, Verdict::Revise);
    }

    #[test]
    fn test_critical_finding_in_evaluations_blocks_pass() {
        let mut evaluations = evals(96.0);
        evaluations[0]
            .findings
            .push(Finding::new(Severity::Critical, "logic", "src/a.rs:1", "broken"));
        let scored = assembler().assemble(&evaluations, false);
        assert_eq!(scored.verdict, Verdict::Revise);
    }

    #[test]
    fn test_reject_below_sixty() {
        let scored = assembler().assemble(&evals(55.0), false);
        assert_eq!(scored.verdict, Verdict::Reject);

        let scored = assembler().assemble(&evals(60.0), false);
        assert_eq!(scored.verdict, Verdict::Revise);
    }

    #[test]
    fn test_required_dimension_below_min_blocks_pass() {
        let mut evaluations = evals(96.0);
        // correctness requires >= 60
        evaluations[0].score = 50.0;
        let scored = assembler().assemble(&evaluations, false);
        assert_ne!(scored.verdict, Verdict::Pass);
    }

    #[test]
    fn test_missing_required_dimension_blocks_pass() {
        let evaluations: Vec<_> = evals(96.0)
            .into_iter()
            .filter(|e| e.dimension_id != "correctness")
            .collect();
        let scored = assembler().assemble(&evaluations, false);
        assert_ne!(scored.verdict, Verdict::Pass);
        assert!(!scored.warnings.is_empty());
    }

    #[test]
    fn test_out_of_range_scores_clamped_with_warning() {
        let mut evaluations = evals(80.0);
        evaluations[0].score = 140.0;
        evaluations[1].score = -10.0;
        let scored = assembler().assemble(&evaluations, false);
        assert_eq!(scored.warnings.len(), 2);
        assert!(scored.dimensions.iter().all(|d| (0.0..=100.0).contains(&d.score)));
    }

    #[test]
    fn test_unknown_dimension_ignored_with_warning() {
        let mut evaluations = evals(80.0);
        evaluations.push(DimensionEvaluation::new("vibes", 100.0));
        let scored = assembler().assemble(&evaluations, false);
        assert_eq!(scored.overall_score, 80.0);
        assert!(scored
            .warnings
            .iter()
            .any(|w| w.message.contains("vibes")));
    }

    #[test]
    fn test_empty_evaluations_score_zero() {
        let scored = assembler().assemble(&[], false);
        assert_eq!(scored.overall_score, 0.0);
        assert_eq!(scored.verdict, Verdict::Reject);
    }

    proptest! {
        #[test]
        fn prop_assembly_is_deterministic(scores in proptest::collection::vec(-50.0f64..150.0, 6)) {
            let rubric = default_dimensions();
            let evaluations: Vec<_> = rubric
                .iter()
                .zip(scores.iter())
                .map(|(d, s)| DimensionEvaluation::new(d.id.clone(), *s))
                .collect();

            let a = assembler().assemble(&evaluations, false);
            let b = assembler().assemble(&evaluations, false);
            prop_assert_eq!(a, b);
        }

        #[test]
        fn prop_overall_score_in_range(scores in proptest::collection::vec(-50.0f64..150.0, 6)) {
            let rubric = default_dimensions();
            let evaluations: Vec<_> = rubric
                .iter()
                .zip(scores.iter())
                .map(|(d, s)| DimensionEvaluation::new(d.id.clone(), *s))
                .collect();

            let scored = assembler().assemble(&evaluations, false);
            prop_assert!((0.0..=100.0).contains(&scored.overall_score));
        }
    }
}
