//! Tiered loop-termination policy.
//!
//! A session completes when a score tier is met at its minimum loop, when
//! the hard iteration ceiling is reached, or when the stagnation analyzer
//! reports that further iterations are not making progress. Evaluation is a
//! pure function of `(score, loop, stagnation)`.

use serde::{Deserialize, Serialize};

use crate::stagnation::ProgressAnalysis;
use crate::types::{CompletionReason, CompletionStatus, IterationRecord, Severity};

/// One `(score, minimum loop)` completion rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionTier {
    /// Score required to complete under this tier
    pub min_score: f64,
    /// Loop at which this tier becomes applicable
    pub min_loop: u32,
}

impl CompletionTier {
    pub const fn new(min_score: f64, min_loop: u32) -> Self {
        Self {
            min_score,
            min_loop,
        }
    }
}

/// Completion tiers and ceilings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionConfig {
    /// Tiers ordered strictest-first; later tiers relax the bar as loops
    /// accumulate
    pub tiers: Vec<CompletionTier>,
    /// Global iteration ceiling; completion is forced here regardless of
    /// score, and session `maxCycles` never raises it
    pub hard_stop: u32,
    /// Loop before which stagnation never terminates a session
    pub stagnation_start_loop: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            tiers: vec![
                CompletionTier::new(95.0, 10),
                CompletionTier::new(90.0, 15),
                CompletionTier::new(85.0, 20),
            ],
            hard_stop: 25,
            stagnation_start_loop: 10,
        }
    }
}

impl CompletionConfig {
    /// The score threshold applicable at loop `l`: the most relaxed tier
    /// whose minimum loop has been reached, deferring to the strictest tier
    /// before any tier applies.
    pub fn threshold_at(&self, l: u32) -> f64 {
        let mut applicable: Option<f64> = None;
        for tier in &self.tiers {
            if tier.min_loop <= l {
                applicable = Some(match applicable {
                    Some(current) => current.min(tier.min_score),
                    None => tier.min_score,
                });
            }
        }
        applicable.unwrap_or_else(|| self.tiers.first().map(|t| t.min_score).unwrap_or(100.0))
    }
}

/// Summary attached when a session terminates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminationResult {
    /// Fraction of iterations whose score decreased versus the prior one
    pub failure_rate: f64,
    /// Critical issues lifted from the most recent reviews
    pub critical_issues: Vec<String>,
}

/// Evaluates the tiered termination policy.
#[derive(Debug, Clone, Default)]
pub struct CompletionEvaluator {
    config: CompletionConfig,
}

impl CompletionEvaluator {
    pub fn new(config: CompletionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompletionConfig {
        &self.config
    }

    /// Evaluate `(score, loop, stagnation)` into a completion decision.
    ///
    /// Deterministic: identical inputs always yield the identical decision.
    pub fn evaluate(
        &self,
        score: f64,
        current_loop: u32,
        stagnation: Option<&ProgressAnalysis>,
    ) -> CompletionStatus {
        if current_loop >= self.config.hard_stop {
            return CompletionStatus::complete(
                CompletionReason::MaxLoops,
                format!(
                    "Hard stop: {} iterations reached without a passing score",
                    self.config.hard_stop
                ),
            );
        }

        if let Some(analysis) = stagnation {
            if analysis.is_stagnant && current_loop >= self.config.stagnation_start_loop {
                return CompletionStatus::complete(
                    CompletionReason::Stagnation,
                    analysis.describe(),
                );
            }
        }

        let threshold = self.config.threshold_at(current_loop);
        if score >= threshold {
            return CompletionStatus::complete(
                CompletionReason::Score,
                format!(
                    "Score {:.0} met the threshold of {:.0} at loop {}",
                    score, threshold, current_loop
                ),
            );
        }

        CompletionStatus::in_progress(format!(
            "Score {:.0} below the applicable threshold of {:.0} at loop {}; \
             continue iterating",
            score, threshold, current_loop
        ))
    }

    /// Build the termination summary over a session's history.
    pub fn terminate(&self, history: &[IterationRecord]) -> TerminationResult {
        let declines = history
            .windows(2)
            .filter(|pair| pair[1].score < pair[0].score)
            .count();
        let failure_rate = if history.len() > 1 {
            declines as f64 / (history.len() - 1) as f64
        } else {
            0.0
        };

        // Critical issues from the most recent reviews.
        let critical_issues: Vec<String> = history
            .iter()
            .rev()
            .take(3)
            .flat_map(|record| record.review.evidence_table.entries.iter())
            .filter(|entry| entry.severity == Severity::Critical)
            .map(|entry| entry.issue.clone())
            .collect();

        TerminationResult {
            failure_rate,
            critical_issues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StructuredReview;

    fn evaluator() -> CompletionEvaluator {
        CompletionEvaluator::default()
    }

    #[test]
    fn test_threshold_schedule() {
        let config = CompletionConfig::default();
        assert_eq!(config.threshold_at(0), 95.0);
        assert_eq!(config.threshold_at(9), 95.0);
        assert_eq!(config.threshold_at(10), 95.0);
        assert_eq!(config.threshold_at(15), 90.0);
        assert_eq!(config.threshold_at(20), 85.0);
        assert_eq!(config.threshold_at(24), 85.0);
    }

    #[test]
    fn test_tier1_boundary_at_loop_ten() {
        let done = evaluator().evaluate(95.0, 10, None);
        assert!(done.is_complete);
        assert_eq!(done.reason, Some(CompletionReason::Score));

        let open = evaluator().evaluate(94.0, 10, None);
        assert!(!open.is_complete);
        assert!(open.next_thought_needed);
    }

    #[test]
    fn test_early_completion_defers_to_strictest_tier() {
        // A 95+ score completes even before loop 10.
        let done = evaluator().evaluate(97.0, 3, None);
        assert!(done.is_complete);
        assert_eq!(done.reason, Some(CompletionReason::Score));

        // 90 at loop 3 does not: tier 2 is not yet applicable.
        let open = evaluator().evaluate(90.0, 3, None);
        assert!(!open.is_complete);
    }

    #[test]
    fn test_relaxed_tiers_apply_later() {
        assert!(evaluator().evaluate(90.0, 15, None).is_complete);
        assert!(!evaluator().evaluate(89.0, 15, None).is_complete);
        assert!(evaluator().evaluate(85.0, 20, None).is_complete);
    }

    #[test]
    fn test_hard_stop_forces_completion() {
        let done = evaluator().evaluate(10.0, 25, None);
        assert!(done.is_complete);
        assert_eq!(done.reason, Some(CompletionReason::MaxLoops));
        assert!(!done.next_thought_needed);
    }

    #[test]
    fn test_stagnation_completes_after_start_loop() {
        let analysis = ProgressAnalysis::stagnant_for_test(0.97);

        let done = evaluator().evaluate(70.0, 12, Some(&analysis));
        assert!(done.is_complete);
        assert_eq!(done.reason, Some(CompletionReason::Stagnation));

        // Before the start loop stagnation is ignored.
        let open = evaluator().evaluate(70.0, 8, Some(&analysis));
        assert!(!open.is_complete);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let a = evaluator().evaluate(88.0, 17, None);
        let b = evaluator().evaluate(88.0, 17, None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_failure_rate_counts_declines() {
        let scores = [50.0, 60.0, 55.0, 70.0, 65.0];
        let history: Vec<IterationRecord> = scores
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let mut review = StructuredReview::fallback("r", i as u32 + 1);
                review.overall_score = *s;
                IterationRecord::new(i as u32 + 1, format!("hash{}", i), review)
            })
            .collect();

        let result = evaluator().terminate(&history);
        // Two declines over four transitions.
        assert!((result.failure_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_termination_on_short_history() {
        let result = evaluator().terminate(&[]);
        assert_eq!(result.failure_rate, 0.0);
        assert!(result.critical_issues.is_empty());
    }
}
