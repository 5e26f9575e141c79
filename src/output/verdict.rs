//! Executive verdict generation.
//!
//! Condenses a scored review into the ship/no-ship block that leads the
//! structured output: a bounded bullet summary, primary reasons, next steps,
//! and a confidence estimate.

use serde::{Deserialize, Serialize};

use crate::judge::RawReview;
use crate::score::ScoredReview;
use crate::types::{Severity, Verdict};

/// Minimum bullets in the executive summary.
pub const MIN_SUMMARY_BULLETS: usize = 3;
/// Maximum bullets in the executive summary.
pub const MAX_SUMMARY_BULLETS: usize = 6;

/// Ship/no-ship decision block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutiveVerdict {
    /// "ship" or "no-ship"
    pub decision: String,
    /// 3..=6 bullet summary of the review
    pub summary: Vec<String>,
    /// Concrete next steps, empty on a clean pass
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_steps: Vec<String>,
    /// Primary justification for the decision
    pub justification: String,
    /// Confidence in the decision, 0..=100
    pub confidence: f64,
}

impl Default for ExecutiveVerdict {
    fn default() -> Self {
        Self {
            decision: "no-ship".to_string(),
            summary: vec![
                "Review did not produce an executive summary".to_string(),
                "Treat this iteration as needing revision".to_string(),
                "Resubmit once the underlying issue is addressed".to_string(),
            ],
            next_steps: Vec::new(),
            justification: "No verdict data was available".to_string(),
            confidence: 0.0,
        }
    }
}

impl ExecutiveVerdict {
    /// Verdict block for the deterministic fallback review.
    pub fn fallback(summary: &str) -> Self {
        Self {
            decision: "no-ship".to_string(),
            summary: vec![
                summary.to_string(),
                "The judge did not produce a usable review".to_string(),
                "This score is a placeholder, not an assessment".to_string(),
            ],
            next_steps: vec!["Resubmit the artifact once the judge is reachable".to_string()],
            justification: summary.to_string(),
            confidence: 0.0,
        }
    }
}

/// Builds executive verdicts from scored reviews.
#[derive(Debug, Clone, Default)]
pub struct VerdictBuilder;

impl VerdictBuilder {
    /// Compose the verdict block.
    pub fn build(&self, scored: &ScoredReview, raw: &RawReview) -> ExecutiveVerdict {
        let ship = scored.verdict == Verdict::Pass;
        let critical = raw
            .findings()
            .filter(|f| f.severity == Severity::Critical)
            .count();
        let major = raw
            .findings()
            .filter(|f| f.severity == Severity::Major)
            .count();

        let mut summary = Vec::new();
        summary.push(format!(
            "Overall score {:.0} with verdict '{}'",
            scored.overall_score, scored.verdict
        ));
        if critical > 0 || major > 0 {
            summary.push(format!(
                "{} critical and {} major finding(s) recorded",
                critical, major
            ));
        }
        if let Some(weakest) = scored
            .dimensions
            .iter()
            .min_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
        {
            summary.push(format!(
                "Weakest dimension: {} at {:.0}",
                weakest.name, weakest.score
            ));
        }
        if !raw.summary.trim().is_empty() {
            summary.push(first_sentence(&raw.summary));
        }
        if ship {
            summary.push("No blocking issues remain".to_string());
        }

        // Clamp to the 3..=6 bullet envelope.
        while summary.len() < MIN_SUMMARY_BULLETS {
            summary.push("No further findings".to_string());
        }
        summary.truncate(MAX_SUMMARY_BULLETS);

        let next_steps: Vec<String> = if ship {
            Vec::new()
        } else {
            let mut steps: Vec<String> = raw
                .findings()
                .filter(|f| f.severity != Severity::Minor)
                .take(3)
                .map(|f| {
                    f.fix_summary
                        .clone()
                        .unwrap_or_else(|| format!("Address: {}", f.issue))
                })
                .collect();
            if steps.is_empty() {
                steps.push("Raise the weakest dimensions above their thresholds".to_string());
            }
            steps
        };

        let justification = if ship {
            format!(
                "Score {:.0} meets the ship threshold with no critical findings",
                scored.overall_score
            )
        } else if critical > 0 {
            format!("{} critical finding(s) block shipping", critical)
        } else {
            format!("Score {:.0} is below the ship threshold", scored.overall_score)
        };

        ExecutiveVerdict {
            decision: if ship { "ship" } else { "no-ship" }.to_string(),
            summary,
            next_steps,
            justification,
            confidence: confidence_for(scored, critical),
        }
    }
}

fn confidence_for(scored: &ScoredReview, critical_count: usize) -> f64 {
    // Distance from the revise band raises confidence; clamp warnings and
    // critical findings near a pass lower it.
    let distance = (scored.overall_score - 72.5).abs() / 27.5;
    let mut confidence = 60.0 + 35.0 * distance.min(1.0);
    if !scored.warnings.is_empty() {
        confidence -= 10.0;
    }
    if critical_count > 0 && scored.overall_score >= 80.0 {
        confidence -= 10.0;
    }
    confidence.clamp(0.0, 100.0)
}

fn first_sentence(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.find(['.', '\n']) {
        Some(idx) => trimmed[..idx].trim_end().to_string(),
        None => trimmed.to_string(),
    }
}
