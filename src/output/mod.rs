//! Structured output assembly.
//!
//! Deterministic composition of the final review document from six
//! sub-generators (executive verdict, evidence table, proposed diffs,
//! reproduction guide, traceability matrix, follow-up tasks), each bounded
//! by a per-component deadline with a documented default-value fallback.
//! The sanitizer runs after assembly, over the composed document.

pub mod diff;
pub mod evidence;
pub mod repro;
pub mod tasks;
pub mod traceability;
pub mod verdict;

use std::time::Duration;
use tracing::warn;

use crate::judge::{RawReview, StepResult};
use crate::score::ScoredReview;
use crate::types::{QualityMetrics, ReviewWarning, Verdict, WarningCode};

use diff::{DiffBuilder, DiffConfig, ProposedDiff};
use evidence::{EvidenceBuilder, EvidenceConfig, EvidenceTable};
use repro::{ReproBuilder, ReproConfig, ReproductionGuide};
use tasks::{FollowUpTasks, TaskBuilder, TaskConfig};
use traceability::{
    AcceptanceCriterion, TraceabilityBuilder, TraceabilityConfig, TraceabilityMatrix,
};
use verdict::{ExecutiveVerdict, VerdictBuilder};

/// Assembly deadlines and sub-generator knobs.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Deadline per sub-generator
    pub component_timeout: Duration,
    /// Deadline for the whole assembly
    pub total_timeout: Duration,
    /// Run independent sub-generators concurrently
    pub parallel: bool,
    /// Evidence table knobs
    pub evidence: EvidenceConfig,
    /// Diff validation knobs
    pub diff: DiffConfig,
    /// Reproduction guide knobs
    pub repro: ReproConfig,
    /// Traceability scoring knobs
    pub traceability: TraceabilityConfig,
    /// Task list knobs
    pub tasks: TaskConfig,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            component_timeout: Duration::from_secs(10),
            total_timeout: Duration::from_secs(30),
            parallel: true,
            evidence: EvidenceConfig::default(),
            diff: DiffConfig::default(),
            repro: ReproConfig::default(),
            traceability: TraceabilityConfig::default(),
            tasks: TaskConfig::default(),
        }
    }
}

/// Everything the assembly needs for one review.
pub struct OutputInput<'a> {
    /// The weighted roll-up
    pub scored: &'a ScoredReview,
    /// The judge's raw review
    pub raw: &'a RawReview,
    /// Per-step analyzer results
    pub step_results: &'a [StepResult],
    /// Acceptance criteria extracted from the task
    pub criteria: &'a [AcceptanceCriterion],
    /// The artifact under review
    pub artifact: &'a str,
}

/// The composed sections plus assembly warnings.
#[derive(Debug, Clone, Default)]
pub struct AssembledOutput {
    pub executive_verdict: ExecutiveVerdict,
    pub evidence_table: EvidenceTable,
    pub proposed_diffs: Vec<ProposedDiff>,
    pub reproduction_guide: ReproductionGuide,
    pub traceability_matrix: TraceabilityMatrix,
    pub follow_up_tasks: FollowUpTasks,
    pub quality_metrics: QualityMetrics,
    pub warnings: Vec<ReviewWarning>,
}

/// Composes the structured review document.
pub struct StructuredOutputBuilder {
    config: OutputConfig,
    verdict: VerdictBuilder,
    evidence: EvidenceBuilder,
    diff: DiffBuilder,
    repro: ReproBuilder,
    traceability: TraceabilityBuilder,
    tasks: TaskBuilder,
}

impl StructuredOutputBuilder {
    pub fn new(config: OutputConfig) -> Self {
        Self {
            verdict: VerdictBuilder,
            evidence: EvidenceBuilder::new(config.evidence.clone()),
            diff: DiffBuilder::new(config.diff.clone()),
            repro: ReproBuilder::new(config.repro.clone()),
            traceability: TraceabilityBuilder::new(config.traceability.clone()),
            tasks: TaskBuilder::new(config.tasks.clone()),
            config,
        }
    }

    /// Assemble all sections. Each sub-generator is bounded by the
    /// per-component deadline; one missing its deadline falls back to its
    /// default value and attaches a `ComponentTimeout` warning instead of
    /// failing the audit.
    pub async fn build(&self, input: OutputInput<'_>) -> AssembledOutput {
        let deadline = self.config.component_timeout;
        let mut warnings = Vec::new();

        // Stage 1: independent sections.
        let findings: Vec<_> = input
            .raw
            .findings()
            .chain(input.step_results.iter().flat_map(|s| s.evidence.iter()))
            .collect();

        let (executive_verdict, evidence_table, proposed_diffs, traceability_matrix) = if self
            .config
            .parallel
        {
            tokio::join!(
                bounded(deadline, "executiveVerdict", async {
                    self.verdict.build(input.scored, input.raw)
                }),
                bounded(deadline, "evidenceTable", async {
                    self.evidence.build(findings.iter().copied())
                }),
                bounded(deadline, "proposedDiffs", async {
                    self.diff.build(input.raw.proposed_diff.as_deref())
                }),
                bounded(deadline, "traceabilityMatrix", async {
                    self.traceability
                        .build(input.criteria, input.artifact, &input.raw.citations)
                }),
            )
        } else {
            (
                bounded(deadline, "executiveVerdict", async {
                    self.verdict.build(input.scored, input.raw)
                })
                .await,
                bounded(deadline, "evidenceTable", async {
                    self.evidence.build(findings.iter().copied())
                })
                .await,
                bounded(deadline, "proposedDiffs", async {
                    self.diff.build(input.raw.proposed_diff.as_deref())
                })
                .await,
                bounded(deadline, "traceabilityMatrix", async {
                    self.traceability
                        .build(input.criteria, input.artifact, &input.raw.citations)
                })
                .await,
            )
        };

        let (executive_verdict, ev_warn) = executive_verdict;
        let (evidence_table, et_warn) = evidence_table;
        let (proposed_diffs, pd_warn) = proposed_diffs;
        let (traceability_matrix, tm_warn) = traceability_matrix;
        for w in [ev_warn, et_warn, pd_warn, tm_warn].into_iter().flatten() {
            warnings.push(w);
        }

        // Stage 2: sections derived from stage 1.
        let (reproduction_guide, rg_warn) = bounded(deadline, "reproductionGuide", async {
            self.repro.build(&evidence_table, &proposed_diffs)
        })
        .await;
        let (follow_up_tasks, ft_warn) = bounded(deadline, "followUpTasks", async {
            self.tasks.build(&evidence_table, &traceability_matrix)
        })
        .await;
        for w in [rg_warn, ft_warn].into_iter().flatten() {
            warnings.push(w);
        }

        let quality_metrics = quality_metrics(
            input.scored,
            &evidence_table,
            &proposed_diffs,
            &reproduction_guide,
            &follow_up_tasks,
            &warnings,
        );

        AssembledOutput {
            executive_verdict,
            evidence_table,
            proposed_diffs,
            reproduction_guide,
            traceability_matrix,
            follow_up_tasks,
            quality_metrics,
            warnings,
        }
    }
}

impl Default for StructuredOutputBuilder {
    fn default() -> Self {
        Self::new(OutputConfig::default())
    }
}

/// Run one sub-generator under its deadline, falling back to the default
/// value on expiry. Returns the value plus an optional warning.
async fn bounded<T: Default>(
    deadline: Duration,
    component: &str,
    work: impl std::future::Future<Output = T>,
) -> (T, Option<ReviewWarning>) {
    match tokio::time::timeout(deadline, work).await {
        Ok(value) => (value, None),
        Err(_) => {
            warn!(component, "output component missed its deadline, using default");
            (
                T::default(),
                Some(ReviewWarning::new(
                    WarningCode::ComponentTimeout,
                    format!("component '{}' missed its {:?} deadline", component, deadline),
                )),
            )
        }
    }
}

/// Self-assessment of the composed output, 0..=100 per metric.
fn quality_metrics(
    scored: &ScoredReview,
    evidence: &EvidenceTable,
    diffs: &[ProposedDiff],
    repro: &ReproductionGuide,
    tasks: &FollowUpTasks,
    warnings: &[ReviewWarning],
) -> QualityMetrics {
    let fallbacks = warnings
        .iter()
        .filter(|w| w.code == WarningCode::ComponentTimeout)
        .count();
    let completeness = ((6usize.saturating_sub(fallbacks)) as f64 / 6.0 * 100.0).clamp(0.0, 100.0);

    let accuracy = (100.0 - 10.0 * scored.warnings.len() as f64).clamp(0.0, 100.0);

    let passed = scored.verdict == Verdict::Pass;
    let actionability = if passed {
        90.0
    } else {
        let mut score = 40.0;
        if !diffs.is_empty() {
            score += 25.0;
        }
        if !tasks.tasks.is_empty() {
            score += 25.0;
        }
        if !repro.reproduction_steps.is_empty() {
            score += 10.0;
        }
        score
    };

    let evidence_quality = if evidence.entries.is_empty() {
        if passed {
            100.0
        } else {
            50.0
        }
    } else {
        let with_proof = evidence.entries.iter().filter(|e| !e.proof.is_empty()).count() as f64;
        let with_location = evidence
            .entries
            .iter()
            .filter(|e| !e.location.is_empty())
            .count() as f64;
        let n = evidence.entries.len() as f64;
        (with_proof / n * 50.0) + (with_location / n * 50.0)
    };

    QualityMetrics {
        completeness,
        accuracy,
        actionability,
        evidence_quality,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_dimensions;
    use crate::judge::{Citation, DimensionEvaluation, Finding, RawReview, StepResult};
    use crate::score::{ScoreAssembler, DEFAULT_SHIP_THRESHOLD};
    use crate::types::Severity;

    fn scored(score: f64) -> ScoredReview {
        let assembler = ScoreAssembler::new(default_dimensions(), DEFAULT_SHIP_THRESHOLD).unwrap();
        let evals: Vec<_> = default_dimensions()
            .iter()
            .map(|d| DimensionEvaluation::new(d.id.clone(), score))
            .collect();
        assembler.assemble(&evals, false)
    }

    fn raw_with_findings() -> RawReview {
        RawReview {
            dimensions: vec![DimensionEvaluation::new("correctness", 60.0).with_finding(
                Finding::new(Severity::Major, "logic", "src/a.rs:3", "bad bound")
                    .with_proof("loop exits early"),
            )],
            summary: "Needs work".to_string(),
            citations: vec![Citation {
                location: "src/a.rs:1".to_string(),
                excerpt: "fn a()".to_string(),
            }],
            proposed_diff: Some(
                "--- a/src/a.rs\n+++ b/src/a.rs\n@@ -1 +1 @@\n-a\n+b\n".to_string(),
            ),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_full_assembly_produces_all_sections() {
        let builder = StructuredOutputBuilder::default();
        let scored = scored(62.0);
        let raw = raw_with_findings();
        let out = builder
            .build(OutputInput {
                scored: &scored,
                raw: &raw,
                step_results: &[],
                criteria: &[],
                artifact: "fn a() {}",
            })
            .await;

        assert_eq!(out.executive_verdict.decision, "no-ship");
        assert_eq!(out.evidence_table.entries.len(), 1);
        assert_eq!(out.proposed_diffs.len(), 1);
        assert!(!out.reproduction_guide.reproduction_steps.is_empty());
        assert!(!out.follow_up_tasks.tasks.is_empty());
        assert!(out.warnings.is_empty());
        assert_eq!(out.quality_metrics.completeness, 100.0);
    }

    #[tokio::test]
    async fn test_step_evidence_feeds_table() {
        let builder = StructuredOutputBuilder::default();
        let scored = scored(62.0);
        let raw = RawReview::default();
        let step = StepResult {
            success: false,
            evidence: vec![Finding::new(
                Severity::Critical,
                "security",
                "src/auth.rs:9",
                "secret in log",
            )],
            ..Default::default()
        };
        let out = builder
            .build(OutputInput {
                scored: &scored,
                raw: &raw,
                step_results: &[step],
                criteria: &[],
                artifact: "",
            })
            .await;
        assert_eq!(out.evidence_table.entries.len(), 1);
        assert_eq!(out.evidence_table.entries[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_sequential_mode_matches_parallel() {
        let scored = scored(62.0);
        let raw = raw_with_findings();

        let parallel = StructuredOutputBuilder::default()
            .build(OutputInput {
                scored: &scored,
                raw: &raw,
                step_results: &[],
                criteria: &[],
                artifact: "fn a() {}",
            })
            .await;

        let sequential = StructuredOutputBuilder::new(OutputConfig {
            parallel: false,
            ..Default::default()
        })
        .build(OutputInput {
            scored: &scored,
            raw: &raw,
            step_results: &[],
            criteria: &[],
            artifact: "fn a() {}",
        })
        .await;

        assert_eq!(parallel.evidence_table, sequential.evidence_table);
        assert_eq!(parallel.executive_verdict, sequential.executive_verdict);
        assert_eq!(parallel.follow_up_tasks, sequential.follow_up_tasks);
    }

    #[tokio::test]
    async fn test_quality_metrics_reward_actionable_output() {
        let builder = StructuredOutputBuilder::default();
        let scored = scored(62.0);
        let raw = raw_with_findings();
        let out = builder
            .build(OutputInput {
                scored: &scored,
                raw: &raw,
                step_results: &[],
                criteria: &[],
                artifact: "",
            })
            .await;
        // Diffs, tasks, and repro steps all present.
        assert_eq!(out.quality_metrics.actionability, 100.0);
        assert_eq!(out.quality_metrics.evidence_quality, 100.0);
    }

    #[tokio::test]
    async fn test_passing_review_metrics() {
        let builder = StructuredOutputBuilder::default();
        let scored = scored(96.0);
        let raw = RawReview::default();
        let out = builder
            .build(OutputInput {
                scored: &scored,
                raw: &raw,
                step_results: &[],
                criteria: &[],
                artifact: "",
            })
            .await;
        assert_eq!(out.quality_metrics.actionability, 90.0);
        assert_eq!(out.quality_metrics.evidence_quality, 100.0);
    }
}
