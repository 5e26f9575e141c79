//! External collaborator contracts.
//!
//! The engine never reviews code itself. Three collaborator seams are
//! injected at construction:
//!
//! 1. **Judge**: maps `(artifact, context, rubric)` to a raw review. Safe to
//!    invoke concurrently; timeouts and retries are owned by the queue.
//! 2. **ContextBuilder**: produces a context pack for the session. Idempotent
//!    for identical inputs; any error degrades the audit to a placeholder
//!    context rather than failing it.
//! 3. **StepEvaluator**: one per workflow step, pure with respect to its
//!    declared inputs; evidence from step results feeds the evidence table.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::{QualityDimension, SessionConfig};
use crate::error::Result;
use crate::types::{JudgeCard, Severity};

/// Budget hints passed through to the judge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeBudget {
    /// Token ceiling for the judge call, if the backend meters tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    /// Soft deadline hint in milliseconds; the queue enforces the hard one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

/// Everything a judge needs for one review.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeRequest {
    /// What the candidate is supposed to accomplish
    pub task: String,
    /// The artifact under review
    pub candidate: String,
    /// Repository context assembled by the ContextBuilder
    pub context_pack: String,
    /// Rubric the review is scored against
    pub rubric: Vec<QualityDimension>,
    /// Budget hints
    pub budget: JudgeBudget,
}

/// A concrete finding with severity, location, and proof.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    /// Short issue statement
    pub issue: String,
    /// How bad it is
    pub severity: Severity,
    /// Finding category, e.g. "logic", "security", "testing"
    pub category: String,
    /// Where it was observed, e.g. `src/queue.rs:42`
    pub location: String,
    /// Evidence backing the finding
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub proof: String,
    /// One-line fix sketch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_summary: Option<String>,
}

impl Finding {
    pub fn new(
        severity: Severity,
        category: impl Into<String>,
        location: impl Into<String>,
        issue: impl Into<String>,
    ) -> Self {
        Self {
            issue: issue.into(),
            severity,
            category: category.into(),
            location: location.into(),
            proof: String::new(),
            fix_summary: None,
        }
    }

    pub fn with_proof(mut self, proof: impl Into<String>) -> Self {
        self.proof = proof.into();
        self
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix_summary = Some(fix.into());
        self
    }
}

/// Per-dimension evaluation inside a raw review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionEvaluation {
    /// Rubric dimension id this score belongs to
    pub dimension_id: String,
    /// Score in 0..=100 (clamped by the assembler if outside)
    pub score: f64,
    /// Findings attributed to this dimension
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
}

impl DimensionEvaluation {
    pub fn new(dimension_id: impl Into<String>, score: f64) -> Self {
        Self {
            dimension_id: dimension_id.into(),
            score,
            findings: Vec::new(),
        }
    }

    pub fn with_finding(mut self, finding: Finding) -> Self {
        self.findings.push(finding);
        self
    }
}

/// An inline comment anchored to a location in the candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineComment {
    pub location: String,
    pub comment: String,
}

/// A citation into the context pack or repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub location: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub excerpt: String,
}

/// The judge's raw output, before weighting and assembly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReview {
    /// Per-dimension evaluations
    pub dimensions: Vec<DimensionEvaluation>,
    /// Overall prose summary
    pub summary: String,
    /// Inline comments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inline_comments: Vec<InlineComment>,
    /// Citations backing the review
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
    /// Unified diff proposed by the judge, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_diff: Option<String>,
    /// Attribution for the judges consulted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub judge_cards: Vec<JudgeCard>,
}

impl RawReview {
    /// All findings across dimensions.
    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.dimensions.iter().flat_map(|d| d.findings.iter())
    }
}

/// The adversarial reviewer. Implementations must be safe to invoke
/// concurrently; the queue owns deadlines and retries.
#[async_trait]
pub trait Judge: Send + Sync {
    /// Produce a raw review for the request.
    async fn execute(&self, request: JudgeRequest) -> Result<RawReview>;
}

/// Assembles repository context for a session. Idempotent given identical
/// inputs; may return a partial pack, and any error is treated as
/// context-degraded by the orchestrator.
#[async_trait]
pub trait ContextBuilder: Send + Sync {
    async fn build(&self, config: &SessionConfig) -> Result<String>;
}

/// Workflow steps evaluated by per-step analyzers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStep {
    Init,
    Repro,
    Static,
    Tests,
    Dynamic,
    Conform,
    Trace,
    Verdict,
}

impl WorkflowStep {
    /// All steps in workflow order.
    pub fn all() -> [WorkflowStep; 8] {
        [
            Self::Init,
            Self::Repro,
            Self::Static,
            Self::Tests,
            Self::Dynamic,
            Self::Conform,
            Self::Trace,
            Self::Verdict,
        ]
    }
}

/// Input handed to a step evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepInput {
    /// Which step is being evaluated
    pub step: WorkflowStep,
    /// The artifact under review
    pub artifact: String,
    /// Context pack for the session
    pub context_pack: String,
    /// The effective session configuration
    pub session_config: SessionConfig,
}

/// Result of one step evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    /// Whether the step passed
    pub success: bool,
    /// Evidence gathered by the step
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<Finding>,
    /// Step-specific outputs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub outputs: HashMap<String, serde_json::Value>,
    /// Suggested next actions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_actions: Vec<String>,
    /// Errors encountered by the step itself
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// One per-step analyzer. Evaluators are pure with respect to their declared
/// inputs.
#[async_trait]
pub trait StepEvaluator: Send + Sync {
    /// The step this evaluator handles.
    fn step(&self) -> WorkflowStep;

    /// Evaluate the step.
    async fn evaluate(&self, input: &StepInput) -> Result<StepResult>;
}

/// A judge that returns a fixed review, for tests.
#[cfg(test)]
pub struct MockJudge {
    review: RawReview,
}

#[cfg(test)]
impl MockJudge {
    pub fn returning(review: RawReview) -> Self {
        Self { review }
    }

    /// Score every listed dimension at the given value, with no findings.
    pub fn scoring(dimension_ids: &[&str], score: f64) -> Self {
        let review = RawReview {
            dimensions: dimension_ids
                .iter()
                .map(|id| DimensionEvaluation::new(*id, score))
                .collect(),
            summary: format!("mock review scoring {}", score),
            ..Default::default()
        };
        Self::returning(review)
    }
}

#[cfg(test)]
#[async_trait]
impl Judge for MockJudge {
    async fn execute(&self, _request: JudgeRequest) -> Result<RawReview> {
        Ok(self.review.clone())
    }
}

/// A judge that always fails, for degradation tests.
#[cfg(test)]
pub struct FailingJudge;

#[cfg(test)]
#[async_trait]
impl Judge for FailingJudge {
    async fn execute(&self, _request: JudgeRequest) -> Result<RawReview> {
        Err(crate::error::Error::judge("mock judge failure"))
    }
}

/// A context builder that returns a fixed pack, for tests.
#[cfg(test)]
pub struct MockContextBuilder {
    pack: Result<String>,
}

#[cfg(test)]
impl MockContextBuilder {
    pub fn returning(pack: impl Into<String>) -> Self {
        Self {
            pack: Ok(pack.into()),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            pack: Err(crate::error::Error::context(message.into())),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl ContextBuilder for MockContextBuilder {
    async fn build(&self, _config: &SessionConfig) -> Result<String> {
        match &self.pack {
            Ok(pack) => Ok(pack.clone()),
            Err(e) => Err(crate::error::Error::context(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_judge_returns_configured_review() {
        let judge = MockJudge::scoring(&["correctness", "testing"], 80.0);
        let request = JudgeRequest {
            task: "t".into(),
            candidate: "c".into(),
            context_pack: String::new(),
            rubric: Vec::new(),
            budget: JudgeBudget::default(),
        };
        let review = judge.execute(request).await.unwrap();
        assert_eq!(review.dimensions.len(), 2);
        assert_eq!(review.dimensions[0].score, 80.0);
    }

    #[test]
    fn test_raw_review_findings_flattened() {
        let review = RawReview {
            dimensions: vec![
                DimensionEvaluation::new("a", 50.0).with_finding(Finding::new(
                    Severity::Major,
                    "logic",
                    "src/a.rs:1",
                    "off by one",
                )),
                DimensionEvaluation::new("b", 60.0).with_finding(Finding::new(
                    Severity::Minor,
                    "style",
                    "src/b.rs:2",
                    "long line",
                )),
            ],
            ..Default::default()
        };
        assert_eq!(review.findings().count(), 2);
    }

    #[test]
    fn test_workflow_step_order() {
        let steps = WorkflowStep::all();
        assert_eq!(steps[0], WorkflowStep::Init);
        assert_eq!(steps[7], WorkflowStep::Verdict);
    }

    #[test]
    fn test_step_serde_screaming_case() {
        assert_eq!(
            serde_json::to_string(&WorkflowStep::Static).unwrap(),
            "\"STATIC\""
        );
    }
}
