//! Core types shared across the audit engine.
//!
//! Defines the submit-path input (`Thought`), the composed review document
//! (`StructuredReview`) returned to the caller, and the per-iteration journal
//! record kept by the session store. Wire types serialize in camelCase to
//! match the submit API's JSON layout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::completion::TerminationResult;
use crate::error::{Error, Result};
use crate::output::diff::ProposedDiff;
use crate::output::evidence::EvidenceTable;
use crate::output::repro::ReproductionGuide;
use crate::output::tasks::FollowUpTasks;
use crate::output::traceability::TraceabilityMatrix;
use crate::output::verdict::ExecutiveVerdict;
use crate::sanitize::SanitizationResult;
use crate::stagnation::ProgressAnalysis;

/// Engine version stamped into review metadata.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// One submission from the caller, typically a successive revision of the
/// artifact under review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thought {
    /// Explicit session to audit under
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Branch identifier, used as the session id when no explicit id is given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    /// 1-based position of this thought within the session
    pub thought_number: u32,
    /// The candidate artifact under review
    pub artifact: String,
    /// Raw inline configuration text, if the caller extracted it themselves
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_config_text: Option<String>,
}

impl Thought {
    /// Create a thought with just a number and artifact.
    pub fn new(thought_number: u32, artifact: impl Into<String>) -> Self {
        Self {
            session_id: None,
            branch_id: None,
            thought_number,
            artifact: artifact.into(),
            inline_config_text: None,
        }
    }

    /// Attach a session id.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach a branch id.
    pub fn with_branch(mut self, branch_id: impl Into<String>) -> Self {
        self.branch_id = Some(branch_id.into());
        self
    }

    /// Validate the thought for admission.
    pub fn validate(&self) -> Result<()> {
        if self.thought_number < 1 {
            return Err(Error::invalid_thought("thoughtNumber must be >= 1"));
        }
        if self.artifact.trim().is_empty() {
            return Err(Error::invalid_thought("artifact must be non-empty"));
        }
        Ok(())
    }
}

/// Pass/revise/reject decision for an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Revise,
    Reject,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Revise => write!(f, "revise"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

/// Severity of an evidence finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Blocks shipping outright
    Critical,
    /// Should be fixed before shipping
    Major,
    /// Worth fixing, does not block
    Minor,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "Critical"),
            Self::Major => write!(f, "Major"),
            Self::Minor => write!(f, "Minor"),
        }
    }
}

/// A scored quality dimension as it appears in the review output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    /// Dimension name
    pub name: String,
    /// Score in 0..=100
    pub score: f64,
}

impl DimensionScore {
    pub fn new(name: impl Into<String>, score: f64) -> Self {
        Self {
            name: name.into(),
            score,
        }
    }
}

/// Attribution card for one judge that contributed to a review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeCard {
    /// Model identifier of the judge
    pub model: String,
    /// Free-form notes from the judge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl JudgeCard {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Stable codes for non-fatal degradations attached to a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningCode {
    /// Inline configuration was malformed or partially invalid
    ConfigWarning,
    /// Context pack construction failed; a placeholder was used
    ContextDegraded,
    /// The audit job hit its per-job deadline
    JobTimeout,
    /// The judge crashed or returned an unusable review
    JudgeError,
    /// Session journal writes failed; state advanced in memory only
    PersistenceDegraded,
    /// Sanitizer confidence was below the reporting threshold
    SanitizationLowConfidence,
    /// An output sub-generator missed its deadline; its default was used
    ComponentTimeout,
    /// A dimension score was outside 0..=100 and was clamped
    ScoreClamped,
    /// The returned review is the deterministic fallback
    FallbackReview,
}

/// A non-fatal degradation surfaced in review metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewWarning {
    /// Stable machine-readable code
    pub code: WarningCode,
    /// Human-readable explanation
    pub message: String,
}

impl ReviewWarning {
    pub fn new(code: WarningCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Why a session reached completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompletionReason {
    /// A score tier was satisfied
    Score,
    /// The hard iteration ceiling was reached
    MaxLoops,
    /// Successive iterations stopped making progress
    Stagnation,
}

impl std::fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Score => write!(f, "score"),
            Self::MaxLoops => write!(f, "maxLoops"),
            Self::Stagnation => write!(f, "stagnation"),
        }
    }
}

/// Loop-control block attached to every review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionStatus {
    /// Whether the session should terminate
    pub is_complete: bool,
    /// Termination reason, absent while in progress
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<CompletionReason>,
    /// Whether the caller is expected to submit another thought
    pub next_thought_needed: bool,
    /// Human-readable loop-control guidance
    pub message: String,
}

impl CompletionStatus {
    /// Status for a session still in progress.
    pub fn in_progress(message: impl Into<String>) -> Self {
        Self {
            is_complete: false,
            reason: None,
            next_thought_needed: true,
            message: message.into(),
        }
    }

    /// Status for a completed session.
    pub fn complete(reason: CompletionReason, message: impl Into<String>) -> Self {
        Self {
            is_complete: true,
            reason: Some(reason),
            next_thought_needed: false,
            message: message.into(),
        }
    }
}

/// Self-assessment of the assembled output, each metric in 0..=100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityMetrics {
    pub completeness: f64,
    pub accuracy: f64,
    pub actionability: f64,
    pub evidence_quality: f64,
}

impl Default for QualityMetrics {
    fn default() -> Self {
        Self {
            completeness: 0.0,
            accuracy: 0.0,
            actionability: 0.0,
            evidence_quality: 0.0,
        }
    }
}

/// Review metadata: version, timestamp, and accumulated warnings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewMetadata {
    /// Engine version that produced the review
    pub version: String,
    /// When the review was assembled
    pub timestamp: DateTime<Utc>,
    /// Non-fatal degradations encountered along the way
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ReviewWarning>,
}

impl ReviewMetadata {
    pub fn now() -> Self {
        Self {
            version: ENGINE_VERSION.to_string(),
            timestamp: Utc::now(),
            warnings: Vec::new(),
        }
    }

    /// Append a warning.
    pub fn warn(&mut self, code: WarningCode, message: impl Into<String>) {
        self.warnings.push(ReviewWarning::new(code, message));
    }

    /// Whether a warning with the given code is present.
    pub fn has_warning(&self, code: WarningCode) -> bool {
        self.warnings.iter().any(|w| w.code == code)
    }
}

/// The structured review document returned for every thought.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredReview {
    /// Weighted overall score in 0..=100
    pub overall_score: f64,
    /// Ship decision for this iteration
    pub verdict: Verdict,
    /// Per-dimension scores
    pub dimensions: Vec<DimensionScore>,
    /// Ship/no-ship summary
    pub executive_verdict: ExecutiveVerdict,
    /// Deduplicated, severity-sorted findings
    pub evidence_table: EvidenceTable,
    /// Concrete fix proposals as unified diffs
    pub proposed_diffs: Vec<ProposedDiff>,
    /// Ordered reproduction and verification steps
    pub reproduction_guide: ReproductionGuide,
    /// Acceptance-criteria coverage mapping
    pub traceability_matrix: TraceabilityMatrix,
    /// Prioritized follow-up work
    pub follow_up_tasks: FollowUpTasks,
    /// Number of iterations the session has accumulated, this one included
    pub iterations: u32,
    /// Judges that contributed to this review
    pub judge_cards: Vec<JudgeCard>,
    /// Loop-control decision
    pub completion: CompletionStatus,
    /// Similarity diagnostics, present once the session has enough history
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_analysis: Option<ProgressAnalysis>,
    /// Termination summary, present once the session completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_result: Option<TerminationResult>,
    /// Self-assessment of output quality
    pub quality_metrics: QualityMetrics,
    /// Redaction log from the sanitizer
    pub sanitization: SanitizationResult,
    /// Version, timestamp, warnings
    pub metadata: ReviewMetadata,
}

impl StructuredReview {
    /// Deterministic fallback review, used only when the judge fails after
    /// retries. Always carries a `FallbackReview` warning so the degradation
    /// is visible to the caller.
    pub fn fallback(error_message: impl Into<String>, iterations: u32) -> Self {
        let error_message = error_message.into();
        let summary = format!(
            "Audit degraded: the judge did not produce a review ({}). \
             Scores are placeholders; resubmit or inspect the judge.",
            error_message
        );
        let mut metadata = ReviewMetadata::now();
        metadata.warn(WarningCode::FallbackReview, summary.clone());

        Self {
            overall_score: 50.0,
            verdict: Verdict::Revise,
            dimensions: Vec::new(),
            executive_verdict: ExecutiveVerdict::fallback(&summary),
            evidence_table: EvidenceTable::default(),
            proposed_diffs: Vec::new(),
            reproduction_guide: ReproductionGuide::default(),
            traceability_matrix: TraceabilityMatrix::default(),
            follow_up_tasks: FollowUpTasks::default(),
            iterations,
            judge_cards: vec![JudgeCard::new("fallback").with_notes(error_message)],
            completion: CompletionStatus::in_progress(
                "Review degraded; another revision is expected",
            ),
            progress_analysis: None,
            termination_result: None,
            quality_metrics: QualityMetrics::default(),
            sanitization: SanitizationResult::default(),
            metadata,
        }
    }

    /// Whether any Critical finding is present.
    pub fn has_critical_issues(&self) -> bool {
        self.evidence_table
            .entries
            .iter()
            .any(|e| e.severity == Severity::Critical)
    }
}

/// One completed (thought → review) cycle, as journaled by the session store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationRecord {
    /// The thought number this iteration answered
    pub thought_number: u32,
    /// Fingerprint of the audited artifact
    pub artifact_hash: String,
    /// Overall score of the iteration
    pub score: f64,
    /// Verdict of the iteration
    pub verdict: Verdict,
    /// The full review document
    pub review: StructuredReview,
    /// When the iteration completed
    pub timestamp: DateTime<Utc>,
}

impl IterationRecord {
    pub fn new(thought_number: u32, artifact_hash: impl Into<String>, review: StructuredReview) -> Self {
        Self {
            thought_number,
            artifact_hash: artifact_hash.into(),
            score: review.overall_score,
            verdict: review.verdict,
            review,
            timestamp: Utc::now(),
        }
    }
}

/// Sha256 fingerprint of an artifact, hex-encoded.
pub fn artifact_hash(artifact: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(artifact.as_bytes());
    format!("{:x}", hasher.finalize())
}
