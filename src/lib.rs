//! # gan-audit-core
//!
//! An iterative adversarial code-audit engine. A caller submits successive
//! revisions of a candidate artifact ("thoughts"); for each submission the
//! engine produces a structured review (a weighted score, a
//! `pass | revise | reject` verdict, evidence, diffs, and follow-up tasks)
//! and decides whether the loop should terminate.
//!
//! ## Core Components
//!
//! - **Orchestrator**: the per-thought workflow, from session lookup to the
//!   journaled, sanitized review
//! - **Queue**: bounded-concurrency priority scheduling with per-job
//!   deadlines and retry
//! - **Completion**: tiered score-at-loop thresholds, hard stop, and
//!   stagnation gating
//! - **Stagnation**: similarity analysis across recent iterations
//! - **Output**: deterministic assembly of the structured review document
//! - **Sanitizer**: PII, secret, tool-syntax, and path scrubbing
//!
//! The reviewing judge itself, repository context packing, and per-step
//! analyzers are injected collaborators behind the traits in [`judge`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use gan_audit_core::{AuditEngine, EngineConfig, Thought};
//!
//! let engine = AuditEngine::new(EngineConfig::default(), judge, context_builder)?;
//! let mut artifact = first_draft;
//! loop {
//!     let review = engine.audit(Thought::new(n, artifact.clone())).await?;
//!     if review.completion.is_complete {
//!         break;
//!     }
//!     artifact = revise(artifact, &review);
//! }
//! ```

pub mod cache;
pub mod completion;
pub mod config;
pub mod engine;
pub mod error;
pub mod inline_config;
pub mod judge;
pub mod orchestrator;
pub mod output;
pub mod progress;
pub mod queue;
pub mod sanitize;
pub mod score;
pub mod session;
pub mod stagnation;
pub mod types;

// Re-exports for convenience
pub use cache::{CacheConfig, CacheKey, CacheStats, ResultCache};
pub use completion::{
    CompletionConfig, CompletionEvaluator, CompletionTier, TerminationResult,
};
pub use config::{
    default_dimensions, validate_dimensions, AuditScope, Criterion, EngineConfig,
    QualityDimension, SessionConfig,
};
pub use engine::AuditEngine;
pub use error::{Error, Result};
pub use inline_config::{extract_inline_config, resolve_inline_config, InlineConfigOutcome};
pub use judge::{
    Citation, ContextBuilder, DimensionEvaluation, Finding, InlineComment, Judge, JudgeBudget,
    JudgeRequest, RawReview, StepEvaluator, StepInput, StepResult, WorkflowStep,
};
pub use orchestrator::{AuditOptions, AuditOrchestrator};
pub use output::diff::{DiffConfig, DiffValidation, FileChange, ProposedDiff};
pub use output::evidence::{EvidenceConfig, EvidenceEntry, EvidenceTable, FileGroup};
pub use output::repro::{GuideStep, ReproConfig, ReproductionGuide, VerificationStep};
pub use output::tasks::{
    FollowUpTask, FollowUpTasks, TaskCategory, TaskConfig, TaskPrioritization,
};
pub use output::traceability::{
    extract_acceptance_criteria, AcMapping, AcceptanceCriterion, CoverageStatus, CoverageSummary,
    MissingTest, TraceabilityConfig, TraceabilityMatrix, UnmetAc,
};
pub use output::verdict::ExecutiveVerdict;
pub use output::{AssembledOutput, OutputConfig, OutputInput, StructuredOutputBuilder};
pub use progress::{
    AuditStage, ProgressConfig, ProgressEvent, ProgressEventKind, ProgressTracker,
};
pub use queue::{
    AuditQueue, EnqueueOptions, JobContext, JobExecutor, JobId, JobPayload, JobPriority,
    QueueConfig, QueueStats,
};
pub use sanitize::{
    SanitizationAction, SanitizationResult, SanitizeCategory, SanitizeConfig, SanitizeLevel,
    Sanitizer,
};
pub use score::{ScoreAssembler, ScoredReview, DEFAULT_SHIP_THRESHOLD, REJECT_THRESHOLD};
pub use session::{PersistedState, SessionState, SessionStore, SessionStoreConfig};
pub use stagnation::{
    composite_similarity, is_cosmetic_change, ProgressAnalysis, StagnationAnalyzer,
    StagnationConfig,
};
pub use types::{
    artifact_hash, CompletionReason, CompletionStatus, DimensionScore, IterationRecord,
    JudgeCard, QualityMetrics, ReviewMetadata, ReviewWarning, Severity, StructuredReview,
    Thought, Verdict, WarningCode,
};
