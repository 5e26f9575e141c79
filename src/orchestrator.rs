//! Per-thought audit orchestration.
//!
//! The orchestrator drives one thought through its lifecycle: resolve the
//! session, merge inline configuration, consult the cache, build context,
//! queue the judge pipeline, weight and assemble the result, sanitize,
//! evaluate completion, journal, and cache. Collaborator failures degrade
//! the review instead of failing the call; only admission errors
//! (`InvalidThought`, `QueueFull`, `SessionLocked`) surface to the caller.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cache::{CacheKey, ResultCache};
use crate::completion::CompletionEvaluator;
use crate::config::{EngineConfig, SessionConfig};
use crate::error::{Error, Result};
use crate::inline_config::resolve_inline_config;
use crate::judge::{
    ContextBuilder, Judge, JudgeBudget, JudgeRequest, StepEvaluator, StepInput, StepResult,
};
use crate::output::traceability::extract_acceptance_criteria;
use crate::output::{OutputInput, StructuredOutputBuilder};
use crate::progress::{AuditStage, ProgressEvent, ProgressTracker};
use crate::queue::{
    AuditQueue, EnqueueOptions, JobContext, JobExecutor, JobPayload, JobPriority, QueueStats,
};
use crate::sanitize::Sanitizer;
use crate::score::ScoreAssembler;
use crate::session::{SessionStore, SessionStoreConfig};
use crate::stagnation::StagnationAnalyzer;
use crate::types::{
    artifact_hash, CompletionStatus, IterationRecord, JudgeCard, ReviewMetadata, Severity,
    StructuredReview, Thought, WarningCode,
};

/// Placeholder pack used when the context builder fails.
const DEGRADED_CONTEXT_PACK: &str = "(context unavailable: the context builder failed; \
     the review was produced from the artifact alone)";

/// Per-call scheduling options.
#[derive(Debug, Clone, Default)]
pub struct AuditOptions {
    /// Queue priority
    pub priority: JobPriority,
    /// Per-job deadline override
    pub timeout: Option<Duration>,
    /// Retry budget override
    pub max_retries: Option<u32>,
}

/// The phases a thought moves through. Recoverable failures take the
/// `Degraded*` edges; only admission failures are terminal for the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuditPhase {
    Received,
    Loaded,
    Configured,
    Contexted,
    Queued,
    Judged,
    Persisted,
    Returned,
    DegradedContext,
    DegradedJudge,
    DegradedPersistence,
}

fn trace_phase(session_id: &str, phase: AuditPhase) {
    debug!(session = %session_id, phase = %phase, "audit phase");
}

impl std::fmt::Display for AuditPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Received => "received",
            Self::Loaded => "loaded",
            Self::Configured => "configured",
            Self::Contexted => "contexted",
            Self::Queued => "queued",
            Self::Judged => "judged",
            Self::Persisted => "persisted",
            Self::Returned => "returned",
            Self::DegradedContext => "degraded-context",
            Self::DegradedJudge => "degraded-judge",
            Self::DegradedPersistence => "degraded-persistence",
        };
        write!(f, "{}", s)
    }
}

/// The queue-side pipeline: step evaluators, the judge, weighting, and
/// structured assembly. Runs entirely under the job's deadline; a judge
/// error propagates so the queue can retry it.
struct JudgePipeline {
    judge: Arc<dyn Judge>,
    step_evaluators: Vec<Arc<dyn StepEvaluator>>,
    assembler: Arc<ScoreAssembler>,
    output: Arc<StructuredOutputBuilder>,
}

#[async_trait::async_trait]
impl JobExecutor for JudgePipeline {
    async fn run(&self, job: &JobContext) -> Result<StructuredReview> {
        let config = &job.payload.config;

        // Step evaluators are pure w.r.t. their inputs, so they run
        // concurrently; a failing evaluator yields a failed step result
        // rather than aborting the job.
        let step_futures = self.step_evaluators.iter().map(|evaluator| {
            let input = StepInput {
                step: evaluator.step(),
                artifact: job.thought.artifact.clone(),
                context_pack: job.payload.context_pack.clone(),
                session_config: config.clone(),
            };
            async move {
                match evaluator.evaluate(&input).await {
                    Ok(result) => result,
                    Err(err) => {
                        warn!(step = ?input.step, %err, "step evaluator failed");
                        StepResult {
                            success: false,
                            errors: vec![err.to_string()],
                            ..Default::default()
                        }
                    }
                }
            }
        });
        let step_results: Vec<StepResult> = join_all(step_futures).await;

        let request = JudgeRequest {
            task: config.task.clone(),
            candidate: job.thought.artifact.clone(),
            context_pack: job.payload.context_pack.clone(),
            rubric: self.assembler.rubric().to_vec(),
            budget: JudgeBudget::default(),
        };
        let raw = self.judge.execute(request).await?;

        let step_critical = step_results
            .iter()
            .flat_map(|s| s.evidence.iter())
            .any(|f| f.severity == Severity::Critical);
        let scored =
            self.assembler
                .assemble_with_threshold(&raw.dimensions, step_critical, config.threshold);

        let criteria = extract_acceptance_criteria(&config.task);
        let assembled = self
            .output
            .build(OutputInput {
                scored: &scored,
                raw: &raw,
                step_results: &step_results,
                criteria: &criteria,
                artifact: &job.thought.artifact,
            })
            .await;

        let mut metadata = ReviewMetadata::now();
        metadata.warnings.extend(scored.warnings.clone());
        metadata.warnings.extend(assembled.warnings.clone());

        let judge_cards = if raw.judge_cards.is_empty() {
            let model = config
                .judges
                .first()
                .cloned()
                .unwrap_or_else(|| "judge".to_string());
            vec![JudgeCard::new(model)]
        } else {
            raw.judge_cards.clone()
        };

        Ok(StructuredReview {
            overall_score: scored.overall_score,
            verdict: scored.verdict,
            dimensions: scored.dimensions,
            executive_verdict: assembled.executive_verdict,
            evidence_table: assembled.evidence_table,
            proposed_diffs: assembled.proposed_diffs,
            reproduction_guide: assembled.reproduction_guide,
            traceability_matrix: assembled.traceability_matrix,
            follow_up_tasks: assembled.follow_up_tasks,
            // The orchestrator fills loop-control fields after persistence
            // context is known.
            iterations: 0,
            judge_cards,
            completion: CompletionStatus::in_progress("completion pending"),
            progress_analysis: None,
            termination_result: None,
            quality_metrics: assembled.quality_metrics,
            sanitization: Default::default(),
            metadata,
        })
    }
}

/// Drives each thought through the full audit workflow.
pub struct AuditOrchestrator {
    session_defaults: SessionConfig,
    cache: Arc<ResultCache>,
    store: Arc<SessionStore>,
    queue: Arc<AuditQueue>,
    tracker: Arc<ProgressTracker>,
    stagnation: Arc<StagnationAnalyzer>,
    completion: CompletionEvaluator,
    context_builder: Arc<dyn ContextBuilder>,
    sanitizer: Arc<Sanitizer>,
}

impl AuditOrchestrator {
    /// Wire the component graph from an engine configuration and the
    /// injected collaborators.
    pub fn new(
        config: EngineConfig,
        judge: Arc<dyn Judge>,
        context_builder: Arc<dyn ContextBuilder>,
        step_evaluators: Vec<Arc<dyn StepEvaluator>>,
    ) -> Result<Self> {
        let assembler = Arc::new(ScoreAssembler::new(
            config.rubric(),
            config.session_defaults.threshold,
        )?);
        let output = Arc::new(StructuredOutputBuilder::new(config.output.clone()));

        let pipeline = Arc::new(JudgePipeline {
            judge,
            step_evaluators,
            assembler,
            output,
        });

        Ok(Self {
            cache: Arc::new(ResultCache::new(config.cache.clone())),
            store: Arc::new(SessionStore::new(config.store.clone())),
            queue: Arc::new(AuditQueue::new(config.queue.clone(), pipeline)),
            tracker: Arc::new(ProgressTracker::new(config.progress.clone())),
            stagnation: Arc::new(StagnationAnalyzer::new(config.stagnation.clone())),
            completion: CompletionEvaluator::new(config.completion.clone()),
            context_builder,
            sanitizer: Arc::new(Sanitizer::new(config.sanitizer.clone())),
            session_defaults: config.session_defaults,
        })
    }

    /// Audit a thought with default scheduling options.
    pub async fn audit(&self, thought: Thought) -> Result<StructuredReview> {
        self.audit_with_options(thought, AuditOptions::default()).await
    }

    /// Audit a thought.
    #[instrument(skip(self, thought), fields(thought_number = thought.thought_number))]
    pub async fn audit_with_options(
        &self,
        thought: Thought,
        options: AuditOptions,
    ) -> Result<StructuredReview> {
        thought.validate()?;

        let session_id = thought
            .session_id
            .clone()
            .or_else(|| thought.branch_id.clone())
            .unwrap_or_else(|| format!("fallback-{}", Uuid::new_v4()));
        trace_phase(&session_id, AuditPhase::Received);

        let state = self
            .store
            .get_or_create(&session_id, &self.session_defaults)
            .await;
        trace_phase(&session_id, AuditPhase::Loaded);

        // Inline configuration merge.
        let inline = resolve_inline_config(
            &thought.artifact,
            thought.inline_config_text.as_deref(),
            &state.config,
        );
        let effective = inline.config.clone();
        let config_warnings = inline.warnings.clone();
        let mut persistence_degraded = false;
        if inline.changed {
            match self.store.update_config(&session_id, effective.clone()).await {
                Ok(persisted) => persistence_degraded |= persisted.persistence_degraded,
                Err(err) => {
                    warn!(session = %session_id, %err, "config write-back failed");
                    persistence_degraded = true;
                }
            }
        }
        trace_phase(&session_id, AuditPhase::Configured);

        // Cache consult precedes the lock check so a completed session can
        // still answer an identical resubmission.
        let key = CacheKey::for_audit(&thought.artifact, &effective.digest());
        if let Some(cached) = self.cache.get(&key).await {
            debug!(session = %session_id, key = %key, "cache hit");
            return Ok(cached);
        }
        if state.is_complete {
            return Err(Error::SessionLocked(session_id));
        }

        let audit_id = format!("{}#{}", session_id, thought.thought_number);
        self.tracker.begin(&audit_id);
        self.tracker.set_stage(&audit_id, AuditStage::ParsingCode);

        // Context pack.
        let (context_pack, context_degraded) =
            match self.context_builder.build(&effective).await {
                Ok(pack) => {
                    trace_phase(&session_id, AuditPhase::Contexted);
                    (pack, false)
                }
                Err(err) => {
                    warn!(session = %session_id, %err, "context builder failed, degrading");
                    trace_phase(&session_id, AuditPhase::DegradedContext);
                    (DEGRADED_CONTEXT_PACK.to_string(), true)
                }
            };

        // Queue and judge.
        self.tracker.set_stage(&audit_id, AuditStage::RunningChecks);
        let payload = JobPayload {
            context_pack,
            config: effective.clone(),
        };
        trace_phase(&session_id, AuditPhase::Queued);
        let queued = self
            .queue
            .enqueue(
                thought.clone(),
                Some(session_id.clone()),
                payload,
                EnqueueOptions {
                    priority: options.priority,
                    timeout: options.timeout,
                    max_retries: options.max_retries,
                },
            )
            .await;

        let (mut review, judged) = match queued {
            Ok(review) => {
                trace_phase(&session_id, AuditPhase::Judged);
                (review, true)
            }
            Err(err @ Error::QueueFull { .. }) => {
                self.tracker.cancel(&audit_id);
                return Err(err);
            }
            Err(Error::QueueDestroyed) => {
                self.tracker.cancel(&audit_id);
                return Err(Error::QueueDestroyed);
            }
            Err(err) => {
                // Judge failed after its retry budget: deterministic
                // fallback, never an exception to the caller.
                trace_phase(&session_id, AuditPhase::DegradedJudge);
                let code = match &err {
                    Error::JobTimeout { .. } => WarningCode::JobTimeout,
                    _ => WarningCode::JudgeError,
                };
                let mut fallback =
                    StructuredReview::fallback(err.to_string(), state.current_loop + 1);
                fallback.metadata.warn(code, err.to_string());
                (fallback, false)
            }
        };

        self.tracker
            .set_stage(&audit_id, AuditStage::EvaluatingQuality);
        for message in config_warnings {
            review.metadata.warn(WarningCode::ConfigWarning, message);
        }
        if context_degraded {
            review.metadata.warn(
                WarningCode::ContextDegraded,
                "context builder failed; a placeholder context was used",
            );
        }

        if !judged {
            // Fallback reviews are not iterations: history only grows on a
            // successful audit. Sanitize and return.
            self.tracker
                .set_stage(&audit_id, AuditStage::GeneratingFeedback);
            let sanitization = self.sanitizer.sanitize_review(&mut review);
            if !sanitization.warnings.is_empty() {
                for message in &sanitization.warnings {
                    review
                        .metadata
                        .warn(WarningCode::SanitizationLowConfidence, message.clone());
                }
            }
            self.tracker.fail(&audit_id, "judge unavailable");
            info!(session = %session_id, phase = %AuditPhase::DegradedJudge, "audit degraded");
            return Ok(review);
        }

        // Loop control.
        let next_loop = state.current_loop + 1;
        let issue_signatures: Vec<String> = review
            .evidence_table
            .entries
            .iter()
            .map(|e| e.issue.clone())
            .collect();
        self.stagnation.record(
            &session_id,
            &thought.artifact,
            review.overall_score,
            issue_signatures,
        );
        let analysis = self.stagnation.analyze(&session_id, next_loop);
        let completion = self
            .completion
            .evaluate(review.overall_score, next_loop, analysis.as_ref());

        review.iterations = next_loop;
        review.progress_analysis = analysis;
        review.completion = completion.clone();

        // Sanitize the composed document, loop-control text included, before
        // anything reaches the journal or the caller.
        self.tracker
            .set_stage(&audit_id, AuditStage::GeneratingFeedback);
        let sanitization = self.sanitizer.sanitize_review(&mut review);
        for message in &sanitization.warnings {
            review
                .metadata
                .warn(WarningCode::SanitizationLowConfidence, message.clone());
        }

        // Journal the iteration.
        self.tracker.set_stage(&audit_id, AuditStage::Finalizing);
        let record = IterationRecord::new(
            thought.thought_number,
            artifact_hash(&thought.artifact),
            review.clone(),
        );
        match self.store.append_iteration(&session_id, record).await {
            Ok(persisted) => {
                persistence_degraded |= persisted.persistence_degraded;
                trace_phase(&session_id, AuditPhase::Persisted);
                if completion.is_complete {
                    review.termination_result =
                        Some(self.completion.terminate(&persisted.state.history));
                }
            }
            Err(err) => {
                warn!(session = %session_id, %err, "iteration journal failed");
                persistence_degraded = true;
                trace_phase(&session_id, AuditPhase::DegradedPersistence);
            }
        }
        if persistence_degraded {
            review.metadata.warn(
                WarningCode::PersistenceDegraded,
                "session journal writes failed; state advanced in memory only",
            );
        }

        if completion.is_complete {
            if let Some(reason) = completion.reason {
                if let Err(err) = self.store.mark_complete(&session_id, reason).await {
                    warn!(session = %session_id, %err, "mark_complete failed");
                }
            }
            self.stagnation.clear(&session_id);
            info!(
                session = %session_id,
                loop_ = next_loop,
                reason = ?completion.reason,
                "session complete"
            );
        }

        self.cache.put(key, review.clone()).await;
        self.tracker.complete(&audit_id);
        trace_phase(&session_id, AuditPhase::Returned);
        debug!(session = %session_id, score = review.overall_score, "audit finished");
        Ok(review)
    }

    /// Queue statistics.
    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Subscribe to progress events.
    pub fn progress_events(&self) -> tokio::sync::broadcast::Receiver<ProgressEvent> {
        self.tracker.subscribe()
    }

    /// The session store, for inspection and GC.
    pub fn store(&self) -> Arc<SessionStore> {
        Arc::clone(&self.store)
    }

    /// The result cache.
    pub fn cache(&self) -> Arc<ResultCache> {
        Arc::clone(&self.cache)
    }

    /// Tear down the queue; in-flight and pending jobs resolve with
    /// `QueueDestroyed`.
    pub fn destroy(&self) {
        self.queue.destroy();
    }
}

/// Convenience constructor used by tests and small embedders: default
/// configuration except for the state directory.
pub fn orchestrator_with_state_dir(
    judge: Arc<dyn Judge>,
    context_builder: Arc<dyn ContextBuilder>,
    state_dir: std::path::PathBuf,
) -> Result<AuditOrchestrator> {
    let config = EngineConfig {
        store: SessionStoreConfig {
            dir: state_dir,
            ..Default::default()
        },
        ..Default::default()
    };
    AuditOrchestrator::new(config, judge, context_builder, Vec::new())
}
