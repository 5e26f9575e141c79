//! Engine facade.
//!
//! Wires the component graph from one `EngineConfig` plus the injected
//! collaborators, owns the background session-GC task, and exposes the
//! submit API. Construction must happen inside a Tokio runtime: the queue
//! dispatcher and the GC loop are spawned tasks.

use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::cache::CacheStats;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::judge::{ContextBuilder, Judge, StepEvaluator};
use crate::orchestrator::{AuditOptions, AuditOrchestrator};
use crate::progress::ProgressEvent;
use crate::queue::QueueStats;
use crate::session::{run_gc_loop, SessionStore};
use crate::types::{StructuredReview, Thought};

/// The assembled audit engine.
///
/// ```rust,ignore
/// use gan_audit_core::{AuditEngine, EngineConfig, Thought};
///
/// let engine = AuditEngine::new(EngineConfig::default(), judge, context_builder)?;
/// let review = engine.audit(Thought::new(1, artifact)).await?;
/// if review.completion.next_thought_needed {
///     // revise and resubmit
/// }
/// ```
pub struct AuditEngine {
    orchestrator: Arc<AuditOrchestrator>,
    gc_task: Mutex<Option<JoinHandle<()>>>,
}

impl AuditEngine {
    /// Build an engine with no step evaluators.
    pub fn new(
        config: EngineConfig,
        judge: Arc<dyn Judge>,
        context_builder: Arc<dyn ContextBuilder>,
    ) -> Result<Self> {
        Self::with_step_evaluators(config, judge, context_builder, Vec::new())
    }

    /// Build an engine with per-step analyzers.
    pub fn with_step_evaluators(
        config: EngineConfig,
        judge: Arc<dyn Judge>,
        context_builder: Arc<dyn ContextBuilder>,
        step_evaluators: Vec<Arc<dyn StepEvaluator>>,
    ) -> Result<Self> {
        let orchestrator = Arc::new(AuditOrchestrator::new(
            config,
            judge,
            context_builder,
            step_evaluators,
        )?);
        let gc_task = tokio::spawn(run_gc_loop(orchestrator.store()));
        Ok(Self {
            orchestrator,
            gc_task: Mutex::new(Some(gc_task)),
        })
    }

    /// Audit one thought with default scheduling.
    pub async fn audit(&self, thought: Thought) -> Result<StructuredReview> {
        self.orchestrator.audit(thought).await
    }

    /// Audit one thought with explicit scheduling options.
    pub async fn audit_with_options(
        &self,
        thought: Thought,
        options: AuditOptions,
    ) -> Result<StructuredReview> {
        self.orchestrator.audit_with_options(thought, options).await
    }

    /// Queue statistics.
    pub fn queue_stats(&self) -> QueueStats {
        self.orchestrator.queue_stats()
    }

    /// Cache statistics.
    pub async fn cache_stats(&self) -> CacheStats {
        self.orchestrator.cache().stats().await
    }

    /// Subscribe to progress events.
    pub fn progress_events(&self) -> tokio::sync::broadcast::Receiver<ProgressEvent> {
        self.orchestrator.progress_events()
    }

    /// The session store, for inspection or manual GC.
    pub fn store(&self) -> Arc<SessionStore> {
        self.orchestrator.store()
    }

    /// Stop background work and tear down the queue. Pending audits resolve
    /// with `QueueDestroyed`.
    pub fn shutdown(&self) {
        if let Some(task) = self.gc_task.lock().expect("gc task lock").take() {
            task.abort();
        }
        self.orchestrator.destroy();
    }
}

impl Drop for AuditEngine {
    fn drop(&mut self) {
        if let Some(task) = self.gc_task.lock().expect("gc task lock").take() {
            task.abort();
        }
    }
}
