//! Progress tracking for long-running audits.
//!
//! Each tracked audit walks a fixed stage sequence; overall progress is the
//! cumulative weight of completed stages plus a fractional share of the
//! current one. Tracking only activates once an audit has been running
//! longer than the activation threshold, so fast audits emit nothing, and at
//! most `max_tracked` audits are tracked at once (excess audits run
//! untracked). Events are fanned out on a broadcast channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::debug;

/// Capacity of the event fan-out channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle stages of one audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStage {
    Initializing,
    ParsingCode,
    AnalyzingStructure,
    RunningChecks,
    EvaluatingQuality,
    GeneratingFeedback,
    Finalizing,
    Completed,
    Failed,
}

impl AuditStage {
    /// Fixed weight of this stage in overall progress. Working-stage weights
    /// sum to 1.0; terminal stages carry none.
    pub fn weight(&self) -> f64 {
        match self {
            Self::Initializing => 0.05,
            Self::ParsingCode => 0.15,
            Self::AnalyzingStructure => 0.15,
            Self::RunningChecks => 0.25,
            Self::EvaluatingQuality => 0.20,
            Self::GeneratingFeedback => 0.15,
            Self::Finalizing => 0.05,
            Self::Completed | Self::Failed => 0.0,
        }
    }

    /// Cumulative weight of the stages before this one.
    fn completed_weight_before(&self) -> f64 {
        let order = [
            Self::Initializing,
            Self::ParsingCode,
            Self::AnalyzingStructure,
            Self::RunningChecks,
            Self::EvaluatingQuality,
            Self::GeneratingFeedback,
            Self::Finalizing,
        ];
        let mut sum = 0.0;
        for stage in order {
            if stage == *self {
                break;
            }
            sum += stage.weight();
        }
        sum
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for AuditStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initializing => "INITIALIZING",
            Self::ParsingCode => "PARSING_CODE",
            Self::AnalyzingStructure => "ANALYZING_STRUCTURE",
            Self::RunningChecks => "RUNNING_CHECKS",
            Self::EvaluatingQuality => "EVALUATING_QUALITY",
            Self::GeneratingFeedback => "GENERATING_FEEDBACK",
            Self::Finalizing => "FINALIZING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

/// Kinds of progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressEventKind {
    Progress,
    StageChanged,
    Completed,
    Failed,
}

/// One progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Audit this event belongs to
    pub audit_id: String,
    /// Event kind
    pub kind: ProgressEventKind,
    /// Stage at the time of the event
    pub stage: AuditStage,
    /// Overall progress in 0..=100
    pub percent: f64,
    /// Failure message, present on `Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the event was emitted
    pub timestamp: DateTime<Utc>,
}

/// Progress tracking knobs.
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Wall-time an audit must run before events are emitted
    pub activation_threshold: Duration,
    /// Maximum concurrently tracked audits
    pub max_tracked: usize,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            activation_threshold: Duration::from_secs(5),
            max_tracked: 10,
        }
    }
}

struct TrackedAudit {
    stage: AuditStage,
    stage_fraction: f64,
    started_at: Instant,
}

/// Tracks per-audit progress and fans events out to subscribers.
pub struct ProgressTracker {
    config: ProgressConfig,
    audits: Mutex<HashMap<String, TrackedAudit>>,
    events: broadcast::Sender<ProgressEvent>,
}

impl ProgressTracker {
    pub fn new(config: ProgressConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            audits: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Subscribe to progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    /// Begin tracking an audit. Returns false when the tracking cap is
    /// reached; the audit still runs, just untracked.
    pub fn begin(&self, audit_id: &str) -> bool {
        let mut audits = self.audits.lock().expect("progress lock");
        if audits.len() >= self.config.max_tracked && !audits.contains_key(audit_id) {
            debug!(audit_id, "progress cap reached, audit runs untracked");
            return false;
        }
        audits.insert(
            audit_id.to_string(),
            TrackedAudit {
                stage: AuditStage::Initializing,
                stage_fraction: 0.0,
                started_at: Instant::now(),
            },
        );
        true
    }

    /// Move a tracked audit to a new stage.
    pub fn set_stage(&self, audit_id: &str, stage: AuditStage) {
        let event = {
            let mut audits = self.audits.lock().expect("progress lock");
            let Some(audit) = audits.get_mut(audit_id) else {
                return;
            };
            audit.stage = stage;
            audit.stage_fraction = 0.0;
            self.event_for(audit_id, audit, ProgressEventKind::StageChanged, None)
        };
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
        if stage.is_terminal() {
            self.release(audit_id);
        }
    }

    /// Report fractional progress within the current stage.
    pub fn advance_stage_fraction(&self, audit_id: &str, fraction: f64) {
        let event = {
            let mut audits = self.audits.lock().expect("progress lock");
            let Some(audit) = audits.get_mut(audit_id) else {
                return;
            };
            audit.stage_fraction = fraction.clamp(0.0, 1.0);
            self.event_for(audit_id, audit, ProgressEventKind::Progress, None)
        };
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
    }

    /// Mark an audit completed and release its slot.
    pub fn complete(&self, audit_id: &str) {
        let event = {
            let mut audits = self.audits.lock().expect("progress lock");
            let Some(audit) = audits.get_mut(audit_id) else {
                return;
            };
            audit.stage = AuditStage::Completed;
            audit.stage_fraction = 0.0;
            self.event_for(audit_id, audit, ProgressEventKind::Completed, None)
        };
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
        self.release(audit_id);
    }

    /// Mark an audit failed and release its slot.
    pub fn fail(&self, audit_id: &str, message: impl Into<String>) {
        let message = message.into();
        let event = {
            let mut audits = self.audits.lock().expect("progress lock");
            let Some(audit) = audits.get_mut(audit_id) else {
                return;
            };
            audit.stage = AuditStage::Failed;
            self.event_for(audit_id, audit, ProgressEventKind::Failed, Some(message))
        };
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
        self.release(audit_id);
    }

    /// Stop tracking without touching the underlying audit.
    pub fn cancel(&self, audit_id: &str) {
        self.release(audit_id);
    }

    /// Overall progress for a tracked audit, 0..=100.
    pub fn progress_percent(&self, audit_id: &str) -> Option<f64> {
        let audits = self.audits.lock().expect("progress lock");
        audits.get(audit_id).map(|a| percent_for(a))
    }

    /// Number of currently tracked audits.
    pub fn tracked_count(&self) -> usize {
        self.audits.lock().expect("progress lock").len()
    }

    fn release(&self, audit_id: &str) {
        let mut audits = self.audits.lock().expect("progress lock");
        audits.remove(audit_id);
    }

    /// Build an event, or None while the audit is under the activation
    /// threshold (terminal events always emit).
    fn event_for(
        &self,
        audit_id: &str,
        audit: &TrackedAudit,
        kind: ProgressEventKind,
        message: Option<String>,
    ) -> Option<ProgressEvent> {
        let active = audit.started_at.elapsed() >= self.config.activation_threshold;
        let terminal = matches!(kind, ProgressEventKind::Completed | ProgressEventKind::Failed);
        if !active && !terminal {
            return None;
        }
        Some(ProgressEvent {
            audit_id: audit_id.to_string(),
            kind,
            stage: audit.stage,
            percent: percent_for(audit),
            message,
            timestamp: Utc::now(),
        })
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(ProgressConfig::default())
    }
}

fn percent_for(audit: &TrackedAudit) -> f64 {
    match audit.stage {
        AuditStage::Completed => 100.0,
        AuditStage::Failed => audit.stage.completed_weight_before() * 100.0,
        stage => {
            let done = stage.completed_weight_before();
            ((done + stage.weight() * audit.stage_fraction) * 100.0).clamp(0.0, 100.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant_tracker() -> ProgressTracker {
        ProgressTracker::new(ProgressConfig {
            activation_threshold: Duration::ZERO,
            max_tracked: 10,
        })
    }

    #[test]
    fn test_stage_weights_sum_to_one() {
        let total: f64 = [
            AuditStage::Initializing,
            AuditStage::ParsingCode,
            AuditStage::AnalyzingStructure,
            AuditStage::RunningChecks,
            AuditStage::EvaluatingQuality,
            AuditStage::GeneratingFeedback,
            AuditStage::Finalizing,
        ]
        .iter()
        .map(|s| s.weight())
        .sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_progress_accumulates_across_stages() {
        let tracker = instant_tracker();
        tracker.begin("a1");
        assert_eq!(tracker.progress_percent("a1"), Some(0.0));

        tracker.set_stage("a1", AuditStage::RunningChecks);
        // Initializing + ParsingCode + AnalyzingStructure = 0.35
        assert!((tracker.progress_percent("a1").unwrap() - 35.0).abs() < 1e-9);

        tracker.advance_stage_fraction("a1", 0.5);
        // 0.35 + 0.25 * 0.5 = 0.475
        assert!((tracker.progress_percent("a1").unwrap() - 47.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_events_emitted_after_activation() {
        let tracker = instant_tracker();
        let mut events = tracker.subscribe();

        tracker.begin("a1");
        tracker.set_stage("a1", AuditStage::ParsingCode);
        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, ProgressEventKind::StageChanged);
        assert_eq!(event.stage, AuditStage::ParsingCode);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_audits_stay_silent() {
        let tracker = ProgressTracker::new(ProgressConfig {
            activation_threshold: Duration::from_secs(5),
            max_tracked: 10,
        });
        let mut events = tracker.subscribe();

        tracker.begin("fast");
        tracker.set_stage("fast", AuditStage::ParsingCode);
        // Under the threshold: nothing was sent.
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));

        tokio::time::advance(Duration::from_secs(6)).await;
        tracker.set_stage("fast", AuditStage::RunningChecks);
        let event = events.try_recv().unwrap();
        assert_eq!(event.stage, AuditStage::RunningChecks);
    }

    #[tokio::test]
    async fn test_completion_releases_slot_and_reports_hundred() {
        let tracker = instant_tracker();
        let mut events = tracker.subscribe();

        tracker.begin("a1");
        tracker.complete("a1");

        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, ProgressEventKind::Completed);
        assert_eq!(event.percent, 100.0);
        assert_eq!(tracker.tracked_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_carries_message() {
        let tracker = instant_tracker();
        let mut events = tracker.subscribe();

        tracker.begin("a1");
        tracker.fail("a1", "judge unreachable");

        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, ProgressEventKind::Failed);
        assert_eq!(event.message.as_deref(), Some("judge unreachable"));
    }

    #[tokio::test]
    async fn test_tracking_cap_overflows_untracked() {
        let tracker = ProgressTracker::new(ProgressConfig {
            activation_threshold: Duration::ZERO,
            max_tracked: 2,
        });
        assert!(tracker.begin("a1"));
        assert!(tracker.begin("a2"));
        assert!(!tracker.begin("a3"));
        assert_eq!(tracker.tracked_count(), 2);

        // Releasing a slot lets a new audit in.
        tracker.complete("a1");
        assert!(tracker.begin("a3"));
    }

    #[tokio::test]
    async fn test_cancel_stops_tracking_silently() {
        let tracker = instant_tracker();
        let mut events = tracker.subscribe();

        tracker.begin("a1");
        tracker.cancel("a1");
        assert_eq!(tracker.tracked_count(), 0);
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));

        // Updates after cancel are ignored.
        tracker.set_stage("a1", AuditStage::Finalizing);
        assert!(tracker.progress_percent("a1").is_none());
    }
}
