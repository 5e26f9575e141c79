//! Durable per-session state.
//!
//! One JSON document per session under a configurable directory. Writes are
//! atomic (write to a temp file, then rename) and retried with exponential
//! backoff; readers only ever see the old or the new document. Read failures
//! fall back to a fresh session so an audit can proceed with degraded
//! history, and write failures advance the in-memory state anyway, surfacing
//! a persistence warning to the caller.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::types::{CompletionReason, IterationRecord};

/// Persistent per-session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// Session id
    pub id: String,
    /// Effective session configuration
    pub config: SessionConfig,
    /// Completed iterations, oldest first
    #[serde(default)]
    pub history: Vec<IterationRecord>,
    /// Number of completed iterations; always `history.len()`
    pub current_loop: u32,
    /// One-way completion flag
    pub is_complete: bool,
    /// Why the session completed, if it has
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_reason: Option<CompletionReason>,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// When the session was last written
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    /// Fresh session with no history.
    pub fn new(id: impl Into<String>, config: SessionConfig) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            config,
            history: Vec::new(),
            current_loop: 0,
            is_complete: false,
            completion_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The most recent iteration, if any.
    pub fn last_iteration(&self) -> Option<&IterationRecord> {
        self.history.last()
    }
}

/// Session store location and retry policy.
#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    /// Directory holding `<sessionId>.json` files
    pub dir: PathBuf,
    /// Age past which a session is eligible for GC
    pub max_session_age: Duration,
    /// Interval at which the engine runs GC
    pub cleanup_interval: Duration,
    /// Write retries after the initial attempt
    pub write_retries: u32,
    /// Base delay for exponential write backoff
    pub backoff_base: Duration,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".mcp-gan-state"),
            max_session_age: Duration::from_secs(24 * 60 * 60),
            cleanup_interval: Duration::from_secs(60 * 60),
            write_retries: 2,
            backoff_base: Duration::from_millis(50),
        }
    }
}

/// Outcome of an operation that persists session state.
#[derive(Debug, Clone)]
pub struct PersistedState {
    /// Snapshot of the session after the update
    pub state: SessionState,
    /// True when every write attempt failed and only memory advanced
    pub persistence_degraded: bool,
}

/// Durable mapping from session id to session state.
///
/// Writes for one session are serialized through a per-session mutex; across
/// sessions there is no ordering.
pub struct SessionStore {
    config: SessionStoreConfig,
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionState>>>>,
}

impl SessionStore {
    pub fn new(config: SessionStoreConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SessionStoreConfig {
        &self.config
    }

    /// Load a session, or create it with the given defaults. A corrupt or
    /// unreadable journal logs a warning and yields a fresh session.
    pub async fn get_or_create(&self, id: &str, default_config: &SessionConfig) -> SessionState {
        if let Some(entry) = self.entry(id).await {
            return entry.lock().await.clone();
        }

        let state = match self.load_from_disk(id).await {
            Ok(Some(state)) => state,
            Ok(None) => SessionState::new(id, default_config.clone()),
            Err(err) => {
                warn!(session = id, %err, "journal unreadable, starting fresh session");
                SessionState::new(id, default_config.clone())
            }
        };

        let entry = {
            let mut sessions = self.sessions.write().await;
            sessions
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(state)))
                .clone()
        };
        let snapshot = entry.lock().await.clone();

        // Best-effort initial persist; a failure surfaces on the first append.
        if snapshot.history.is_empty() {
            if let Err(err) = self.persist(&snapshot).await {
                warn!(session = id, %err, "initial session persist failed");
            }
        }
        snapshot
    }

    /// Snapshot a session without creating it.
    pub async fn get(&self, id: &str) -> Option<SessionState> {
        if let Some(entry) = self.entry(id).await {
            return Some(entry.lock().await.clone());
        }
        match self.load_from_disk(id).await {
            Ok(found) => found,
            Err(err) => {
                warn!(session = id, %err, "journal unreadable");
                None
            }
        }
    }

    /// Replace a session's configuration.
    pub async fn update_config(&self, id: &str, config: SessionConfig) -> Result<PersistedState> {
        let entry = self
            .entry(id)
            .await
            .ok_or_else(|| Error::persistence(format!("unknown session '{}'", id)))?;
        let mut state = entry.lock().await;
        state.config = config;
        state.updated_at = Utc::now();
        let degraded = self.persist_with_retry(&state).await.is_err();
        Ok(PersistedState {
            state: state.clone(),
            persistence_degraded: degraded,
        })
    }

    /// Append one iteration. The in-memory state always advances; the
    /// outcome reports whether the journal write had to be abandoned.
    pub async fn append_iteration(
        &self,
        id: &str,
        record: IterationRecord,
    ) -> Result<PersistedState> {
        let entry = self
            .entry(id)
            .await
            .ok_or_else(|| Error::persistence(format!("unknown session '{}'", id)))?;
        let mut state = entry.lock().await;

        if state.is_complete {
            return Err(Error::SessionLocked(id.to_string()));
        }

        state.history.push(record);
        state.current_loop = state.history.len() as u32;
        state.updated_at = Utc::now();

        let degraded = self.persist_with_retry(&state).await.is_err();
        Ok(PersistedState {
            state: state.clone(),
            persistence_degraded: degraded,
        })
    }

    /// Mark a session complete. Idempotent: the first reason wins.
    pub async fn mark_complete(
        &self,
        id: &str,
        reason: CompletionReason,
    ) -> Result<PersistedState> {
        let entry = self
            .entry(id)
            .await
            .ok_or_else(|| Error::persistence(format!("unknown session '{}'", id)))?;
        let mut state = entry.lock().await;

        if !state.is_complete {
            state.is_complete = true;
            state.completion_reason = Some(reason);
            state.updated_at = Utc::now();
        }

        let degraded = self.persist_with_retry(&state).await.is_err();
        Ok(PersistedState {
            state: state.clone(),
            persistence_degraded: degraded,
        })
    }

    /// Remove sessions not updated within `age`. Fails soft: I/O errors are
    /// logged and the in-memory copy survives.
    pub async fn gc_older_than(&self, age: Duration) -> usize {
        let cutoff = Utc::now() - ChronoDuration::from_std(age).unwrap_or(ChronoDuration::zero());
        let mut removed = 0usize;

        let stale: Vec<String> = {
            let sessions = self.sessions.read().await;
            let mut stale = Vec::new();
            for (id, entry) in sessions.iter() {
                let state = entry.lock().await;
                if state.updated_at < cutoff {
                    stale.push(id.clone());
                }
            }
            stale
        };

        for id in stale {
            let mut sessions = self.sessions.write().await;
            sessions.remove(&id);
            drop(sessions);
            match fs::remove_file(self.path_for(&id)).await {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => removed += 1,
                Err(err) => warn!(session = %id, %err, "session GC failed, keeping file"),
            }
        }

        // Files on disk with no in-memory entry (from prior runs).
        if let Ok(mut dir) = fs::read_dir(&self.config.dir).await {
            while let Ok(Some(dirent)) = dir.next_entry().await {
                let path = dirent.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Ok(bytes) = fs::read(&path).await else {
                    continue;
                };
                let Ok(state) = serde_json::from_slice::<SessionState>(&bytes) else {
                    continue;
                };
                let in_memory = {
                    let sessions = self.sessions.read().await;
                    sessions.contains_key(&state.id)
                };
                if !in_memory && state.updated_at < cutoff {
                    if fs::remove_file(&path).await.is_ok() {
                        removed += 1;
                    }
                }
            }
        }

        debug!(removed, "session GC pass finished");
        removed
    }

    /// Ids of sessions currently known to the store.
    pub async fn list_sessions(&self) -> Vec<String> {
        let sessions = self.sessions.read().await;
        sessions.keys().cloned().collect()
    }

    async fn entry(&self, id: &str) -> Option<Arc<Mutex<SessionState>>> {
        let sessions = self.sessions.read().await;
        sessions.get(id).cloned()
    }

    fn path_for(&self, id: &str) -> PathBuf {
        let safe: String = id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.config.dir.join(format!("{}.json", safe))
    }

    async fn load_from_disk(&self, id: &str) -> Result<Option<SessionState>> {
        let path = self.path_for(id);
        match fs::read(&path).await {
            Ok(bytes) => {
                let state: SessionState = serde_json::from_slice(&bytes)?;
                let mut entry_map = self.sessions.write().await;
                let entry = entry_map
                    .entry(id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(state)))
                    .clone();
                drop(entry_map);
                let state = entry.lock().await.clone();
                Ok(Some(state))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::persistence(format!(
                "reading {}: {}",
                path.display(),
                err
            ))),
        }
    }

    async fn persist_with_retry(&self, state: &SessionState) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            match self.persist(state).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.config.write_retries => {
                    let delay = self.config.backoff_base * 2u32.pow(attempt);
                    warn!(session = %state.id, %err, attempt, "journal write failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(session = %state.id, %err, "journal write abandoned, state is in-memory only");
                    return Err(err);
                }
            }
        }
    }

    async fn persist(&self, state: &SessionState) -> Result<()> {
        fs::create_dir_all(&self.config.dir)
            .await
            .map_err(|e| Error::persistence(format!("creating state dir: {}", e)))?;

        let path = self.path_for(&state.id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(state)?;

        fs::write(&tmp, &bytes)
            .await
            .map_err(|e| Error::persistence(format!("writing {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::persistence(format!("renaming into {}: {}", path.display(), e)))?;
        Ok(())
    }
}

/// Periodic GC loop; run it from a spawned task and abort on shutdown.
pub async fn run_gc_loop(store: Arc<SessionStore>) {
    let mut interval = tokio::time::interval(store.config.cleanup_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        store.gc_older_than(store.config.max_session_age).await;
    }
}
