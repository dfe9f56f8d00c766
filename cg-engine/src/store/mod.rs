//! Verdict persistence
//!
//! The engine writes one [`SynthesizedVerdict`] per event and reads recent
//! verdicts per session to warm-start the session tracker. Persistence is
//! best-effort: callers log store failures and carry on with in-memory
//! state.

mod retry;
pub mod sqlite;

pub use retry::retry_on_lock;
pub use sqlite::SqliteVerdictStore;

use crate::session::SessionTracker;
use cg_common::{HistoryEntry, Result, Sender, SynthesizedVerdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// A persisted verdict with the event fields needed to rebuild history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredVerdict {
    pub session_id: String,
    pub sender: Sender,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub verdict: SynthesizedVerdict,
}

impl StoredVerdict {
    pub fn to_history_entry(&self) -> HistoryEntry {
        HistoryEntry {
            timestamp: self.timestamp,
            sender: self.sender,
            text: self.text.clone(),
            tags: self.verdict.flags.clone(),
            overall_score: self.verdict.overall_score,
        }
    }
}

/// Durable verdict storage keyed by session and time
#[async_trait::async_trait]
pub trait VerdictStore: Send + Sync {
    async fn save(&self, event: &cg_common::Event, verdict: &SynthesizedVerdict) -> Result<()>;

    /// Up to `limit` most recent verdicts for a session, oldest first
    async fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<StoredVerdict>>;

    /// Sessions with a verdict created at or after `since`
    async fn active_sessions(&self, since: DateTime<Utc>) -> Result<Vec<String>>;

    /// Release resources on shutdown
    async fn close(&self) {}
}

/// Seed the tracker with sessions active within the idle timeout
///
/// Returns the number of sessions seeded. Store errors are logged and
/// leave the affected sessions empty.
pub async fn warm_start(
    store: &dyn VerdictStore,
    tracker: &SessionTracker,
    idle_timeout: Duration,
    limit: usize,
) -> usize {
    let window = chrono::Duration::from_std(idle_timeout).unwrap_or_else(|_| chrono::Duration::zero());
    let since = Utc::now() - window;

    let sessions = match store.active_sessions(since).await {
        Ok(sessions) => sessions,
        Err(e) => {
            warn!(error = %e, "Warm start skipped: failed to list active sessions");
            return 0;
        }
    };

    let mut seeded = 0;
    for session_id in sessions {
        match store.recent(&session_id, limit).await {
            Ok(rows) if !rows.is_empty() => {
                tracker.seed(&session_id, rows.iter().map(StoredVerdict::to_history_entry).collect());
                seeded += 1;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Failed to load session history");
            }
        }
    }

    info!(sessions = seeded, "Session tracker warm-started from store");
    seeded
}
