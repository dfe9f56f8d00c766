//! Session tracker
//!
//! Bounded rolling history per session id with idle expiry, plus the
//! longitudinal susceptibility score computed over the retained window.
//!
//! # Lifecycle
//! `ABSENT -> ACTIVE` on the first recorded event, `ACTIVE -> ACTIVE` on
//! each further event (refreshing last activity), `ACTIVE -> EXPIRED` once
//! the idle timeout elapses. Expired history is discarded; the next event
//! for the same id starts a fresh session.
//!
//! Mutations of one session are serialized by the map's per-entry lock;
//! different sessions proceed in parallel.

use cg_common::config::{SessionConfig, SusceptibilityConfig};
use cg_common::{
    Event, HistoryEntry, SessionHistory, SusceptibilityGrade, SusceptibilityReport,
    SynthesizedVerdict,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

struct SessionState {
    entries: VecDeque<HistoryEntry>,
    last_activity: Instant,
    last_activity_wall: DateTime<Utc>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            last_activity: Instant::now(),
            last_activity_wall: Utc::now(),
        }
    }

    fn is_expired(&self, idle_timeout: Duration) -> bool {
        self.last_activity.elapsed() >= idle_timeout
    }

    fn snapshot(&self, session_id: &str) -> SessionHistory {
        SessionHistory {
            session_id: session_id.to_string(),
            entries: self.entries.iter().cloned().collect(),
            last_activity: Some(self.last_activity_wall),
        }
    }
}

/// Per-session rolling history with idle expiry
pub struct SessionTracker {
    sessions: DashMap<String, SessionState>,
    config: SessionConfig,
    scoring: SusceptibilityConfig,
}

impl SessionTracker {
    pub fn new(config: SessionConfig, scoring: SusceptibilityConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
            scoring,
        }
    }

    /// Append the event and its verdict in arrival order
    ///
    /// An expired session is reset before the append; the oldest entries
    /// are evicted once the history cap is exceeded.
    pub fn record(&self, event: &Event, verdict: &SynthesizedVerdict) {
        let entry = HistoryEntry {
            timestamp: event.timestamp,
            sender: event.sender,
            text: event.text.clone(),
            tags: verdict.flags.clone(),
            overall_score: verdict.overall_score,
        };

        let idle_timeout = self.config.idle_timeout();
        let mut state = self
            .sessions
            .entry(event.session_id.clone())
            .or_insert_with(SessionState::new);

        if state.is_expired(idle_timeout) && !state.entries.is_empty() {
            info!(session_id = %event.session_id, "Session expired, starting fresh history");
            state.entries.clear();
        }

        state.entries.push_back(entry);
        while state.entries.len() > self.config.history_cap {
            state.entries.pop_front();
        }
        state.last_activity = Instant::now();
        state.last_activity_wall = Utc::now();

        debug!(
            session_id = %event.session_id,
            retained = state.entries.len(),
            "Session history updated"
        );
    }

    /// Snapshot of the retained history; empty for absent or expired sessions
    pub fn history(&self, session_id: &str) -> SessionHistory {
        if self.expire_if_idle(session_id) {
            return SessionHistory::empty(session_id);
        }
        self.sessions
            .get(session_id)
            .map(|state| state.snapshot(session_id))
            .unwrap_or_else(|| SessionHistory::empty(session_id))
    }

    /// Susceptibility over the session's retained window
    pub fn susceptibility(&self, session_id: &str) -> SusceptibilityReport {
        let history = self.history(session_id);
        score_susceptibility(
            history.window(self.config.susceptibility_window),
            &self.scoring,
        )
    }

    /// Replace a session's history, e.g. when warm-starting from the store
    ///
    /// Entries beyond the history cap are dropped oldest-first.
    pub fn seed(&self, session_id: &str, entries: Vec<HistoryEntry>) {
        if entries.is_empty() {
            return;
        }
        let mut entries: VecDeque<HistoryEntry> = entries.into();
        while entries.len() > self.config.history_cap {
            entries.pop_front();
        }
        let last_activity_wall = entries
            .back()
            .map(|e| e.timestamp)
            .unwrap_or_else(Utc::now);
        self.sessions.insert(
            session_id.to_string(),
            SessionState {
                entries,
                last_activity: Instant::now(),
                last_activity_wall,
            },
        );
    }

    /// Remove every session idle longer than the timeout
    pub fn expire_idle(&self) -> usize {
        let idle_timeout = self.config.idle_timeout();
        let before = self.sessions.len();
        self.sessions.retain(|session_id, state| {
            let keep = !state.is_expired(idle_timeout);
            if !keep {
                debug!(session_id = %session_id, "Session expired");
            }
            keep
        });
        before.saturating_sub(self.sessions.len())
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn expire_if_idle(&self, session_id: &str) -> bool {
        let idle_timeout = self.config.idle_timeout();
        let removed = self
            .sessions
            .remove_if(session_id, |_, state| state.is_expired(idle_timeout))
            .is_some();
        if removed {
            debug!(session_id = %session_id, "Session expired on access");
        }
        removed
    }
}

/// Susceptibility of a history window
///
/// Each category's tag occurrences are divided by the number of events,
/// multiplied by the category weight, summed and capped at 100.
pub fn score_susceptibility(
    entries: &[HistoryEntry],
    config: &SusceptibilityConfig,
) -> SusceptibilityReport {
    if entries.is_empty() {
        return SusceptibilityReport::default();
    }

    let events = entries.len() as f64;
    let categories = [
        ("relational", config.relational_weight, &config.relational_tags),
        ("emotional", config.emotional_weight, &config.emotional_tags),
        ("behavioral", config.behavioral_weight, &config.behavioral_tags),
    ];

    let mut contributions: Vec<(&str, f64)> = categories
        .iter()
        .map(|(name, weight, tags)| {
            let occurrences = entries
                .iter()
                .map(|entry| {
                    let unique: BTreeSet<&String> = entry.tags.iter().collect();
                    unique.into_iter().filter(|t| tags.contains(t)).count()
                })
                .sum::<usize>() as f64;
            (*name, occurrences / events * weight)
        })
        .collect();

    let score = contributions
        .iter()
        .map(|(_, c)| c)
        .sum::<f64>()
        .clamp(0.0, 100.0);

    let grade = if score < config.medium_threshold {
        SusceptibilityGrade::Low
    } else if score < config.high_threshold {
        SusceptibilityGrade::Medium
    } else {
        SusceptibilityGrade::High
    };

    contributions.retain(|(_, c)| *c > 0.0);
    contributions.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    SusceptibilityReport {
        score,
        grade,
        trending_factors: contributions.into_iter().map(|(name, _)| name.to_string()).collect(),
        events_considered: entries.len(),
    }
}
