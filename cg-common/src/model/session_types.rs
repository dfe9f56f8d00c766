//! Session history and susceptibility types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Sender;

/// One retained event in a session's rolling history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub sender: Sender,
    pub text: String,
    /// Threat tags detected for this event (sorted, deduplicated)
    pub tags: Vec<String>,
    /// Overall score of the verdict produced for this event
    pub overall_score: f64,
}

/// Snapshot of a session's retained history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHistory {
    pub session_id: String,
    /// Entries in arrival order, oldest first
    pub entries: Vec<HistoryEntry>,
    /// Wall-clock time of the last recorded event (`None` when absent)
    pub last_activity: Option<DateTime<Utc>>,
}

impl SessionHistory {
    pub fn empty(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            entries: Vec::new(),
            last_activity: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The last `k` entries, oldest first
    pub fn window(&self, k: usize) -> &[HistoryEntry] {
        let start = self.entries.len().saturating_sub(k);
        &self.entries[start..]
    }
}

/// Longitudinal vulnerability grade
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum SusceptibilityGrade {
    #[default]
    Low,
    Medium,
    High,
}

/// Susceptibility score over a session's retained window
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SusceptibilityReport {
    /// 0..=100
    pub score: f64,
    pub grade: SusceptibilityGrade,
    /// Categories with non-zero contribution, strongest first
    pub trending_factors: Vec<String>,
    /// Number of history entries the score was computed over
    pub events_considered: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(text: &str) -> HistoryEntry {
        HistoryEntry {
            timestamp: Utc::now(),
            sender: Sender::User,
            text: text.to_string(),
            tags: Vec::new(),
            overall_score: 0.0,
        }
    }

    #[test]
    fn test_window_returns_most_recent() {
        let mut history = SessionHistory::empty("s");
        for t in ["a", "b", "c", "d"] {
            history.entries.push(entry(t));
        }
        let window: Vec<&str> = history.window(2).iter().map(|e| e.text.as_str()).collect();
        assert_eq!(window, vec!["c", "d"]);
        assert_eq!(history.window(10).len(), 4);
    }
}
