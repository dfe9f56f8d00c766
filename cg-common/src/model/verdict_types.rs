//! Synthesized verdict types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{ModuleResult, RecommendedAction, SusceptibilityReport};

/// Ordinal severity of a synthesized verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EscalationLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl EscalationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationLevel::None => "NONE",
            EscalationLevel::Low => "LOW",
            EscalationLevel::Medium => "MEDIUM",
            EscalationLevel::High => "HIGH",
            EscalationLevel::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for EscalationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single threat assessment produced for one event
///
/// Immutable once created: the escalation level is derived from the score
/// and module results at synthesis time and never recomputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedVerdict {
    pub session_id: String,
    pub event_ref: Uuid,
    pub overall_score: f64,
    pub escalation_level: EscalationLevel,
    pub recommended_action: RecommendedAction,
    pub per_module: BTreeMap<String, ModuleResult>,
    pub contributing_modules: usize,
    pub missing_modules: usize,
    /// Module with the highest weighted score (smallest id on ties)
    pub dominant_module: Option<String>,
    /// Sorted union of contributing modules' flags
    pub flags: Vec<String>,
    /// Session susceptibility before this event
    pub susceptibility: SusceptibilityReport,
    pub created_at: DateTime<Utc>,
}
