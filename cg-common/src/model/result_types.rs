//! Per-module analysis result types

use serde::{Deserialize, Serialize};

use super::unit_interval;

/// Action a module (or the synthesized verdict) recommends
///
/// Variants are declared in ascending severity so `Ord` ranks them:
/// `None < Log < Alert < Escalate < Block`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RecommendedAction {
    #[default]
    None,
    Log,
    Alert,
    Escalate,
    Block,
}

impl RecommendedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendedAction::None => "none",
            RecommendedAction::Log => "log",
            RecommendedAction::Alert => "alert",
            RecommendedAction::Escalate => "escalate",
            RecommendedAction::Block => "block",
        }
    }
}

/// Why a module produced no evidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The shared per-event deadline elapsed first
    Timeout,
    /// The adapter returned an error, panicked, or was abandoned
    AdapterFailure,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Timeout => "timeout",
            FailureReason::AdapterFailure => "adapter_failure",
        }
    }
}

/// Failure descriptor attached to a [`ModuleResult`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleFailure {
    pub reason: FailureReason,
    pub message: String,
}

/// Module-specific key/value detail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub key: String,
    pub value: String,
}

impl EvidenceItem {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Opinion of one analysis module about one event
///
/// Either the opinion fields or `error` are meaningful, never both: a module
/// that failed or timed out carries only `error` and counts as absent
/// evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleResult {
    pub module_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_action: Option<RecommendedAction>,
    #[serde(default)]
    pub evidence: Vec<EvidenceItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ModuleFailure>,
}

impl ModuleResult {
    /// Successful result with a score clamped into [0, 1]
    pub fn scored(module_id: impl Into<String>, score: f64) -> Self {
        Self {
            module_id: module_id.into(),
            score: Some(unit_interval(score)),
            flags: Vec::new(),
            confidence: None,
            recommended_action: None,
            evidence: Vec::new(),
            error: None,
        }
    }

    /// Result carrying only a failure descriptor
    pub fn failed(module_id: impl Into<String>, reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            score: None,
            flags: Vec::new(),
            confidence: None,
            recommended_action: None,
            evidence: Vec::new(),
            error: Some(ModuleFailure {
                reason,
                message: message.into(),
            }),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(unit_interval(confidence));
        self
    }

    pub fn with_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_action(mut self, action: RecommendedAction) -> Self {
        self.recommended_action = Some(action);
        self
    }

    pub fn with_evidence(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.evidence.push(EvidenceItem::new(key, value));
        self
    }

    /// True when the module produced an opinion
    pub fn is_contributing(&self) -> bool {
        self.error.is_none()
    }

    /// `score * confidence` (confidence defaults to 1.0), or `None` for failures.
    ///
    /// A contributing module without a score contributes 0.
    pub fn weighted_score(&self) -> Option<f64> {
        if !self.is_contributing() {
            return None;
        }
        let score = self.score.map(unit_interval).unwrap_or(0.0);
        let confidence = self.confidence.map(unit_interval).unwrap_or(1.0);
        Some(unit_interval(score * confidence))
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        self.error.as_ref().map(|e| e.reason)
    }
}
