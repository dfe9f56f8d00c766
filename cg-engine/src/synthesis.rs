//! Synthesis engine
//!
//! Folds one event's module results into a single [`SynthesizedVerdict`].
//! Synthesis is a pure function of its inputs: identical results and
//! history always yield the same verdict apart from `created_at`.
//!
//! # Policy
//! - Overall score is the worst signal (maximum `score * confidence`),
//!   never an average.
//! - A `block` recommendation or a critical flag forces at least HIGH.
//!   Without one, the level is capped at HIGH: CRITICAL is only reached
//!   when the score crosses the top threshold and a critical signal exists.
//! - The most severe recommended action wins.
//! - Equal weighted scores resolve to the smallest module id.
//! - No contributing modules yields score 0, NONE, action `none`.

use crate::session::score_susceptibility;
use cg_common::config::{SusceptibilityConfig, SynthesisConfig};
use cg_common::{
    EscalationLevel, ModuleResult, RecommendedAction, SessionHistory, SynthesizedVerdict,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Deterministic verdict synthesis
#[derive(Debug, Clone)]
pub struct SynthesisEngine {
    config: SynthesisConfig,
    scoring: SusceptibilityConfig,
    susceptibility_window: usize,
}

impl SynthesisEngine {
    pub fn new(
        config: SynthesisConfig,
        scoring: SusceptibilityConfig,
        susceptibility_window: usize,
    ) -> Self {
        Self {
            config,
            scoring,
            susceptibility_window,
        }
    }

    /// Map a score onto the configured thresholds
    pub fn level_for(&self, score: f64) -> EscalationLevel {
        let [low, medium, high, critical] = self.config.thresholds;
        if score >= critical {
            EscalationLevel::Critical
        } else if score >= high {
            EscalationLevel::High
        } else if score >= medium {
            EscalationLevel::Medium
        } else if score >= low {
            EscalationLevel::Low
        } else {
            EscalationLevel::None
        }
    }

    fn is_critical(&self, result: &ModuleResult) -> bool {
        result.recommended_action == Some(RecommendedAction::Block)
            || result
                .flags
                .iter()
                .any(|flag| self.config.critical_tags.contains(flag))
    }

    /// Combine module results and the pre-event history into one verdict
    pub fn synthesize(
        &self,
        session_id: &str,
        event_ref: Uuid,
        results: &[ModuleResult],
        history: &SessionHistory,
        created_at: DateTime<Utc>,
    ) -> SynthesizedVerdict {
        let per_module: BTreeMap<String, ModuleResult> = results
            .iter()
            .map(|r| (r.module_id.clone(), r.clone()))
            .collect();

        let contributing: Vec<&ModuleResult> =
            per_module.values().filter(|r| r.is_contributing()).collect();
        let missing_modules = per_module.len() - contributing.len();

        // BTreeMap order plus strict comparison keeps the smallest id on ties
        let mut dominant: Option<(&str, f64)> = None;
        for result in &contributing {
            let weighted = result.weighted_score().unwrap_or(0.0);
            if dominant.map_or(true, |(_, best)| weighted > best) {
                dominant = Some((result.module_id.as_str(), weighted));
            }
        }

        let overall_score = dominant.map(|(_, score)| score).unwrap_or(0.0);

        let numeric_level = if contributing.is_empty() {
            EscalationLevel::None
        } else {
            self.level_for(overall_score)
        };
        // CRITICAL needs a critical signal; score alone tops out at HIGH
        let escalation_level = if contributing.iter().any(|r| self.is_critical(r)) {
            numeric_level.max(EscalationLevel::High)
        } else {
            numeric_level.min(EscalationLevel::High)
        };

        let recommended_action = contributing
            .iter()
            .filter_map(|r| r.recommended_action)
            .max()
            .unwrap_or_default();

        let flags: BTreeSet<&String> = contributing.iter().flat_map(|r| r.flags.iter()).collect();

        SynthesizedVerdict {
            session_id: session_id.to_string(),
            event_ref,
            overall_score,
            escalation_level,
            recommended_action,
            contributing_modules: contributing.len(),
            missing_modules,
            dominant_module: dominant.map(|(id, _)| id.to_string()),
            flags: flags.into_iter().cloned().collect(),
            susceptibility: score_susceptibility(
                history.window(self.susceptibility_window),
                &self.scoring,
            ),
            created_at,
            per_module,
        }
    }
}
