//! Data model shared by the ConvGuard crates
//!
//! Every type here serializes to JSON for persistence and for the
//! subscriber stream. Maps are `BTreeMap` so a verdict always serializes to
//! the same bytes for the same content.

// Sub-modules (supporting types)
mod event_types;
mod result_types;
mod session_types;
mod verdict_types;

pub use event_types::{Event, Sender};
pub use result_types::{EvidenceItem, FailureReason, ModuleFailure, ModuleResult, RecommendedAction};
pub use session_types::{HistoryEntry, SessionHistory, SusceptibilityGrade, SusceptibilityReport};
pub use verdict_types::{EscalationLevel, SynthesizedVerdict};

/// Clamp a probability-like value into [0, 1], mapping non-finite input to 0.
pub fn unit_interval(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
