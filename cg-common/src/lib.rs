//! # ConvGuard Common Library
//!
//! Shared code for the ConvGuard crates:
//! - Conversation event, module result and verdict types
//! - Configuration loading (TOML bootstrap)
//! - Common error type

pub mod config;
pub mod error;
pub mod model;

pub use error::{Error, Result};
pub use model::{
    EscalationLevel, Event, EvidenceItem, FailureReason, HistoryEntry, ModuleFailure,
    ModuleResult, RecommendedAction, Sender, SessionHistory, SusceptibilityGrade,
    SusceptibilityReport, SynthesizedVerdict,
};
