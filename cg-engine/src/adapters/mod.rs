//! Module adapters
//!
//! Each adapter wraps one analysis capability behind the uniform
//! [`ModuleAdapter`] trait so the orchestrator can run all of them
//! concurrently against one shared deadline.
//!
//! # Adapters
//! 1. **rule_table** - keyword rule tables matched against normalized text
//! 2. **http_client** - external analysis service reached over HTTP
//!
//! Adapter failures never escape the orchestrator: an `Err` (or a panic, or
//! a missed deadline) becomes a `ModuleResult` carrying only `error`.

pub mod http_client;
pub mod rule_table;

pub use http_client::HttpAnalysisAdapter;
pub use rule_table::RuleTableAdapter;

use cg_common::config::AdaptersConfig;
use cg_common::model::unit_interval;
use cg_common::{EvidenceItem, ModuleResult, RecommendedAction, Sender};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;

/// Session snapshot handed to adapters alongside the event text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionContext {
    pub session_id: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    /// Events already retained for this session
    pub prior_events: usize,
    /// Sorted union of tags over the retained history
    pub recent_tags: Vec<String>,
}

/// What an adapter concluded about one event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterOpinion {
    pub score: Option<f64>,
    pub flags: Vec<String>,
    pub confidence: Option<f64>,
    pub recommended_action: Option<RecommendedAction>,
    pub evidence: Vec<EvidenceItem>,
}

impl AdapterOpinion {
    /// Attach the module id, clamping score and confidence into [0, 1]
    pub fn into_result(self, module_id: &str) -> ModuleResult {
        ModuleResult {
            module_id: module_id.to_string(),
            score: self.score.map(unit_interval),
            flags: self.flags,
            confidence: self.confidence.map(unit_interval),
            recommended_action: self.recommended_action,
            evidence: self.evidence,
            error: None,
        }
    }
}

/// Adapter-local failure, recorded as `adapter_failure`
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Network communication error
    #[error("Network error: {0}")]
    Network(String),

    /// External service answered with an error status
    #[error("API error: {0}")]
    Api(String),

    /// Failed to parse the service response
    #[error("Parse error: {0}")]
    Parse(String),

    /// Deadline already elapsed before the call could start
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// Internal processing error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Uniform wrapper around one analysis capability
///
/// Implementations receive normalized text and must respect `deadline`;
/// the orchestrator enforces it regardless and aborts calls that overrun.
#[async_trait::async_trait]
pub trait ModuleAdapter: Send + Sync {
    /// Stable module identifier, unique per installation
    fn module_id(&self) -> &str;

    async fn invoke(
        &self,
        normalized_text: &str,
        ctx: &SessionContext,
        deadline: Instant,
    ) -> Result<AdapterOpinion, AdapterError>;
}

/// Case-fold and collapse whitespace so near-identical submissions match
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build every adapter named in the configuration
pub fn build_adapters(config: &AdaptersConfig) -> Result<Vec<Arc<dyn ModuleAdapter>>, AdapterError> {
    let mut adapters: Vec<Arc<dyn ModuleAdapter>> = Vec::new();
    for table in &config.rules {
        adapters.push(Arc::new(RuleTableAdapter::from_config(table)));
    }
    for http in &config.http {
        adapters.push(Arc::new(HttpAnalysisAdapter::from_config(http)?));
    }
    Ok(adapters)
}

// ============================================================================
// Mock Adapters for Testing
// ============================================================================
