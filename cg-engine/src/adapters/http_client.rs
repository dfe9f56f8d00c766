//! External analysis service adapter
//!
//! POSTs the normalized text plus a little session context to a configured
//! endpoint and expects an [`AdapterOpinion`] JSON body back:
//!
//! ```json
//! { "score": 0.72, "flags": ["grooming"], "confidence": 0.9,
//!   "recommended_action": "alert", "evidence": [{"key": "model", "value": "v3"}] }
//! ```
//!
//! The request timeout is the time remaining before the shared deadline, so
//! a slow service fails fast instead of holding sockets past the event.

use super::{AdapterError, AdapterOpinion, ModuleAdapter, SessionContext};
use cg_common::config::HttpAdapterConfig;
use cg_common::Sender;
use reqwest::Client;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

/// Request body sent to the analysis service
#[derive(Debug, Serialize)]
struct AnalysisRequest<'a> {
    text: &'a str,
    session_id: &'a str,
    sender: Sender,
    prior_events: usize,
}

/// Analysis service client
pub struct HttpAnalysisAdapter {
    id: String,
    endpoint: String,
    api_key: Option<String>,
    http_client: Client,
}

impl HttpAnalysisAdapter {
    pub fn from_config(config: &HttpAdapterConfig) -> Result<Self, AdapterError> {
        let http_client = Client::builder()
            .build()
            .map_err(|e| AdapterError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            id: config.id.clone(),
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            http_client,
        })
    }
}

#[async_trait::async_trait]
impl ModuleAdapter for HttpAnalysisAdapter {
    fn module_id(&self) -> &str {
        &self.id
    }

    async fn invoke(
        &self,
        normalized_text: &str,
        ctx: &SessionContext,
        deadline: Instant,
    ) -> Result<AdapterOpinion, AdapterError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(AdapterError::DeadlineExceeded);
        }

        let body = AnalysisRequest {
            text: normalized_text,
            session_id: &ctx.session_id,
            sender: ctx.sender,
            prior_events: ctx.prior_events,
        };

        let mut request = self
            .http_client
            .post(&self.endpoint)
            .timeout(remaining)
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AdapterError::Network(format!("Request to {} failed: {}", self.endpoint, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AdapterError::Api(format!("HTTP {}: {}", status, text)));
        }

        let opinion: AdapterOpinion = response
            .json()
            .await
            .map_err(|e| AdapterError::Parse(format!("Invalid analysis response: {}", e)))?;

        debug!(
            module_id = %self.id,
            session_id = %ctx.session_id,
            score = ?opinion.score,
            "Analysis service responded"
        );

        Ok(opinion)
    }
}
