//! Test Helper Utilities
//!
//! Shared fixtures for cg-engine integration tests

#![allow(dead_code)]

use cg_common::config::TomlConfig;
use cg_common::{Event, Result, Sender, SynthesizedVerdict};
use cg_engine::adapters::{AdapterError, AdapterOpinion, ModuleAdapter, SessionContext};
use cg_engine::pipeline::Pipeline;
use cg_engine::store::{StoredVerdict, VerdictStore};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Scripted behaviour of a [`ScriptedAdapter`]
#[derive(Clone)]
pub enum Script {
    Opinion(AdapterOpinion),
    Error,
    Delay(Duration, AdapterOpinion),
}

/// Adapter with a fixed answer that counts its invocations
pub struct ScriptedAdapter {
    id: String,
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(id: &str, script: Script) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            script,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn scoring(id: &str, score: f64) -> Arc<Self> {
        Self::new(id, Script::Opinion(opinion(score)))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ModuleAdapter for ScriptedAdapter {
    fn module_id(&self) -> &str {
        &self.id
    }

    async fn invoke(
        &self,
        _normalized_text: &str,
        _ctx: &SessionContext,
        _deadline: Instant,
    ) -> std::result::Result<AdapterOpinion, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Opinion(opinion) => Ok(opinion.clone()),
            Script::Error => Err(AdapterError::Api("scripted failure".to_string())),
            Script::Delay(delay, opinion) => {
                tokio::time::sleep(*delay).await;
                Ok(opinion.clone())
            }
        }
    }
}

pub fn opinion(score: f64) -> AdapterOpinion {
    AdapterOpinion {
        score: Some(score),
        ..Default::default()
    }
}

/// Store whose every operation fails
pub struct FailingStore;

#[async_trait::async_trait]
impl VerdictStore for FailingStore {
    async fn save(&self, _event: &Event, _verdict: &SynthesizedVerdict) -> Result<()> {
        Err(cg_common::Error::Internal("disk on fire".to_string()))
    }

    async fn recent(&self, _session_id: &str, _limit: usize) -> Result<Vec<StoredVerdict>> {
        Err(cg_common::Error::Internal("disk on fire".to_string()))
    }

    async fn active_sessions(&self, _since: DateTime<Utc>) -> Result<Vec<String>> {
        Err(cg_common::Error::Internal("disk on fire".to_string()))
    }
}

pub fn event(session_id: &str, text: &str) -> Event {
    Event::new(session_id, Sender::User, text)
}

pub fn adapters(list: Vec<Arc<ScriptedAdapter>>) -> Vec<Arc<dyn ModuleAdapter>> {
    list.into_iter()
        .map(|a| a as Arc<dyn ModuleAdapter>)
        .collect()
}

/// Pipeline with default configuration and no persistence
pub fn pipeline(list: Vec<Arc<ScriptedAdapter>>) -> Arc<Pipeline> {
    Arc::new(Pipeline::from_config(&TomlConfig::default(), adapters(list), None))
}

pub fn pipeline_with(
    config: &TomlConfig,
    list: Vec<Arc<ScriptedAdapter>>,
    store: Option<Arc<dyn VerdictStore>>,
) -> Arc<Pipeline> {
    Arc::new(Pipeline::from_config(config, adapters(list), store))
}
