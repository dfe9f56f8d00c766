//! Event ingestion pipeline
//!
//! Validates an event, then evaluates, synthesizes, records, publishes and
//! persists it. Events of one session pass through a FIFO lane so history
//! is appended in arrival order; different sessions run fully in parallel.

use crate::adapters::{ModuleAdapter, SessionContext};
use crate::broadcast::BroadcastHub;
use crate::cache::ResultCache;
use crate::orchestrator::ModuleOrchestrator;
use crate::session::SessionTracker;
use crate::store::VerdictStore;
use crate::synthesis::SynthesisEngine;
use cg_common::config::TomlConfig;
use cg_common::{Event, Result, SessionHistory, SynthesizedVerdict};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Per-event processing: orchestrate, synthesize, record, publish, persist
pub struct Pipeline {
    orchestrator: ModuleOrchestrator,
    synthesis: SynthesisEngine,
    tracker: Arc<SessionTracker>,
    hub: BroadcastHub,
    store: Option<Arc<dyn VerdictStore>>,
    lanes: DashMap<String, Arc<Mutex<()>>>,
}

impl Pipeline {
    pub fn new(
        orchestrator: ModuleOrchestrator,
        synthesis: SynthesisEngine,
        tracker: Arc<SessionTracker>,
        hub: BroadcastHub,
        store: Option<Arc<dyn VerdictStore>>,
    ) -> Self {
        Self {
            orchestrator,
            synthesis,
            tracker,
            hub,
            store,
            lanes: DashMap::new(),
        }
    }

    /// Wire every component from configuration
    pub fn from_config(
        config: &TomlConfig,
        adapters: Vec<Arc<dyn ModuleAdapter>>,
        store: Option<Arc<dyn VerdictStore>>,
    ) -> Self {
        let cache = Arc::new(ResultCache::new(&config.cache));
        let orchestrator = ModuleOrchestrator::new(adapters, cache, config.orchestrator.deadline());
        let synthesis = SynthesisEngine::new(
            config.synthesis.clone(),
            config.susceptibility.clone(),
            config.sessions.susceptibility_window,
        );
        let tracker = Arc::new(SessionTracker::new(
            config.sessions.clone(),
            config.susceptibility.clone(),
        ));
        let hub = BroadcastHub::new(config.broadcast.subscriber_buffer);
        Self::new(orchestrator, synthesis, tracker, hub, store)
    }

    pub fn tracker(&self) -> &Arc<SessionTracker> {
        &self.tracker
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        self.orchestrator.cache()
    }

    pub fn store(&self) -> Option<&Arc<dyn VerdictStore>> {
        self.store.as_ref()
    }

    pub fn module_ids(&self) -> Vec<String> {
        self.orchestrator.module_ids()
    }

    /// Process one event into exactly one verdict
    ///
    /// Only caller input validation fails; every downstream fault degrades
    /// into the verdict or a log line.
    pub async fn submit(&self, mut event: Event) -> Result<SynthesizedVerdict> {
        event.validate()?;
        let event_ref = *event.event_id.get_or_insert_with(Uuid::new_v4);
        let session_id = event.session_id.clone();

        let lane = self.lane(&session_id);
        let verdict = {
            let _turn = lane.lock().await;

            let history = self.tracker.history(&session_id);
            let ctx = session_context(&event, &history);
            let inputs = self.orchestrator.evaluate(&event, &ctx).await;
            let verdict = self.synthesis.synthesize(
                &session_id,
                event_ref,
                &inputs.results,
                &history,
                Utc::now(),
            );

            self.tracker.record(&event, &verdict);
            let delivered = self.hub.publish(verdict.clone());

            info!(
                session_id = %session_id,
                event_ref = %event_ref,
                score = verdict.overall_score,
                level = %verdict.escalation_level,
                action = verdict.recommended_action.as_str(),
                contributing = verdict.contributing_modules,
                missing = verdict.missing_modules,
                cache_hits = inputs.cache_hits,
                elapsed_ms = inputs.elapsed.as_millis() as u64,
                delivered,
                "Event assessed"
            );
            verdict
        };
        drop(lane);
        self.lanes
            .remove_if(&session_id, |_, lane| Arc::strong_count(lane) == 1);

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&event, &verdict).await {
                warn!(
                    session_id = %session_id,
                    event_ref = %event_ref,
                    error = %e,
                    "Failed to persist verdict, continuing"
                );
            }
        }

        Ok(verdict)
    }

    fn lane(&self, session_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.lanes
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }
}

fn session_context(event: &Event, history: &SessionHistory) -> SessionContext {
    let recent_tags: BTreeSet<&String> = history.entries.iter().flat_map(|e| e.tags.iter()).collect();
    SessionContext {
        session_id: event.session_id.clone(),
        sender: event.sender,
        timestamp: event.timestamp,
        prior_events: history.len(),
        recent_tags: recent_tags.into_iter().cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{Behavior, MockAdapter};
    use crate::adapters::AdapterOpinion;
    use cg_common::{EscalationLevel, Error, RecommendedAction, Sender};
    use std::time::Duration;

    fn pipeline(adapters: Vec<Arc<dyn ModuleAdapter>>) -> Pipeline {
        Pipeline::from_config(&TomlConfig::default(), adapters, None)
    }

    #[tokio::test]
    async fn test_rejects_invalid_event() {
        let pipeline = pipeline(vec![Arc::new(MockAdapter::scoring("a", 0.5))]);
        let err = pipeline
            .submit(Event::new("", Sender::User, "text"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let err = pipeline
            .submit(Event::new("s", Sender::User, "   "))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_verdict_recorded_and_published() {
        let adapter = MockAdapter::new(
            "a",
            Behavior::Respond(AdapterOpinion {
                score: Some(0.65),
                flags: vec!["grooming".to_string()],
                recommended_action: Some(RecommendedAction::Alert),
                ..Default::default()
            }),
        );
        let pipeline = pipeline(vec![Arc::new(adapter)]);
        let mut subscription = pipeline.hub().subscribe();

        let verdict = pipeline
            .submit(Event::new("s", Sender::User, "hello"))
            .await
            .unwrap();

        assert_eq!(verdict.escalation_level, EscalationLevel::High);
        assert_eq!(verdict.recommended_action, RecommendedAction::Alert);
        let published = subscription.recv().await.unwrap();
        assert_eq!(published.event_ref, verdict.event_ref);

        let history = pipeline.tracker().history("s");
        assert_eq!(history.len(), 1);
        assert_eq!(history.entries[0].tags, vec!["grooming"]);
    }

    #[tokio::test]
    async fn test_caller_event_id_is_kept() {
        let pipeline = pipeline(vec![Arc::new(MockAdapter::scoring("a", 0.1))]);
        let mut event = Event::new("s", Sender::Ai, "hi");
        let id = Uuid::new_v4();
        event.event_id = Some(id);
        let verdict = pipeline.submit(event).await.unwrap();
        assert_eq!(verdict.event_ref, id);
    }

    #[tokio::test]
    async fn test_all_modules_failing_still_yields_verdict() {
        let pipeline = pipeline(vec![
            Arc::new(MockAdapter::new("a", Behavior::Fail)),
            Arc::new(MockAdapter::new("b", Behavior::Panic)),
        ]);
        let verdict = pipeline
            .submit(Event::new("s", Sender::User, "x"))
            .await
            .unwrap();
        assert_eq!(verdict.overall_score, 0.0);
        assert_eq!(verdict.escalation_level, EscalationLevel::None);
        assert_eq!(verdict.missing_modules, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_session_events_recorded_in_arrival_order() {
        let slow = MockAdapter::new(
            "slow",
            Behavior::Slow(Duration::from_millis(100), AdapterOpinion::default()),
        );
        let pipeline = Arc::new(pipeline(vec![Arc::new(slow)]));

        let mut handles = Vec::new();
        for n in 0..5 {
            let pipeline = Arc::clone(&pipeline);
            handles.push(tokio::spawn(async move {
                pipeline
                    .submit(Event::new("s", Sender::User, format!("message {}", n)))
                    .await
            }));
            // Let the spawned submit reach its lane before the next one
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let texts: Vec<String> = pipeline
            .tracker()
            .history("s")
            .entries
            .into_iter()
            .map(|e| e.text)
            .collect();
        let expected: Vec<String> = (0..5).map(|n| format!("message {}", n)).collect();
        assert_eq!(texts, expected);
        assert!(pipeline.lanes.is_empty());
    }

    #[tokio::test]
    async fn test_history_feeds_next_context() {
        let pipeline = pipeline(vec![Arc::new(MockAdapter::new(
            "a",
            Behavior::Respond(AdapterOpinion {
                score: Some(0.3),
                flags: vec!["emotional_vulnerability".to_string()],
                ..Default::default()
            }),
        ))]);
        pipeline.submit(Event::new("s", Sender::User, "first")).await.unwrap();
        let second = pipeline.submit(Event::new("s", Sender::User, "second")).await.unwrap();

        // Susceptibility reflects the history before the second event
        assert_eq!(second.susceptibility.events_considered, 1);
        assert_eq!(second.susceptibility.trending_factors, vec!["emotional"]);
    }
}
