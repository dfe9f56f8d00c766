//! SQLite verdict store and warm-start tests

mod helpers;

use cg_common::config::{SessionConfig, SusceptibilityConfig, TomlConfig};
use cg_engine::session::SessionTracker;
use cg_engine::store::{warm_start, SqliteVerdictStore, VerdictStore};
use chrono::{Duration as ChronoDuration, Utc};
use helpers::{event, pipeline_with, FailingStore, ScriptedAdapter};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn tracker() -> SessionTracker {
    SessionTracker::new(SessionConfig::default(), SusceptibilityConfig::default())
}

#[tokio::test]
async fn test_saved_verdicts_read_back_oldest_first() {
    let store: Arc<dyn VerdictStore> = Arc::new(SqliteVerdictStore::in_memory().await.unwrap());
    let pipeline = pipeline_with(
        &TomlConfig::default(),
        vec![ScriptedAdapter::scoring("A", 0.3)],
        Some(Arc::clone(&store)),
    );

    let mut refs = Vec::new();
    for n in 0..4 {
        let mut ev = event("s1", &format!("message {}", n));
        ev.timestamp = Utc::now() + ChronoDuration::milliseconds(n);
        refs.push(pipeline.submit(ev).await.unwrap().event_ref);
    }
    pipeline.submit(event("other", "hi")).await.unwrap();

    let recent = store.recent("s1", 10).await.unwrap();
    assert_eq!(recent.len(), 4);
    assert_eq!(
        recent.iter().map(|r| r.verdict.event_ref).collect::<Vec<_>>(),
        refs
    );
    assert_eq!(recent[0].text, "message 0");

    let limited = store.recent("s1", 2).await.unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].text, "message 2");
    assert_eq!(limited[1].text, "message 3");
}

#[tokio::test]
async fn test_stored_verdict_round_trips_fully() {
    let store = SqliteVerdictStore::in_memory().await.unwrap();
    let pipeline = pipeline_with(
        &TomlConfig::default(),
        vec![ScriptedAdapter::scoring("A", 0.55)],
        None,
    );
    let ev = event("s1", "hello");
    let verdict = pipeline.submit(ev.clone()).await.unwrap();

    store.save(&ev, &verdict).await.unwrap();
    // Saving the same verdict again replaces it
    store.save(&ev, &verdict).await.unwrap();

    let recent = store.recent("s1", 10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].verdict, verdict);
}

#[tokio::test]
async fn test_active_sessions_since() {
    let store = SqliteVerdictStore::in_memory().await.unwrap();
    let pipeline = pipeline_with(&TomlConfig::default(), vec![ScriptedAdapter::scoring("A", 0.1)], None);

    for session in ["b", "a", "b"] {
        let ev = event(session, &format!("text for {}", session));
        let verdict = pipeline.submit(ev.clone()).await.unwrap();
        store.save(&ev, &verdict).await.unwrap();
    }

    let since = Utc::now() - ChronoDuration::minutes(5);
    assert_eq!(store.active_sessions(since).await.unwrap(), vec!["a", "b"]);

    let future = Utc::now() + ChronoDuration::minutes(5);
    assert!(store.active_sessions(future).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_warm_start_seeds_tracker_from_file_database() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("verdicts.db");

    {
        let store: Arc<dyn VerdictStore> =
            Arc::new(SqliteVerdictStore::open(&db_path, 5000).await.unwrap());
        let pipeline = pipeline_with(
            &TomlConfig::default(),
            vec![ScriptedAdapter::new(
                "A",
                helpers::Script::Opinion(cg_engine::adapters::AdapterOpinion {
                    score: Some(0.4),
                    flags: vec!["grooming".to_string()],
                    ..Default::default()
                }),
            )],
            Some(Arc::clone(&store)),
        );
        pipeline.submit(event("s1", "one")).await.unwrap();
        pipeline.submit(event("s1", "two")).await.unwrap();
        store.close().await;
    }

    let store = SqliteVerdictStore::open(&db_path, 5000).await.unwrap();
    let tracker = tracker();
    let seeded = warm_start(&store, &tracker, Duration::from_secs(1800), 50).await;

    assert_eq!(seeded, 1);
    let history = tracker.history("s1");
    assert_eq!(
        history.entries.iter().map(|e| e.text.as_str()).collect::<Vec<_>>(),
        vec!["one", "two"]
    );
    assert_eq!(history.entries[0].tags, vec!["grooming"]);
    assert_eq!(tracker.susceptibility("s1").trending_factors, vec!["relational"]);
}

#[tokio::test]
async fn test_warm_start_tolerates_store_failure() {
    let tracker = tracker();
    let seeded = warm_start(&FailingStore, &tracker, Duration::from_secs(60), 50).await;
    assert_eq!(seeded, 0);
    assert_eq!(tracker.active_sessions(), 0);
}
