//! Module orchestrator
//!
//! Runs every registered [`ModuleAdapter`] concurrently against one shared
//! per-event deadline, consulting the [`ResultCache`] first. Individual
//! adapter failures, panics and timeouts are isolated into failed
//! [`ModuleResult`]s; the orchestrator itself never fails.

use crate::adapters::{normalize_text, ModuleAdapter, SessionContext};
use crate::cache::{Fingerprint, Lookup, ResultCache};
use cg_common::config::MAX_DEADLINE_MS;
use cg_common::{Event, FailureReason, ModuleResult};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

/// Full per-module result set for one event plus timing metadata
#[derive(Debug, Clone, Default)]
pub struct SynthesizedInputs {
    /// One result per registered module, in registration order
    pub results: Vec<ModuleResult>,
    pub elapsed: Duration,
    pub cache_hits: usize,
    /// Results received from another event's in-flight call
    pub coalesced: usize,
    /// Adapter calls actually made for this event
    pub invoked: usize,
    pub timed_out: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    CacheHit,
    Coalesced,
    Invoked,
}

/// Aborts the wrapped task when dropped, so a cancelled event cancels its adapter calls
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Concurrent fan-out over the installed module adapters
pub struct ModuleOrchestrator {
    adapters: Vec<Arc<dyn ModuleAdapter>>,
    cache: Arc<ResultCache>,
    deadline: Duration,
}

impl ModuleOrchestrator {
    /// Adapters with a duplicate module id are skipped
    pub fn new(adapters: Vec<Arc<dyn ModuleAdapter>>, cache: Arc<ResultCache>, deadline: Duration) -> Self {
        let mut seen = HashSet::new();
        let adapters = adapters
            .into_iter()
            .filter(|adapter| {
                let fresh = seen.insert(adapter.module_id().to_string());
                if !fresh {
                    warn!(module_id = adapter.module_id(), "Duplicate module id, adapter skipped");
                }
                fresh
            })
            .collect();
        let max_deadline = Duration::from_millis(MAX_DEADLINE_MS);
        if deadline > max_deadline {
            warn!(deadline_ms = deadline.as_millis() as u64, "Module deadline clamped to {}ms", MAX_DEADLINE_MS);
        }
        Self {
            adapters,
            cache,
            deadline: deadline.min(max_deadline),
        }
    }

    /// Number of registered adapters
    pub fn count(&self) -> usize {
        self.adapters.len()
    }

    pub fn module_ids(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.module_id().to_string()).collect()
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Evaluate one event with every module
    ///
    /// Returns once every adapter has returned, failed or been cut off by
    /// the shared deadline, so callers never observe a partial set.
    pub async fn evaluate(&self, event: &Event, ctx: &SessionContext) -> SynthesizedInputs {
        let started = Instant::now();
        let deadline = started + self.deadline;
        let normalized: Arc<str> = Arc::from(normalize_text(&event.text));
        let ctx = Arc::new(ctx.clone());

        let futures = self.adapters.iter().map(|adapter| {
            self.evaluate_module(Arc::clone(adapter), Arc::clone(&normalized), Arc::clone(&ctx), deadline)
        });
        let settled = join_all(futures).await;

        let mut inputs = SynthesizedInputs {
            results: Vec::with_capacity(settled.len()),
            ..Default::default()
        };
        for (result, source) in settled {
            match source {
                Source::CacheHit => inputs.cache_hits += 1,
                Source::Coalesced => inputs.coalesced += 1,
                Source::Invoked => inputs.invoked += 1,
            }
            match result.failure_reason() {
                Some(FailureReason::Timeout) => inputs.timed_out += 1,
                Some(FailureReason::AdapterFailure) => inputs.failed += 1,
                None => {}
            }
            inputs.results.push(result);
        }
        inputs.elapsed = started.elapsed();

        debug!(
            session_id = %ctx.session_id,
            modules = inputs.results.len(),
            cache_hits = inputs.cache_hits,
            coalesced = inputs.coalesced,
            invoked = inputs.invoked,
            timed_out = inputs.timed_out,
            failed = inputs.failed,
            elapsed_ms = inputs.elapsed.as_millis() as u64,
            "Modules settled"
        );
        inputs
    }

    async fn evaluate_module(
        &self,
        adapter: Arc<dyn ModuleAdapter>,
        normalized: Arc<str>,
        ctx: Arc<SessionContext>,
        deadline: Instant,
    ) -> (ModuleResult, Source) {
        let module_id = adapter.module_id().to_string();
        let fingerprint = Fingerprint::compute(&module_id, &normalized, &ctx.session_id);

        match self.cache.lookup_or_claim(fingerprint) {
            Lookup::Hit(result) => {
                debug!(module_id = %module_id, fingerprint = ?fingerprint, "Cache hit");
                (result, Source::CacheHit)
            }
            Lookup::Pending(handle) => {
                debug!(module_id = %module_id, fingerprint = ?fingerprint, "Awaiting in-flight call");
                let result = match timeout_at(deadline, handle.wait()).await {
                    Ok(Some(result)) => result,
                    Ok(None) => ModuleResult::failed(
                        &module_id,
                        FailureReason::AdapterFailure,
                        "in-flight call abandoned",
                    ),
                    Err(_) => self.timeout_result(&module_id),
                };
                (result, Source::Coalesced)
            }
            Lookup::Claimed(guard) => {
                let result = self.invoke_bounded(adapter, normalized, ctx, deadline).await;
                guard.complete(&result);
                (result, Source::Invoked)
            }
            Lookup::Bypass => {
                let result = self.invoke_bounded(adapter, normalized, ctx, deadline).await;
                (result, Source::Invoked)
            }
        }
    }

    /// Invoke on a separate task so a panic or overrun is contained
    async fn invoke_bounded(
        &self,
        adapter: Arc<dyn ModuleAdapter>,
        normalized: Arc<str>,
        ctx: Arc<SessionContext>,
        deadline: Instant,
    ) -> ModuleResult {
        let module_id = adapter.module_id().to_string();
        let mut task = AbortOnDrop(tokio::spawn(async move {
            adapter.invoke(&normalized, &ctx, deadline).await
        }));

        match timeout_at(deadline, &mut task.0).await {
            Ok(Ok(Ok(opinion))) => {
                let result = opinion.into_result(&module_id);
                debug!(
                    module_id = %module_id,
                    score = ?result.score,
                    flags = ?result.flags,
                    "Module returned"
                );
                result
            }
            Ok(Ok(Err(e))) => {
                warn!(module_id = %module_id, error = %e, "Module failed (isolated)");
                ModuleResult::failed(&module_id, FailureReason::AdapterFailure, e.to_string())
            }
            Ok(Err(join_error)) => {
                let message = if join_error.is_panic() {
                    "adapter panicked"
                } else {
                    "adapter task cancelled"
                };
                warn!(module_id = %module_id, "Module {} (isolated)", message);
                ModuleResult::failed(&module_id, FailureReason::AdapterFailure, message)
            }
            Err(_) => {
                task.0.abort();
                self.timeout_result(&module_id)
            }
        }
    }

    fn timeout_result(&self, module_id: &str) -> ModuleResult {
        warn!(
            module_id = %module_id,
            deadline_ms = self.deadline.as_millis() as u64,
            "Module timed out"
        );
        ModuleResult::failed(
            module_id,
            FailureReason::Timeout,
            format!("deadline of {}ms elapsed", self.deadline.as_millis()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{context, Behavior, MockAdapter};
    use crate::adapters::AdapterOpinion;
    use cg_common::config::CacheConfig;

    fn cache() -> Arc<ResultCache> {
        Arc::new(ResultCache::new(&CacheConfig::default()))
    }

    fn opinion(score: f64) -> AdapterOpinion {
        AdapterOpinion {
            score: Some(score),
            confidence: Some(1.0),
            ..Default::default()
        }
    }

    fn event(session_id: &str, text: &str) -> Event {
        Event::new(session_id, cg_common::Sender::User, text)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_isolated() {
        let a = Arc::new(MockAdapter::new("a", Behavior::Respond(opinion(0.9))));
        let b = Arc::new(MockAdapter::new(
            "b",
            Behavior::Slow(Duration::from_secs(10), opinion(0.5)),
        ));
        let orchestrator = ModuleOrchestrator::new(vec![a, b], cache(), Duration::from_secs(2));

        let inputs = orchestrator.evaluate(&event("s", "hello"), &context("s")).await;

        assert_eq!(inputs.results.len(), 2);
        assert_eq!(inputs.results[0].score, Some(0.9));
        assert_eq!(inputs.results[1].failure_reason(), Some(FailureReason::Timeout));
        assert_eq!(inputs.timed_out, 1);
        assert!(inputs.elapsed <= Duration::from_secs(2) + Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_modules_share_one_deadline() {
        let adapters: Vec<Arc<dyn ModuleAdapter>> = (0..4)
            .map(|i| {
                Arc::new(MockAdapter::new(
                    &format!("m{}", i),
                    Behavior::Slow(Duration::from_millis(500), opinion(0.1)),
                )) as Arc<dyn ModuleAdapter>
            })
            .collect();
        let orchestrator = ModuleOrchestrator::new(adapters, cache(), Duration::from_secs(1));

        let inputs = orchestrator.evaluate(&event("s", "x"), &context("s")).await;

        assert_eq!(inputs.timed_out, 0);
        assert!(inputs.elapsed < Duration::from_secs(1), "ran concurrently, not serially");
    }

    #[tokio::test]
    async fn test_failure_and_panic_are_isolated() {
        let ok = Arc::new(MockAdapter::scoring("ok", 0.3));
        let failing = Arc::new(MockAdapter::new("failing", Behavior::Fail));
        let panicking = Arc::new(MockAdapter::new("panicking", Behavior::Panic));
        let orchestrator =
            ModuleOrchestrator::new(vec![ok, failing, panicking], cache(), Duration::from_secs(2));

        let inputs = orchestrator.evaluate(&event("s", "text"), &context("s")).await;

        assert!(inputs.results[0].is_contributing());
        assert_eq!(inputs.results[1].failure_reason(), Some(FailureReason::AdapterFailure));
        assert_eq!(inputs.results[2].failure_reason(), Some(FailureReason::AdapterFailure));
        assert_eq!(inputs.failed, 2);
    }

    #[tokio::test]
    async fn test_second_evaluation_served_from_cache() {
        let adapter = Arc::new(MockAdapter::scoring("a", 0.4));
        let orchestrator =
            ModuleOrchestrator::new(vec![adapter.clone()], cache(), Duration::from_secs(2));

        let first = orchestrator.evaluate(&event("s", "Hello  World"), &context("s")).await;
        let second = orchestrator.evaluate(&event("s", "hello world"), &context("s")).await;

        assert_eq!(adapter.call_count(), 1);
        assert_eq!(second.cache_hits, 1);
        assert_eq!(second.invoked, 0);
        assert_eq!(first.results, second.results);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let adapter = Arc::new(MockAdapter::new("a", Behavior::Fail));
        let orchestrator =
            ModuleOrchestrator::new(vec![adapter.clone()], cache(), Duration::from_secs(2));

        orchestrator.evaluate(&event("s", "x"), &context("s")).await;
        orchestrator.evaluate(&event("s", "x"), &context("s")).await;

        assert_eq!(adapter.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_duplicates_collapse_to_one_call() {
        let adapter = Arc::new(MockAdapter::new(
            "slow",
            Behavior::Slow(Duration::from_millis(200), opinion(0.6)),
        ));
        let orchestrator = Arc::new(ModuleOrchestrator::new(
            vec![adapter.clone()],
            cache(),
            Duration::from_secs(2),
        ));

        let ev = event("s", "same text");
        let ctx = context("s");
        let runs = (0..8).map(|_| orchestrator.evaluate(&ev, &ctx));
        let all = join_all(runs).await;

        assert_eq!(adapter.call_count(), 1);
        assert_eq!(all.iter().map(|i| i.invoked).sum::<usize>(), 1);
        assert_eq!(all.iter().map(|i| i.coalesced).sum::<usize>(), 7);
        for inputs in &all {
            assert_eq!(inputs.results, all[0].results);
        }
    }

    #[tokio::test]
    async fn test_disabled_cache_invokes_every_time() {
        let adapter = Arc::new(MockAdapter::scoring("a", 0.4));
        let orchestrator = ModuleOrchestrator::new(
            vec![adapter.clone()],
            Arc::new(ResultCache::disabled()),
            Duration::from_secs(2),
        );

        orchestrator.evaluate(&event("s", "x"), &context("s")).await;
        orchestrator.evaluate(&event("s", "x"), &context("s")).await;

        assert_eq!(adapter.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_cache_still_collapses_concurrent_duplicates() {
        let adapter = Arc::new(MockAdapter::new(
            "slow",
            Behavior::Slow(Duration::from_millis(200), opinion(0.6)),
        ));
        let orchestrator = ModuleOrchestrator::new(
            vec![adapter.clone()],
            Arc::new(ResultCache::disabled()),
            Duration::from_secs(2),
        );

        let ev = event("s", "same text");
        let ctx = context("s");
        let all = join_all((0..8).map(|_| orchestrator.evaluate(&ev, &ctx))).await;

        assert_eq!(adapter.call_count(), 1);
        assert_eq!(all.iter().map(|i| i.coalesced).sum::<usize>(), 7);
        assert!(orchestrator.cache().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_deadline_is_clamped() {
        let orchestrator = ModuleOrchestrator::new(
            vec![Arc::new(MockAdapter::scoring("a", 0.2))],
            cache(),
            Duration::MAX,
        );
        let inputs = orchestrator.evaluate(&event("s", "x"), &context("s")).await;
        assert_eq!(inputs.results[0].score, Some(0.2));
    }

    #[test]
    fn test_duplicate_module_ids_skipped() {
        let orchestrator = ModuleOrchestrator::new(
            vec![
                Arc::new(MockAdapter::scoring("a", 0.1)),
                Arc::new(MockAdapter::scoring("a", 0.2)),
                Arc::new(MockAdapter::scoring("b", 0.3)),
            ],
            cache(),
            Duration::from_secs(1),
        );
        assert_eq!(orchestrator.module_ids(), vec!["a", "b"]);
    }
}
