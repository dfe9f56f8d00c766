//! Periodic maintenance
//!
//! One cooperative loop purges expired cache entries and idle sessions.
//! The task moves `Idle -> Running -> Stopped`; it owns its loop state and
//! is stopped through a [`CancellationToken`], never through shared flags.

use crate::cache::ResultCache;
use crate::session::SessionTracker;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Observable lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
    Stopped,
}

enum Lifecycle {
    Idle,
    Running {
        token: CancellationToken,
        handle: JoinHandle<()>,
    },
    Stopped,
}

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub cache_purged: usize,
    pub sessions_expired: usize,
}

pub struct MaintenanceTask {
    cache: Arc<ResultCache>,
    tracker: Arc<SessionTracker>,
    period: Duration,
    sweeps: Arc<AtomicU64>,
    lifecycle: Mutex<Lifecycle>,
}

impl MaintenanceTask {
    pub fn new(cache: Arc<ResultCache>, tracker: Arc<SessionTracker>, period: Duration) -> Self {
        Self {
            cache,
            tracker,
            period,
            sweeps: Arc::new(AtomicU64::new(0)),
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    pub fn state(&self) -> TaskState {
        match &*self.lock() {
            Lifecycle::Idle => TaskState::Idle,
            Lifecycle::Running { .. } => TaskState::Running,
            Lifecycle::Stopped => TaskState::Stopped,
        }
    }

    /// Completed sweeps since start
    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn the sweep loop; returns false unless the task was idle
    pub fn start(&self) -> bool {
        let mut lifecycle = self.lock();
        if !matches!(*lifecycle, Lifecycle::Idle) {
            debug!("Maintenance task start ignored (not idle)");
            return false;
        }

        let token = CancellationToken::new();
        let loop_token = token.clone();
        let cache = Arc::clone(&self.cache);
        let tracker = Arc::clone(&self.tracker);
        let sweeps = Arc::clone(&self.sweeps);
        let period = self.period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let report = sweep(&cache, &tracker);
                        sweeps.fetch_add(1, Ordering::Relaxed);
                        if report != SweepReport::default() {
                            info!(
                                cache_purged = report.cache_purged,
                                sessions_expired = report.sessions_expired,
                                "Maintenance sweep"
                            );
                        }
                    }
                    _ = loop_token.cancelled() => {
                        debug!("Maintenance task shutting down");
                        break;
                    }
                }
            }
        });

        *lifecycle = Lifecycle::Running { token, handle };
        info!(period_secs = period.as_secs_f64(), "Maintenance task started");
        true
    }

    /// Cancel the loop and wait for it to finish
    pub async fn stop(&self) {
        let previous = std::mem::replace(&mut *self.lock(), Lifecycle::Stopped);
        match previous {
            Lifecycle::Running { token, handle } => {
                token.cancel();
                if let Err(e) = handle.await {
                    warn!(error = %e, "Maintenance task ended abnormally");
                }
                info!("Maintenance task stopped");
            }
            Lifecycle::Idle => {
                debug!("Maintenance task stopped before it started");
            }
            Lifecycle::Stopped => {
                debug!("Maintenance task already stopped");
            }
        }
    }

    /// Run one sweep immediately
    pub fn sweep_now(&self) -> SweepReport {
        sweep(&self.cache, &self.tracker)
    }
}

fn sweep(cache: &ResultCache, tracker: &SessionTracker) -> SweepReport {
    SweepReport {
        cache_purged: cache.purge_expired(),
        sessions_expired: tracker.expire_idle(),
    }
}
