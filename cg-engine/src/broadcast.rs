//! Broadcast hub
//!
//! Fans each published verdict out to every live subscriber through an
//! independent bounded queue per subscriber. A subscriber whose queue is
//! closed (transport gone) or full (not keeping up) is unregistered during
//! the publish that detects it; other subscribers are unaffected and
//! `publish` never blocks or fails.
//!
//! Publishes are serialized by the registry lock, so every subscriber sees
//! verdicts in publish order.

use cg_common::SynthesizedVerdict;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

/// Opaque subscriber handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

type Subscribers = HashMap<SubscriptionId, mpsc::Sender<Arc<SynthesizedVerdict>>>;

struct HubInner {
    subscribers: Mutex<Subscribers>,
    next_id: AtomicU64,
    buffer: usize,
}

/// Live subscriber registry and fan-out
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl BroadcastHub {
    /// Create a hub queueing at most `buffer` undelivered verdicts per subscriber
    pub fn new(buffer: usize) -> Self {
        info!("Broadcast hub initialized with per-subscriber buffer {}", buffer);
        Self {
            inner: Arc::new(HubInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
            }),
        }
    }

    // Registry entries stay consistent even if a holder panicked
    fn registry(&self) -> MutexGuard<'_, Subscribers> {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self) -> Subscription {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        let count = {
            let mut registry = self.registry();
            registry.insert(id, tx);
            registry.len()
        };
        debug!(subscription = %id, subscribers = count, "Subscriber registered");
        Subscription { id, rx }
    }

    /// Returns false if the subscriber was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.registry().remove(&id).is_some();
        if removed {
            debug!(subscription = %id, "Subscriber unregistered");
        }
        removed
    }

    /// Deliver to every live subscriber; returns how many accepted the verdict
    pub fn publish(&self, verdict: SynthesizedVerdict) -> usize {
        let verdict = Arc::new(verdict);
        let mut registry = self.registry();
        let mut delivered = 0;
        let mut dead = Vec::new();

        for (id, tx) in registry.iter() {
            match tx.try_send(Arc::clone(&verdict)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Closed(_)) => {
                    debug!(subscription = %id, "Subscriber disconnected, removing");
                    dead.push(*id);
                }
                Err(TrySendError::Full(_)) => {
                    info!(subscription = %id, "Subscriber not keeping up, removing");
                    dead.push(*id);
                }
            }
        }
        for id in dead {
            registry.remove(&id);
        }

        debug!(
            session_id = %verdict.session_id,
            delivered,
            "Verdict published"
        );
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry().len()
    }
}

/// Ordered stream of verdicts for one subscriber
///
/// Dropping it disconnects the subscriber; the hub notices on the next
/// publish.
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::Receiver<Arc<SynthesizedVerdict>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next verdict; `None` once the hub has dropped this subscriber
    pub async fn recv(&mut self) -> Option<Arc<SynthesizedVerdict>> {
        self.rx.recv().await
    }

    /// Already-queued verdict without waiting
    pub fn try_recv(&mut self) -> Option<Arc<SynthesizedVerdict>> {
        self.rx.try_recv().ok()
    }

    pub fn into_stream(self) -> ReceiverStream<Arc<SynthesizedVerdict>> {
        ReceiverStream::new(self.rx)
    }
}
