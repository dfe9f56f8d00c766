//! Result cache
//!
//! Content-addressed store of successful [`ModuleResult`]s keyed by a
//! [`Fingerprint`] of (module id, normalized text, session id).
//!
//! - **Eviction:** least-recently-used per shard, plus an absolute
//!   time-to-live. Capacity is split exactly across shards, so the cache
//!   never holds more than the configured maximum; recency is tracked per
//!   shard, so a shard may evict while others still have room. Expired entries read as absent and are purged lazily on
//!   access or by [`ResultCache::purge_expired`].
//! - **In-flight tracking:** [`ResultCache::lookup_or_claim`] hands out at
//!   most one [`FlightGuard`] per fingerprint; every other caller gets a
//!   [`PendingHandle`] that resolves to the leader's result. This stays
//!   active when storage is disabled.
//! - **Sharding:** fingerprints map to independent shards, so unrelated
//!   fingerprints never contend on the same lock.
//!
//! The cache is an optimization: a poisoned shard lock degrades to
//! "always miss" for that shard instead of failing the event.

use cg_common::config::CacheConfig;
use cg_common::ModuleResult;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Stable SHA-256 identity of a cacheable (module, input) pair
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Hash length-prefixed fields so field boundaries cannot collide
    pub fn compute(module_id: &str, normalized_text: &str, session_id: &str) -> Self {
        let mut hasher = Sha256::new();
        for field in [module_id, normalized_text, session_id] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        Self(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    fn shard_index(&self, shards: usize) -> usize {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&self.0[..8]);
        (u64::from_le_bytes(prefix) % shards as u64) as usize
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Resident cache entry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub value: ModuleResult,
    pub inserted_at: Instant,
}

struct Slot {
    entry: CacheEntry,
    tick: u64,
}

type FlightSender = watch::Sender<Option<ModuleResult>>;
type FlightReceiver = watch::Receiver<Option<ModuleResult>>;

struct Shard {
    entries: HashMap<Fingerprint, Slot>,
    /// Access tick -> fingerprint, oldest first
    recency: BTreeMap<u64, Fingerprint>,
    inflight: HashMap<Fingerprint, FlightReceiver>,
    tick: u64,
    capacity: usize,
}

impl Shard {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            inflight: HashMap::new(),
            tick: 0,
            capacity,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn remove(&mut self, fp: &Fingerprint) -> Option<Slot> {
        let slot = self.entries.remove(fp)?;
        self.recency.remove(&slot.tick);
        Some(slot)
    }

    /// Fresh value for `fp`, refreshing its recency; expired entries are dropped
    fn get_fresh(&mut self, fp: &Fingerprint, ttl: Duration, now: Instant) -> Freshness {
        let expired = match self.entries.get(fp) {
            None => return Freshness::Absent,
            Some(slot) => now.duration_since(slot.entry.inserted_at) >= ttl,
        };
        if expired {
            self.remove(fp);
            return Freshness::Expired;
        }

        let tick = self.next_tick();
        match self.entries.get_mut(fp) {
            Some(slot) => {
                self.recency.remove(&slot.tick);
                slot.tick = tick;
                self.recency.insert(tick, *fp);
                Freshness::Fresh(slot.entry.value.clone())
            }
            None => Freshness::Absent,
        }
    }

    /// Insert and evict least-recently-used entries beyond capacity
    fn insert(&mut self, fp: Fingerprint, value: ModuleResult, now: Instant) -> usize {
        self.remove(&fp);
        let tick = self.next_tick();
        self.entries.insert(
            fp,
            Slot {
                entry: CacheEntry {
                    fingerprint: fp,
                    value,
                    inserted_at: now,
                },
                tick,
            },
        );
        self.recency.insert(tick, fp);

        let mut evicted = 0;
        while self.entries.len() > self.capacity {
            match self.recency.pop_first() {
                Some((_, oldest)) => {
                    self.entries.remove(&oldest);
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }
}

enum Freshness {
    Fresh(ModuleResult),
    Expired,
    Absent,
}

/// Counters exposed for health reporting
#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub inflight: usize,
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub evictions: u64,
    pub expirations: u64,
}

/// Outcome of [`ResultCache::lookup_or_claim`]
pub enum Lookup {
    /// Fresh cached value; no adapter call needed
    Hit(ModuleResult),
    /// Another caller is computing this fingerprint; await its result
    Pending(PendingHandle),
    /// Caller is now the only one computing this fingerprint
    Claimed(FlightGuard),
    /// Shard unavailable (poisoned lock); compute without deduplication
    Bypass,
}

/// Shared content-addressed cache of module results
pub struct ResultCache {
    shards: Vec<Mutex<Shard>>,
    ttl: Duration,
    enabled: bool,
    counters: Counters,
}

impl ResultCache {
    pub fn new(config: &CacheConfig) -> Self {
        if !config.enabled || config.capacity == 0 {
            return Self::storeless(config.shards.max(1));
        }
        let shard_count = config.shards.clamp(1, config.capacity);
        let base = config.capacity / shard_count;
        let remainder = config.capacity % shard_count;
        debug!(
            shards = shard_count,
            capacity = config.capacity,
            ttl_secs = config.ttl_secs,
            "Result cache initialized"
        );
        Self {
            shards: (0..shard_count)
                .map(|i| Mutex::new(Shard::new(base + usize::from(i < remainder))))
                .collect(),
            ttl: config.ttl(),
            enabled: true,
            counters: Counters::default(),
        }
    }

    /// A cache that never stores results but still deduplicates in-flight calls
    pub fn disabled() -> Self {
        Self::storeless(1)
    }

    fn storeless(shard_count: usize) -> Self {
        debug!(shards = shard_count, "Result cache storage disabled");
        Self {
            shards: (0..shard_count).map(|_| Mutex::new(Shard::new(0))).collect(),
            ttl: Duration::ZERO,
            enabled: false,
            counters: Counters::default(),
        }
    }

    /// Maximum resident entries across all shards
    pub fn capacity(&self) -> usize {
        self.shards
            .iter()
            .filter_map(|s| s.lock().ok().map(|s| s.capacity))
            .sum()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn shard(&self, fp: &Fingerprint) -> Option<MutexGuard<'_, Shard>> {
        let index = fp.shard_index(self.shards.len());
        match self.shards[index].lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!(shard = index, "Result cache shard unavailable (poisoned lock), treating as miss");
                None
            }
        }
    }

    /// Fresh cached value, if any
    pub fn get(&self, fp: &Fingerprint) -> Option<ModuleResult> {
        let mut shard = self.shard(fp)?;
        match shard.get_fresh(fp, self.ttl, Instant::now()) {
            Freshness::Fresh(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Freshness::Expired => {
                self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Freshness::Absent => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a successful result; failed results are never cached
    pub fn put(&self, fp: Fingerprint, value: ModuleResult) {
        if !value.is_contributing() {
            debug!(fingerprint = ?fp, module_id = %value.module_id, "Not caching failed module result");
            return;
        }
        if !self.enabled {
            return;
        }
        if let Some(mut shard) = self.shard(&fp) {
            let evicted = shard.insert(fp, value, Instant::now());
            if evicted > 0 {
                self.counters.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            }
        }
    }

    /// Handle on an in-flight computation of `fp`, if one exists
    pub fn pending(&self, fp: &Fingerprint) -> Option<PendingHandle> {
        let shard = self.shard(fp)?;
        shard.inflight.get(fp).map(|rx| PendingHandle { rx: rx.clone() })
    }

    /// Atomically return a fresh value, join an in-flight computation, or
    /// claim the computation for the caller.
    pub fn lookup_or_claim(self: &Arc<Self>, fp: Fingerprint) -> Lookup {
        let Some(mut shard) = self.shard(&fp) else {
            return Lookup::Bypass;
        };

        match shard.get_fresh(&fp, self.ttl, Instant::now()) {
            Freshness::Fresh(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Lookup::Hit(value);
            }
            Freshness::Expired => {
                self.counters.expirations.fetch_add(1, Ordering::Relaxed);
            }
            Freshness::Absent => {}
        }

        if let Some(rx) = shard.inflight.get(&fp) {
            self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            return Lookup::Pending(PendingHandle { rx: rx.clone() });
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        shard.inflight.insert(fp, rx);
        Lookup::Claimed(FlightGuard {
            cache: Arc::clone(self),
            fingerprint: fp,
            tx: Some(tx),
        })
    }

    /// Drop every expired entry; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        for (index, shard) in self.shards.iter().enumerate() {
            let Ok(mut shard) = shard.lock() else {
                warn!(shard = index, "Skipping poisoned cache shard during sweep");
                continue;
            };
            let expired: Vec<Fingerprint> = shard
                .entries
                .iter()
                .filter(|(_, slot)| now.duration_since(slot.entry.inserted_at) >= self.ttl)
                .map(|(fp, _)| *fp)
                .collect();
            for fp in &expired {
                shard.remove(fp);
            }
            purged += expired.len();
        }
        if purged > 0 {
            self.counters.expirations.fetch_add(purged as u64, Ordering::Relaxed);
            debug!(purged, "Purged expired cache entries");
        }
        purged
    }

    /// Resident entries (expired-but-unpurged included)
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .filter_map(|s| s.lock().ok().map(|s| s.entries.len()))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, inflight) = self
            .shards
            .iter()
            .filter_map(|s| s.lock().ok().map(|s| (s.entries.len(), s.inflight.len())))
            .fold((0, 0), |(e, i), (se, si)| (e + se, i + si));
        CacheStats {
            entries,
            inflight,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
        }
    }

    fn finish_flight(&self, fp: &Fingerprint, own: &FlightSender, value: Option<&ModuleResult>) {
        let Some(mut shard) = self.shard(fp) else {
            return;
        };
        let ours = shard
            .inflight
            .get(fp)
            .map(|rx| rx.same_channel(&own.subscribe()))
            .unwrap_or(false);
        if ours {
            shard.inflight.remove(fp);
        }
        if let Some(value) = value.filter(|v| self.enabled && v.is_contributing()) {
            let evicted = shard.insert(*fp, value.clone(), Instant::now());
            if evicted > 0 {
                self.counters.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            }
        }
    }
}

/// Exclusive right to compute one fingerprint
///
/// Completing the guard caches a successful result and wakes every waiter.
/// Dropping it uncompleted (for example when the owning event is cancelled)
/// releases the claim and tells waiters the computation was abandoned.
pub struct FlightGuard {
    cache: Arc<ResultCache>,
    fingerprint: Fingerprint,
    tx: Option<FlightSender>,
}

impl FlightGuard {
    /// Publish the result to waiters, caching it if successful
    pub fn complete(mut self, result: &ModuleResult) {
        if let Some(tx) = self.tx.take() {
            self.cache.finish_flight(&self.fingerprint, &tx, Some(result));
            tx.send_replace(Some(result.clone()));
        }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            debug!(fingerprint = ?self.fingerprint, "In-flight computation abandoned");
            self.cache.finish_flight(&self.fingerprint, &tx, None);
        }
    }
}

/// Waiter on another caller's in-flight computation
pub struct PendingHandle {
    rx: FlightReceiver,
}

impl PendingHandle {
    /// The leader's result, or `None` if the leader abandoned the computation
    pub async fn wait(mut self) -> Option<ModuleResult> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        }
    }
}
