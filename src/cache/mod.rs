//! Query cache graph
//!
//! Every chain query the wallet makes goes through a [`QueryCache`] node,
//! identified by its [`CacheKey`]. The cache guarantees:
//!
//! - one in-flight fetch per key; concurrent readers attach to it
//! - stale-while-revalidate: a ready node keeps serving its value while a
//!   background refresh runs
//! - results of orphaned fetches (after `invalidate` or `clear`) are dropped
//!   by comparing version stamps, never by aborting the fetch
//! - nodes nobody has read or subscribed to for `gc` are collected
//!
//! Values are stored as `serde_json::Value` so that one table holds every
//! query type and can be snapshotted per wallet.
//!
//! The node table sits behind a short `parking_lot` mutex. It is never held
//! across an await point.

pub mod combine;
pub mod key;
pub mod node;
pub mod snapshot;

#[cfg(test)]
mod tests;

pub use combine::{combine, combine_partial};
pub use key::{CacheKey, KeyPattern, QueryKind};
pub use node::{Node, NodeStatus};
pub use snapshot::{CacheSnapshot, SnapshotEntry};

use crate::config::CacheConfig;
use crate::errors::{SyncError, SyncResult};
use crate::gateway::{with_retry, ExponentialBackoff};
use crate::logger::{self, LogTag};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, SyncResult<Value>> + Send + Sync>;
type SharedFetch = Shared<BoxFuture<'static, SyncResult<Value>>>;

// =============================================================================
// OPTIONS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    After(Duration),
    /// Values that never change once fetched (token type, token metadata)
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Declare the node without running its fetcher
    pub skip: bool,
    pub stale: Staleness,
    pub gc: Duration,
}

impl QueryOptions {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            skip: false,
            stale: Staleness::After(Duration::from_millis(config.stale_ms)),
            gc: Duration::from_millis(config.gc_ms),
        }
    }

    pub fn skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    pub fn stale_after(mut self, stale: Duration) -> Self {
        self.stale = Staleness::After(stale);
        self
    }

    pub fn never_stale(mut self) -> Self {
        self.stale = Staleness::Never;
        self
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

// =============================================================================
// STATISTICS
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub nodes: usize,
    pub in_flight: usize,
    pub subscribers: usize,
    pub hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub evictions: u64,
    /// Fetch results dropped because their node was invalidated or cleared
    pub discarded: u64,
    pub epoch: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    fetches: u64,
    evictions: u64,
    discarded: u64,
}

// =============================================================================
// NODE TABLE
// =============================================================================

struct NodeEntry {
    value: Option<Value>,
    error: Option<SyncError>,
    last_fetched_at: Option<DateTime<Utc>>,
    fetched_instant: Option<Instant>,
    staleness: Staleness,
    /// How long a failed fetch with nothing to show is served before retrying
    error_window: Duration,
    gc: Duration,
    invalidated: bool,
    version: u64,
    in_flight: Option<SharedFetch>,
    fetcher: Option<Fetcher>,
    subscribers: usize,
    last_access: Instant,
}

impl NodeEntry {
    fn new(opts: &QueryOptions, error_window: Duration, now: Instant) -> Self {
        Self {
            value: None,
            error: None,
            last_fetched_at: None,
            fetched_instant: None,
            staleness: opts.stale,
            error_window,
            gc: opts.gc,
            invalidated: false,
            version: 0,
            in_flight: None,
            fetcher: None,
            subscribers: 0,
            last_access: now,
        }
    }

    fn is_settled(&self) -> bool {
        self.value.is_some() || self.error.is_some()
    }

    fn is_stale(&self, now: Instant) -> bool {
        if self.invalidated {
            return true;
        }
        let window = match self.staleness {
            // a lookup that only ever failed is retried even for immutable values
            _ if self.value.is_none() && self.error.is_some() => self.error_window,
            Staleness::Never => return false,
            Staleness::After(window) => window,
        };
        self.fetched_instant
            .map_or(true, |at| now.saturating_duration_since(at) >= window)
    }

    fn is_collectable(&self, now: Instant) -> bool {
        self.subscribers == 0
            && self.in_flight.is_none()
            && now.saturating_duration_since(self.last_access) >= self.gc
    }

    fn raw_view(&self, key: &CacheKey, now: Instant) -> Node<Value> {
        let status = match (&self.value, &self.error, &self.in_flight) {
            (Some(_), Some(_), None) => NodeStatus::Error,
            (Some(_), _, _) => NodeStatus::Ready,
            (None, _, Some(_)) => NodeStatus::Loading,
            (None, Some(_), None) => NodeStatus::Error,
            (None, None, None) => NodeStatus::Idle,
        };
        Node {
            key: Some(key.clone()),
            status,
            value: self.value.clone(),
            error: self.error.clone(),
            is_refreshing: self.value.is_some() && self.in_flight.is_some(),
            is_stale: self.is_settled() && self.is_stale(now),
            last_fetched_at: self.last_fetched_at,
        }
    }
}

struct CacheState {
    nodes: HashMap<CacheKey, NodeEntry>,
    counters: Counters,
    epoch: u64,
}

struct CacheInner {
    state: Mutex<CacheState>,
    next_version: AtomicU64,
    retry: ExponentialBackoff,
    defaults: QueryOptions,
    error_window: Duration,
}

impl CacheInner {
    fn next_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Store a fetch outcome if the node still expects this version
    fn complete(&self, key: &CacheKey, version: u64, result: &SyncResult<Value>) {
        let mut state = self.state.lock();
        let state = &mut *state;

        match state.nodes.get_mut(key) {
            Some(entry) if entry.version == version => {
                entry.in_flight = None;
                entry.invalidated = false;
                entry.last_fetched_at = Some(Utc::now());
                entry.fetched_instant = Some(Instant::now());
                match result {
                    Ok(value) => {
                        entry.value = Some(value.clone());
                        entry.error = None;
                    }
                    Err(err) => {
                        logger::warning(LogTag::Cache, &format!("Node {} failed: {}", key, err));
                        entry.error = Some(err.clone());
                    }
                }
            }
            _ => {
                state.counters.discarded += 1;
                logger::debug(
                    LogTag::Cache,
                    &format!("Discarding orphaned result for {} (version {})", key, version),
                );
            }
        }
    }
}

// =============================================================================
// QUERY CACHE
// =============================================================================

/// Wallet-scoped cache of chain queries
///
/// Cheap to clone; clones share one node table. Methods that may start a
/// fetch must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

impl QueryCache {
    pub fn new(config: &CacheConfig, retry: ExponentialBackoff) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState {
                    nodes: HashMap::new(),
                    counters: Counters::default(),
                    epoch: 0,
                }),
                next_version: AtomicU64::new(0),
                retry,
                defaults: QueryOptions::from_config(config),
                error_window: Duration::from_millis(config.stale_ms),
            }),
        }
    }

    /// Options built from the cache configuration
    pub fn default_options(&self) -> QueryOptions {
        self.inner.defaults
    }

    /// Read a node, fetching it first if it holds nothing yet
    ///
    /// Returns once the node is settled (`Ready` or `Error`). A stale ready
    /// node is returned immediately while it revalidates in the background.
    /// With `opts.skip` the fetcher never runs and the node reports `Idle`.
    pub async fn get<V, F, Fut>(&self, key: CacheKey, opts: QueryOptions, fetch: F) -> Node<V>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<V>> + Send + 'static,
    {
        if opts.skip {
            return Node::idle(Some(key));
        }
        let fetcher = erase_fetcher(fetch);
        while let Some(pending) = self.ensure(&key, &opts, Arc::clone(&fetcher)) {
            // the outcome is written to the node table by the fetch task
            let _ = pending.await;
            // an invalidate or clear orphaned the fetch we waited on; join or
            // start its replacement instead of reporting an empty node
            if self.is_settled(&key) {
                break;
            }
        }
        self.peek(&key)
    }

    /// Like [`get`](Self::get) but never waits: starts or joins the fetch
    /// and returns the node as it is right now
    pub fn load<V, F, Fut>(&self, key: CacheKey, opts: QueryOptions, fetch: F) -> Node<V>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<V>> + Send + 'static,
    {
        if opts.skip {
            return Node::idle(Some(key));
        }
        let _ = self.ensure(&key, &opts, erase_fetcher(fetch));
        self.peek(&key)
    }

    /// Current state of a node without touching it or starting a fetch
    pub fn peek<V: DeserializeOwned>(&self, key: &CacheKey) -> Node<V> {
        let raw = {
            let state = self.inner.state.lock();
            match state.nodes.get(key) {
                Some(entry) => entry.raw_view(key, Instant::now()),
                None => return Node::idle(Some(key.clone())),
            }
        };
        decode_node(raw)
    }

    /// Store a value obtained outside the node, e.g. from a batched request
    ///
    /// Nodes with a fetch in flight are left alone.
    pub fn prime<V: Serialize>(
        &self,
        key: CacheKey,
        opts: QueryOptions,
        value: &V,
    ) -> SyncResult<()> {
        let value = serde_json::to_value(value)?;
        let now = Instant::now();
        let mut state = self.inner.state.lock();
        let entry = state
            .nodes
            .entry(key)
            .or_insert_with(|| NodeEntry::new(&opts, self.inner.error_window, now));
        if entry.in_flight.is_some() {
            return Ok(());
        }
        entry.staleness = opts.stale;
        entry.gc = opts.gc;
        entry.value = Some(value);
        entry.error = None;
        entry.invalidated = false;
        entry.last_fetched_at = Some(Utc::now());
        entry.fetched_instant = Some(now);
        entry.last_access = now;
        Ok(())
    }

    /// Register a consumer; the node is exempt from GC while the guard lives
    /// and is refetched eagerly when invalidated
    pub fn subscribe(&self, key: CacheKey) -> NodeSubscription {
        {
            let now = Instant::now();
            let mut state = self.inner.state.lock();
            let (defaults, error_window) = (self.inner.defaults, self.inner.error_window);
            let entry = state
                .nodes
                .entry(key.clone())
                .or_insert_with(|| NodeEntry::new(&defaults, error_window, now));
            entry.subscribers += 1;
            entry.last_access = now;
        }
        NodeSubscription {
            cache: self.clone(),
            key,
        }
    }

    /// Mark matching nodes stale and orphan their in-flight fetches
    ///
    /// Subscribed nodes with a known fetcher are refetched right away; the
    /// rest refetch on their next read. Returns the number of matched nodes.
    pub fn invalidate(&self, pattern: &KeyPattern) -> usize {
        let mut state = self.inner.state.lock();
        let state = &mut *state;
        let mut matched = 0;

        for (key, entry) in state.nodes.iter_mut() {
            if !pattern.matches(key) {
                continue;
            }
            matched += 1;
            entry.invalidated = true;
            entry.in_flight = None;
            entry.version = self.inner.next_version();

            if entry.subscribers > 0 {
                if let Some(fetcher) = entry.fetcher.clone() {
                    self.start_fetch(key, entry, fetcher, &mut state.counters);
                }
            }
        }

        logger::debug(
            LogTag::Cache,
            &format!("Invalidated {} nodes matching {:?}", matched, pattern),
        );
        matched
    }

    /// Drop every node; in-flight results arriving later are discarded
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        let dropped = state.nodes.len();
        state.nodes.clear();
        state.epoch += 1;
        logger::debug(
            LogTag::Cache,
            &format!("Cleared {} nodes (epoch {})", dropped, state.epoch),
        );
    }

    /// Remove nodes without subscribers that nobody read for their `gc` window
    pub fn collect_garbage(&self) -> usize {
        let now = Instant::now();
        let mut state = self.inner.state.lock();
        let before = state.nodes.len();
        state.nodes.retain(|_, entry| !entry.is_collectable(now));
        let evicted = before - state.nodes.len();
        state.counters.evictions += evicted as u64;
        evicted
    }

    /// Run [`collect_garbage`](Self::collect_garbage) every `interval` until shutdown
    pub fn spawn_gc(&self, interval: Duration, shutdown: Arc<Notify>) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // first tick fires immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        logger::debug(LogTag::Cache, "GC task stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = cache.collect_garbage();
                        if evicted > 0 {
                            logger::debug(
                                LogTag::Cache,
                                &format!("GC evicted {} idle nodes", evicted),
                            );
                        }
                    }
                }
            }
        })
    }

    /// Export every node holding a value
    pub fn snapshot(&self) -> CacheSnapshot {
        let state = self.inner.state.lock();
        let entries = state
            .nodes
            .iter()
            .filter_map(|(key, entry)| {
                let value = entry.value.clone()?;
                let fetched_at = entry.last_fetched_at.unwrap_or_else(Utc::now);
                Some((key.to_stable_string(), SnapshotEntry { value, fetched_at }))
            })
            .collect();
        CacheSnapshot { entries }
    }

    /// Import snapshot values as ready-but-stale nodes
    ///
    /// Existing nodes are left untouched. Returns how many nodes were restored.
    pub fn restore(&self, snapshot: &CacheSnapshot) -> usize {
        let now = Instant::now();
        let defaults = self.inner.defaults;
        let mut state = self.inner.state.lock();
        let mut restored = 0;

        for (raw_key, item) in &snapshot.entries {
            let key = match CacheKey::parse(raw_key) {
                Ok(key) => key,
                Err(e) => {
                    logger::warning(LogTag::Cache, &format!("Skipping snapshot entry: {}", e));
                    continue;
                }
            };
            if state.nodes.contains_key(&key) {
                continue;
            }
            let mut entry = NodeEntry::new(&defaults, self.inner.error_window, now);
            entry.value = Some(item.value.clone());
            entry.last_fetched_at = Some(item.fetched_at);
            entry.invalidated = true;
            state.nodes.insert(key, entry);
            restored += 1;
        }
        restored
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        CacheStats {
            nodes: state.nodes.len(),
            in_flight: state.nodes.values().filter(|e| e.in_flight.is_some()).count(),
            subscribers: state.nodes.values().map(|e| e.subscribers).sum(),
            hits: state.counters.hits,
            misses: state.counters.misses,
            fetches: state.counters.fetches,
            evictions: state.counters.evictions,
            discarded: state.counters.discarded,
            epoch: state.epoch,
        }
    }

    // -------------------------------------------------------------------------
    // internals
    // -------------------------------------------------------------------------

    /// Decide what a read needs; returns the fetch to wait on when the node
    /// has no value yet
    fn ensure(&self, key: &CacheKey, opts: &QueryOptions, fetcher: Fetcher) -> Option<SharedFetch> {
        let now = Instant::now();
        let error_window = self.inner.error_window;
        let mut state = self.inner.state.lock();
        let state = &mut *state;

        let entry = state
            .nodes
            .entry(key.clone())
            .or_insert_with(|| NodeEntry::new(opts, error_window, now));
        entry.last_access = now;
        entry.staleness = opts.stale;
        entry.gc = opts.gc;
        entry.fetcher = Some(fetcher.clone());

        if let Some(pending) = &entry.in_flight {
            state.counters.hits += 1;
            return if entry.value.is_some() {
                None
            } else {
                Some(pending.clone())
            };
        }

        if entry.is_settled() && !entry.is_stale(now) {
            state.counters.hits += 1;
            return None;
        }

        if entry.value.is_some() {
            state.counters.hits += 1;
            logger::debug(LogTag::Cache, &format!("Revalidating stale node {}", key));
            self.start_fetch(key, entry, fetcher, &mut state.counters);
            return None;
        }

        state.counters.misses += 1;
        Some(self.start_fetch(key, entry, fetcher, &mut state.counters))
    }

    fn start_fetch(
        &self,
        key: &CacheKey,
        entry: &mut NodeEntry,
        fetcher: Fetcher,
        counters: &mut Counters,
    ) -> SharedFetch {
        let version = self.inner.next_version();
        entry.version = version;
        counters.fetches += 1;

        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let label = task_key.to_stable_string();
            let result = with_retry(&inner.retry, &label, || fetcher()).await;
            inner.complete(&task_key, version, &result);
            result
        });

        let shared = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(SyncError::internal(format!("fetch task failed: {}", e))))
        }
        .boxed()
        .shared();

        entry.in_flight = Some(shared.clone());
        shared
    }

    fn is_settled(&self, key: &CacheKey) -> bool {
        let state = self.inner.state.lock();
        state.nodes.get(key).map_or(false, NodeEntry::is_settled)
    }

    fn release(&self, key: &CacheKey) {
        let mut state = self.inner.state.lock();
        if let Some(entry) = state.nodes.get_mut(key) {
            entry.subscribers = entry.subscribers.saturating_sub(1);
            entry.last_access = Instant::now();
        }
    }
}

/// Consumer registration for one node, released on drop
pub struct NodeSubscription {
    cache: QueryCache,
    key: CacheKey,
}

impl NodeSubscription {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl Drop for NodeSubscription {
    fn drop(&mut self) {
        self.cache.release(&self.key);
    }
}

fn erase_fetcher<V, F, Fut>(fetch: F) -> Fetcher
where
    V: Serialize + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SyncResult<V>> + Send + 'static,
{
    Arc::new(move || {
        let request = fetch();
        async move {
            let value = request.await?;
            Ok(serde_json::to_value(value)?)
        }
        .boxed()
    })
}

fn decode_node<V: DeserializeOwned>(raw: Node<Value>) -> Node<V> {
    let Node {
        key,
        status,
        value,
        error,
        is_refreshing,
        is_stale,
        last_fetched_at,
    } = raw;

    let decoded = match value.map(serde_json::from_value::<V>) {
        None => Ok(None),
        Some(Ok(v)) => Ok(Some(v)),
        Some(Err(e)) => Err(SyncError::malformed("cache", e.to_string())),
    };

    match decoded {
        Ok(value) => Node {
            key,
            status,
            value,
            error,
            is_refreshing,
            is_stale,
            last_fetched_at,
        },
        Err(err) => Node {
            key,
            status: NodeStatus::Error,
            value: None,
            error: Some(err),
            is_refreshing,
            is_stale,
            last_fetched_at,
        },
    }
}
