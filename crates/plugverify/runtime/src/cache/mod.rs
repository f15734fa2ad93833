// Plugverify
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Reference-counted cache of expensive descriptors
//!
//! Concurrent requests for a missing key share one build. Successful builds
//! are kept while referenced and become evictable once every [`Handle`] is
//! dropped. Failed builds are handed to everyone who waited for them and are
//! never cached, so the next request builds again.
//!
//! # Eviction
//! - unreferenced entries beyond `capacity`, least recently used first
//! - unreferenced entries idle for longer than `idle_ttl`
//! - explicit [`DescriptorCache::invalidate`] and [`DescriptorCache::close`]
//!
//! Evicted descriptors are closed exactly once, outside the cache lock.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::hash::Hash;
use std::ops::Deref;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::scheduler::CancellationToken;

pub type BoxError = Box<dyn Error + Send + Sync>;
pub type SharedError = Arc<dyn Error + Send + Sync>;

/// Descriptor owning resources that must be released on eviction
pub trait Closeable: Send + Sync + 'static {
    fn close(&self) -> Result<(), BoxError>;
}

/// Anything usable as a cache key
pub trait CacheKey: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

impl<K> CacheKey for K where K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

/// Outcome of a failed descriptor build
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Failed { message: String, cause: Option<SharedError> },
}

impl BuildError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            cause: None,
        }
    }

    pub fn caused_by(message: impl Into<String>, cause: impl Error + Send + Sync + 'static) -> Self {
        Self::Failed {
            message: message.into(),
            cause: Some(Arc::new(cause)),
        }
    }
}

/// Why a `get` produced no result at all
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Waiting for descriptor was cancelled: {0}")]
    Cancelled(String),

    #[error("Descriptor cache {0} is closed")]
    Closed(String),
}

pub enum CacheResult<K: CacheKey, T: Closeable> {
    Found(Handle<K, T>),
    NotFound(String),
    Failed { message: String, cause: Option<SharedError> },
}

impl<K: CacheKey, T: Closeable> CacheResult<K, T> {
    fn from_error(error: BuildError) -> Self {
        match error {
            BuildError::NotFound(reason) => Self::NotFound(reason),
            BuildError::Failed { message, cause } => Self::Failed { message, cause },
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    pub fn found(self) -> Option<Handle<K, T>> {
        match self {
            Self::Found(handle) => Some(handle),
            Self::NotFound(_) | Self::Failed { .. } => None,
        }
    }
}

impl<K: CacheKey, T: Closeable> fmt::Debug for CacheResult<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Found(handle) => f.debug_tuple("Found").field(handle).finish(),
            Self::NotFound(reason) => f.debug_tuple("NotFound").field(reason).finish(),
            Self::Failed { message, .. } => f.debug_struct("Failed").field("message", message).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Number of entries kept before unreferenced ones are evicted
    pub capacity: usize,
    pub idle_ttl: Option<Duration>,
    /// How often a waiter re-checks its cancellation token
    pub wait_interval: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            capacity: 16,
            idle_ttl: None,
            wait_interval: Duration::from_millis(25),
        }
    }
}

impl CacheOptions {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity, ..Self::default() }
    }

    pub fn with_idle_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.idle_ttl = ttl;
        self
    }
}

#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    builds: AtomicU64,
    failures: AtomicU64,
    evictions: AtomicU64,
}

/// Counters at one point in time; joining an in-flight build counts as a hit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub builds: u64,
    pub failures: u64,
    pub evictions: u64,
}

struct Entry<T> {
    id: u64,
    value: Arc<T>,
    ref_count: usize,
    last_used: Instant,
    tick: u64,
}

struct BuildSlot {
    build_id: u64,
    waiters: usize,
}

struct FailedBuild {
    error: BuildError,
    pending: usize,
}

struct CacheState<K, T> {
    entries: HashMap<K, Entry<T>>,
    /// Invalidated entries still referenced by handles, keyed by entry id
    retired: HashMap<u64, Entry<T>>,
    building: HashMap<K, BuildSlot>,
    /// Failed builds not yet observed by all of their waiters
    failures: HashMap<u64, FailedBuild>,
    next_id: u64,
    tick: u64,
    closed: bool,
}

type Builder<K, T> = Box<dyn Fn(&K) -> Result<T, BuildError> + Send + Sync>;
type Victims<K, T> = Vec<(K, Arc<T>)>;

struct Inner<K, T> {
    name: String,
    options: CacheOptions,
    builder: Builder<K, T>,
    state: Mutex<CacheState<K, T>>,
    built: Condvar,
    stats: CacheStats,
}

pub struct DescriptorCache<K: CacheKey, T: Closeable> {
    inner: Arc<Inner<K, T>>,
}

impl<K: CacheKey, T: Closeable> Clone for DescriptorCache<K, T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<K: CacheKey, T: Closeable> DescriptorCache<K, T> {
    pub fn new<F>(name: impl Into<String>, options: CacheOptions, builder: F) -> Self
    where
        F: Fn(&K) -> Result<T, BuildError> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                options,
                builder: Box::new(builder),
                state: Mutex::new(CacheState {
                    entries: HashMap::new(),
                    retired: HashMap::new(),
                    building: HashMap::new(),
                    failures: HashMap::new(),
                    next_id: 1,
                    tick: 0,
                    closed: false,
                }),
                built: Condvar::new(),
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns a handle to the descriptor for `key`, building it if needed
    pub fn get(&self, key: &K) -> Result<CacheResult<K, T>, CacheError> {
        self.acquire(key, None)
    }

    /// Like [`get`](Self::get) but gives up waiting on another build once
    /// `token` is cancelled
    pub fn get_cancellable(&self, key: &K, token: &CancellationToken) -> Result<CacheResult<K, T>, CacheError> {
        self.acquire(key, Some(token))
    }

    fn acquire(&self, key: &K, token: Option<&CancellationToken>) -> Result<CacheResult<K, T>, CacheError> {
        self.evict_expired();

        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        if state.closed {
            return Err(CacheError::Closed(self.inner.name.clone()));
        }

        state.tick += 1;
        if let Some(entry) = state.entries.get_mut(key) {
            entry.ref_count += 1;
            entry.last_used = Instant::now();
            entry.tick = state.tick;
            self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
            debug!(cache = %self.inner.name, key = ?key, refs = entry.ref_count, "Descriptor cache hit");
            return Ok(CacheResult::Found(self.handle(key, entry.id, Arc::clone(&entry.value))));
        }

        if let Some(slot) = state.building.get_mut(key) {
            slot.waiters += 1;
            let build_id = slot.build_id;
            self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
            debug!(cache = %self.inner.name, key = ?key, "Waiting for in-flight descriptor build");
            return self.wait_for_build(guard, key, build_id, token);
        }

        let build_id = state.next_id;
        state.next_id += 1;
        state.building.insert(key.clone(), BuildSlot { build_id, waiters: 0 });
        drop(guard);

        self.inner.stats.misses.fetch_add(1, Ordering::Relaxed);
        Ok(self.build(key, build_id))
    }

    fn wait_for_build(&self, mut state: MutexGuard<'_, CacheState<K, T>>, key: &K, build_id: u64, token: Option<&CancellationToken>) -> Result<CacheResult<K, T>, CacheError> {
        loop {
            let in_flight = matches!(state.building.get(key), Some(slot) if slot.build_id == build_id);
            if !in_flight {
                break;
            }
            if let Some(token) = token
                && token.is_cancelled()
            {
                if let Some(slot) = state.building.get_mut(key) {
                    slot.waiters -= 1;
                }
                return Err(CacheError::Cancelled(token.reason().unwrap_or_default()));
            }
            self.inner.built.wait_for(&mut state, self.inner.options.wait_interval);
        }

        if let Some(failure) = state.failures.get_mut(&build_id) {
            failure.pending -= 1;
            let error = failure.error.clone();
            if failure.pending == 0 {
                state.failures.remove(&build_id);
            }
            return Ok(CacheResult::from_error(error));
        }

        // The builder already counted this waiter's reference
        let value = match state.entries.get(key) {
            Some(entry) if entry.id == build_id => Some(Arc::clone(&entry.value)),
            _ => state.retired.get(&build_id).map(|entry| Arc::clone(&entry.value)),
        };
        drop(state);
        match value {
            Some(value) => Ok(CacheResult::Found(self.handle(key, build_id, value))),
            None => Ok(CacheResult::Failed {
                message: format!("Descriptor {key:?} disappeared before it was handed out"),
                cause: None,
            }),
        }
    }

    fn build(&self, key: &K, build_id: u64) -> CacheResult<K, T> {
        let started = Instant::now();
        let outcome = match catch_unwind(AssertUnwindSafe(|| (self.inner.builder)(key))) {
            Ok(outcome) => outcome,
            Err(panic) => Err(BuildError::failed(format!("Descriptor build panicked: {}", panic_message(panic.as_ref())))),
        };

        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let waiters = state.building.remove(key).map_or(0, |slot| slot.waiters);

        let result = match outcome {
            Ok(value) => {
                self.inner.stats.builds.fetch_add(1, Ordering::Relaxed);
                info!(cache = %self.inner.name, key = ?key, waiters, elapsed_ms = started.elapsed().as_millis() as u64, "Descriptor built");
                let value = Arc::new(value);
                state.tick += 1;
                state.entries.insert(
                    key.clone(),
                    Entry {
                        id: build_id,
                        value: Arc::clone(&value),
                        ref_count: 1 + waiters,
                        last_used: Instant::now(),
                        tick: state.tick,
                    },
                );
                CacheResult::Found(self.handle(key, build_id, value))
            }
            Err(error) => {
                self.inner.stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!(cache = %self.inner.name, key = ?key, waiters, error = %error, "Descriptor build failed");
                if waiters > 0 {
                    state.failures.insert(build_id, FailedBuild { error: error.clone(), pending: waiters });
                }
                CacheResult::from_error(error)
            }
        };

        let victims = self.inner.evict_over_capacity(state);
        self.inner.built.notify_all();
        drop(guard);
        self.inner.teardown(victims);
        result
    }

    fn handle(&self, key: &K, id: u64, value: Arc<T>) -> Handle<K, T> {
        Handle {
            key: key.clone(),
            id,
            value,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Drops the entry for `key`; referenced descriptors are closed when
    /// their last handle goes away and new requests build a fresh one.
    pub fn invalidate(&self, key: &K) -> bool {
        let victims = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            match state.entries.remove(key) {
                Some(entry) if entry.ref_count == 0 => vec![(key.clone(), entry.value)],
                Some(entry) => {
                    state.retired.insert(entry.id, entry);
                    Vec::new()
                }
                None => return false,
            }
        };
        debug!(cache = %self.inner.name, key = ?key, "Descriptor invalidated");
        self.inner.teardown(victims);
        true
    }

    /// Evicts unreferenced entries idle for longer than the configured TTL
    pub fn evict_expired(&self) -> usize {
        let victims = {
            let mut guard = self.inner.state.lock();
            self.inner.expire_idle(&mut guard)
        };
        let count = victims.len();
        self.inner.teardown(victims);
        count
    }

    /// Rejects further requests and closes every unreferenced descriptor.
    /// Referenced ones are closed as their handles are released.
    pub fn close(&self) {
        let victims: Victims<K, T> = {
            let mut guard = self.inner.state.lock();
            if guard.closed {
                return;
            }
            guard.closed = true;
            let idle: Vec<K> = guard.entries.iter().filter(|(_, entry)| entry.ref_count == 0).map(|(key, _)| key.clone()).collect();
            let victims = idle.into_iter().filter_map(|key| guard.entries.remove(&key).map(|entry| (key, entry.value))).collect();
            self.inner.built.notify_all();
            victims
        };
        info!(cache = %self.inner.name, closing = victims.len(), "Closing descriptor cache");
        self.inner.teardown(victims);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.state.lock().entries.contains_key(key)
    }

    /// Outstanding handles for the current entry of `key`
    pub fn ref_count(&self, key: &K) -> Option<usize> {
        self.inner.state.lock().entries.get(key).map(|entry| entry.ref_count)
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        let stats = &self.inner.stats;
        CacheStatsSnapshot {
            hits: stats.hits.load(Ordering::Relaxed),
            misses: stats.misses.load(Ordering::Relaxed),
            builds: stats.builds.load(Ordering::Relaxed),
            failures: stats.failures.load(Ordering::Relaxed),
            evictions: stats.evictions.load(Ordering::Relaxed),
        }
    }
}

impl<K: CacheKey, T: Closeable> Inner<K, T> {
    fn release(&self, key: &K, id: u64) {
        let victims = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let mut victims = Vec::new();
            match state.entries.get_mut(key) {
                Some(entry) if entry.id == id => {
                    entry.ref_count = entry.ref_count.saturating_sub(1);
                    entry.last_used = Instant::now();
                    if entry.ref_count == 0
                        && state.closed
                        && let Some(entry) = state.entries.remove(key)
                    {
                        victims.push((key.clone(), entry.value));
                    }
                }
                _ => {
                    if let Some(entry) = state.retired.get_mut(&id) {
                        entry.ref_count = entry.ref_count.saturating_sub(1);
                        if entry.ref_count == 0
                            && let Some(entry) = state.retired.remove(&id)
                        {
                            victims.push((key.clone(), entry.value));
                        }
                    }
                }
            }
            victims.extend(self.evict_over_capacity(state));
            victims.extend(self.expire_idle(state));
            victims
        };
        self.teardown(victims);
    }

    fn evict_over_capacity(&self, state: &mut CacheState<K, T>) -> Victims<K, T> {
        let mut victims = Vec::new();
        while state.entries.len() > self.options.capacity {
            let oldest = state
                .entries
                .iter()
                .filter(|(_, entry)| entry.ref_count == 0)
                .min_by_key(|(_, entry)| entry.tick)
                .map(|(key, _)| key.clone());
            let Some(key) = oldest else {
                break;
            };
            if let Some(entry) = state.entries.remove(&key) {
                victims.push((key, entry.value));
            }
        }
        victims
    }

    fn expire_idle(&self, state: &mut CacheState<K, T>) -> Victims<K, T> {
        let Some(ttl) = self.options.idle_ttl else {
            return Vec::new();
        };
        let now = Instant::now();
        let expired: Vec<K> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.ref_count == 0 && now.duration_since(entry.last_used) >= ttl)
            .map(|(key, _)| key.clone())
            .collect();
        expired.into_iter().filter_map(|key| state.entries.remove(&key).map(|entry| (key, entry.value))).collect()
    }

    fn teardown(&self, victims: Victims<K, T>) {
        for (key, value) in victims {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            match value.close() {
                Ok(()) => debug!(cache = %self.name, key = ?key, "Descriptor closed"),
                Err(error) => warn!(cache = %self.name, key = ?key, error = %error, "Failed to close descriptor"),
            }
        }
    }
}

/// Shared reference to a cached descriptor, released on drop
pub struct Handle<K: CacheKey, T: Closeable> {
    key: K,
    id: u64,
    value: Arc<T>,
    inner: Arc<Inner<K, T>>,
}

impl<K: CacheKey, T: Closeable> Handle<K, T> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: CacheKey, T: Closeable> Deref for Handle<K, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<K: CacheKey, T: Closeable> Drop for Handle<K, T> {
    fn drop(&mut self) {
        self.inner.release(&self.key, self.id);
    }
}

impl<K: CacheKey, T: Closeable> fmt::Debug for Handle<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle").field("cache", &self.inner.name).field("key", &self.key).field("id", &self.id).finish()
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
