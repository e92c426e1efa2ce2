//! Request deduplication cache
//!
//! Every read in the handshake goes through [`RequestCache::dedupe`]. A read
//! is identified by a logical key; within its TTL a completed value is served
//! without fetching, and concurrent callers for the same key attach to a
//! single in-flight fetch and all observe the identical value or error.
//!
//! Cancellation is reference counted per key. Each in-flight request carries
//! an explicit `{ref_count, controller}` record: attaching increments the
//! count, a caller that cancels (or simply drops its future) decrements it,
//! and the underlying fetch is cancelled only when the count reaches zero.
//! Failures are never stored.

use crate::errors::{HandshakeError, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

type AnyValue = Arc<dyn Any + Send + Sync>;
type SharedFetch = Shared<BoxFuture<'static, Result<AnyValue>>>;

/// Caller-side cancellation trigger
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Cancel every signal created from this handle
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// True once [`cancel`](Self::cancel) was called
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Caller-side cancellation signal passed into cancellable operations
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Resolves once the paired handle cancels.
    ///
    /// Never resolves if the handle is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        wait_for_cancel(&mut self.rx).await;
    }

    /// True if the paired handle already cancelled
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Create a linked cancellation handle and signal
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
}

async fn wait_for_cancel(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Completed value with its freshness window
struct CacheEntry {
    value: AnyValue,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) < self.ttl
    }
}

/// In-flight fetch shared by every attached caller
struct PendingRequest {
    id: u64,
    fetch: SharedFetch,
    ref_count: usize,
    controller: watch::Sender<bool>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    pending: HashMap<String, PendingRequest>,
    next_id: u64,
}

#[derive(Default)]
struct CacheInner {
    state: Mutex<CacheState>,
}

impl CacheInner {
    /// Drop one caller's attachment; cancels the fetch when it was the last
    fn detach(&self, key: &str, id: u64) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(pending) = state.pending.get_mut(key) else {
            return;
        };
        if pending.id != id {
            return;
        }
        pending.ref_count = pending.ref_count.saturating_sub(1);
        if pending.ref_count == 0 {
            let _ = pending.controller.send(true);
            state.pending.remove(key);
            tracing::debug!(key, "last caller detached, cancelling fetch");
        }
    }

    /// Record a finished fetch; only the request still registered under `key` may populate it
    fn complete(&self, key: &str, id: u64, outcome: &Result<AnyValue>, ttl: Duration) {
        let mut state = self.state.lock();
        let owned = state.pending.get(key).is_some_and(|pending| pending.id == id);
        if !owned {
            return;
        }
        state.pending.remove(key);
        if let Ok(value) = outcome {
            state.entries.insert(
                key.to_string(),
                CacheEntry {
                    value: value.clone(),
                    inserted_at: Instant::now(),
                    ttl,
                },
            );
        }
    }
}

/// RAII attachment of one caller to a pending request
struct Attachment<'a> {
    inner: &'a CacheInner,
    key: &'a str,
    id: u64,
    armed: bool,
}

impl Drop for Attachment<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.detach(self.key, self.id);
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Stored values, fresh or not yet evicted
    pub entries: usize,
    /// Fetches currently in flight
    pub in_flight: usize,
}

/// Deduplicating, TTL-bounded read cache with reference-counted cancellation.
///
/// Cloning is cheap and shares state.
#[derive(Clone, Default)]
pub struct RequestCache {
    inner: Arc<CacheInner>,
}

impl RequestCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the value for `key`, fetching at most once across concurrent callers.
    ///
    /// `fetcher` is only invoked when no fresh value and no in-flight request
    /// exist, and runs without the cache lock held, so it may call back into
    /// this cache before returning its future. If `cancel` fires, this caller
    /// gets `Cancelled` while other attached callers keep waiting on the
    /// shared fetch.
    pub async fn dedupe<T, F, Fut>(
        &self,
        key: &str,
        fetcher: F,
        ttl: Duration,
        cancel: Option<CancelSignal>,
    ) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let existing = lookup(&mut self.inner.state.lock(), key);
        let (id, fetch) = match existing {
            Some(Slot::Hit(value)) => return downcast(key, value),
            Some(Slot::Attached(id, fetch)) => (id, fetch),
            None => {
                // built outside the lock so a fetcher may use this cache
                let fut = fetcher();
                let mut guard = self.inner.state.lock();
                match lookup(&mut guard, key) {
                    Some(Slot::Hit(value)) => return downcast(key, value),
                    Some(Slot::Attached(id, fetch)) => (id, fetch),
                    None => start_fetch(&mut guard, key, fut),
                }
            }
        };

        let mut attachment = Attachment {
            inner: &self.inner,
            key,
            id,
            armed: true,
        };

        let outcome = match cancel {
            Some(mut signal) => tokio::select! {
                outcome = fetch => outcome,
                _ = signal.cancelled() => {
                    tracing::debug!(key, "caller cancelled");
                    return Err(HandshakeError::Cancelled);
                }
            },
            None => fetch.await,
        };

        attachment.armed = false;
        self.inner.complete(key, id, &outcome, ttl);
        downcast(key, outcome?)
    }

    /// Evict a stored value; an in-flight fetch for `key` will not be stored
    pub fn invalidate(&self, key: &str) {
        let mut state = self.inner.state.lock();
        state.entries.remove(key);
        state.pending.remove(key);
    }

    /// Evict every key starting with `prefix`
    pub fn invalidate_prefix(&self, prefix: &str) {
        let mut state = self.inner.state.lock();
        state.entries.retain(|key, _| !key.starts_with(prefix));
        state.pending.retain(|key, _| !key.starts_with(prefix));
    }

    /// Evict everything and cancel all in-flight fetches
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        for pending in state.pending.values() {
            let _ = pending.controller.send(true);
        }
        let cancelled = state.pending.len();
        state.pending.clear();
        state.entries.clear();
        tracing::debug!(cancelled, "request cache cleared");
    }

    /// Current entry and in-flight counts
    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        CacheStats {
            entries: state.entries.len(),
            in_flight: state.pending.len(),
        }
    }
}

impl std::fmt::Debug for RequestCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCache")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Outcome of looking a key up under the state lock
enum Slot {
    Hit(AnyValue),
    Attached(u64, SharedFetch),
}

/// Serve a fresh value or attach to the in-flight fetch for `key`
fn lookup(state: &mut CacheState, key: &str) -> Option<Slot> {
    if let Some(entry) = state.entries.get(key) {
        if entry.is_fresh(Instant::now()) {
            tracing::trace!(key, "cache hit");
            return Some(Slot::Hit(entry.value.clone()));
        }
    }
    state.entries.remove(key);

    let pending = state.pending.get_mut(key)?;
    pending.ref_count += 1;
    tracing::trace!(
        key,
        ref_count = pending.ref_count,
        "attached to in-flight fetch"
    );
    Some(Slot::Attached(pending.id, pending.fetch.clone()))
}

/// Register `fut` as the shared fetch for `key` with one attached caller
fn start_fetch<T, Fut>(state: &mut CacheState, key: &str, fut: Fut) -> (u64, SharedFetch)
where
    T: Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let id = state.next_id;
    state.next_id += 1;

    let (controller, mut cancel_rx) = watch::channel(false);
    let fetch = async move {
        tokio::select! {
            result = fut => result.map(|value| Arc::new(value) as AnyValue),
            _ = wait_for_cancel(&mut cancel_rx) => Err(HandshakeError::Cancelled),
        }
    }
    .boxed()
    .shared();

    state.pending.insert(
        key.to_string(),
        PendingRequest {
            id,
            fetch: fetch.clone(),
            ref_count: 1,
            controller,
        },
    );
    tracing::debug!(key, "starting fetch");
    (id, fetch)
}

fn downcast<T: Clone + Send + Sync + 'static>(key: &str, value: AnyValue) -> Result<T> {
    value
        .downcast::<T>()
        .map(|value| (*value).clone())
        .map_err(|_| {
            HandshakeError::internal(format!(
                "cached value for `{key}` has an unexpected type"
            ))
        })
}
