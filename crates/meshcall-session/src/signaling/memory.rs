//! In-process signaling store. Also the storage engine behind the relay.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use meshcall_common::SignalingError;

use super::{Delivery, DeliveryCallback, SignalingStore, Subscription, Versioned};
use crate::protocol::StorePath;

struct Subscriber {
    id: u64,
    active: Arc<AtomicBool>,
    callback: DeliveryCallback,
}

struct PathLog {
    seq: u64,
    entries: Vec<(u64, Value)>,
    subscribers: Vec<Subscriber>,
    touched: Instant,
}

impl PathLog {
    fn new() -> Self {
        Self {
            seq: 0,
            entries: Vec::new(),
            subscribers: Vec::new(),
            touched: Instant::now(),
        }
    }

    fn version(&self) -> u64 {
        self.entries.last().map(|(seq, _)| *seq).unwrap_or(0)
    }

    fn append(&mut self, path: &StorePath, value: Value) -> u64 {
        self.seq += 1;
        self.touched = Instant::now();
        let seq = self.seq;
        for sub in &self.subscribers {
            if sub.active.load(Ordering::Acquire) {
                (sub.callback)(Delivery {
                    path: path.clone(),
                    seq,
                    value: value.clone(),
                });
            }
        }
        self.entries.push((seq, value));
        seq
    }
}

#[derive(Default)]
struct StoreState {
    paths: HashMap<StorePath, PathLog>,
    next_subscriber: u64,
    #[cfg(test)]
    failing_publishes: usize,
}

impl StoreState {
    #[cfg(test)]
    fn take_injected_failure(&mut self) -> bool {
        if self.failing_publishes > 0 {
            self.failing_publishes -= 1;
            true
        } else {
            false
        }
    }

    #[cfg(not(test))]
    fn take_injected_failure(&mut self) -> bool {
        false
    }
}

/// Signaling store held entirely in memory.
///
/// Callbacks run synchronously while the store lock is held, which is what
/// gives every path its delivery order.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append `value` at `path`.
    pub fn publish_now(&self, path: &StorePath, value: Value) -> Result<u64, SignalingError> {
        let mut state = self.lock();
        if state.take_injected_failure() {
            return Err(SignalingError::Delivery("injected failure".into()));
        }
        let log = state
            .paths
            .entry(path.clone())
            .or_insert_with(PathLog::new);
        Ok(log.append(path, value))
    }

    /// Subscribe, replaying only entries with a sequence number above
    /// `after_seq`. Used by the relay to resume a client subscription.
    pub fn subscribe_after(
        &self,
        path: &StorePath,
        after_seq: u64,
        callback: DeliveryCallback,
    ) -> Subscription {
        let active = Arc::new(AtomicBool::new(true));
        let id = {
            let mut state = self.lock();
            state.next_subscriber += 1;
            let id = state.next_subscriber;
            let log = state
                .paths
                .entry(path.clone())
                .or_insert_with(PathLog::new);
            for (seq, value) in log.entries.iter().filter(|(seq, _)| *seq > after_seq) {
                callback(Delivery {
                    path: path.clone(),
                    seq: *seq,
                    value: value.clone(),
                });
            }
            log.subscribers.push(Subscriber {
                id,
                active: Arc::clone(&active),
                callback,
            });
            id
        };

        let store = self.clone();
        let path = path.clone();
        Subscription::new(active, move || {
            let mut state = store.lock();
            if let Some(log) = state.paths.get_mut(&path) {
                log.subscribers.retain(|s| s.id != id);
            }
        })
    }

    pub fn read_now(&self, path: &StorePath) -> Option<Versioned> {
        let state = self.lock();
        let log = state.paths.get(path)?;
        log.entries.last().map(|(seq, value)| Versioned {
            version: *seq,
            value: value.clone(),
        })
    }

    pub fn compare_and_set_now(
        &self,
        path: &StorePath,
        expected: u64,
        value: Value,
    ) -> Result<u64, SignalingError> {
        let mut state = self.lock();
        let log = state
            .paths
            .entry(path.clone())
            .or_insert_with(PathLog::new);
        let current = log.version();
        if current != expected {
            return Err(SignalingError::Conflict { current });
        }
        log.entries.clear();
        Ok(log.append(path, value))
    }

    pub fn clear_now(&self, path: &StorePath) {
        let mut state = self.lock();
        if let Some(log) = state.paths.get_mut(path) {
            log.entries.clear();
            log.touched = Instant::now();
        }
    }

    /// Every retained entry at `path`, oldest first.
    pub fn history(&self, path: &StorePath) -> Vec<Delivery> {
        let state = self.lock();
        state
            .paths
            .get(path)
            .map(|log| {
                log.entries
                    .iter()
                    .map(|(seq, value)| Delivery {
                        path: path.clone(),
                        seq: *seq,
                        value: value.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of paths currently held.
    pub fn path_count(&self) -> usize {
        self.lock().paths.len()
    }

    /// Drop paths without subscribers that have not been written for `ttl`.
    /// Returns how many were removed.
    pub fn prune_idle(&self, ttl: Duration) -> usize {
        let mut state = self.lock();
        let before = state.paths.len();
        state.paths.retain(|path, log| {
            let keep = !log.subscribers.is_empty() || log.touched.elapsed() < ttl;
            if !keep {
                debug!(%path, "Pruning idle path");
            }
            keep
        });
        before - state.paths.len()
    }

    #[cfg(test)]
    pub(crate) fn fail_next_publishes(&self, count: usize) {
        self.lock().failing_publishes = count;
    }
}

#[async_trait]
impl SignalingStore for MemoryStore {
    async fn publish(&self, path: &StorePath, value: Value) -> Result<u64, SignalingError> {
        self.publish_now(path, value)
    }

    async fn subscribe(
        &self,
        path: &StorePath,
        callback: DeliveryCallback,
    ) -> Result<Subscription, SignalingError> {
        Ok(self.subscribe_after(path, 0, callback))
    }

    async fn read(&self, path: &StorePath) -> Result<Option<Versioned>, SignalingError> {
        Ok(self.read_now(path))
    }

    async fn compare_and_set(
        &self,
        path: &StorePath,
        expected: u64,
        value: Value,
    ) -> Result<u64, SignalingError> {
        self.compare_and_set_now(path, expected, value)
    }

    async fn clear(&self, path: &StorePath) -> Result<(), SignalingError> {
        self.clear_now(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collector() -> (DeliveryCallback, Arc<Mutex<Vec<Delivery>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: DeliveryCallback = Arc::new(move |d| sink.lock().unwrap().push(d));
        (callback, seen)
    }

    fn values(seen: &Arc<Mutex<Vec<Delivery>>>) -> Vec<Value> {
        seen.lock().unwrap().iter().map(|d| d.value.clone()).collect()
    }

    #[tokio::test]
    async fn subscribe_replays_then_follows_in_order() {
        let store = MemoryStore::new();
        let path = StorePath::new("calls/X/links/0-1/candidates");

        store.publish(&path, json!(1)).await.unwrap();
        store.publish(&path, json!(2)).await.unwrap();

        let (callback, seen) = collector();
        let _sub = store.subscribe(&path, callback).await.unwrap();
        store.publish(&path, json!(3)).await.unwrap();

        assert_eq!(values(&seen), vec![json!(1), json!(2), json!(3)]);
        let seqs: Vec<u64> = seen.lock().unwrap().iter().map(|d| d.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn paths_are_independent() {
        let store = MemoryStore::new();
        let a = StorePath::new("a");
        let b = StorePath::new("b");
        let (callback, seen) = collector();
        let _sub = store.subscribe(&a, callback).await.unwrap();

        store.publish(&b, json!("other")).await.unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_final() {
        let store = MemoryStore::new();
        let path = StorePath::new("p");
        let (callback, seen) = collector();
        let sub = store.subscribe(&path, callback).await.unwrap();

        store.publish(&path, json!(1)).await.unwrap();
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        store.publish(&path, json!(2)).await.unwrap();

        assert_eq!(values(&seen), vec![json!(1)]);
    }

    #[tokio::test]
    async fn dropping_subscription_releases_it() {
        let store = MemoryStore::new();
        let path = StorePath::new("p");
        let (callback, seen) = collector();
        drop(store.subscribe(&path, callback).await.unwrap());

        store.publish(&path, json!(1)).await.unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn compare_and_set_detects_conflicts() {
        let store = MemoryStore::new();
        let path = StorePath::new("calls/X/roster");

        let v1 = store.compare_and_set(&path, 0, json!({"n": 1})).await.unwrap();
        let err = store
            .compare_and_set(&path, 0, json!({"n": 2}))
            .await
            .unwrap_err();
        assert_eq!(err, SignalingError::Conflict { current: v1 });

        let v2 = store.compare_and_set(&path, v1, json!({"n": 2})).await.unwrap();
        assert!(v2 > v1);
        let current = store.read(&path).await.unwrap().unwrap();
        assert_eq!(current.version, v2);
        assert_eq!(current.value, json!({"n": 2}));
        // Documents keep only their latest version.
        assert_eq!(store.history(&path).len(), 1);
    }

    #[tokio::test]
    async fn subscribe_after_skips_seen_entries() {
        let store = MemoryStore::new();
        let path = StorePath::new("p");
        for i in 1..=3 {
            store.publish(&path, json!(i)).await.unwrap();
        }
        let (callback, seen) = collector();
        let _sub = store.subscribe_after(&path, 2, callback);
        assert_eq!(values(&seen), vec![json!(3)]);
    }

    #[tokio::test]
    async fn clear_keeps_sequence_monotonic() {
        let store = MemoryStore::new();
        let path = StorePath::new("p");
        store.publish(&path, json!(1)).await.unwrap();
        store.clear(&path).await.unwrap();
        assert!(store.read(&path).await.unwrap().is_none());
        let seq = store.publish(&path, json!(2)).await.unwrap();
        assert_eq!(seq, 2);
    }

    #[tokio::test]
    async fn prune_idle_keeps_subscribed_paths() {
        let store = MemoryStore::new();
        let watched = StorePath::new("watched");
        let idle = StorePath::new("idle");
        store.publish(&idle, json!(1)).await.unwrap();
        let (callback, _seen) = collector();
        let _sub = store.subscribe(&watched, callback).await.unwrap();

        assert_eq!(store.prune_idle(Duration::ZERO), 1);
        assert_eq!(store.path_count(), 1);
    }

    #[tokio::test]
    async fn injected_failures_surface_as_delivery_errors() {
        let store = MemoryStore::new();
        let path = StorePath::new("p");
        store.fail_next_publishes(1);
        assert!(matches!(
            store.publish(&path, json!(1)).await,
            Err(SignalingError::Delivery(_))
        ));
        assert!(store.publish(&path, json!(1)).await.is_ok());
    }
}
