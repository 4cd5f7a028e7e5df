//! Shared, subscribable document store used to exchange negotiation
//! messages, candidates and membership records.
//!
//! Paths are append-only logs with a per-path sequence number. `publish`
//! appends; `compare_and_set` replaces the whole log with a single entry
//! when the caller's expected version still matches, which makes a path
//! usable as a versioned document. Delivery to subscribers preserves the
//! per-path sequence order; nothing is promised across paths.

mod memory;
pub mod remote;
pub mod wire;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use meshcall_common::SignalingError;

use crate::protocol::StorePath;

pub use memory::MemoryStore;
pub use remote::{RemoteStore, RemoteStoreConfig};

/// One message delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub path: StorePath,
    pub seq: u64,
    pub value: Value,
}

/// Latest entry of a path and the version compare-and-set expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned {
    pub version: u64,
    pub value: Value,
}

/// Subscriber callback. Runs on the store's delivery context, so it must
/// not block or call back into the store.
pub type DeliveryCallback = Arc<dyn Fn(Delivery) + Send + Sync>;

#[async_trait]
pub trait SignalingStore: Send + Sync + 'static {
    /// Append `value` at `path`; returns its sequence number.
    async fn publish(&self, path: &StorePath, value: Value) -> Result<u64, SignalingError>;

    /// Deliver every current and future entry at `path` until the returned
    /// subscription is released.
    async fn subscribe(
        &self,
        path: &StorePath,
        callback: DeliveryCallback,
    ) -> Result<Subscription, SignalingError>;

    /// Latest entry at `path`, if any.
    async fn read(&self, path: &StorePath) -> Result<Option<Versioned>, SignalingError>;

    /// Atomically replace `path` with `value` if its version is still
    /// `expected` (0 for a path with no entries). Fails with
    /// [`SignalingError::Conflict`] otherwise.
    async fn compare_and_set(
        &self,
        path: &StorePath,
        expected: u64,
        value: Value,
    ) -> Result<u64, SignalingError>;

    /// Drop every entry at `path`. Sequence numbers keep increasing.
    async fn clear(&self, path: &StorePath) -> Result<(), SignalingError>;
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

type Release = Box<dyn FnOnce() + Send>;

/// Handle to an active subscription.
///
/// Releasing is idempotent; once [`Subscription::unsubscribe`] returns no
/// further callback runs. Dropping the handle releases it as well.
pub struct Subscription {
    active: Arc<AtomicBool>,
    release: Mutex<Option<Release>>,
}

impl Subscription {
    pub(crate) fn new(active: Arc<AtomicBool>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            active,
            release: Mutex::new(Some(Box::new(release))),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn unsubscribe(&self) {
        self.active.store(false, Ordering::Release);
        let release = match self.release.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(release) = release {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Publish a serializable record.
pub async fn publish_json<T: Serialize + Sync>(
    store: &dyn SignalingStore,
    path: &StorePath,
    record: &T,
) -> Result<u64, SignalingError> {
    let value = serde_json::to_value(record).map_err(|e| SignalingError::Codec(e.to_string()))?;
    store.publish(path, value).await
}
