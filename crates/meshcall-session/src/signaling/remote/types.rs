//! Configuration, shared state and commands for the remote store client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use meshcall_config::schema::SignalingConfig;

use crate::protocol::StorePath;
use crate::signaling::wire::{ClientFrame, ServerFrame};
use crate::signaling::{Delivery, DeliveryCallback};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Connection settings for [`RemoteStore`](super::RemoteStore).
#[derive(Debug, Clone)]
pub struct RemoteStoreConfig {
    /// `ws://` or `wss://` URL of the relay.
    pub url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Heartbeat interval in seconds (default: 25).
    pub heartbeat_interval_secs: u64,
    /// Reconnect base delay in seconds.
    pub reconnect_delay_secs: u64,
    /// Maximum reconnect delay in seconds.
    pub max_reconnect_delay_secs: u64,
}

impl Default for RemoteStoreConfig {
    fn default() -> Self {
        Self::from(&SignalingConfig::default())
    }
}

impl From<&SignalingConfig> for RemoteStoreConfig {
    fn from(config: &SignalingConfig) -> Self {
        Self {
            url: config.url.clone(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            heartbeat_interval_secs: config.heartbeat_interval_secs,
            reconnect_delay_secs: config.reconnect_delay_secs.max(1),
            max_reconnect_delay_secs: config.max_reconnect_delay_secs,
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Commands from the client handle to the connection task.
#[derive(Debug)]
pub(crate) enum StoreCommand {
    Send(ClientFrame),
    Disconnect,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub(crate) struct RemoteSubscription {
    pub(crate) path: StorePath,
    pub(crate) last_seq: u64,
    pub(crate) callback: DeliveryCallback,
}

/// State shared between the client handle and the connection task.
#[derive(Default)]
pub(crate) struct Shared {
    next_id: AtomicU64,
    pub(crate) connected: AtomicBool,
    pub(crate) shutdown: AtomicBool,
    pending: Mutex<HashMap<u64, oneshot::Sender<ServerFrame>>>,
    subscriptions: Mutex<HashMap<u64, RemoteSubscription>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn register_pending(&self, id: u64) -> oneshot::Receiver<ServerFrame> {
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        rx
    }

    pub(crate) fn forget_pending(&self, id: u64) {
        lock(&self.pending).remove(&id);
    }

    /// Route a reply to whoever is waiting for it.
    pub(crate) fn resolve(&self, frame: ServerFrame) {
        let Some(id) = frame.reply_to() else {
            return;
        };
        match lock(&self.pending).remove(&id) {
            Some(waiter) => {
                let _ = waiter.send(frame);
            }
            None => debug!(id, "Reply with no waiting request"),
        }
    }

    /// Drop every waiting request; callers see a delivery failure.
    pub(crate) fn fail_pending(&self) {
        lock(&self.pending).clear();
    }

    pub(crate) fn add_subscription(&self, id: u64, path: StorePath, callback: DeliveryCallback) {
        lock(&self.subscriptions).insert(
            id,
            RemoteSubscription {
                path,
                last_seq: 0,
                callback,
            },
        );
    }

    pub(crate) fn remove_subscription(&self, id: u64) -> bool {
        lock(&self.subscriptions).remove(&id).is_some()
    }

    /// Hand a delivery to its subscription, skipping replays already seen.
    pub(crate) fn deliver(&self, sub: u64, seq: u64, value: serde_json::Value) {
        let mut subs = lock(&self.subscriptions);
        let Some(entry) = subs.get_mut(&sub) else {
            return;
        };
        if seq <= entry.last_seq {
            return;
        }
        entry.last_seq = seq;
        (entry.callback)(Delivery {
            path: entry.path.clone(),
            seq,
            value,
        });
    }

    /// Subscribe frames that restore every live subscription after a
    /// reconnect.
    pub(crate) fn resubscribe_frames(&self) -> Vec<ClientFrame> {
        lock(&self.subscriptions)
            .iter()
            .map(|(id, sub)| ClientFrame::Subscribe {
                id: *id,
                path: sub.path.as_str().to_string(),
                after_seq: sub.last_seq,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn deliver_skips_replayed_sequences() {
        let shared = Shared::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        shared.add_subscription(
            1,
            StorePath::new("p"),
            Arc::new(move |d: Delivery| sink.lock().unwrap().push(d.seq)),
        );

        shared.deliver(1, 1, json!(1));
        shared.deliver(1, 2, json!(2));
        shared.deliver(1, 2, json!(2));
        shared.deliver(1, 1, json!(1));
        shared.deliver(9, 3, json!(3));

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn resubscribe_resumes_after_last_seq() {
        let shared = Shared::default();
        shared.add_subscription(5, StorePath::new("p"), Arc::new(|_| {}));
        shared.deliver(5, 4, json!(null));

        let frames = shared.resubscribe_frames();
        assert_eq!(
            frames,
            vec![ClientFrame::Subscribe {
                id: 5,
                path: "p".into(),
                after_seq: 4
            }]
        );

        assert!(shared.remove_subscription(5));
        assert!(!shared.remove_subscription(5));
        assert!(shared.resubscribe_frames().is_empty());
    }

    #[tokio::test]
    async fn pending_requests_resolve_by_id() {
        let shared = Shared::default();
        let id = shared.next_id();
        let rx = shared.register_pending(id);
        shared.resolve(ServerFrame::Pong { id });
        assert_eq!(rx.await.unwrap(), ServerFrame::Pong { id });

        let id = shared.next_id();
        let rx = shared.register_pending(id);
        shared.fail_pending();
        assert!(rx.await.is_err());
    }

    #[test]
    fn config_from_signaling_section() {
        let config = RemoteStoreConfig::from(&SignalingConfig::default());
        assert_eq!(config.url, "ws://127.0.0.1:8787");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.heartbeat_interval_secs, 25);
    }
}
