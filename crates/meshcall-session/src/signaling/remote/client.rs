//! Public handle implementing [`SignalingStore`] against a relay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use meshcall_common::SignalingError;

use super::connection::connection_loop;
use super::types::{RemoteStoreConfig, Shared, StoreCommand};
use crate::protocol::StorePath;
use crate::signaling::wire::{ClientFrame, ServerFrame};
use crate::signaling::{DeliveryCallback, SignalingStore, Subscription, Versioned};

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Signaling store backed by a `meshcall-relay` server.
///
/// All methods send frames to the background connection task and wait for
/// the matching reply, bounded by the configured request timeout.
pub struct RemoteStore {
    config: RemoteStoreConfig,
    shared: Arc<Shared>,
    command_tx: mpsc::Sender<StoreCommand>,
}

impl RemoteStore {
    /// Create the client and start the background connection.
    pub fn connect(config: RemoteStoreConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(64);
        let shared = Arc::new(Shared::default());

        tokio::spawn(connection_loop(
            config.clone(),
            Arc::clone(&shared),
            command_rx,
        ));

        Self {
            config,
            shared,
            command_tx,
        }
    }

    /// Whether the WebSocket is currently open.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    async fn request(&self, frame: ClientFrame) -> Result<ServerFrame, SignalingError> {
        let id = frame.id();
        let reply = self.shared.register_pending(id);

        let exchange = async {
            self.command_tx
                .send(StoreCommand::Send(frame))
                .await
                .map_err(|_| SignalingError::Closed)?;
            reply
                .await
                .map_err(|_| SignalingError::Delivery("connection lost".into()))
        };

        match tokio::time::timeout(self.config.request_timeout, exchange).await {
            Ok(Ok(ServerFrame::Error { message, .. })) => Err(SignalingError::Delivery(message)),
            Ok(result) => result,
            Err(_elapsed) => {
                self.shared.forget_pending(id);
                Err(SignalingError::Timeout)
            }
        }
    }
}

impl Drop for RemoteStore {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        let _ = self.command_tx.try_send(StoreCommand::Disconnect);
    }
}

fn unexpected(frame: ServerFrame) -> SignalingError {
    SignalingError::Codec(format!("unexpected reply: {frame:?}"))
}

#[async_trait]
impl SignalingStore for RemoteStore {
    async fn publish(&self, path: &StorePath, value: Value) -> Result<u64, SignalingError> {
        let frame = ClientFrame::Publish {
            id: self.shared.next_id(),
            path: path.as_str().to_string(),
            value,
        };
        match self.request(frame).await? {
            ServerFrame::Ok { seq: Some(seq), .. } => Ok(seq),
            other => Err(unexpected(other)),
        }
    }

    async fn subscribe(
        &self,
        path: &StorePath,
        callback: DeliveryCallback,
    ) -> Result<Subscription, SignalingError> {
        let id = self.shared.next_id();
        // Registered first so deliveries racing the reply are not lost.
        self.shared.add_subscription(id, path.clone(), callback);

        let frame = ClientFrame::Subscribe {
            id,
            path: path.as_str().to_string(),
            after_seq: 0,
        };
        match self.request(frame).await {
            Ok(ServerFrame::Ok { .. }) => {}
            Ok(other) => {
                self.shared.remove_subscription(id);
                return Err(unexpected(other));
            }
            Err(e) => {
                self.shared.remove_subscription(id);
                return Err(e);
            }
        }

        let shared = Arc::clone(&self.shared);
        let command_tx = self.command_tx.clone();
        let active = Arc::new(AtomicBool::new(true));
        Ok(Subscription::new(active, move || {
            if shared.remove_subscription(id) {
                let frame = ClientFrame::Unsubscribe {
                    id: shared.next_id(),
                    sub: id,
                };
                if command_tx.try_send(StoreCommand::Send(frame)).is_err() {
                    debug!(sub = id, "Unsubscribe not sent; relay drops it on disconnect");
                }
            }
        }))
    }

    async fn read(&self, path: &StorePath) -> Result<Option<Versioned>, SignalingError> {
        let frame = ClientFrame::Read {
            id: self.shared.next_id(),
            path: path.as_str().to_string(),
        };
        match self.request(frame).await? {
            ServerFrame::Entry { entry, .. } => Ok(entry),
            other => Err(unexpected(other)),
        }
    }

    async fn compare_and_set(
        &self,
        path: &StorePath,
        expected: u64,
        value: Value,
    ) -> Result<u64, SignalingError> {
        let frame = ClientFrame::CompareAndSet {
            id: self.shared.next_id(),
            path: path.as_str().to_string(),
            expected,
            value,
        };
        match self.request(frame).await? {
            ServerFrame::Ok { seq: Some(seq), .. } => Ok(seq),
            ServerFrame::Conflict { current, .. } => Err(SignalingError::Conflict { current }),
            other => Err(unexpected(other)),
        }
    }

    async fn clear(&self, path: &StorePath) -> Result<(), SignalingError> {
        let frame = ClientFrame::Clear {
            id: self.shared.next_id(),
            path: path.as_str().to_string(),
        };
        match self.request(frame).await? {
            ServerFrame::Ok { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}
