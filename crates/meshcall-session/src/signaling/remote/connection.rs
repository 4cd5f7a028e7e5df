//! Background WebSocket connection loop with auto-reconnect.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use super::types::{RemoteStoreConfig, Shared, StoreCommand};
use crate::signaling::wire::{ClientFrame, ServerFrame};

// ---------------------------------------------------------------------------
// Connection Loop
// ---------------------------------------------------------------------------

/// Background task managing the relay connection with auto-reconnect.
pub(crate) async fn connection_loop(
    config: RemoteStoreConfig,
    shared: Arc<Shared>,
    command_rx: mpsc::Receiver<StoreCommand>,
) {
    let command_rx = Arc::new(Mutex::new(command_rx));
    let mut reconnect_delay = config.reconnect_delay_secs;

    while !shared.shutdown.load(Ordering::Acquire) {
        info!(url = %config.url, "Connecting to signaling relay");

        match tokio::time::timeout(
            config.connect_timeout,
            tokio_tungstenite::connect_async(config.url.as_str()),
        )
        .await
        {
            Ok(Ok((ws_stream, _))) => {
                reconnect_delay = config.reconnect_delay_secs;
                shared.connected.store(true, Ordering::Release);

                let (ws_write, ws_read) = ws_stream.split();
                let ws_write = Arc::new(Mutex::new(ws_write));

                // Restore subscriptions, resuming after the last seen entry.
                for frame in shared.resubscribe_frames() {
                    if send_frame(&ws_write, &frame).await.is_err() {
                        break;
                    }
                }

                let heartbeat_handle = tokio::spawn(heartbeat_task(
                    Arc::clone(&ws_write),
                    Arc::clone(&shared),
                    config.heartbeat_interval_secs,
                ));
                let cmd_handle = tokio::spawn(command_forwarder(
                    Arc::clone(&command_rx),
                    Arc::clone(&ws_write),
                    Arc::clone(&shared),
                ));

                let mut read_stream = ws_read;
                while let Some(msg_result) = read_stream.next().await {
                    match msg_result {
                        Ok(WsMessage::Text(text)) => {
                            match serde_json::from_str::<ServerFrame>(&text) {
                                Ok(frame) => handle_frame(&shared, frame),
                                Err(e) => {
                                    debug!(error = %e, "Unrecognized frame from relay");
                                }
                            }
                        }
                        Ok(WsMessage::Close(_)) => {
                            info!("Signaling relay closed connection");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "WebSocket error");
                            break;
                        }
                        _ => {}
                    }
                    if shared.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                }

                heartbeat_handle.abort();
                cmd_handle.abort();
                shared.connected.store(false, Ordering::Release);
                shared.fail_pending();
            }
            Ok(Err(e)) => {
                error!(error = %e, "Failed to connect to signaling relay");
            }
            Err(_elapsed) => {
                error!(
                    timeout_ms = config.connect_timeout.as_millis() as u64,
                    "Signaling relay connection timed out"
                );
            }
        }

        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }

        info!(
            delay = reconnect_delay,
            "Reconnecting in {} seconds", reconnect_delay
        );
        tokio::time::sleep(Duration::from_secs(reconnect_delay)).await;
        reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay_secs);
    }

    debug!("Signaling relay connection loop stopped");
}

fn handle_frame(shared: &Shared, frame: ServerFrame) {
    match frame {
        ServerFrame::Delivery {
            sub, seq, value, ..
        } => shared.deliver(sub, seq, value),
        ServerFrame::Error { id: None, message } => {
            warn!(%message, "Relay reported an error");
        }
        other => shared.resolve(other),
    }
}

async fn send_frame<S>(ws_write: &Arc<Mutex<S>>, frame: &ClientFrame) -> Result<(), ()>
where
    S: futures_util::Sink<WsMessage> + Unpin,
{
    let json = serde_json::to_string(frame).map_err(|_| ())?;
    let mut writer = ws_write.lock().await;
    writer
        .send(WsMessage::Text(json.into()))
        .await
        .map_err(|_| ())
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

async fn heartbeat_task<S>(ws_write: Arc<Mutex<S>>, shared: Arc<Shared>, interval_secs: u64)
where
    S: futures_util::Sink<WsMessage> + Unpin,
{
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        interval.tick().await;
        let frame = ClientFrame::Ping {
            id: shared.next_id(),
        };
        if send_frame(&ws_write, &frame).await.is_err() {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Command Forwarder
// ---------------------------------------------------------------------------

async fn command_forwarder<S>(
    cmd_rx: Arc<Mutex<mpsc::Receiver<StoreCommand>>>,
    cmd_write: Arc<Mutex<S>>,
    shared: Arc<Shared>,
) where
    S: futures_util::Sink<WsMessage> + Unpin,
{
    let mut rx = cmd_rx.lock().await;
    loop {
        match rx.recv().await {
            Some(StoreCommand::Send(frame)) => {
                if send_frame(&cmd_write, &frame).await.is_err() {
                    // Request stays pending and fails on reconnect or timeout.
                    break;
                }
            }
            Some(StoreCommand::Disconnect) | None => {
                shared.shutdown.store(true, Ordering::Release);
                let mut writer = cmd_write.lock().await;
                let _ = writer.send(WsMessage::Close(None)).await;
                return;
            }
        }
    }
}
