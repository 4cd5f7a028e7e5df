//! Per-connection handler: answer request frames, push deliveries.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use meshcall_common::SignalingError;
use meshcall_session::signaling::wire::{ClientFrame, ServerFrame};
use meshcall_session::signaling::Delivery;
use meshcall_session::{MemoryStore, StorePath, Subscription};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Serve one WebSocket client until it closes.
pub async fn handle_connection(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    addr: SocketAddr,
    store: MemoryStore,
) {
    let (mut sink, mut stream) = ws.split();

    // Deliveries arrive from store callbacks, which must not block.
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();
    let mut subs: HashMap<u64, Subscription> = HashMap::new();

    tracing::info!(peer = %addr, "Client connected");

    loop {
        tokio::select! {
            Some(frame) = rx.recv() => {
                if send_frame(&mut sink, &frame).await.is_err() {
                    break;
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(request) => handle_request(&store, &tx, &mut subs, request),
                            Err(e) => {
                                tracing::warn!(peer = %addr, error = %e, "Invalid frame");
                                ServerFrame::Error {
                                    id: None,
                                    message: format!("invalid frame: {e}"),
                                }
                            }
                        };
                        if send_frame(&mut sink, &reply).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(peer = %addr, error = %e, "WS error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    tracing::info!(peer = %addr, subscriptions = subs.len(), "Client disconnected");
    // Dropping the subscriptions detaches them from the store.
    subs.clear();
}

/// Apply one request to the store and build its reply.
///
/// A `subscribe` replaces any subscription already registered under the
/// same id, so a reconnecting client can resume with `after_seq`.
pub(crate) fn handle_request(
    store: &MemoryStore,
    outgoing: &mpsc::UnboundedSender<ServerFrame>,
    subs: &mut HashMap<u64, Subscription>,
    frame: ClientFrame,
) -> ServerFrame {
    match frame {
        ClientFrame::Publish { id, path, value } => {
            match store.publish_now(&StorePath::new(path), value) {
                Ok(seq) => ServerFrame::Ok { id, seq: Some(seq) },
                Err(e) => error_reply(id, e),
            }
        }
        ClientFrame::Subscribe {
            id,
            path,
            after_seq,
        } => {
            subs.remove(&id);
            let tx = outgoing.clone();
            let sub = store.subscribe_after(
                &StorePath::new(path),
                after_seq,
                Arc::new(move |delivery: Delivery| {
                    let _ = tx.send(ServerFrame::Delivery {
                        sub: id,
                        path: delivery.path.as_str().to_string(),
                        seq: delivery.seq,
                        value: delivery.value,
                    });
                }),
            );
            subs.insert(id, sub);
            ServerFrame::Ok { id, seq: None }
        }
        ClientFrame::Unsubscribe { id, sub } => {
            if let Some(sub) = subs.remove(&sub) {
                sub.unsubscribe();
            }
            ServerFrame::Ok { id, seq: None }
        }
        ClientFrame::Read { id, path } => ServerFrame::Entry {
            id,
            entry: store.read_now(&StorePath::new(path)),
        },
        ClientFrame::CompareAndSet {
            id,
            path,
            expected,
            value,
        } => match store.compare_and_set_now(&StorePath::new(path), expected, value) {
            Ok(seq) => ServerFrame::Ok { id, seq: Some(seq) },
            Err(SignalingError::Conflict { current }) => ServerFrame::Conflict { id, current },
            Err(e) => error_reply(id, e),
        },
        ClientFrame::Clear { id, path } => {
            store.clear_now(&StorePath::new(path));
            ServerFrame::Ok { id, seq: None }
        }
        ClientFrame::Ping { id } => ServerFrame::Pong { id },
    }
}

fn error_reply(id: u64, err: SignalingError) -> ServerFrame {
    ServerFrame::Error {
        id: Some(id),
        message: err.to_string(),
    }
}

async fn send_frame(
    sink: &mut futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
        Message,
    >,
    frame: &ServerFrame,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode frame");
            return Ok(());
        }
    };
    sink.send(Message::Text(json.into())).await
}
