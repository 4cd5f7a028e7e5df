//! JSON frames spoken between [`RemoteStore`](super::RemoteStore) and the
//! relay server.
//!
//! Client → server: request frames carrying a client-chosen `id`.
//! Server → client: a reply frame with the same `id`, plus unsolicited
//! `delivery` frames for active subscriptions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Versioned;

/// Client → relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientFrame {
    Publish {
        id: u64,
        path: String,
        value: Value,
    },
    /// `id` doubles as the subscription id in later `delivery` frames.
    Subscribe {
        id: u64,
        path: String,
        #[serde(default)]
        after_seq: u64,
    },
    Unsubscribe {
        id: u64,
        sub: u64,
    },
    Read {
        id: u64,
        path: String,
    },
    CompareAndSet {
        id: u64,
        path: String,
        expected: u64,
        value: Value,
    },
    Clear {
        id: u64,
        path: String,
    },
    Ping {
        id: u64,
    },
}

impl ClientFrame {
    pub fn id(&self) -> u64 {
        match self {
            Self::Publish { id, .. }
            | Self::Subscribe { id, .. }
            | Self::Unsubscribe { id, .. }
            | Self::Read { id, .. }
            | Self::CompareAndSet { id, .. }
            | Self::Clear { id, .. }
            | Self::Ping { id } => *id,
        }
    }
}

/// Relay → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Ok {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
    Entry {
        id: u64,
        entry: Option<Versioned>,
    },
    Conflict {
        id: u64,
        current: u64,
    },
    Delivery {
        sub: u64,
        path: String,
        seq: u64,
        value: Value,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        message: String,
    },
    Pong {
        id: u64,
    },
}

impl ServerFrame {
    /// Request id this frame answers, if it is a reply.
    pub fn reply_to(&self) -> Option<u64> {
        match self {
            Self::Ok { id, .. }
            | Self::Entry { id, .. }
            | Self::Conflict { id, .. }
            | Self::Pong { id } => Some(*id),
            Self::Error { id, .. } => *id,
            Self::Delivery { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_frames_are_op_tagged() {
        let frame = ClientFrame::CompareAndSet {
            id: 7,
            path: "calls/X/roster".into(),
            expected: 3,
            value: json!({}),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"op\":\"compare_and_set\""));
        assert_eq!(frame.id(), 7);
    }

    #[test]
    fn subscribe_defaults_after_seq() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"op":"subscribe","id":1,"path":"p"}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Subscribe {
                id: 1,
                path: "p".into(),
                after_seq: 0
            }
        );
    }

    #[test]
    fn deliveries_are_not_replies() {
        let frame = ServerFrame::Delivery {
            sub: 4,
            path: "p".into(),
            seq: 1,
            value: json!(null),
        };
        assert_eq!(frame.reply_to(), None);
        assert_eq!(ServerFrame::Pong { id: 9 }.reply_to(), Some(9));
        let err = ServerFrame::Error {
            id: None,
            message: "bad frame".into(),
        };
        assert_eq!(err.reply_to(), None);
    }

    #[test]
    fn server_frame_parses_from_text() {
        let frame: ServerFrame = serde_json::from_str(
            r#"{"type":"entry","id":2,"entry":{"version":5,"value":{"a":1}}}"#,
        )
        .unwrap();
        match frame {
            ServerFrame::Entry { id, entry } => {
                assert_eq!(id, 2);
                assert_eq!(entry.unwrap().version, 5);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }
}
