use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{ParticipantUpdate, SlotIndex, TrackKind};

/// Events published by the session core and by the features layered on it
/// (subtitles, transcripts, recording). Consumers subscribe to the bus that
/// was injected into the session at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    ParticipantChanged(ParticipantUpdate),
    RemoteTrackAdded {
        slot: SlotIndex,
        track_id: String,
        kind: TrackKind,
    },
    ScreenShareStarted {
        virtual_slot: SlotIndex,
        sharer: SlotIndex,
    },
    ScreenShareStopped {
        virtual_slot: SlotIndex,
        sharer: SlotIndex,
    },
    CallLeft {
        call_id: String,
        slot: SlotIndex,
    },
    TranscriptEntry {
        slot: SlotIndex,
        speaker: String,
        text: String,
    },
    Notification(String),
    Shutdown,
    #[serde(other)]
    Unknown,
}

pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: Event) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Connectivity;

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(Event::Shutdown);

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::Shutdown));
    }

    #[tokio::test]
    async fn multiple_subscribers() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(Event::Notification("hi".into()));

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert!(matches!(e1, Event::Notification(ref m) if m == "hi"));
        assert!(matches!(e2, Event::Notification(ref m) if m == "hi"));
    }

    #[tokio::test]
    async fn participant_events_keep_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        for connectivity in [Connectivity::Joining, Connectivity::Connected, Connectivity::Left] {
            bus.publish(Event::ParticipantChanged(ParticipantUpdate {
                slot: 1,
                display_name: "bob".into(),
                sharer: None,
                connectivity,
            }));
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            if let Event::ParticipantChanged(update) = rx.recv().await.unwrap() {
                seen.push(update.connectivity);
            }
        }
        assert_eq!(
            seen,
            vec![Connectivity::Joining, Connectivity::Connected, Connectivity::Left]
        );
    }

    #[test]
    fn publish_returns_zero_with_no_subscribers() {
        let bus = EventBus::new(16);
        assert_eq!(bus.publish(Event::Shutdown), 0);
    }

    #[tokio::test]
    async fn publish_returns_subscriber_count() {
        let bus = EventBus::new(16);
        let _rx1 = bus.subscribe();
        let _rx2 = bus.subscribe();

        assert_eq!(bus.publish(Event::Shutdown), 2);
    }

    #[test]
    fn unknown_event_deserializes() {
        let json = r#"{"type":"SomeNewEventWeNeverHeardOf","data":null}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert!(matches!(event, Event::Unknown));
    }

    #[test]
    fn transcript_entry_round_trips() {
        let event = Event::TranscriptEntry {
            slot: 2,
            speaker: "carol".into(),
            text: "hello".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"TranscriptEntry\""));
        let back: Event = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, Event::TranscriptEntry { slot: 2, .. }));
    }
}
