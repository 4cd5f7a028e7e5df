//! Records exchanged through the signaling store.
//!
//! Every path lives under `calls/<call-id>/`. The roster is a single
//! versioned document updated with compare-and-set; departures and link
//! messages are append-only logs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use meshcall_common::{CallId, SlotIndex};

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Logical key inside the signaling store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorePath(String);

impl StorePath {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The occupied-slot document of a call.
    pub fn roster(call: &CallId) -> Self {
        Self(format!("calls/{call}/roster"))
    }

    /// Departure markers of a call.
    pub fn departures(call: &CallId) -> Self {
        Self(format!("calls/{call}/departures"))
    }

    /// Messages of one kind sent from `from` to `to`.
    pub fn link(call: &CallId, from: SlotIndex, to: SlotIndex, kind: MessageKind) -> Self {
        Self(format!("calls/{call}/links/{from}-{to}/{}", kind.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Link messages
// ---------------------------------------------------------------------------

/// Which per-pair log a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Offer,
    Answer,
    Candidates,
    Control,
}

impl MessageKind {
    pub const ALL: [MessageKind; 4] = [
        MessageKind::Offer,
        MessageKind::Answer,
        MessageKind::Candidates,
        MessageKind::Control,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Candidates => "candidates",
            Self::Control => "control",
        }
    }
}

/// A network reachability hint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }
}

/// Negotiation payloads for one ordered pair of slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalingMessage {
    Offer { sdp: String, generation: u32 },
    Answer { sdp: String, generation: u32 },
    /// Cumulative: every batch carries all candidates gathered so far.
    CandidateBatch {
        batch: u32,
        candidates: Vec<IceCandidate>,
    },
    /// Responder asks the initiator for a fresh offer.
    RenegotiationRequest { generation: u32 },
}

impl SignalingMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Offer { .. } => MessageKind::Offer,
            Self::Answer { .. } => MessageKind::Answer,
            Self::CandidateBatch { .. } => MessageKind::Candidates,
            Self::RenegotiationRequest { .. } => MessageKind::Control,
        }
    }
}

/// Addressing wrapper around every link message. Messages whose
/// incarnations do not match the current occupants are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    pub from: SlotIndex,
    pub to: SlotIndex,
    pub from_incarnation: String,
    pub to_incarnation: String,
    pub message: SignalingMessage,
}

// ---------------------------------------------------------------------------
// Membership records
// ---------------------------------------------------------------------------

/// One occupied slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub display_name: String,
    /// Owning participant when this slot is a screen share.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sharer: Option<SlotIndex>,
    /// Unique per registration; distinguishes a reused index from its
    /// previous occupant.
    pub incarnation: String,
    /// RFC 3339 registration time.
    pub joined_at: String,
}

impl SlotRecord {
    pub fn is_virtual(&self) -> bool {
        self.sharer.is_some()
    }
}

/// The occupied-slot document of a call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    #[serde(default)]
    pub slots: BTreeMap<SlotIndex, SlotRecord>,
    /// Recently vacated indices and the unix time (ms) they free up at.
    #[serde(default)]
    pub quarantine: BTreeMap<SlotIndex, i64>,
}

impl Roster {
    /// Occupied indices in ascending order.
    pub fn occupied(&self) -> Vec<SlotIndex> {
        self.slots.keys().copied().collect()
    }

    pub fn get(&self, slot: SlotIndex) -> Option<&SlotRecord> {
        self.slots.get(&slot)
    }

    /// Whether `slot` is held by exactly this incarnation.
    pub fn holds(&self, slot: SlotIndex, incarnation: &str) -> bool {
        self.slots
            .get(&slot)
            .is_some_and(|r| r.incarnation == incarnation)
    }

    /// Drop quarantine entries that expired at or before `now_ms`.
    pub fn prune_quarantine(&mut self, now_ms: i64) {
        self.quarantine.retain(|_, until| *until > now_ms);
    }

    /// Lowest index that is neither occupied nor quarantined.
    pub fn lowest_free(&self) -> SlotIndex {
        (0..)
            .find(|i| !self.slots.contains_key(i) && !self.quarantine.contains_key(i))
            .unwrap_or(SlotIndex::MAX)
    }

    /// Screen-share slots currently owned by `sharer`.
    pub fn shares_of(&self, sharer: SlotIndex) -> Vec<SlotIndex> {
        self.slots
            .iter()
            .filter(|(_, r)| r.sharer == Some(sharer))
            .map(|(i, _)| *i)
            .collect()
    }
}

/// Published when a slot leaves so peers can tear down their links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartureMarker {
    pub slot: SlotIndex,
    pub incarnation: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, sharer: Option<SlotIndex>) -> SlotRecord {
        SlotRecord {
            display_name: name.into(),
            sharer,
            incarnation: format!("inc-{name}"),
            joined_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn paths_are_scoped_by_call() {
        let call = CallId::parse("ABC123").unwrap();
        assert_eq!(StorePath::roster(&call).as_str(), "calls/ABC123/roster");
        assert_eq!(
            StorePath::departures(&call).as_str(),
            "calls/ABC123/departures"
        );
        assert_eq!(
            StorePath::link(&call, 0, 2, MessageKind::Offer).as_str(),
            "calls/ABC123/links/0-2/offer"
        );
        assert_ne!(
            StorePath::link(&call, 0, 2, MessageKind::Offer),
            StorePath::link(&call, 2, 0, MessageKind::Offer)
        );
    }

    #[test]
    fn lowest_free_skips_occupied_and_quarantined() {
        let mut roster = Roster::default();
        assert_eq!(roster.lowest_free(), 0);

        roster.slots.insert(0, record("ada", None));
        roster.slots.insert(2, record("bob", None));
        assert_eq!(roster.lowest_free(), 1);

        roster.quarantine.insert(1, 5_000);
        assert_eq!(roster.lowest_free(), 3);

        roster.prune_quarantine(5_000);
        assert_eq!(roster.lowest_free(), 1);
    }

    #[test]
    fn holds_checks_incarnation() {
        let mut roster = Roster::default();
        roster.slots.insert(1, record("ada", None));
        assert!(roster.holds(1, "inc-ada"));
        assert!(!roster.holds(1, "inc-someone-else"));
        assert!(!roster.holds(2, "inc-ada"));
    }

    #[test]
    fn shares_of_finds_virtual_slots() {
        let mut roster = Roster::default();
        roster.slots.insert(0, record("ada", None));
        roster.slots.insert(1, record("bob", None));
        roster.slots.insert(2, record("bob's screen", Some(1)));
        assert_eq!(roster.shares_of(1), vec![2]);
        assert!(roster.shares_of(0).is_empty());
        assert!(roster.get(2).unwrap().is_virtual());
    }

    #[test]
    fn roster_survives_json_with_integer_keys() {
        let mut roster = Roster::default();
        roster.slots.insert(3, record("ada", None));
        roster.quarantine.insert(1, 42);
        let value = serde_json::to_value(&roster).unwrap();
        let back: Roster = serde_json::from_value(value).unwrap();
        assert_eq!(back, roster);
    }

    #[test]
    fn message_kind_tagging() {
        let msg = SignalingMessage::CandidateBatch {
            batch: 2,
            candidates: vec![IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 5000 typ host")],
        };
        assert_eq!(msg.kind(), MessageKind::Candidates);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"kind\":\"candidate_batch\""));
        assert!(!json.contains("sdp_mid"));
    }
}
