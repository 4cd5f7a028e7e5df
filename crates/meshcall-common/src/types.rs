use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of an occupant inside a call. Lower indices initiate links.
pub type SlotIndex = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connectivity of a remote participant as seen by the local slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    /// Present in the roster, link still negotiating.
    #[default]
    Joining,
    Connected,
    /// Transport lost; may still recover within the grace period.
    Disconnected,
    /// Negotiation failed; the rest of the mesh is unaffected.
    Failed,
    /// Departed, evicted after the grace period, or closed locally.
    Left,
}

impl Connectivity {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Left)
    }
}

/// One entry of the membership UI feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantUpdate {
    pub slot: SlotIndex,
    pub display_name: String,
    /// Set when the slot is a screen share owned by another slot.
    pub sharer: Option<SlotIndex>,
    pub connectivity: Connectivity,
}
