//! Link states, roles and callback types.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use meshcall_common::{CallId, Connectivity, SlotIndex};

use crate::protocol::SignalEnvelope;

/// Negotiation state of one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Idle,
    OfferSent,
    AwaitingOffer,
    AnswerExchanged,
    Connected,
    Disconnected,
    Closed,
    Failed,
}

impl LinkState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// Whether an offer/answer exchange is still in flight.
    pub fn is_negotiating(&self) -> bool {
        matches!(
            self,
            Self::Idle | Self::OfferSent | Self::AwaitingOffer | Self::AnswerExchanged
        )
    }

    /// How the link shows up in the participant feed.
    pub fn connectivity(&self, transport_up: bool) -> Connectivity {
        match self {
            Self::Connected => Connectivity::Connected,
            // Renegotiating over a live transport keeps media flowing.
            _ if self.is_negotiating() && transport_up => Connectivity::Connected,
            Self::Idle | Self::OfferSent | Self::AwaitingOffer | Self::AnswerExchanged => {
                Connectivity::Joining
            }
            Self::Disconnected => Connectivity::Disconnected,
            Self::Failed => Connectivity::Failed,
            Self::Closed => Connectivity::Left,
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::OfferSent => "offer_sent",
            Self::AwaitingOffer => "awaiting_offer",
            Self::AnswerExchanged => "answer_exchanged",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Which side of the link issues offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    /// The numerically lower index initiates.
    pub fn for_pair(local: SlotIndex, remote: SlotIndex) -> Self {
        if local < remote {
            Self::Initiator
        } else {
            Self::Responder
        }
    }
}

/// Identity of both ends of a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkContext {
    pub call: CallId,
    pub local: SlotIndex,
    pub local_incarnation: String,
    pub remote: SlotIndex,
    pub remote_incarnation: String,
}

/// Result of a timer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    /// Disconnected past the grace period; the link is now closed and the
    /// remote should be treated as departed.
    GraceExpired,
    /// No negotiation progress in time; the link is now failed.
    TimedOut,
    /// Timed out before the transport ever came up. The remote most likely
    /// died before connecting and should be treated as departed.
    NeverReached,
}

/// Receives inbound envelopes for one link.
pub type SignalSink = Arc<dyn Fn(SignalEnvelope) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_index_initiates() {
        assert_eq!(Role::for_pair(0, 2), Role::Initiator);
        assert_eq!(Role::for_pair(2, 0), Role::Responder);
    }

    #[test]
    fn connectivity_mapping() {
        assert_eq!(
            LinkState::OfferSent.connectivity(false),
            Connectivity::Joining
        );
        assert_eq!(
            LinkState::OfferSent.connectivity(true),
            Connectivity::Connected
        );
        assert_eq!(
            LinkState::Disconnected.connectivity(false),
            Connectivity::Disconnected
        );
        assert_eq!(LinkState::Closed.connectivity(false), Connectivity::Left);
        assert_eq!(LinkState::Failed.connectivity(true), Connectivity::Failed);
    }

    #[test]
    fn terminal_states() {
        assert!(LinkState::Closed.is_terminal());
        assert!(LinkState::Failed.is_terminal());
        assert!(!LinkState::Disconnected.is_terminal());
        assert_eq!(LinkState::AnswerExchanged.to_string(), "answer_exchanged");
    }
}
