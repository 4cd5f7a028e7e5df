//! Seam to the platform's peer-connection stack.
//!
//! The negotiator drives a [`PeerConnection`] through description
//! generation, candidate application and outbound track swaps; the engine
//! reports gathered candidates, transport reachability and remote tracks
//! back through an [`EngineEventSink`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use meshcall_common::{CallId, EngineError, SlotIndex, TrackKind};

use crate::media::LocalMediaState;
use crate::protocol::IceCandidate;
use crate::settings::IceSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Media kinds declared by the `m=` lines, in order of appearance.
    pub fn kinds(&self) -> Vec<TrackKind> {
        self.sdp
            .lines()
            .filter_map(|line| line.strip_prefix("m="))
            .filter_map(|rest| TrackKind::parse(rest.split_whitespace().next().unwrap_or("")))
            .collect()
    }
}

/// Transport reachability reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkConnectivity {
    Reachable,
    Unreachable,
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    LocalCandidate(IceCandidate),
    Connectivity(LinkConnectivity),
    RemoteTrack { track_id: String, kind: TrackKind },
}

/// Where an engine reports events for one link. Must not block.
pub type EngineEventSink = Arc<dyn Fn(EngineEvent) + Send + Sync>;

/// The two ends of a link, seen from the local slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkKey {
    pub call: CallId,
    pub local: SlotIndex,
    pub remote: SlotIndex,
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self, media: &LocalMediaState)
        -> Result<SessionDescription, EngineError>;

    /// Requires a remote offer to have been applied.
    async fn create_answer(
        &self,
        media: &LocalMediaState,
    ) -> Result<SessionDescription, EngineError>;

    /// Applying a local description starts candidate gathering.
    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), EngineError>;

    async fn set_remote_description(&self, desc: &SessionDescription)
        -> Result<(), EngineError>;

    /// Fails with [`EngineError::NoRemoteDescription`] before a remote
    /// description is applied.
    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<(), EngineError>;

    /// Swap the content of the outbound tracks without renegotiating.
    async fn replace_outbound(&self, media: &LocalMediaState) -> Result<(), EngineError>;

    async fn close(&self);
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync + 'static {
    async fn create(
        &self,
        link: &LinkKey,
        ice: &IceSettings,
        events: EngineEventSink,
    ) -> Result<Arc<dyn PeerConnection>, EngineError>;
}
