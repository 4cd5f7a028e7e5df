//! Membership and peer-link negotiation for full-mesh calls.
//!
//! A [`CallSession`] takes a slot in a call's roster, acquires local media
//! and runs a [`MeshController`] that keeps one [`PeerLinkNegotiator`] per
//! other participant. Negotiation messages travel through a
//! [`SignalingStore`]; media flows over whatever [`PeerConnectionFactory`]
//! the embedder provides.

pub mod call;
pub mod deps;
pub mod engine;
pub mod media;
pub mod membership;
pub mod mesh;
pub mod negotiator;
pub mod protocol;
pub mod screen_share;
pub mod settings;
pub mod shutdown;
pub mod signaling;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

#[cfg(test)]
mod testing;

pub use call::CallSession;
pub use deps::SessionDeps;
pub use engine::{
    EngineEvent, EngineEventSink, LinkConnectivity, LinkKey, PeerConnection,
    PeerConnectionFactory, SessionDescription,
};
pub use media::{LocalMedia, LocalMediaState, MediaProvider, MediaSource, MediaTrack, VideoSource};
pub use membership::{Registration, SessionMembership, SlotClaim};
pub use mesh::{MeshController, MeshHandle, MeshParams};
pub use negotiator::{LinkState, PeerLinkNegotiator, Role};
pub use protocol::{
    DepartureMarker, IceCandidate, Roster, SignalEnvelope, SignalingMessage, SlotRecord,
    StorePath,
};
pub use screen_share::ScreenShareManager;
pub use settings::SessionSettings;
pub use shutdown::flush_with_timeout;
pub use signaling::{MemoryStore, RemoteStore, RemoteStoreConfig, SignalingStore, Subscription};
