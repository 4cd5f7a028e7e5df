//! Full-mesh link management for one local slot.
//!
//! A [`MeshController`] runs as a single task per local slot. It follows
//! the roster, keeps one [`PeerLinkNegotiator`](crate::negotiator::PeerLinkNegotiator)
//! per linkable remote slot and feeds the participant list. Every input
//! (roster revisions, departure markers, signaling deliveries, engine
//! events, timer ticks and handle commands) is sequenced through the task,
//! so link state needs no locking.

mod controller;
mod handle;
pub mod topology;


use std::sync::Arc;

use tokio::sync::watch;

use meshcall_common::SlotIndex;

use crate::media::LocalMediaState;
use crate::membership::SlotClaim;

pub use controller::MeshController;
pub use handle::MeshHandle;

/// What a controller runs for.
pub struct MeshParams {
    pub claim: SlotClaim,
    /// Set when the local slot is a screen share.
    pub sharer: Option<SlotIndex>,
    pub media: watch::Receiver<Arc<LocalMediaState>>,
    /// Publish participant and remote-track events on the bus. Off for
    /// screen-share meshes, whose peers already show up in the owner's
    /// primary mesh.
    pub report_participants: bool,
}
