//! Fixtures shared by the scenario tests.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use meshcall_common::{CallId, Event, EventBus, SlotIndex, TrackKind};

use crate::deps::SessionDeps;
use crate::media::{LocalMedia, LocalMediaState, MediaTrack, VideoSource};
use crate::membership::SlotClaim;
use crate::mesh::{MeshController, MeshHandle, MeshParams};
use crate::negotiator::LinkState;
use crate::protocol::{MessageKind, StorePath};
use crate::settings::SessionSettings;
use crate::signaling::{MemoryStore, SignalingStore};
use crate::sim::{SimMediaProvider, SimNetwork};

pub(crate) fn call() -> CallId {
    CallId::parse("MESHTEST").unwrap()
}

pub(crate) fn av_state() -> LocalMediaState {
    LocalMediaState {
        audio: Some(MediaTrack::new(TrackKind::Audio, "mic")),
        video: Some(MediaTrack::new(TrackKind::Video, "camera")),
        video_source: VideoSource::Camera,
    }
}

/// One shared store, network and capture provider.
pub(crate) struct World {
    pub store: MemoryStore,
    pub net: SimNetwork,
    pub provider: Arc<SimMediaProvider>,
}

impl World {
    pub fn new() -> Self {
        Self {
            store: MemoryStore::new(),
            net: SimNetwork::new(),
            provider: Arc::new(SimMediaProvider::new()),
        }
    }

    /// Collaborators for one process, with its own event bus.
    pub fn deps(&self) -> SessionDeps {
        SessionDeps {
            store: Arc::new(self.store.clone()) as Arc<dyn SignalingStore>,
            engine: Arc::new(self.net.clone()),
            media: self.provider.clone(),
            events: Arc::new(EventBus::new(1024)),
            settings: SessionSettings::default(),
        }
    }

    pub fn offers(&self, from: SlotIndex, to: SlotIndex) -> usize {
        self.store
            .history(&StorePath::link(&call(), from, to, MessageKind::Offer))
            .len()
    }

    pub async fn occupied(&self) -> Vec<SlotIndex> {
        self.deps()
            .membership()
            .roster(&call())
            .await
            .unwrap()
            .occupied()
    }
}

/// Poll `check` until it holds, failing the test after `limit` of
/// (virtual) time.
pub(crate) async fn eventually<F, Fut>(limit: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if check().await {
            return;
        }
        time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met within {limit:?}");
}

/// Whether `handle` has exactly the links to `remotes`, all connected.
pub(crate) async fn connected_to(handle: &MeshHandle, remotes: &[SlotIndex]) -> bool {
    let states = handle.link_states().await;
    states.len() == remotes.len()
        && states
            .iter()
            .zip(remotes)
            .all(|((slot, state), want)| slot == want && *state == LinkState::Connected)
}

pub(crate) fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

pub(crate) const SETTLE: Duration = Duration::from_secs(5);

/// A participant running its primary mesh.
pub(crate) struct Peer {
    pub handle: MeshHandle,
    pub claim: SlotClaim,
    pub media: LocalMedia,
    pub events: broadcast::Receiver<Event>,
}

pub(crate) async fn join(world: &World, name: &str) -> Peer {
    let deps = world.deps();
    let events = deps.events.subscribe();
    let claim = deps.membership().join(&call(), name).await.unwrap();
    let media = LocalMedia::new(av_state());
    let handle = MeshController::start(
        MeshParams {
            claim: claim.clone(),
            sharer: None,
            media: media.subscribe(),
            report_participants: true,
        },
        deps,
    )
    .await
    .unwrap();
    Peer {
        handle,
        claim,
        media,
        events,
    }
}

pub(crate) async fn wait_connected(peer: &Peer, remotes: &[SlotIndex]) {
    let handle = peer.handle.clone();
    let remotes = remotes.to_vec();
    eventually(SETTLE, || {
        let handle = handle.clone();
        let remotes = remotes.clone();
        async move { connected_to(&handle, &remotes).await }
    })
    .await;
}
