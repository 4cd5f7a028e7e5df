//! Deterministic in-process peer-connection engine and media provider.
//!
//! A [`SimNetwork`] pairs the two local ends of each link (`a → b` and
//! `b → a` of the same call). A pair becomes reachable once both ends have
//! local and remote descriptions and at least one applied remote
//! candidate; closing either end reports `Lost` to the other. Used by the
//! scenario tests and handy for demos without a media stack.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use meshcall_common::{EngineError, MediaError, SlotIndex, TrackKind};

use crate::engine::{
    EngineEvent, EngineEventSink, LinkConnectivity, LinkKey, PeerConnection,
    PeerConnectionFactory, SessionDescription,
};
use crate::media::{LocalMediaState, MediaProvider, MediaSource, MediaTrack};
use crate::protocol::IceCandidate;
use crate::settings::IceSettings;

type PeerKey = (String, SlotIndex, SlotIndex);

fn counterpart(key: &PeerKey) -> PeerKey {
    (key.0.clone(), key.2, key.1)
}

fn render_sdp(peer_id: u64, revision: u32, kinds: &[TrackKind]) -> String {
    let mut sdp = format!("v=0\no=sim {peer_id} {revision} IN IP4 127.0.0.1\ns=-\n");
    for kind in kinds {
        sdp.push_str(&format!("m={kind} 9 UDP/TLS/RTP/SAVPF 96\n"));
    }
    sdp
}

struct SimPeerState {
    id: u64,
    sink: EngineEventSink,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    gathered: bool,
    applied: Vec<String>,
    reachable: bool,
    announced: HashSet<TrackKind>,
    revision: u32,
    outbound: Vec<String>,
}

impl SimPeerState {
    fn ready(&self) -> bool {
        self.local.is_some() && self.remote.is_some() && !self.applied.is_empty()
    }

    /// Report remote tracks not announced yet.
    fn announce_tracks(&mut self, remote: SlotIndex) {
        let kinds = self.remote.as_ref().map(|d| d.kinds()).unwrap_or_default();
        for kind in kinds {
            if self.announced.insert(kind) {
                (self.sink)(EngineEvent::RemoteTrack {
                    track_id: format!("sim-{remote}-{kind}"),
                    kind,
                });
            }
        }
    }
}

#[derive(Default)]
struct SimState {
    peers: HashMap<PeerKey, SimPeerState>,
    next_id: u64,
}

impl SimState {
    fn peer_mut(&mut self, key: &PeerKey, id: u64) -> Result<&mut SimPeerState, EngineError> {
        self.peers
            .get_mut(key)
            .filter(|p| p.id == id)
            .ok_or(EngineError::Closed)
    }

    fn check_reachable(&mut self, key: &PeerKey) {
        let other = counterpart(key);
        let both_ready = matches!(
            (self.peers.get(key), self.peers.get(&other)),
            (Some(a), Some(b)) if a.ready() && b.ready()
        );
        if !both_ready {
            return;
        }
        for k in [key.clone(), other] {
            if let Some(peer) = self.peers.get_mut(&k) {
                if !peer.reachable {
                    peer.reachable = true;
                    (peer.sink)(EngineEvent::Connectivity(LinkConnectivity::Reachable));
                }
                peer.announce_tracks(k.2);
            }
        }
    }

    fn set_reachability(&mut self, key: &PeerKey, reachable: bool) {
        for k in [key.clone(), counterpart(key)] {
            if let Some(peer) = self.peers.get_mut(&k) {
                if peer.reachable != reachable {
                    peer.reachable = reachable;
                    let event = if reachable {
                        LinkConnectivity::Reachable
                    } else {
                        LinkConnectivity::Unreachable
                    };
                    (peer.sink)(EngineEvent::Connectivity(event));
                }
            }
        }
    }
}

/// Shared fabric connecting simulated peers.
#[derive(Clone, Default)]
pub struct SimNetwork {
    state: Arc<Mutex<SimState>>,
}

impl SimNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn key(call: &str, local: SlotIndex, remote: SlotIndex) -> PeerKey {
        (call.to_string(), local, remote)
    }

    /// Number of open simulated connections.
    pub fn open_connections(&self) -> usize {
        self.lock().peers.len()
    }

    /// Whether the end `local → remote` currently reports reachable.
    pub fn is_reachable(&self, call: &str, local: SlotIndex, remote: SlotIndex) -> bool {
        self.lock()
            .peers
            .get(&Self::key(call, local, remote))
            .is_some_and(|p| p.reachable)
    }

    /// Remote candidates applied at `local → remote`, in application order.
    pub fn applied_candidates(&self, call: &str, local: SlotIndex, remote: SlotIndex) -> Vec<String> {
        self.lock()
            .peers
            .get(&Self::key(call, local, remote))
            .map(|p| p.applied.clone())
            .unwrap_or_default()
    }

    /// Outbound track ids most recently bound at `local → remote`.
    pub fn outbound_tracks(&self, call: &str, local: SlotIndex, remote: SlotIndex) -> Vec<String> {
        self.lock()
            .peers
            .get(&Self::key(call, local, remote))
            .map(|p| p.outbound.clone())
            .unwrap_or_default()
    }

    /// Drop the transport between `a` and `b` without closing either end.
    pub fn interrupt(&self, call: &str, a: SlotIndex, b: SlotIndex) {
        self.lock().set_reachability(&Self::key(call, a, b), false);
    }

    /// Bring an interrupted transport back.
    pub fn restore(&self, call: &str, a: SlotIndex, b: SlotIndex) {
        self.lock().set_reachability(&Self::key(call, a, b), true);
    }
}

#[async_trait]
impl PeerConnectionFactory for SimNetwork {
    async fn create(
        &self,
        link: &LinkKey,
        _ice: &IceSettings,
        events: EngineEventSink,
    ) -> Result<Arc<dyn PeerConnection>, EngineError> {
        let key = Self::key(link.call.as_str(), link.local, link.remote);
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.peers.insert(
            key.clone(),
            SimPeerState {
                id,
                sink: events,
                local: None,
                remote: None,
                gathered: false,
                applied: Vec::new(),
                reachable: false,
                announced: HashSet::new(),
                revision: 0,
                outbound: Vec::new(),
            },
        );
        debug!(call = %key.0, local = key.1, remote = key.2, id, "Sim peer created");
        Ok(Arc::new(SimPeer {
            network: self.clone(),
            key,
            id,
        }))
    }
}

/// One end of a simulated link.
pub struct SimPeer {
    network: SimNetwork,
    key: PeerKey,
    id: u64,
}

fn outbound_ids(media: &LocalMediaState) -> Vec<String> {
    [media.audio.as_ref(), media.video.as_ref()]
        .into_iter()
        .flatten()
        .map(|t| t.id.clone())
        .collect()
}

#[async_trait]
impl PeerConnection for SimPeer {
    async fn create_offer(
        &self,
        media: &LocalMediaState,
    ) -> Result<SessionDescription, EngineError> {
        let mut state = self.network.lock();
        let peer = state.peer_mut(&self.key, self.id)?;
        peer.revision += 1;
        peer.outbound = outbound_ids(media);
        Ok(SessionDescription::offer(render_sdp(
            self.id,
            peer.revision,
            &media.kinds(),
        )))
    }

    async fn create_answer(
        &self,
        media: &LocalMediaState,
    ) -> Result<SessionDescription, EngineError> {
        let mut state = self.network.lock();
        let peer = state.peer_mut(&self.key, self.id)?;
        if peer.remote.is_none() {
            return Err(EngineError::NoRemoteDescription);
        }
        peer.revision += 1;
        peer.outbound = outbound_ids(media);
        Ok(SessionDescription::answer(render_sdp(
            self.id,
            peer.revision,
            &media.kinds(),
        )))
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), EngineError> {
        let mut state = self.network.lock();
        let peer = state.peer_mut(&self.key, self.id)?;
        peer.local = Some(desc.clone());
        if !peer.gathered {
            peer.gathered = true;
            let (local, remote) = (self.key.1, self.key.2);
            for n in 1..=2u32 {
                let candidate = IceCandidate {
                    candidate: format!(
                        "candidate:{}{n} 1 udp 2122260223 10.{local}.{remote}.{n} {} typ host",
                        self.id,
                        5000 + n
                    ),
                    sdp_mid: Some("0".into()),
                    sdp_mline_index: Some(0),
                };
                (peer.sink)(EngineEvent::LocalCandidate(candidate));
            }
        }
        state.check_reachable(&self.key);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<(), EngineError> {
        if desc.sdp.trim().is_empty() {
            return Err(EngineError::InvalidDescription("empty sdp".into()));
        }
        let mut state = self.network.lock();
        let peer = state.peer_mut(&self.key, self.id)?;
        peer.remote = Some(desc.clone());
        if peer.reachable {
            peer.announce_tracks(self.key.2);
        }
        state.check_reachable(&self.key);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<(), EngineError> {
        let mut state = self.network.lock();
        let peer = state.peer_mut(&self.key, self.id)?;
        if peer.remote.is_none() {
            return Err(EngineError::NoRemoteDescription);
        }
        peer.applied.push(candidate.candidate.clone());
        state.check_reachable(&self.key);
        Ok(())
    }

    async fn replace_outbound(&self, media: &LocalMediaState) -> Result<(), EngineError> {
        let mut state = self.network.lock();
        let peer = state.peer_mut(&self.key, self.id)?;
        peer.outbound = outbound_ids(media);
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.network.lock();
        let owned = state
            .peers
            .get(&self.key)
            .is_some_and(|p| p.id == self.id);
        if !owned {
            return;
        }
        state.peers.remove(&self.key);
        if let Some(other) = state.peers.get_mut(&counterpart(&self.key)) {
            if other.reachable {
                other.reachable = false;
                (other.sink)(EngineEvent::Connectivity(LinkConnectivity::Lost));
            }
        }
        debug!(call = %self.key.0, local = self.key.1, remote = self.key.2, "Sim peer closed");
    }
}

// ---------------------------------------------------------------------------
// Media provider
// ---------------------------------------------------------------------------

/// Capture provider that always succeeds unless told to refuse.
#[derive(Default)]
pub struct SimMediaProvider {
    deny_microphone: AtomicBool,
    deny_camera: AtomicBool,
    deny_screen: AtomicBool,
    cameras: Mutex<Vec<Arc<MediaSource>>>,
    screens: Mutex<Vec<Arc<MediaSource>>>,
}

impl SimMediaProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_microphone(&self, deny: bool) {
        self.deny_microphone.store(deny, Ordering::Release);
    }

    pub fn deny_camera(&self, deny: bool) {
        self.deny_camera.store(deny, Ordering::Release);
    }

    pub fn deny_screen(&self, deny: bool) {
        self.deny_screen.store(deny, Ordering::Release);
    }

    /// Most recent camera capture handed out.
    pub fn last_camera(&self) -> Option<Arc<MediaSource>> {
        self.cameras
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }

    /// Most recent screen capture handed out.
    pub fn last_screen(&self) -> Option<Arc<MediaSource>> {
        self.screens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }
}

#[async_trait]
impl MediaProvider for SimMediaProvider {
    async fn acquire_microphone(&self) -> Result<Arc<MediaSource>, MediaError> {
        if self.deny_microphone.load(Ordering::Acquire) {
            return Err(MediaError::PermissionDenied("microphone".into()));
        }
        Ok(Arc::new(MediaSource::new(vec![MediaTrack::new(
            TrackKind::Audio,
            "sim-microphone",
        )])))
    }

    async fn acquire_camera(&self) -> Result<Arc<MediaSource>, MediaError> {
        if self.deny_camera.load(Ordering::Acquire) {
            return Err(MediaError::PermissionDenied("camera".into()));
        }
        let source = Arc::new(MediaSource::new(vec![MediaTrack::new(
            TrackKind::Video,
            "sim-camera",
        )]));
        self.cameras
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&source));
        Ok(source)
    }

    async fn acquire_screen(&self) -> Result<Arc<MediaSource>, MediaError> {
        if self.deny_screen.load(Ordering::Acquire) {
            return Err(MediaError::PermissionDenied("screen".into()));
        }
        let source = Arc::new(MediaSource::new(vec![MediaTrack::new(
            TrackKind::Video,
            "sim-screen",
        )]));
        self.screens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&source));
        Ok(source)
    }
}
