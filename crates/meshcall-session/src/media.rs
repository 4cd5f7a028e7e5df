//! Local capture sources and the media state shared by every link.
//!
//! The session owns a single [`LocalMedia`]. Links read immutable
//! [`LocalMediaState`] snapshots through a `watch` channel, so a swap (mute,
//! camera off, screen on) is observed by each link all at once.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use meshcall_common::{new_id, MediaError, TrackKind};

/// One capture track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
    pub label: String,
    pub enabled: bool,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            kind,
            label: label.into(),
            enabled: true,
        }
    }

    /// Static image sent in place of the camera.
    pub fn placeholder(label: impl Into<String>) -> Self {
        Self::new(TrackKind::Video, label)
    }
}

/// What currently feeds the outgoing video track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoSource {
    Camera,
    Screen,
    Placeholder,
    #[default]
    None,
}

/// Immutable snapshot of what the local slot sends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalMediaState {
    pub audio: Option<MediaTrack>,
    pub video: Option<MediaTrack>,
    pub video_source: VideoSource,
}

impl LocalMediaState {
    /// Track kinds sent on every link, in a stable order.
    pub fn kinds(&self) -> Vec<TrackKind> {
        let mut kinds = Vec::with_capacity(2);
        if self.audio.is_some() {
            kinds.push(TrackKind::Audio);
        }
        if self.video.is_some() {
            kinds.push(TrackKind::Video);
        }
        kinds
    }

    pub fn track(&self, kind: TrackKind) -> Option<&MediaTrack> {
        match kind {
            TrackKind::Audio => self.audio.as_ref(),
            TrackKind::Video => self.video.as_ref(),
        }
    }

    pub fn is_muted(&self) -> bool {
        self.audio.as_ref().map_or(true, |t| !t.enabled)
    }

    /// Media published by a screen-share slot.
    pub fn from_screen(source: &MediaSource) -> Self {
        Self {
            audio: source.track(TrackKind::Audio).cloned(),
            video: source.track(TrackKind::Video).cloned(),
            video_source: VideoSource::Screen,
        }
    }
}

/// Owner of the local media state.
pub struct LocalMedia {
    tx: watch::Sender<Arc<LocalMediaState>>,
}

impl LocalMedia {
    pub fn new(initial: LocalMediaState) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx }
    }

    pub fn snapshot(&self) -> Arc<LocalMediaState> {
        self.tx.borrow().clone()
    }

    /// Receiver handed to a mesh controller.
    pub fn subscribe(&self) -> watch::Receiver<Arc<LocalMediaState>> {
        self.tx.subscribe()
    }

    /// Apply `change` to a copy of the current state and publish it as one
    /// atomic swap. Returns the new snapshot.
    pub fn update(&self, change: impl FnOnce(&mut LocalMediaState)) -> Arc<LocalMediaState> {
        let mut next = (*self.snapshot()).clone();
        change(&mut next);
        let next = Arc::new(next);
        self.tx.send_replace(Arc::clone(&next));
        next
    }
}

// ---------------------------------------------------------------------------
// Capture sources
// ---------------------------------------------------------------------------

/// A running capture (microphone, camera or screen).
///
/// Ends either when the owner calls [`stop`](Self::stop) or when the
/// platform revokes it (device unplugged, OS "stop sharing" button), which
/// the provider reports through [`end`](Self::end).
#[derive(Debug)]
pub struct MediaSource {
    id: String,
    tracks: Vec<MediaTrack>,
    ended: watch::Sender<bool>,
}

impl MediaSource {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        let (ended, _rx) = watch::channel(false);
        Self {
            id: new_id(),
            tracks,
            ended,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn track(&self, kind: TrackKind) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind == kind)
    }

    pub fn is_ended(&self) -> bool {
        *self.ended.borrow()
    }

    /// Stop capturing. Idempotent.
    pub fn stop(&self) {
        if !self.ended.send_replace(true) {
            debug!(source = %self.id, "Media source stopped");
        }
    }

    /// The platform ended the capture on its own.
    pub fn end(&self) {
        if !self.ended.send_replace(true) {
            debug!(source = %self.id, "Media source ended");
        }
    }

    /// Resolves once the source has ended for any reason.
    pub async fn ended(&self) {
        let mut rx = self.ended.subscribe();
        let _ = rx.wait_for(|ended| *ended).await;
    }
}

/// Platform capture provider.
#[async_trait]
pub trait MediaProvider: Send + Sync + 'static {
    async fn acquire_microphone(&self) -> Result<Arc<MediaSource>, MediaError>;
    async fn acquire_camera(&self) -> Result<Arc<MediaSource>, MediaError>;
    async fn acquire_screen(&self) -> Result<Arc<MediaSource>, MediaError>;
}
