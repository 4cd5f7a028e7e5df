//! Collaborators injected into a call session.

use std::sync::Arc;

use meshcall_common::EventBus;

use crate::engine::PeerConnectionFactory;
use crate::media::MediaProvider;
use crate::membership::SessionMembership;
use crate::settings::SessionSettings;
use crate::signaling::SignalingStore;

/// Everything a session talks to. Cheap to clone.
#[derive(Clone)]
pub struct SessionDeps {
    pub store: Arc<dyn SignalingStore>,
    pub engine: Arc<dyn PeerConnectionFactory>,
    pub media: Arc<dyn MediaProvider>,
    pub events: Arc<EventBus>,
    pub settings: SessionSettings,
}

impl SessionDeps {
    pub fn membership(&self) -> SessionMembership {
        SessionMembership::new(Arc::clone(&self.store), self.settings.membership.clone())
    }
}
