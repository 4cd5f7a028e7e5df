pub mod errors;
pub mod events;
pub mod id;
pub mod types;

pub use errors::{
    ConfigError, EngineError, MediaError, MeshcallError, SessionError, SignalingError,
};
pub use events::{Event, EventBus};
pub use id::{new_correlation_id, new_id, CallId};
pub use types::{Connectivity, ParticipantUpdate, SlotIndex, TrackKind};

pub type Result<T> = std::result::Result<T, MeshcallError>;
