use std::path::PathBuf;

use crate::types::SlotIndex;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Failures reported by a signaling store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalingError {
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// Compare-and-set lost a race; `current` is the version now stored.
    #[error("version conflict (current version {current})")]
    Conflict { current: u64 },

    #[error("signaling store closed")]
    Closed,

    #[error("codec error: {0}")]
    Codec(String),

    #[error("request timed out")]
    Timeout,
}

/// Failures acquiring local capture devices.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("device unavailable: {0}")]
    Unavailable(String),
}

/// Failures reported by the peer-connection engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("no remote description set")]
    NoRemoteDescription,

    #[error("invalid description: {0}")]
    InvalidDescription(String),

    #[error("connection closed")]
    Closed,

    #[error("engine error: {0}")]
    Other(String),
}

/// Errors surfaced by the session core.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("signaling delivery failure: {0}")]
    SignalingDeliveryFailure(#[from] SignalingError),

    #[error("negotiation with slot {remote} timed out")]
    NegotiationTimeout { remote: SlotIndex },

    #[error("media acquisition failure: {0}")]
    MediaAcquisitionFailure(#[from] MediaError),

    #[error("slot assignment conflict not resolved after {attempts} attempts")]
    MembershipConflict { attempts: u32 },

    #[error("call is full ({max_slots} slots)")]
    CallFull { max_slots: u32 },

    #[error("not in a call")]
    NotInCall,

    #[error("a screen share is already active")]
    AlreadySharing,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("malformed record: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MeshcallError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("network error: {0}")]
    Network(String),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::FileNotFound(PathBuf::from("/tmp/missing.toml"));
        assert_eq!(err.to_string(), "config file not found: /tmp/missing.toml");

        let err = ConfigError::ParseError("unexpected token".into());
        assert_eq!(err.to_string(), "config parse error: unexpected token");

        let err = ConfigError::ValidationError("membership.max_slots = 0".into());
        assert_eq!(
            err.to_string(),
            "config validation error: membership.max_slots = 0"
        );
    }

    #[test]
    fn signaling_error_display() {
        let err = SignalingError::Conflict { current: 7 };
        assert_eq!(err.to_string(), "version conflict (current version 7)");
        assert_eq!(SignalingError::Closed.to_string(), "signaling store closed");
    }

    #[test]
    fn session_error_from_signaling() {
        let err: SessionError = SignalingError::Delivery("socket closed".into()).into();
        assert!(matches!(err, SessionError::SignalingDeliveryFailure(_)));
        assert!(err.to_string().contains("socket closed"));
    }

    #[test]
    fn session_error_from_media() {
        let err: SessionError = MediaError::PermissionDenied("camera".into()).into();
        assert!(matches!(err, SessionError::MediaAcquisitionFailure(_)));
        assert_eq!(
            err.to_string(),
            "media acquisition failure: permission denied: camera"
        );
    }

    #[test]
    fn session_error_variants() {
        let err = SessionError::NegotiationTimeout { remote: 2 };
        assert_eq!(err.to_string(), "negotiation with slot 2 timed out");

        let err = SessionError::MembershipConflict { attempts: 8 };
        assert!(err.to_string().contains("8 attempts"));

        let err = SessionError::CallFull { max_slots: 8 };
        assert_eq!(err.to_string(), "call is full (8 slots)");

        let err: SessionError = EngineError::NoRemoteDescription.into();
        assert_eq!(err.to_string(), "no remote description set");
    }

    #[test]
    fn session_error_from_json() {
        let bad = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: SessionError = bad.into();
        assert!(matches!(err, SessionError::Codec(_)));
    }

    #[test]
    fn meshcall_error_wraps() {
        let err: MeshcallError = ConfigError::ParseError("bad toml".into()).into();
        assert!(matches!(err, MeshcallError::Config(_)));
        assert!(err.to_string().contains("bad toml"));

        let err: MeshcallError = SessionError::NotInCall.into();
        assert_eq!(err.to_string(), "not in a call");

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: MeshcallError = io_err.into();
        assert!(matches!(err, MeshcallError::Io(_)));
    }
}
