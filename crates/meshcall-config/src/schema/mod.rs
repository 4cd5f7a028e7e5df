//! Configuration schema types for meshcall.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod media;
mod membership;
mod negotiation;
mod relay;
mod signaling;
mod system;

pub use media::*;
pub use membership::*;
pub use negotiation::*;
pub use relay::*;
pub use signaling::*;
pub use system::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration shared by the session library and the relay.
///
/// Only override what you want to change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct MeshcallConfig {
    pub signaling: SignalingConfig,
    pub negotiation: NegotiationConfig,
    pub membership: MembershipConfig,
    pub shutdown: ShutdownConfig,
    pub ice: IceConfig,
    pub media: MediaConfig,
    pub relay: RelayConfig,
    pub logging: LoggingConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_negotiation_timing() {
        let config = MeshcallConfig::default();
        assert_eq!(config.negotiation.negotiation_timeout_ms, 20_000);
        assert_eq!(config.negotiation.disconnect_grace_ms, 10_000);
        assert_eq!(config.negotiation.publish_attempts, 3);
    }

    #[test]
    fn default_membership() {
        let config = MeshcallConfig::default();
        assert_eq!(config.membership.max_slots, 8);
        assert_eq!(config.membership.join_attempts, 8);
        assert_eq!(config.membership.quarantine_ms, 5_000);
    }

    #[test]
    fn default_shutdown() {
        let config = MeshcallConfig::default();
        assert_eq!(config.shutdown.departure_flush_timeout_ms, 1_500);
        assert_eq!(config.shutdown.background_leave_after_secs, 60);
    }

    #[test]
    fn default_ice_has_two_stun_urls() {
        let config = MeshcallConfig::default();
        assert_eq!(config.ice.servers.len(), 1);
        assert_eq!(config.ice.servers[0].urls.len(), 2);
        assert!(config.ice.servers[0].urls[0].starts_with("stun:"));
        assert_eq!(config.ice.candidate_pool_size, 10);
    }

    #[test]
    fn default_media_and_relay() {
        let config = MeshcallConfig::default();
        assert!(config.media.start_with_mic);
        assert!(config.media.start_with_camera);
        assert_eq!(config.relay.port, 8787);
        assert_eq!(config.signaling.url, "ws://127.0.0.1:8787");
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let toml_str = r#"
[membership]
max_slots = 4

[[ice.servers]]
urls = ["turn:turn.example.org:3478"]
username = "u"
credential = "p"
"#;
        let config: MeshcallConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.membership.max_slots, 4);
        assert_eq!(config.membership.join_attempts, 8);
        assert_eq!(config.ice.servers.len(), 1);
        assert_eq!(config.ice.servers[0].username.as_deref(), Some("u"));
        assert_eq!(config.negotiation.disconnect_grace_ms, 10_000);
    }

    #[test]
    fn log_level_directive() {
        assert_eq!(LogLevel::Warning.as_directive(), "warn");
        let level: LogLevel = serde_json::from_str("\"DEBUG\"").unwrap();
        assert_eq!(level, LogLevel::Debug);
    }
}
