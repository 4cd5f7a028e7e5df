//! Runtime settings derived from [`MeshcallConfig`].

use std::time::Duration;

use meshcall_config::schema::IceServerConfig;
use meshcall_config::MeshcallConfig;

/// Timing and retry policy of one peer link.
#[derive(Debug, Clone)]
pub struct NegotiationSettings {
    pub negotiation_timeout: Duration,
    pub disconnect_grace: Duration,
    pub publish_attempts: u32,
    pub publish_retry_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct MembershipSettings {
    pub max_slots: u32,
    pub join_attempts: u32,
    pub quarantine: Duration,
}

#[derive(Debug, Clone)]
pub struct IceSettings {
    pub servers: Vec<IceServerConfig>,
    pub candidate_pool_size: u32,
}

/// Everything a call session needs to know about timing and policy.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub negotiation: NegotiationSettings,
    pub membership: MembershipSettings,
    pub ice: IceSettings,
    pub tick_interval: Duration,
    pub departure_flush_timeout: Duration,
    /// `None` disables leaving after a long stay in the background.
    pub background_leave_after: Option<Duration>,
    pub start_with_mic: bool,
    pub start_with_camera: bool,
    pub placeholder_label: String,
}

impl SessionSettings {
    pub fn from_config(config: &MeshcallConfig) -> Self {
        let n = &config.negotiation;
        let m = &config.membership;
        let background = config.shutdown.background_leave_after_secs;
        Self {
            negotiation: NegotiationSettings {
                negotiation_timeout: Duration::from_millis(n.negotiation_timeout_ms),
                disconnect_grace: Duration::from_millis(n.disconnect_grace_ms),
                publish_attempts: n.publish_attempts.max(1),
                publish_retry_delay: Duration::from_millis(n.publish_retry_delay_ms),
            },
            membership: MembershipSettings {
                max_slots: m.max_slots,
                join_attempts: m.join_attempts.max(1),
                quarantine: Duration::from_millis(m.quarantine_ms),
            },
            ice: IceSettings {
                servers: config.ice.servers.clone(),
                candidate_pool_size: config.ice.candidate_pool_size,
            },
            tick_interval: Duration::from_millis(n.tick_interval_ms.max(1)),
            departure_flush_timeout: Duration::from_millis(
                config.shutdown.departure_flush_timeout_ms,
            ),
            background_leave_after: (background > 0).then(|| Duration::from_secs(background)),
            start_with_mic: config.media.start_with_mic,
            start_with_camera: config.media.start_with_camera,
            placeholder_label: config.media.placeholder_label.clone(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&MeshcallConfig::default())
    }
}
