use serde::{Deserialize, Serialize};

/// Settings for the `meshcall-relay` signaling store server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// TCP port the relay listens on.
    pub port: u16,
    /// Paths untouched for this many seconds are dropped by the reaper.
    pub idle_ttl_secs: u64,
    /// How often the reaper runs, in seconds.
    pub reap_interval_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 8787,
            idle_ttl_secs: 6 * 60 * 60,
            reap_interval_secs: 60,
        }
    }
}
