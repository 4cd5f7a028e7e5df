//! Peer-link negotiation timing.

use serde::{Deserialize, Serialize};

/// Timeouts and retry policy for a single peer link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// A link without offer/answer progress for this long is failed.
    pub negotiation_timeout_ms: u64,
    /// A disconnected link that does not recover within this window is closed
    /// and its remote slot treated as departed.
    pub disconnect_grace_ms: u64,
    /// Attempts for publishing an offer or answer before failing the link.
    pub publish_attempts: u32,
    /// Delay between publish attempts in milliseconds.
    pub publish_retry_delay_ms: u64,
    /// Period of the controller's timer tick in milliseconds.
    pub tick_interval_ms: u64,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout_ms: 20_000,
            disconnect_grace_ms: 10_000,
            publish_attempts: 3,
            publish_retry_delay_ms: 250,
            tick_interval_ms: 250,
        }
    }
}
