//! Call membership and shutdown settings.

use serde::{Deserialize, Serialize};

/// Slot assignment policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    /// Maximum occupied slots per call, screen shares included.
    pub max_slots: u32,
    /// Compare-and-set attempts before a join gives up.
    pub join_attempts: u32,
    /// A departed index is not reassigned for this long (0 disables).
    pub quarantine_ms: u64,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            max_slots: 8,
            join_attempts: 8,
            quarantine_ms: 5_000,
        }
    }
}

/// Leave-path timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Upper bound on the best-effort departure publish during abnormal
    /// termination, in milliseconds.
    pub departure_flush_timeout_ms: u64,
    /// Leave the call after staying hidden/backgrounded this long, in
    /// seconds (0 disables).
    pub background_leave_after_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            departure_flush_timeout_ms: 1_500,
            background_leave_after_secs: 60,
        }
    }
}
