//! Validation for signaling, negotiation, membership and shutdown timing.

use crate::schema::MeshcallConfig;

use super::helpers::{validate_range, validate_range_u64};

pub(crate) fn validate_signaling(errors: &mut Vec<String>, config: &MeshcallConfig) {
    let s = &config.signaling;
    if !(s.url.starts_with("ws://") || s.url.starts_with("wss://")) {
        errors.push(format!(
            "signaling.url = {:?} must start with ws:// or wss://",
            s.url
        ));
    }
    validate_range_u64(errors, "signaling.connect_timeout_ms", s.connect_timeout_ms, 100, 120_000);
    validate_range_u64(errors, "signaling.request_timeout_ms", s.request_timeout_ms, 100, 60_000);
    validate_range_u64(
        errors,
        "signaling.heartbeat_interval_secs",
        s.heartbeat_interval_secs,
        1,
        300,
    );
    if s.reconnect_delay_secs == 0 || s.reconnect_delay_secs > s.max_reconnect_delay_secs {
        errors.push(format!(
            "signaling.reconnect_delay_secs = {} must be in [1, max_reconnect_delay_secs = {}]",
            s.reconnect_delay_secs, s.max_reconnect_delay_secs
        ));
    }
}

pub(crate) fn validate_negotiation(errors: &mut Vec<String>, config: &MeshcallConfig) {
    let n = &config.negotiation;
    validate_range_u64(
        errors,
        "negotiation.negotiation_timeout_ms",
        n.negotiation_timeout_ms,
        1_000,
        120_000,
    );
    validate_range_u64(
        errors,
        "negotiation.disconnect_grace_ms",
        n.disconnect_grace_ms,
        0,
        120_000,
    );
    validate_range(errors, "negotiation.publish_attempts", n.publish_attempts, 1, 10);
    validate_range_u64(
        errors,
        "negotiation.publish_retry_delay_ms",
        n.publish_retry_delay_ms,
        0,
        10_000,
    );
    validate_range_u64(errors, "negotiation.tick_interval_ms", n.tick_interval_ms, 10, 5_000);
}

pub(crate) fn validate_membership(errors: &mut Vec<String>, config: &MeshcallConfig) {
    let m = &config.membership;
    validate_range(errors, "membership.max_slots", m.max_slots, 2, 64);
    validate_range(errors, "membership.join_attempts", m.join_attempts, 1, 50);
    validate_range_u64(errors, "membership.quarantine_ms", m.quarantine_ms, 0, 600_000);
}

pub(crate) fn validate_shutdown(errors: &mut Vec<String>, config: &MeshcallConfig) {
    let s = &config.shutdown;
    validate_range_u64(
        errors,
        "shutdown.departure_flush_timeout_ms",
        s.departure_flush_timeout_ms,
        100,
        10_000,
    );
    validate_range_u64(
        errors,
        "shutdown.background_leave_after_secs",
        s.background_leave_after_secs,
        0,
        3_600,
    );
}
