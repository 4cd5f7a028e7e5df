//! Validation for ICE servers and the relay.

use crate::schema::MeshcallConfig;

use super::helpers::{validate_range, validate_range_u64};

const ICE_SCHEMES: [&str; 4] = ["stun:", "stuns:", "turn:", "turns:"];

pub(crate) fn validate_ice(errors: &mut Vec<String>, config: &MeshcallConfig) {
    for (i, server) in config.ice.servers.iter().enumerate() {
        if server.urls.is_empty() {
            errors.push(format!("ice.servers[{i}].urls must not be empty"));
        }
        for url in &server.urls {
            if !ICE_SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
                errors.push(format!("ice.servers[{i}] url {url:?} has an unknown scheme"));
            }
            let is_turn = url.starts_with("turn");
            if is_turn && (server.username.is_none() || server.credential.is_none()) {
                errors.push(format!(
                    "ice.servers[{i}] url {url:?} requires username and credential"
                ));
            }
        }
    }
    validate_range(errors, "ice.candidate_pool_size", config.ice.candidate_pool_size, 0, 255);
}

pub(crate) fn validate_relay(errors: &mut Vec<String>, config: &MeshcallConfig) {
    let r = &config.relay;
    validate_range(errors, "relay.port", u32::from(r.port), 1024, 65535);
    validate_range_u64(errors, "relay.idle_ttl_secs", r.idle_ttl_secs, 60, 7 * 24 * 3600);
    validate_range_u64(errors, "relay.reap_interval_secs", r.reap_interval_secs, 1, 3_600);
}
