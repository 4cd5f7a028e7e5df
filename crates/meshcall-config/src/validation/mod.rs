//! Full configuration validation.
//!
//! Each domain has its own submodule; this orchestrator calls them all
//! and collects errors into a single `ConfigError`.

mod helpers;
mod network;
mod timing;

#[cfg(test)]
mod tests;

use crate::schema::MeshcallConfig;
use meshcall_common::ConfigError;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &MeshcallConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    timing::validate_signaling(&mut errors, config);
    timing::validate_negotiation(&mut errors, config);
    timing::validate_membership(&mut errors, config);
    timing::validate_shutdown(&mut errors, config);
    network::validate_ice(&mut errors, config);
    network::validate_relay(&mut errors, config);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}
