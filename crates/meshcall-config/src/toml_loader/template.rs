//! Default TOML config template with inline documentation comments.

/// Generate the default TOML config content with comments.
pub(crate) fn default_config_toml() -> String {
    r##"# meshcall configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[signaling]
# url = "ws://127.0.0.1:8787"
# connect_timeout_ms = 15000
# request_timeout_ms = 5000       # 100-60000
# heartbeat_interval_secs = 25
# reconnect_delay_secs = 1
# max_reconnect_delay_secs = 30

[negotiation]
# negotiation_timeout_ms = 20000  # 1000-120000
# disconnect_grace_ms = 10000     # 0-120000
# publish_attempts = 3            # 1-10
# publish_retry_delay_ms = 250
# tick_interval_ms = 250          # 10-5000

[membership]
# max_slots = 8                   # 2-64, screen shares included
# join_attempts = 8               # 1-50
# quarantine_ms = 5000            # 0 disables

[shutdown]
# departure_flush_timeout_ms = 1500
# background_leave_after_secs = 60  # 0 disables

[ice]
# candidate_pool_size = 10
# [[ice.servers]]
# urls = ["stun:stun1.l.google.com:19302", "stun:stun2.l.google.com:19302"]
# [[ice.servers]]
# urls = ["turn:turn.example.org:3478"]
# username = "user"
# credential = "secret"

[media]
# start_with_mic = true
# start_with_camera = true
# placeholder_label = "camera-disabled"

[relay]
# port = 8787
# idle_ttl_secs = 21600
# reap_interval_secs = 60

[logging]
# level = "INFO"                  # TRACE, DEBUG, INFO, WARNING, ERROR
"##
    .to_string()
}
