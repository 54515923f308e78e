use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Keepalive and stop timeouts are positive
/// - Cleanup makes at least one attempt
/// - Copy buffer size is positive
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    let transcoding = &config.transcoding;
    for (name, value) in [
        (
            "transcoding.progressive_ping_timeout_ms",
            transcoding.progressive_ping_timeout_ms,
        ),
        (
            "transcoding.segmented_ping_timeout_ms",
            transcoding.segmented_ping_timeout_ms,
        ),
        (
            "transcoding.graceful_stop_timeout_ms",
            transcoding.graceful_stop_timeout_ms,
        ),
    ] {
        if value == 0 {
            return Err(ConfigError::ValidationError(format!("{name} cannot be 0")));
        }
    }

    if transcoding.cleanup.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "transcoding.cleanup.max_attempts cannot be 0".to_string(),
        ));
    }

    if config.streaming.buffer_size == 0 {
        return Err(ConfigError::ValidationError(
            "streaming.buffer_size cannot be 0".to_string(),
        ));
    }

    Ok(())
}
