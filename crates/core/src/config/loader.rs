use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Prefix of environment variables that override file settings.
const ENV_PREFIX: &str = "WARDEN_";

/// Separator between nested keys in environment variable names.
const ENV_SEPARATOR: &str = "__";

/// Load configuration from file with environment variable overrides
///
/// Environment keys use `__` between sections, e.g.
/// `WARDEN_TRANSCODING__SEGMENTED_PING_TIMEOUT_MS=30000`. Single underscores
/// stay part of the key, so `ffmpeg_path` maps to `WARDEN_TRANSCODING__FFMPEG_PATH`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    figment(path)
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split(ENV_SEPARATOR))
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}
