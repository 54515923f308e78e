use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};

use crate::copy::StreamingConfig;
use crate::transcode::{CleanupConfig, TranscodingConfig};

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transcoding: TranscodingConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8096
}

/// Sanitized config for API responses (binary location reduced to its name)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub transcoding: SanitizedTranscodingConfig,
    pub streaming: StreamingConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedTranscodingConfig {
    pub transcode_dir: String,
    pub ffmpeg: String,
    pub progressive_ping_timeout_ms: u64,
    pub segmented_ping_timeout_ms: u64,
    pub graceful_stop_timeout_ms: u64,
    pub sweep_on_startup: bool,
    pub cleanup: CleanupConfig,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let t = &config.transcoding;
        Self {
            server: config.server.clone(),
            transcoding: SanitizedTranscodingConfig {
                transcode_dir: t.transcode_dir.display().to_string(),
                ffmpeg: t
                    .ffmpeg_path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                progressive_ping_timeout_ms: t.progressive_ping_timeout_ms,
                segmented_ping_timeout_ms: t.segmented_ping_timeout_ms,
                graceful_stop_timeout_ms: t.graceful_stop_timeout_ms,
                sweep_on_startup: t.sweep_on_startup,
                cleanup: t.cleanup.clone(),
            },
            streaming: config.streaming.clone(),
        }
    }
}
