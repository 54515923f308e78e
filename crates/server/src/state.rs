use warden_core::{Config, JobRegistry, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    registry: JobRegistry,
}

impl AppState {
    pub fn new(config: Config, registry: JobRegistry) -> Self {
        Self { config, registry }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }
}
