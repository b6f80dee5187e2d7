use std::path::Path;
use std::sync::Arc;

use crate::config::{self, SystemConfig};
use crate::error::DisposableError;
use crate::provider::DigitalOcean;

/// Loaded configuration plus the API client built from it. Constructed once
/// per command and passed to whatever needs either.
pub struct AppContext {
    pub system: SystemConfig,
    pub api: Arc<DigitalOcean>,
}

impl AppContext {
    pub fn new(system: SystemConfig) -> Result<Self, DisposableError> {
        let api = Arc::new(DigitalOcean::new(&system.config.token)?);
        Ok(Self { system, api })
    }

    pub fn load(config_path: &Path) -> Result<Self, DisposableError> {
        Self::new(config::load_config(config_path)?)
    }
}
