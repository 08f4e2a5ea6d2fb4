use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chordpad_services::SessionConfig;
use tracing::{debug, warn};

#[derive(serde::Serialize, serde::Deserialize, Default, Debug)]
pub(crate) struct AppConfig {
    #[serde(default)]
    pub session: SessionConfig,
}

pub(crate) fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chordpad")
        .join("config.toml")
}

/// Load an explicitly requested config file; failures are errors
pub(crate) fn load_config_from(path: &Path) -> Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("Failed to parse config {}", path.display()))
}

/// Load the user config, falling back to defaults when missing or invalid
pub(crate) fn load_config() -> AppConfig {
    let path = config_path();
    let Ok(text) = std::fs::read_to_string(&path) else {
        debug!(path = %path.display(), "No config file, using defaults");
        return AppConfig::default();
    };
    match toml::from_str(&text) {
        Ok(config) => config,
        Err(err) => {
            warn!(path = %path.display(), %err, "Ignoring unparseable config");
            AppConfig::default()
        }
    }
}
