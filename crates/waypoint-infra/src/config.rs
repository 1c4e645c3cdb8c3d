//! Configuration loader for Waypoint.
//!
//! Reads `config.toml` from the data directory (`~/.waypoint/` in production)
//! and deserializes it into [`WaypointConfig`]. Falls back to defaults when the
//! file is missing or malformed. A file named explicitly with `--config` must
//! exist and parse.

use std::path::{Path, PathBuf};

use anyhow::Context;
use waypoint_types::config::WaypointConfig;

/// Load configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`WaypointConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
pub async fn load_config(data_dir: &Path) -> WaypointConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return WaypointConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return WaypointConfig::default();
        }
    };

    match toml::from_str::<WaypointConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            WaypointConfig::default()
        }
    }
}

/// Load an explicitly named config file. Unlike [`load_config`], errors are
/// reported rather than defaulted.
pub async fn load_config_file(path: &Path) -> anyhow::Result<WaypointConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("failed to parse config file {}", path.display()))
}

/// Registry path: `tools_file` from config (relative paths resolved against
/// the data dir), else `{data_dir}/tools.toml`.
pub fn tools_file(config: &WaypointConfig, data_dir: &Path) -> PathBuf {
    match &config.tools_file {
        Some(p) => data_dir.join(p),
        None => data_dir.join("tools.toml"),
    }
}

/// Definitions directory: `workflows_dir` from config, else
/// `{data_dir}/workflows`.
pub fn workflows_dir(config: &WaypointConfig, data_dir: &Path) -> PathBuf {
    match &config.workflows_dir {
        Some(p) => data_dir.join(p),
        None => data_dir.join("workflows"),
    }
}

/// SQLite URL for the `sqlite` store backend.
pub fn database_url(data_dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", data_dir.join("waypoint.db").display())
}
