//! Global configuration types for Waypoint.
//!
//! `WaypointConfig` represents the top-level `config.toml` that selects the
//! checkpoint backend, locates the tool registry and workflow definitions, and
//! tunes the retry policy. All fields have defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which durable backend holds workflow instances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// One JSON file per instance under `<data_dir>/checkpoints`.
    #[default]
    File,
    /// One row per instance in `<data_dir>/waypoint.db`.
    Sqlite,
}

/// Top-level configuration, loaded from `<data_dir>/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaypointConfig {
    #[serde(default)]
    pub store: StoreBackend,

    /// Tool registry path (default `<data_dir>/tools.toml`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_file: Option<PathBuf>,

    /// Workflow definitions directory (default `<data_dir>/workflows`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflows_dir: Option<PathBuf>,

    /// Per-invocation timeout when a step does not set one.
    #[serde(default = "default_step_timeout_secs")]
    pub default_step_timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_step_timeout_secs() -> u64 {
    300
}

impl Default for WaypointConfig {
    fn default() -> Self {
        Self {
            store: StoreBackend::default(),
            tools_file: None,
            workflows_dir: None,
            default_step_timeout_secs: default_step_timeout_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Step-level retry policy for transient failures.
///
/// Delay before retry `n` (1-based) is `min(base * 2^(n-1), max)` with a
/// symmetric jitter of `jitter_ratio` applied, then clamped to `[base, max]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts of the primary tool, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_ratio() -> f64 {
    0.1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}
