//! Runtime configuration
//!
//! Read from `SHEETSYNC_*` environment variables. Connection profiles and
//! file types are not configured here; they live in the store and are
//! seeded from a workspace file (see [`crate::workspace`]).

use std::path::PathBuf;
use std::time::Duration;

use crate::orchestrator::{OrchestratorSettings, DEFAULT_EXTENSIONS};

pub const DEFAULT_STATE_FILE: &str = "./sheetsync-state.json";
pub const DEFAULT_DIRECTORY_FILE: &str = "./sheetsync-directory.json";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// JSON file backing the configuration and audit store
    pub state_file: PathBuf,
    /// Partner, location, product and order snapshot
    pub directory_file: PathBuf,
    /// Download spool directory (system temp when unset)
    pub work_dir: Option<PathBuf>,
    /// Bound on the connect and login phase only
    pub connect_timeout_secs: u64,
    /// Map rows to orders right after a file is archived
    pub auto_transform: bool,
    /// Lowercase extensions picked up from source directories
    pub extensions: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
            directory_file: PathBuf::from(DEFAULT_DIRECTORY_FILE),
            work_dir: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            auto_transform: true,
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

impl IngestConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let connect_timeout_secs = match std::env::var("SHEETSYNC_CONNECT_TIMEOUT_SECS") {
            Ok(value) => value.trim().parse().map_err(|_| {
                anyhow::anyhow!("SHEETSYNC_CONNECT_TIMEOUT_SECS must be a number of seconds, got '{}'", value)
            })?,
            Err(_) => defaults.connect_timeout_secs,
        };

        let config = Self {
            state_file: std::env::var("SHEETSYNC_STATE_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_file),
            directory_file: std::env::var("SHEETSYNC_DIRECTORY_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.directory_file),
            work_dir: std::env::var("SHEETSYNC_WORK_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            connect_timeout_secs,
            auto_transform: std::env::var("SHEETSYNC_AUTO_TRANSFORM")
                .ok()
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.auto_transform),
            extensions: std::env::var("SHEETSYNC_EXTENSIONS")
                .map(|v| parse_extensions(&v))
                .unwrap_or(defaults.extensions),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.connect_timeout_secs == 0 {
            anyhow::bail!("SHEETSYNC_CONNECT_TIMEOUT_SECS must be greater than 0");
        }
        if self.extensions.is_empty() {
            anyhow::bail!("SHEETSYNC_EXTENSIONS must list at least one extension");
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            extensions: self.extensions.clone(),
            auto_transform: self.auto_transform,
            work_dir: self.work_dir.clone(),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// `"xlsx, .CSV,,xls"` -> `["xlsx", "csv", "xls"]`
fn parse_extensions(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|e| e.trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}
