//! Workspace seed file
//!
//! Connection profiles and file types are authored in TOML and written
//! through the store, which validates every entry. Example:
//!
//! ```toml
//! [[profiles]]
//! name = "clientes"
//! protocol = "sftp"
//! host = "sftp.example.cl"
//! username = "ingest"
//! password = "secret"
//! download_path = "/in"
//! processed_path = "/out"
//!
//! [[file_types]]
//! name = "Installations"
//! code = "orders"
//!
//! [[file_types.columns]]
//! name = "sku"
//! required = true
//! target = { entity = "product", field = "default_code" }
//! ```

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{ConfigurationError, StoreError};
use crate::models::{
    ConnectionProfile, Protocol, DEFAULT_DOWNLOAD_PATH, DEFAULT_POLL_INTERVAL_MINUTES, DEFAULT_PROCESSED_PATH,
};
use crate::registry::FileTypeDescriptor;
use crate::store::IngestStore;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkspaceFile {
    #[serde(default)]
    pub profiles: Vec<ProfileSeed>,
    #[serde(default)]
    pub file_types: Vec<FileTypeDescriptor>,
}

/// Connection profile as written by an administrator
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileSeed {
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub protocol: Protocol,
    /// Defaults to the protocol's standard port
    #[serde(default)]
    pub port: Option<u32>,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub use_tls: bool,
    #[serde(default)]
    pub download_path: Option<String>,
    #[serde(default)]
    pub processed_path: Option<String>,
    #[serde(default)]
    pub poll_interval_minutes: Option<u32>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl ProfileSeed {
    pub fn into_profile(self) -> Result<ConnectionProfile, ConfigurationError> {
        let port = match self.port {
            None => self.protocol.default_port(),
            Some(port) => u16::try_from(port)
                .ok()
                .filter(|p| *p > 0)
                .ok_or(ConfigurationError::InvalidPort(port))?,
        };

        let mut profile = ConnectionProfile::new(self.name, self.protocol, self.host, self.username, self.password);
        profile.port = port;
        profile.use_tls = self.use_tls;
        profile.download_path = self.download_path.unwrap_or_else(|| DEFAULT_DOWNLOAD_PATH.to_string());
        profile.processed_path = self.processed_path.unwrap_or_else(|| DEFAULT_PROCESSED_PATH.to_string());
        profile.poll_interval_minutes = self.poll_interval_minutes.unwrap_or(DEFAULT_POLL_INTERVAL_MINUTES);
        profile.active = self.active;
        profile.validate()?;
        Ok(profile)
    }
}

/// What a seed import wrote and what it refused
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub profiles: Vec<String>,
    pub file_types: Vec<String>,
    /// `(entry name, reason)`
    pub rejected: Vec<(String, String)>,
}

impl WorkspaceFile {
    pub fn parse(text: &str) -> sheetsync_common::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> sheetsync_common::Result<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    /// Write every entry through `store`; invalid entries are reported and
    /// skipped, store failures abort the import
    pub fn apply(self, store: &dyn IngestStore) -> anyhow::Result<SeedReport> {
        let mut report = SeedReport::default();

        for seed in self.profiles {
            let name = seed.name.clone();
            let mut profile = match seed.into_profile() {
                Ok(profile) => profile,
                Err(e) => {
                    warn!(profile = %name, error = %e, "Rejected profile");
                    report.rejected.push((name, e.to_string()));
                    continue;
                },
            };

            // Re-seeding must not reset what the cycle recorded
            if let Ok(existing) = store.profile_by_name(&name) {
                profile.last_sync = existing.last_sync;
                profile.connection_status = existing.connection_status;
                profile.last_error = existing.last_error;
            }

            match store.save_profile(profile) {
                Ok(()) => report.profiles.push(name),
                Err(StoreError::Configuration(e)) => report.rejected.push((name, e.to_string())),
                Err(e) => return Err(e).context("Failed to save profile"),
            }
        }

        for file_type in self.file_types {
            let name = file_type.name.clone();
            match store.save_file_type(file_type) {
                Ok(()) => report.file_types.push(name),
                Err(StoreError::Configuration(e)) => {
                    warn!(file_type = %name, error = %e, "Rejected file type");
                    report.rejected.push((name, e.to_string()));
                },
                Err(e) => return Err(e).context("Failed to save file type"),
            }
        }

        info!(
            profiles = report.profiles.len(),
            file_types = report.file_types.len(),
            rejected = report.rejected.len(),
            "Workspace seeded"
        );
        Ok(report)
    }
}
