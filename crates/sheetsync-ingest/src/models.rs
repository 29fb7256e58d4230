//! Data models for ingestion
//!
//! Connection profiles, ingested file records and their status enums.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigurationError;
use crate::normalize::SheetContent;

/// Default FTP control port
pub const DEFAULT_FTP_PORT: u16 = 21;

/// Default SSH port for SFTP and SCP
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default source directory on the remote server
pub const DEFAULT_DOWNLOAD_PATH: &str = "/";

/// Default archive directory on the remote server
pub const DEFAULT_PROCESSED_PATH: &str = "/files_read";

/// Default poll interval in minutes
pub const DEFAULT_POLL_INTERVAL_MINUTES: u32 = 30;

/// Remote transfer protocol variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Ftp,
    Ftps,
    Sftp,
    Scp,
}

impl Protocol {
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Ftp | Protocol::Ftps => DEFAULT_FTP_PORT,
            Protocol::Sftp | Protocol::Scp => DEFAULT_SSH_PORT,
        }
    }

    /// Whether files can be moved to the archive directory after processing
    pub fn supports_move(self) -> bool {
        !matches!(self, Protocol::Scp)
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Ftp => write!(f, "ftp"),
            Protocol::Ftps => write!(f, "ftps"),
            Protocol::Sftp => write!(f, "sftp"),
            Protocol::Scp => write!(f, "scp"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ftp" => Ok(Protocol::Ftp),
            "ftps" => Ok(Protocol::Ftps),
            "sftp" => Ok(Protocol::Sftp),
            "scp" => Ok(Protocol::Scp),
            _ => Err(anyhow::anyhow!("Invalid protocol: {}", s)),
        }
    }
}

/// Last known health of a connection profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    NotTested,
    Success,
    Failed,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::NotTested => write!(f, "not_tested"),
            ConnectionStatus::Success => write!(f, "success"),
            ConnectionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Lifecycle of an ingested file record
///
/// `downloaded -> processed -> moved`, with `error` reachable from any step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    #[default]
    Downloaded,
    Processed,
    Moved,
    Error,
}

impl FileStatus {
    /// Finalized records are never downloaded again for the same profile
    pub fn is_finalized(self) -> bool {
        matches!(self, FileStatus::Processed | FileStatus::Moved)
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileStatus::Downloaded => write!(f, "downloaded"),
            FileStatus::Processed => write!(f, "processed"),
            FileStatus::Moved => write!(f, "moved"),
            FileStatus::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for FileStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "downloaded" => Ok(FileStatus::Downloaded),
            "processed" => Ok(FileStatus::Processed),
            "moved" => Ok(FileStatus::Moved),
            "error" => Ok(FileStatus::Error),
            _ => Err(anyhow::anyhow!("Invalid file status: {}", s)),
        }
    }
}

/// Stored settings for one remote file source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionProfile {
    pub id: Uuid,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub protocol: Protocol,

    /// Upgrade a plain FTP profile to FTPS
    #[serde(default)]
    pub use_tls: bool,

    /// Remote source directory
    pub download_path: String,

    /// Remote archive directory
    pub processed_path: String,

    pub poll_interval_minutes: u32,
    pub active: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub connection_status: ConnectionStatus,
    pub last_error: Option<String>,
}

impl ConnectionProfile {
    /// New active profile with default paths and interval
    pub fn new(
        name: impl Into<String>,
        protocol: Protocol,
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            host: host.into(),
            port: protocol.default_port(),
            username: username.into(),
            password: password.into(),
            protocol,
            use_tls: false,
            download_path: DEFAULT_DOWNLOAD_PATH.to_string(),
            processed_path: DEFAULT_PROCESSED_PATH.to_string(),
            poll_interval_minutes: DEFAULT_POLL_INTERVAL_MINUTES,
            active: true,
            last_sync: None,
            connection_status: ConnectionStatus::NotTested,
            last_error: None,
        }
    }

    /// Protocol actually spoken on the wire (`use_tls` turns FTP into FTPS)
    pub fn effective_protocol(&self) -> Protocol {
        match self.protocol {
            Protocol::Ftp if self.use_tls => Protocol::Ftps,
            other => other,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::EmptyField("name"));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigurationError::EmptyField("host"));
        }
        if self.port == 0 {
            return Err(ConfigurationError::InvalidPort(0));
        }
        if self.poll_interval_minutes == 0 {
            return Err(ConfigurationError::InvalidPollInterval);
        }
        Ok(())
    }

    /// Whether the poll interval has elapsed since the last successful sync
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_sync {
            Some(last) => now - last >= Duration::minutes(i64::from(self.poll_interval_minutes)),
            None => true,
        }
    }
}

/// Persisted outcome of downloading and parsing one remote file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub filename: String,

    /// Full remote path the file was downloaded from
    pub original_path: String,
    pub moved_path: Option<String>,

    pub file_size: u64,
    pub file_size_kb: f64,
    pub content_sha256: Option<String>,

    /// Normalized content, absent when download or parsing failed
    pub content: Option<SheetContent>,

    pub status: FileStatus,
    pub error_message: Option<String>,

    pub row_count: usize,
    pub column_count: usize,
    pub sheet_names: String,

    pub processing_log: String,
    pub orders_created: usize,

    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    /// Empty record for `filename` in `status`
    pub fn new(profile_id: Uuid, filename: impl Into<String>, status: FileStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            profile_id,
            filename: filename.into(),
            original_path: String::new(),
            moved_path: None,
            file_size: 0,
            file_size_kb: 0.0,
            content_sha256: None,
            content: None,
            status,
            error_message: None,
            row_count: 0,
            column_count: 0,
            sheet_names: String::new(),
            processing_log: String::new(),
            orders_created: 0,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    /// Error record carrying a human-readable failure message
    pub fn failed(profile_id: Uuid, filename: impl Into<String>, message: impl Into<String>) -> Self {
        let mut record = Self::new(profile_id, filename, FileStatus::Error);
        record.error_message = Some(message.into());
        record
    }
}

/// Kilobytes rounded to two decimals
pub fn size_kb(bytes: u64) -> f64 {
    (bytes as f64 / 1024.0 * 100.0).round() / 100.0
}

/// Field-level update of a [`FileRecord`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub status: Option<FileStatus>,
    pub error_message: Option<Option<String>>,
    pub processing_log: Option<String>,
    pub orders_created: Option<usize>,
    pub moved_path: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl RecordPatch {
    pub fn status(status: FileStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn apply(self, record: &mut FileRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(message) = self.error_message {
            record.error_message = message;
        }
        if let Some(log) = self.processing_log {
            record.processing_log = log;
        }
        if let Some(count) = self.orders_created {
            record.orders_created = count;
        }
        if let Some(path) = self.moved_path {
            record.moved_path = Some(path);
        }
        if let Some(at) = self.processed_at {
            record.processed_at = Some(at);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn profile() -> ConnectionProfile {
        ConnectionProfile::new("clientes", Protocol::Ftp, "ftp.example.cl", "user", "secret")
    }

    #[test]
    fn test_status_round_trip_through_strings() {
        for status in [FileStatus::Downloaded, FileStatus::Processed, FileStatus::Moved, FileStatus::Error] {
            assert_eq!(status.to_string().parse::<FileStatus>().unwrap(), status);
        }
        assert!("archived".parse::<FileStatus>().is_err());
    }

    #[test]
    fn test_only_processed_and_moved_are_finalized() {
        assert!(FileStatus::Processed.is_finalized());
        assert!(FileStatus::Moved.is_finalized());
        assert!(!FileStatus::Downloaded.is_finalized());
        assert!(!FileStatus::Error.is_finalized());
    }

    #[test]
    fn test_use_tls_upgrades_plain_ftp() {
        let mut p = profile();
        assert_eq!(p.effective_protocol(), Protocol::Ftp);
        p.use_tls = true;
        assert_eq!(p.effective_protocol(), Protocol::Ftps);

        p.protocol = Protocol::Sftp;
        assert_eq!(p.effective_protocol(), Protocol::Sftp);
    }

    #[test]
    fn test_validate_rejects_bad_port_and_interval() {
        let mut p = profile();
        assert!(p.validate().is_ok());

        p.port = 0;
        assert_eq!(p.validate(), Err(ConfigurationError::InvalidPort(0)));

        p.port = 2121;
        p.poll_interval_minutes = 0;
        assert_eq!(p.validate(), Err(ConfigurationError::InvalidPollInterval));
    }

    #[test]
    fn test_is_due_after_interval() {
        let mut p = profile();
        let now = Utc::now();
        assert!(p.is_due(now));

        p.last_sync = Some(now - Duration::minutes(10));
        assert!(!p.is_due(now));

        p.last_sync = Some(now - Duration::minutes(30));
        assert!(p.is_due(now));
    }

    #[test]
    fn test_size_kb_rounds_to_two_decimals() {
        assert_eq!(size_kb(0), 0.0);
        assert_eq!(size_kb(2048), 2.0);
        assert_eq!(size_kb(1500), 1.46);
    }

    #[test]
    fn test_patch_updates_only_given_fields() {
        let mut record = FileRecord::new(Uuid::new_v4(), "orders.xlsx", FileStatus::Processed);
        record.processing_log = "first pass".to_string();

        RecordPatch {
            orders_created: Some(2),
            error_message: Some(Some("1 row failed".to_string())),
            ..RecordPatch::default()
        }
        .apply(&mut record);

        assert_eq!(record.status, FileStatus::Processed);
        assert_eq!(record.orders_created, 2);
        assert_eq!(record.processing_log, "first pass");
        assert_eq!(record.error_message.as_deref(), Some("1 row failed"));
    }
}
