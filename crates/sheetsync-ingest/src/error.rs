//! Error taxonomy for the ingestion pipeline
//!
//! Each enum matches the granularity at which it is fatal:
//! [`ConnectError`] aborts one profile, [`TransferError`] and [`ParseError`]
//! abort one file, [`LookupError`] aborts one row or group, and
//! [`ConfigurationError`] is raised when configuration is written and never
//! reaches the orchestrator.

use thiserror::Error;

/// Failure while opening a remote session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection failed: {0}")]
    Unknown(String),
}

/// Failure while listing, downloading or moving one remote file
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Remote permission denied: {0}")]
    Permission(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Local I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transfer failed: {0}")]
    Unknown(String),
}

/// Failure while decoding a spreadsheet or delimited file
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Error processing workbook: {0}")]
    Workbook(String),

    #[error("Error processing delimited file: {0}")]
    Delimited(String),

    #[error("Unsupported file extension: {0}")]
    UnsupportedExtension(String),

    #[error("Invalid stored content: {0}")]
    Content(String),
}

/// Failure raised by a directory, catalog or order collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("Directory unavailable: {0}")]
    Unavailable(String),

    #[error("Lookup failed: {0}")]
    Failed(String),
}

/// Invalid configuration rejected at write time
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Port must be between 1 and 65535, got {0}")]
    InvalidPort(u32),

    #[error("Poll interval must be greater than zero")]
    InvalidPollInterval,

    #[error("Column '{column}' is declared more than once in file type '{file_type}'")]
    DuplicateColumn { file_type: String, column: String },

    #[error("Field '{0}' must not be empty")]
    EmptyField(&'static str),

    #[error("Delimiter must be a single ASCII character, got {0:?}")]
    InvalidDelimiter(char),

    #[error("Unknown field '{field}' for target '{entity}'")]
    UnknownField { entity: String, field: String },
}

/// Failure reported by an [`IngestStore`](crate::store::IngestStore)
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Failed to persist store: {0}")]
    Persistence(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn not_found(kind: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            kind,
            key: key.to_string(),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Any failure that aborts processing of a single file
#[derive(Error, Debug)]
pub enum FileError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_original_text() {
        let err = ConnectError::NetworkUnreachable("connection refused".to_string());
        assert_eq!(err.to_string(), "Network unreachable: connection refused");

        let err = FileError::from(ParseError::Workbook("zip header missing".to_string()));
        assert!(err.to_string().contains("zip header missing"));
    }

    #[test]
    fn test_configuration_error_converts_into_store_error() {
        let err: StoreError = ConfigurationError::InvalidPort(0).into();
        assert!(matches!(err, StoreError::Configuration(ConfigurationError::InvalidPort(0))));
        assert_eq!(err.to_string(), "Port must be between 1 and 65535, got 0");
    }
}
