//! Error types shared across SheetSync crates

use thiserror::Error;

/// Result type alias for SheetSync file loaders
pub type Result<T> = std::result::Result<T, SheetSyncError>;

/// Failure reading or writing one of the local state files
#[derive(Error, Debug)]
pub enum SheetSyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// In-process state could not be read, e.g. a poisoned lock
    #[error("State error: {0}")]
    State(String),
}

impl SheetSyncError {
    pub fn state(message: impl ToString) -> Self {
        Self::State(message.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn read_settings(text: &str) -> Result<toml::Table> {
        Ok(toml::from_str(text)?)
    }

    #[test]
    fn test_conversions_keep_the_source_message() {
        let err = read_settings("name = ").unwrap_err();
        assert!(matches!(err, SheetSyncError::Toml(_)));
        assert!(err.to_string().starts_with("TOML error:"));

        let err: SheetSyncError = serde_json::from_str::<u32>("\"x\"").unwrap_err().into();
        assert!(matches!(err, SheetSyncError::Serialization(_)));

        assert_eq!(SheetSyncError::state("lock poisoned").to_string(), "State error: lock poisoned");
    }
}
