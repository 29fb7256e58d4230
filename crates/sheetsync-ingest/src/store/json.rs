//! Store persisted as one JSON document
//!
//! Every successful write rewrites the file through a temporary file in the
//! same directory followed by a rename, so a crash never leaves a truncated
//! state file.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{StateAccess, StoreResult, StoreState};
use crate::error::StoreError;

#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl JsonStore {
    /// Open the store at `path`, starting empty when the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let state = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            serde_json::from_str(&text)?
        } else {
            tracing::info!(path = %path.display(), "state file not found, starting empty");
            StoreState::default()
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, state: &StoreState) -> StoreResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(tmp.as_file(), state)?;
        tmp.persist(&self.path)
            .map_err(|e| StoreError::Persistence(e.error.to_string()))?;
        Ok(())
    }
}

impl StateAccess for JsonStore {
    fn read<T>(&self, f: impl FnOnce(&StoreState) -> StoreResult<T>) -> StoreResult<T> {
        let state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        f(&state)
    }

    fn write<T>(&self, f: impl FnOnce(&mut StoreState) -> StoreResult<T>) -> StoreResult<T> {
        let mut state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        let mut draft = state.clone();
        let out = f(&mut draft)?;
        self.persist(&draft)?;
        *state = draft;
        Ok(out)
    }
}
