//! Configuration and audit store
//!
//! The pipeline reads connection profiles and file type descriptors and
//! writes ingested file records through [`IngestStore`]. Writes of
//! configuration are validated here, so an invalid profile never reaches
//! the orchestrator.

pub mod json;
pub mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{ConnectionProfile, ConnectionStatus, FileRecord, RecordPatch};
use crate::registry::FileTypeDescriptor;

pub use json::JsonStore;
pub use memory::MemoryStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Keyed store with create, field-level update and filtered search
pub trait IngestStore: Send + Sync {
    fn active_profiles(&self) -> StoreResult<Vec<ConnectionProfile>>;

    fn profiles(&self) -> StoreResult<Vec<ConnectionProfile>>;

    fn profile(&self, id: Uuid) -> StoreResult<ConnectionProfile>;

    fn profile_by_name(&self, name: &str) -> StoreResult<ConnectionProfile>;

    /// Insert or replace a profile after validating it
    fn save_profile(&self, profile: ConnectionProfile) -> StoreResult<()>;

    fn record_sync(&self, profile_id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    fn set_connection_status(
        &self,
        profile_id: Uuid,
        status: ConnectionStatus,
        error: Option<String>,
    ) -> StoreResult<()>;

    /// Record for `filename` under `profile_id` already in processed/moved
    fn find_finalized(&self, profile_id: Uuid, filename: &str) -> StoreResult<Option<FileRecord>>;

    fn create_record(&self, record: FileRecord) -> StoreResult<Uuid>;

    fn update_record(&self, id: Uuid, patch: RecordPatch) -> StoreResult<()>;

    fn record(&self, id: Uuid) -> StoreResult<FileRecord>;

    /// Records in creation order, optionally for one profile
    fn records(&self, profile_id: Option<Uuid>) -> StoreResult<Vec<FileRecord>>;

    fn file_types(&self) -> StoreResult<Vec<FileTypeDescriptor>>;

    /// Insert or replace a descriptor after validating it and filling
    /// technical names
    fn save_file_type(&self, file_type: FileTypeDescriptor) -> StoreResult<()>;
}

/// Everything a store holds, in a serializable form
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    pub profiles: Vec<ConnectionProfile>,
    #[serde(default)]
    pub file_types: Vec<FileTypeDescriptor>,
    #[serde(default)]
    pub records: Vec<FileRecord>,
}

impl StoreState {
    fn profile_mut(&mut self, id: Uuid) -> StoreResult<&mut ConnectionProfile> {
        self.profiles
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| StoreError::not_found("profile", id))
    }

    fn record_mut(&mut self, id: Uuid) -> StoreResult<&mut FileRecord> {
        self.records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::not_found("file record", id))
    }

    fn upsert_profile(&mut self, profile: ConnectionProfile) -> StoreResult<()> {
        profile.validate()?;
        match self.profiles.iter_mut().find(|p| p.id == profile.id || p.name == profile.name) {
            Some(existing) => {
                let id = existing.id;
                *existing = ConnectionProfile { id, ..profile };
            },
            None => self.profiles.push(profile),
        }
        Ok(())
    }

    fn upsert_file_type(&mut self, mut file_type: FileTypeDescriptor) -> StoreResult<()> {
        file_type.validate()?;
        file_type.backfill_technical_names();
        for warning in file_type.incompatible_bindings() {
            tracing::warn!(file_type = %file_type.name, "{}", warning);
        }
        match self
            .file_types
            .iter_mut()
            .find(|f| f.id == file_type.id || f.name == file_type.name)
        {
            Some(existing) => {
                let id = existing.id;
                *existing = FileTypeDescriptor { id, ..file_type };
            },
            None => self.file_types.push(file_type),
        }
        Ok(())
    }
}

/// Locked access to a [`StoreState`]; every implementor gets [`IngestStore`]
pub(crate) trait StateAccess: Send + Sync {
    fn read<T>(&self, f: impl FnOnce(&StoreState) -> StoreResult<T>) -> StoreResult<T>;

    /// Mutate the state; implementors persist it when `f` succeeds
    fn write<T>(&self, f: impl FnOnce(&mut StoreState) -> StoreResult<T>) -> StoreResult<T>;
}

impl<S: StateAccess> IngestStore for S {
    fn active_profiles(&self) -> StoreResult<Vec<ConnectionProfile>> {
        self.read(|s| Ok(s.profiles.iter().filter(|p| p.active).cloned().collect()))
    }

    fn profiles(&self) -> StoreResult<Vec<ConnectionProfile>> {
        self.read(|s| Ok(s.profiles.clone()))
    }

    fn profile(&self, id: Uuid) -> StoreResult<ConnectionProfile> {
        self.read(|s| {
            s.profiles
                .iter()
                .find(|p| p.id == id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("profile", id))
        })
    }

    fn profile_by_name(&self, name: &str) -> StoreResult<ConnectionProfile> {
        self.read(|s| {
            s.profiles
                .iter()
                .find(|p| p.name == name)
                .cloned()
                .ok_or_else(|| StoreError::not_found("profile", name))
        })
    }

    fn save_profile(&self, profile: ConnectionProfile) -> StoreResult<()> {
        self.write(|s| s.upsert_profile(profile))
    }

    fn record_sync(&self, profile_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        self.write(|s| {
            s.profile_mut(profile_id)?.last_sync = Some(at);
            Ok(())
        })
    }

    fn set_connection_status(
        &self,
        profile_id: Uuid,
        status: ConnectionStatus,
        error: Option<String>,
    ) -> StoreResult<()> {
        self.write(|s| {
            let profile = s.profile_mut(profile_id)?;
            profile.connection_status = status;
            profile.last_error = error;
            Ok(())
        })
    }

    fn find_finalized(&self, profile_id: Uuid, filename: &str) -> StoreResult<Option<FileRecord>> {
        self.read(|s| {
            Ok(s.records
                .iter()
                .find(|r| r.profile_id == profile_id && r.filename == filename && r.status.is_finalized())
                .cloned())
        })
    }

    fn create_record(&self, record: FileRecord) -> StoreResult<Uuid> {
        self.write(|s| {
            if !s.profiles.iter().any(|p| p.id == record.profile_id) {
                return Err(StoreError::not_found("profile", record.profile_id));
            }
            let id = record.id;
            s.records.push(record);
            Ok(id)
        })
    }

    fn update_record(&self, id: Uuid, patch: RecordPatch) -> StoreResult<()> {
        self.write(|s| {
            patch.apply(s.record_mut(id)?);
            Ok(())
        })
    }

    fn record(&self, id: Uuid) -> StoreResult<FileRecord> {
        self.read(|s| {
            s.records
                .iter()
                .find(|r| r.id == id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("file record", id))
        })
    }

    fn records(&self, profile_id: Option<Uuid>) -> StoreResult<Vec<FileRecord>> {
        self.read(|s| {
            Ok(s.records
                .iter()
                .filter(|r| profile_id.map_or(true, |id| r.profile_id == id))
                .cloned()
                .collect())
        })
    }

    fn file_types(&self) -> StoreResult<Vec<FileTypeDescriptor>> {
        self.read(|s| Ok(s.file_types.clone()))
    }

    fn save_file_type(&self, file_type: FileTypeDescriptor) -> StoreResult<()> {
        self.write(|s| s.upsert_file_type(file_type))
    }
}
