//! In-process store

use std::sync::Mutex;

use super::{StateAccess, StoreResult, StoreState};
use crate::error::StoreError;

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StoreResult<StoreState> {
        self.read(|s| Ok(s.clone()))
    }
}

impl StateAccess for MemoryStore {
    fn read<T>(&self, f: impl FnOnce(&StoreState) -> StoreResult<T>) -> StoreResult<T> {
        let state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        f(&state)
    }

    fn write<T>(&self, f: impl FnOnce(&mut StoreState) -> StoreResult<T>) -> StoreResult<T> {
        let mut state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut state)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::ConfigurationError;
    use crate::models::{ConnectionProfile, ConnectionStatus, FileRecord, FileStatus, Protocol, RecordPatch};
    use crate::registry::{ColumnDescriptor, FileTypeDescriptor};
    use crate::store::IngestStore;
    use chrono::Utc;
    use uuid::Uuid;

    fn store_with_profile() -> (MemoryStore, ConnectionProfile) {
        let store = MemoryStore::new();
        let profile = ConnectionProfile::new("clientes", Protocol::Sftp, "sftp.example.cl", "u", "p");
        store.save_profile(profile.clone()).unwrap();
        (store, profile)
    }

    #[test]
    fn test_invalid_profile_is_rejected_at_write() {
        let store = MemoryStore::new();
        let mut profile = ConnectionProfile::new("bad", Protocol::Ftp, "h", "u", "p");
        profile.poll_interval_minutes = 0;

        let err = store.save_profile(profile).unwrap_err();
        assert!(matches!(err, StoreError::Configuration(ConfigurationError::InvalidPollInterval)));
        assert!(store.profiles().unwrap().is_empty());
    }

    #[test]
    fn test_saving_same_name_replaces_and_keeps_id() {
        let (store, original) = store_with_profile();
        let mut edited = ConnectionProfile::new("clientes", Protocol::Sftp, "other.example.cl", "u", "p");
        edited.active = false;
        store.save_profile(edited).unwrap();

        let profiles = store.profiles().unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].id, original.id);
        assert_eq!(profiles[0].host, "other.example.cl");
        assert!(store.active_profiles().unwrap().is_empty());
    }

    #[test]
    fn test_connection_status_and_sync_updates() {
        let (store, profile) = store_with_profile();
        let now = Utc::now();
        store.set_connection_status(profile.id, ConnectionStatus::Failed, Some("refused".into())).unwrap();
        store.record_sync(profile.id, now).unwrap();

        let stored = store.profile_by_name("clientes").unwrap();
        assert_eq!(stored.connection_status, ConnectionStatus::Failed);
        assert_eq!(stored.last_error.as_deref(), Some("refused"));
        assert_eq!(stored.last_sync, Some(now));
        assert!(store.record_sync(Uuid::new_v4(), now).is_err());
    }

    #[test]
    fn test_find_finalized_ignores_error_records_and_other_profiles() {
        let (store, profile) = store_with_profile();
        store.create_record(FileRecord::failed(profile.id, "a.xlsx", "boom")).unwrap();
        assert!(store.find_finalized(profile.id, "a.xlsx").unwrap().is_none());

        let id = store
            .create_record(FileRecord::new(profile.id, "a.xlsx", FileStatus::Processed))
            .unwrap();
        assert_eq!(store.find_finalized(profile.id, "a.xlsx").unwrap().unwrap().id, id);
        assert!(store.find_finalized(Uuid::new_v4(), "a.xlsx").unwrap().is_none());

        store.update_record(id, RecordPatch::status(FileStatus::Moved)).unwrap();
        assert_eq!(store.record(id).unwrap().status, FileStatus::Moved);
        assert_eq!(store.records(Some(profile.id)).unwrap().len(), 2);
    }

    #[test]
    fn test_record_requires_known_profile() {
        let store = MemoryStore::new();
        let err = store
            .create_record(FileRecord::new(Uuid::new_v4(), "x.xlsx", FileStatus::Downloaded))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "profile", .. }));
    }

    #[test]
    fn test_file_type_write_validates_and_backfills() {
        let store = MemoryStore::new();
        let mut column = ColumnDescriptor::new("Rut Tecnico");
        column.technical_name.clear();
        store
            .save_file_type(FileTypeDescriptor::new("Installs", "inst").with_column(column))
            .unwrap();
        assert_eq!(store.file_types().unwrap()[0].columns[0].technical_name, "rut_tecnico");

        let duplicate = FileTypeDescriptor::new("Dup", "dup")
            .with_column(ColumnDescriptor::new("sku"))
            .with_column(ColumnDescriptor::new("sku"));
        assert!(store.save_file_type(duplicate).is_err());
        assert_eq!(store.snapshot().unwrap().file_types.len(), 1);
    }
}
