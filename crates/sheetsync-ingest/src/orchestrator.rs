//! Ingestion cycle
//!
//! Profiles are drained one at a time: open a session, list the source
//! directory, then download, normalize, record and archive each candidate
//! file in order. Failures are contained at the level they happen:
//!
//! - a session that cannot be opened or listed skips the profile
//! - a file that cannot be downloaded or parsed gets an `error` record
//! - a row that cannot be mapped becomes an `error` outcome in the mapping log
//!
//! Nothing is retried inside a cycle. Files still present in the source
//! directory are picked up again by the next one, unless a `processed` or
//! `moved` record already exists for them.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sheetsync_common::checksum::sha256_hex;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::directory::{OrderBook, PartnerDirectory, ProductCatalog};
use crate::error::{ConnectError, FileError, StoreError, TransferError};
use crate::mapping::{MappingEngine, MappingResult};
use crate::models::{size_kb, ConnectionProfile, ConnectionStatus, FileRecord, FileStatus, RecordPatch};
use crate::normalize::{self, ContentStats, NormalizeOptions};
use crate::registry::FileTypeRegistry;
use crate::store::{IngestStore, StoreResult};
use crate::transport::{remote_path, Connector, MoveOutcome, RemoteSession};

/// Default extensions picked up from the source directory
pub const DEFAULT_EXTENSIONS: &[&str] = &["xlsx", "xls", "csv"];

/// Behaviour switches for [`IngestOrchestrator`]
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Lowercase extensions without the dot
    pub extensions: Vec<String>,

    /// Run the mapping pass right after a file is archived
    pub auto_transform: bool,

    /// Where downloads are spooled; the system temp dir when unset
    pub work_dir: Option<PathBuf>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            auto_transform: true,
            work_dir: None,
        }
    }
}

/// What happened to one remote file
#[derive(Debug, Clone, PartialEq)]
pub struct FileReport {
    pub filename: String,
    pub record_id: Option<Uuid>,
    pub status: FileStatus,
    pub orders_created: usize,
    pub message: Option<String>,
}

/// Outcome of one profile within a cycle
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileReport {
    pub profile_id: Uuid,
    pub profile: String,

    /// Set when the profile was abandoned before processing files
    pub error: Option<String>,

    pub files: Vec<FileReport>,

    /// Candidates skipped because a finalized record already exists
    pub skipped: Vec<String>,

    /// Listing entries without a supported extension
    pub ignored: usize,
}

impl ProfileReport {
    fn new(profile: &ConnectionProfile) -> Self {
        Self {
            profile_id: profile.id,
            profile: profile.name.clone(),
            error: None,
            files: Vec::new(),
            skipped: Vec::new(),
            ignored: 0,
        }
    }

    pub fn count(&self, status: FileStatus) -> usize {
        self.files.iter().filter(|f| f.status == status).count()
    }

    pub fn orders_created(&self) -> usize {
        self.files.iter().map(|f| f.orders_created).sum()
    }

    /// One-line human readable summary
    pub fn summary(&self) -> String {
        match &self.error {
            Some(error) => format!("{}: FAILED - {}", self.profile, error),
            None => format!(
                "{}: {} moved, {} processed, {} errors, {} already done, {} orders created",
                self.profile,
                self.count(FileStatus::Moved),
                self.count(FileStatus::Processed),
                self.count(FileStatus::Error),
                self.skipped.len(),
                self.orders_created()
            ),
        }
    }
}

/// Result of a manual connection test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTest {
    pub success: bool,
    pub message: String,
}

/// Closes the session on every exit path
struct SessionGuard(Box<dyn RemoteSession>);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.0.close() {
            debug!("session close reported a failure");
        }
    }
}

pub struct IngestOrchestrator {
    store: Arc<dyn IngestStore>,
    connector: Arc<dyn Connector>,
    partners: Arc<dyn PartnerDirectory>,
    catalog: Arc<dyn ProductCatalog>,
    orders: Arc<dyn OrderBook>,
    settings: OrchestratorSettings,
}

impl IngestOrchestrator {
    /// Create an orchestrator whose mapping pass uses `directory` for every
    /// lookup and for order creation
    pub fn new<D>(
        store: Arc<dyn IngestStore>,
        connector: Arc<dyn Connector>,
        directory: Arc<D>,
        settings: OrchestratorSettings,
    ) -> Self
    where
        D: PartnerDirectory + ProductCatalog + OrderBook + 'static,
    {
        Self {
            store,
            connector,
            partners: directory.clone(),
            catalog: directory.clone(),
            orders: directory,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn IngestStore> {
        &self.store
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    fn engine(&self) -> MappingEngine<'_> {
        MappingEngine::new(self.partners.as_ref(), self.catalog.as_ref(), self.orders.as_ref())
    }

    fn registry(&self) -> StoreResult<FileTypeRegistry> {
        Ok(FileTypeRegistry::new(self.store.file_types()?))
    }

    /// One cycle over every active profile
    pub fn run_cycle(&self) -> StoreResult<Vec<ProfileReport>> {
        let profiles = self.store.active_profiles()?;
        info!(profiles = profiles.len(), "Starting ingestion cycle");
        self.run_profiles(profiles)
    }

    /// One cycle over the active profiles whose poll interval has elapsed
    pub fn run_due(&self, now: DateTime<Utc>) -> StoreResult<Vec<ProfileReport>> {
        let due: Vec<_> = self
            .store
            .active_profiles()?
            .into_iter()
            .filter(|p| p.is_due(now))
            .collect();
        if due.is_empty() {
            debug!("no profile due");
            return Ok(Vec::new());
        }
        info!(profiles = due.len(), "Starting scheduled cycle");
        self.run_profiles(due)
    }

    /// Manual "process now" for one profile, active or not
    pub fn run_profile_by_name(&self, name: &str) -> StoreResult<ProfileReport> {
        let profile = self.store.profile_by_name(name)?;
        let registry = self.registry()?;
        Ok(self.run_profile(&profile, &registry))
    }

    fn run_profiles(&self, profiles: Vec<ConnectionProfile>) -> StoreResult<Vec<ProfileReport>> {
        let registry = self.registry()?;
        let reports: Vec<_> = profiles
            .iter()
            .map(|profile| self.run_profile(profile, &registry))
            .collect();

        let failed = reports.iter().filter(|r| r.error.is_some()).count();
        info!(
            profiles = reports.len(),
            failed,
            files = reports.iter().map(|r| r.files.len()).sum::<usize>(),
            "Ingestion cycle completed"
        );
        Ok(reports)
    }

    /// Drain one profile; never fails, problems end up in the report
    pub fn run_profile(&self, profile: &ConnectionProfile, registry: &FileTypeRegistry) -> ProfileReport {
        let span = info_span!("profile", profile = %profile.name, protocol = %profile.effective_protocol());
        let _enter = span.enter();
        let mut report = ProfileReport::new(profile);

        let session = match self.connector.connect(profile) {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "✗ Connection failed, skipping profile");
                self.update_connection_status(profile, ConnectionStatus::Failed, Some(e.to_string()));
                report.error = Some(e.to_string());
                return report;
            },
        };
        self.update_connection_status(profile, ConnectionStatus::Success, None);
        let mut session = SessionGuard(session);

        let entries = match session.0.list(&profile.download_path) {
            Ok(entries) => entries,
            Err(e) => {
                error!(dir = %profile.download_path, error = %e, "✗ Listing failed, skipping profile");
                report.error = Some(format!("Cannot list {}: {}", profile.download_path, e));
                return report;
            },
        };

        let listed = entries.len();
        let candidates: Vec<String> = entries.into_iter().filter(|name| self.is_candidate(name)).collect();
        report.ignored = listed - candidates.len();
        info!(candidates = candidates.len(), dir = %profile.download_path, "Listed source directory");

        for filename in candidates {
            match self.store.find_finalized(profile.id, &filename) {
                Ok(Some(existing)) => {
                    debug!(file = %filename, status = %existing.status, "already finalized, skipping");
                    report.skipped.push(filename);
                    continue;
                },
                Ok(None) => {},
                Err(e) => {
                    warn!(file = %filename, error = %e, "duplicate check failed, skipping file this cycle");
                    continue;
                },
            }
            let file_report = self.process_file(profile, registry, session.0.as_mut(), &filename);
            report.files.push(file_report);
        }

        if let Err(e) = self.store.record_sync(profile.id, Utc::now()) {
            warn!(error = %e, "failed to record sync time");
        }
        drop(session);

        info!("{}", report.summary());
        report
    }

    fn is_candidate(&self, filename: &str) -> bool {
        normalize::extension_of(filename).is_some_and(|ext| self.settings.extensions.iter().any(|e| *e == ext))
    }

    fn update_connection_status(&self, profile: &ConnectionProfile, status: ConnectionStatus, error: Option<String>) {
        if let Err(e) = self.store.set_connection_status(profile.id, status, error) {
            warn!(error = %e, "failed to store connection status");
        }
    }

    fn process_file(
        &self,
        profile: &ConnectionProfile,
        registry: &FileTypeRegistry,
        session: &mut dyn RemoteSession,
        filename: &str,
    ) -> FileReport {
        let span = info_span!("file", file = %filename);
        let _enter = span.enter();
        let remote = remote_path(&profile.download_path, filename);

        let record_id = match self.ingest_file(profile, registry, session, filename, &remote) {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "✗ File failed");
                let mut record = FileRecord::failed(profile.id, filename, e.to_string());
                record.original_path = remote;
                let record_id = match self.store.create_record(record) {
                    Ok(id) => Some(id),
                    Err(store_err) => {
                        error!(error = %store_err, "could not store error record");
                        None
                    },
                };
                return FileReport {
                    filename: filename.to_string(),
                    record_id,
                    status: FileStatus::Error,
                    orders_created: 0,
                    message: Some(e.to_string()),
                };
            },
        };

        let mut message = None;
        match session.move_file(&remote, &profile.processed_path) {
            MoveOutcome::Moved(target) => {
                info!(to = %target, "✓ Archived");
                let patch = RecordPatch {
                    status: Some(FileStatus::Moved),
                    moved_path: Some(target),
                    ..RecordPatch::default()
                };
                if let Err(e) = self.store.update_record(record_id, patch) {
                    warn!(error = %e, "failed to record move");
                }
            },
            MoveOutcome::Unsupported => {
                info!("Protocol cannot move files, leaving in place");
            },
            MoveOutcome::Failed(reason) => {
                warn!(reason = %reason, "Could not archive file, it stays processed");
                message = Some(format!("Move failed: {}", reason));
            },
        }

        // Unidentified files go through the heuristic mapping; a descriptor can opt out
        let creates_orders = self
            .store
            .record(record_id)
            .map(|record| {
                let headers = record.content.as_ref().map(normalize::headers).unwrap_or_default();
                registry
                    .identify(filename, Some(headers.as_slice()))
                    .map_or(true, |d| d.create_orders)
            })
            .unwrap_or(false);

        if self.settings.auto_transform && creates_orders {
            match self.engine().transform(self.store.as_ref(), registry, record_id) {
                Ok(result) => info!(orders = result.entities_created, "Mapping pass finished"),
                Err(e) => warn!(error = %e, "Mapping pass could not be stored"),
            }
        }

        match self.store.record(record_id) {
            Ok(record) => FileReport {
                filename: filename.to_string(),
                record_id: Some(record_id),
                status: record.status,
                orders_created: record.orders_created,
                message: message.or(record.error_message),
            },
            Err(e) => FileReport {
                filename: filename.to_string(),
                record_id: Some(record_id),
                status: FileStatus::Processed,
                orders_created: 0,
                message: Some(e.to_string()),
            },
        }
    }

    /// Download, normalize and persist one file as `processed`
    fn ingest_file(
        &self,
        profile: &ConnectionProfile,
        registry: &FileTypeRegistry,
        session: &mut dyn RemoteSession,
        filename: &str,
        remote: &str,
    ) -> Result<Uuid, FileError> {
        let remote_size = session.size(remote);

        // Removed when it goes out of scope, whatever happens below
        let mut spool = match &self.settings.work_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(TransferError::Io)?;
                tempfile::Builder::new().prefix("sheetsync-").tempfile_in(dir)
            },
            None => tempfile::Builder::new().prefix("sheetsync-").tempfile(),
        }
        .map_err(TransferError::Io)?;

        let written = session.download(remote, spool.as_file_mut())?;
        let mut bytes = Vec::with_capacity(usize::try_from(written).unwrap_or(0));
        {
            let file = spool.as_file_mut();
            file.flush().map_err(TransferError::Io)?;
            file.seek(SeekFrom::Start(0)).map_err(TransferError::Io)?;
            file.read_to_end(&mut bytes).map_err(TransferError::Io)?;
        }
        if remote_size > 0 && remote_size != written {
            warn!(remote_size, written, "downloaded size differs from remote size");
        }
        info!(bytes = written, "Downloaded");

        let extension = normalize::extension_of(filename).unwrap_or_default();
        let sheet_name = std::path::Path::new(filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| filename.to_string());
        let options = registry
            .identify::<&str>(filename, None)
            .map(|d| d.normalize_options(sheet_name.clone()))
            .unwrap_or_else(|| NormalizeOptions {
                sheet_name,
                ..NormalizeOptions::default()
            });

        let content = normalize::normalize(&bytes, &extension, &options)?;
        let stats = ContentStats::of(&content);
        debug!(rows = stats.row_count, sheets = %stats.sheet_names, "Normalized");

        let mut record = FileRecord::new(profile.id, filename, FileStatus::Processed);
        record.original_path = remote.to_string();
        record.file_size = written;
        record.file_size_kb = size_kb(written);
        record.content_sha256 = Some(sha256_hex(&bytes));
        record.row_count = stats.row_count;
        record.column_count = stats.column_count;
        record.sheet_names = stats.sheet_names;
        record.content = Some(content);
        record.processed_at = Some(Utc::now());

        let id = self.store.create_record(record)?;
        info!(record = %id, rows = stats.row_count, "✓ Recorded as processed");
        Ok(id)
    }

    /// Open and close a session, storing the outcome on the profile
    pub fn test_connection(&self, profile_name: &str) -> StoreResult<ConnectionTest> {
        let profile = self.store.profile_by_name(profile_name)?;
        let span = info_span!("test_connection", profile = %profile.name);
        let _enter = span.enter();

        let outcome = self.connector.connect(&profile).map(|mut session| {
            session.close();
        });
        let test = connection_test(&profile, outcome);
        let (status, error) = if test.success {
            (ConnectionStatus::Success, None)
        } else {
            (ConnectionStatus::Failed, Some(test.message.clone()))
        };
        self.store.set_connection_status(profile.id, status, error)?;
        Ok(test)
    }

    /// On-demand mapping pass over a stored record
    pub fn transform(&self, record_id: Uuid) -> Result<MappingResult, StoreError> {
        let registry = self.registry()?;
        self.engine().transform(self.store.as_ref(), &registry, record_id)
    }
}

fn connection_test(profile: &ConnectionProfile, outcome: Result<(), ConnectError>) -> ConnectionTest {
    match outcome {
        Ok(()) => {
            info!("✓ Connection successful");
            ConnectionTest {
                success: true,
                message: format!(
                    "Connection to {}:{} ({}) successful",
                    profile.host,
                    profile.port,
                    profile.effective_protocol()
                ),
            }
        },
        Err(e) => {
            warn!(error = %e, "✗ Connection test failed");
            ConnectionTest {
                success: false,
                message: e.to_string(),
            }
        },
    }
}
