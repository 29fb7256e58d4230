//! Common test utilities for sheetsync integration tests
//!
//! - [`FakeRemote`]: scripted in-memory server implementing the transport
//!   traits, with counters for connects, closes and downloads
//! - [`xlsx`]: builds a real `.xlsx` workbook in memory
//! - [`Harness`]: orchestrator wired to a memory store, directory and fake remote
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{xlsx, Harness};
//!
//! let harness = Harness::new();
//! harness.remote.put("/in/orders.xlsx", xlsx(&[("Hoja1", &[&["sku"], &["A1"]])]));
//! ```

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::sync::{Arc, Mutex};

use rust_xlsxwriter::Workbook;
use sheetsync_ingest::directory::memory::{DirectorySnapshot, MemoryDirectory, Partner, Product};
use sheetsync_ingest::error::{ConnectError, TransferError};
use sheetsync_ingest::models::{ConnectionProfile, Protocol};
use sheetsync_ingest::orchestrator::{IngestOrchestrator, OrchestratorSettings};
use sheetsync_ingest::store::{IngestStore, MemoryStore};
use sheetsync_ingest::transport::{remote_path, Connector, MoveOutcome, RemoteSession};

#[derive(Debug, Default)]
struct RemoteState {
    /// Full remote path -> content
    files: BTreeMap<String, Vec<u8>>,
    supports_move: bool,
    connect_error: Option<ConnectError>,
    list_error: bool,
    broken_downloads: HashSet<String>,
    connects: usize,
    closes: usize,
    downloads: Vec<String>,
}

/// In-memory remote file server
#[derive(Debug, Clone)]
pub struct FakeRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl FakeRemote {
    /// Server that can move files (FTP/SFTP behaviour)
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RemoteState {
                supports_move: true,
                ..RemoteState::default()
            })),
        }
    }

    /// Server that cannot move files (SCP behaviour)
    pub fn without_move() -> Self {
        let remote = Self::new();
        remote.state.lock().unwrap().supports_move = false;
        remote
    }

    pub fn put(&self, path: &str, content: Vec<u8>) {
        self.state.lock().unwrap().files.insert(path.to_string(), content);
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state.lock().unwrap().files.contains_key(path)
    }

    pub fn fail_connect(&self, error: ConnectError) {
        self.state.lock().unwrap().connect_error = Some(error);
    }

    pub fn fail_listing(&self) {
        self.state.lock().unwrap().list_error = true;
    }

    pub fn break_download(&self, path: &str) {
        self.state.lock().unwrap().broken_downloads.insert(path.to_string());
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    pub fn downloads(&self) -> Vec<String> {
        self.state.lock().unwrap().downloads.clone()
    }
}

impl Connector for FakeRemote {
    fn connect(&self, _profile: &ConnectionProfile) -> Result<Box<dyn RemoteSession>, ConnectError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.connect_error.clone() {
            return Err(error);
        }
        state.connects += 1;
        Ok(Box::new(FakeSession {
            state: self.state.clone(),
        }))
    }
}

struct FakeSession {
    state: Arc<Mutex<RemoteState>>,
}

fn split(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("", path),
    }
}

impl RemoteSession for FakeSession {
    fn list(&mut self, dir: &str) -> Result<Vec<String>, TransferError> {
        let state = self.state.lock().unwrap();
        if state.list_error {
            return Err(TransferError::Permission(format!("cannot open {}", dir)));
        }
        let wanted = if dir.len() > 1 { dir.trim_end_matches('/') } else { dir };
        Ok(state
            .files
            .keys()
            .map(|path| split(path))
            .filter(|(parent, _)| *parent == wanted)
            .map(|(_, name)| name.to_string())
            .collect())
    }

    fn download(&mut self, path: &str, sink: &mut dyn Write) -> Result<u64, TransferError> {
        let mut state = self.state.lock().unwrap();
        if state.broken_downloads.contains(path) {
            return Err(TransferError::Network("connection reset during RETR".to_string()));
        }
        let content = state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| TransferError::Permission(format!("550 {}: no such file", path)))?;
        state.downloads.push(path.to_string());
        sink.write_all(&content)?;
        Ok(content.len() as u64)
    }

    fn move_file(&mut self, path: &str, dest_dir: &str) -> MoveOutcome {
        let mut state = self.state.lock().unwrap();
        if !state.supports_move {
            return MoveOutcome::Unsupported;
        }
        let Some(content) = state.files.remove(path) else {
            return MoveOutcome::Failed(format!("{} vanished", path));
        };
        let target = remote_path(dest_dir, split(path).1);
        state.files.insert(target.clone(), content);
        MoveOutcome::Moved(target)
    }

    fn size(&mut self, path: &str) -> u64 {
        let state = self.state.lock().unwrap();
        state.files.get(path).map_or(0, |c| c.len() as u64)
    }

    fn close(&mut self) -> bool {
        self.state.lock().unwrap().closes += 1;
        true
    }
}

/// Workbook with the given sheets; each sheet is a list of rows, the first
/// being the header. Empty strings leave the cell blank and cells that parse
/// as numbers are written as numbers.
pub fn xlsx(sheets: &[(&str, &[&[&str]])]) -> Vec<u8> {
    let mut workbook = Workbook::new();
    for (name, rows) in sheets {
        let sheet = workbook.add_worksheet();
        sheet.set_name(*name).unwrap();
        for (r, row) in rows.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                if cell.is_empty() {
                    continue;
                }
                let (r, c) = (r as u32, c as u16);
                match cell.parse::<f64>() {
                    Ok(number) if r > 0 => {
                        sheet.write_number(r, c, number).unwrap();
                    },
                    _ => {
                        sheet.write_string(r, c, *cell).unwrap();
                    },
                }
            }
        }
    }
    workbook.save_to_buffer().unwrap()
}

/// Directory with one customer (RUT 11.111.111-1) and product A1
pub fn directory() -> (MemoryDirectory, Partner) {
    let partner = Partner::new("Comercial Uno SpA", Some("11.111.111-1"));
    let directory = MemoryDirectory::new(DirectorySnapshot {
        partners: vec![partner.clone()],
        products: vec![Product::new("A1", "Router AX"), Product::new("B2", "Cable UTP")],
        ..DirectorySnapshot::default()
    });
    (directory, partner)
}

/// Orchestrator over memory collaborators and a [`FakeRemote`]
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub directory: Arc<MemoryDirectory>,
    pub partner: Partner,
    pub remote: FakeRemote,
    pub orchestrator: IngestOrchestrator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_remote(FakeRemote::new(), OrchestratorSettings::default())
    }

    pub fn with_remote(remote: FakeRemote, settings: OrchestratorSettings) -> Self {
        let store = Arc::new(MemoryStore::new());
        let (directory, partner) = directory();
        let directory = Arc::new(directory);
        let orchestrator = IngestOrchestrator::new(
            store.clone(),
            Arc::new(remote.clone()),
            directory.clone(),
            settings,
        );
        Self {
            store,
            directory,
            partner,
            remote,
            orchestrator,
        }
    }

    /// Store a profile reading `/in` and archiving into `/out`
    pub fn add_profile(&self, name: &str, protocol: Protocol) -> ConnectionProfile {
        let mut profile = ConnectionProfile::new(name, protocol, "files.example.cl", "ingest", "secret");
        profile.download_path = "/in".to_string();
        profile.processed_path = "/out".to_string();
        self.store.save_profile(profile.clone()).unwrap();
        self.store.profile_by_name(name).unwrap()
    }
}
