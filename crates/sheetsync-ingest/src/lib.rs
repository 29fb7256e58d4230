//! SheetSync Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Pulls spreadsheet files from remote servers and turns their rows into
//! sales orders.
//!
//! # Pipeline
//!
//! - **Transport** ([`transport`]): FTP, FTPS, SFTP and SCP sessions behind one trait
//! - **Normalizer** ([`normalize`]): workbook and delimited files to ordered rows
//! - **Registry** ([`registry`]): file type descriptors and their column bindings
//! - **Mapping** ([`mapping`]): rows to orders through directory and catalog lookups
//! - **Orchestrator** ([`orchestrator`]): the ingestion cycle tying it together
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use sheetsync_ingest::directory::MemoryDirectory;
//! use sheetsync_ingest::orchestrator::{IngestOrchestrator, OrchestratorSettings};
//! use sheetsync_ingest::store::JsonStore;
//! use sheetsync_ingest::transport::NetworkConnector;
//!
//! fn main() -> anyhow::Result<()> {
//!     let orchestrator = IngestOrchestrator::new(
//!         Arc::new(JsonStore::open("./sheetsync-state.json")?),
//!         Arc::new(NetworkConnector::new(Duration::from_secs(30))),
//!         Arc::new(MemoryDirectory::default()),
//!         OrchestratorSettings::default(),
//!     );
//!     for report in orchestrator.run_cycle()? {
//!         println!("{}", report.summary());
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod directory;
pub mod error;
pub mod mapping;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod registry;
pub mod store;
pub mod transport;
pub mod workspace;

pub use error::{ConnectError, ConfigurationError, FileError, LookupError, ParseError, StoreError, TransferError};
pub use models::{ConnectionProfile, FileRecord, FileStatus, Protocol};
pub use orchestrator::{IngestOrchestrator, OrchestratorSettings, ProfileReport};
