//! SheetSync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling, logging setup and checksum helpers for the SheetSync
//! workspace.
//!
//! - **Error Handling**: [`SheetSyncError`] for the local state and seed files
//! - **Logging**: tracing subscriber setup driven by [`logging::LogConfig`]
//! - **Checksums**: SHA-256 digests of downloaded file content
//!
//! # Example
//!
//! ```no_run
//! use sheetsync_common::checksum::sha256_hex;
//!
//! let digest = sha256_hex(b"orders_2024.xlsx contents");
//! assert_eq!(digest.len(), 64);
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

pub use error::{Result, SheetSyncError};
