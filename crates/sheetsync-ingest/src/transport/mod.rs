//! Remote file transport
//!
//! One [`RemoteSession`] per connection profile, opened by a [`Connector`].
//! Every protocol exposes the same operations:
//!
//! | Operation | FTP / FTPS | SFTP | SCP |
//! |---|---|---|---|
//! | list | `NLST` | `readdir` | `ls -1p` over exec |
//! | download | `RETR` (binary) | sftp read | sftp read, channel opened ad hoc |
//! | move | `MKD` + `RNFR/RNTO` | `mkdir` + `rename` | unsupported |
//! | size | `SIZE` | `stat` | `stat -c %s` over exec |
//!
//! `size`, `move_file` and `close` are best-effort: they report failure in
//! their return value and never abort the caller.

pub mod ftp;
pub mod ssh;

use std::io::Write;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::{ConnectError, TransferError};
use crate::models::{ConnectionProfile, Protocol};

/// Result of a best-effort move to the archive directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// File now lives at this remote path
    Moved(String),
    /// The protocol cannot move files; not an error
    Unsupported,
    Failed(String),
}

/// Open connection to one remote server
pub trait RemoteSession {
    /// File names (not paths) directly under `dir`
    fn list(&mut self, dir: &str) -> Result<Vec<String>, TransferError>;

    /// Stream the file at `path` into `sink`, returning the bytes written
    fn download(&mut self, path: &str, sink: &mut dyn Write) -> Result<u64, TransferError>;

    /// Move `path` into `dest_dir`, creating the directory when missing
    fn move_file(&mut self, path: &str, dest_dir: &str) -> MoveOutcome;

    /// Size in bytes, 0 when the server cannot tell
    fn size(&mut self, path: &str) -> u64;

    /// Close the session; secondary errors are logged and swallowed
    fn close(&mut self) -> bool;
}

/// Opens sessions for connection profiles
pub trait Connector: Send + Sync {
    /// Any partially opened session is closed before an error is returned
    fn connect(&self, profile: &ConnectionProfile) -> Result<Box<dyn RemoteSession>, ConnectError>;
}

/// Connector speaking the real network protocols
#[derive(Debug, Clone)]
pub struct NetworkConnector {
    pub connect_timeout: Duration,
}

impl NetworkConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for NetworkConnector {
    fn connect(&self, profile: &ConnectionProfile) -> Result<Box<dyn RemoteSession>, ConnectError> {
        let protocol = profile.effective_protocol();
        tracing::debug!(
            profile = %profile.name,
            host = %profile.host,
            port = profile.port,
            protocol = %protocol,
            "connecting"
        );
        match protocol {
            Protocol::Ftp | Protocol::Ftps => {
                let session = ftp::FtpSession::connect(profile, protocol == Protocol::Ftps, self.connect_timeout)?;
                Ok(Box::new(session))
            },
            Protocol::Sftp => Ok(Box::new(ssh::SftpSession::connect(profile, self.connect_timeout)?)),
            Protocol::Scp => Ok(Box::new(ssh::ScpSession::connect(profile, self.connect_timeout)?)),
        }
    }
}

/// Join a remote directory and file name with a single `/`
pub fn remote_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        return name.to_string();
    }
    format!("{}/{}", dir.trim_end_matches('/'), name.trim_start_matches('/'))
}

/// Last path segment of a listing entry
pub(crate) fn base_name(entry: &str) -> &str {
    entry.trim_end_matches('/').rsplit('/').next().unwrap_or(entry)
}

/// Resolve `host:port`, failing as unreachable when nothing resolves
pub(crate) fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, ConnectError> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| ConnectError::NetworkUnreachable(format!("cannot resolve {}: {}", host, e)))?
        .collect();
    if addrs.is_empty() {
        return Err(ConnectError::NetworkUnreachable(format!("{}:{}: no address", host, port)));
    }
    Ok(addrs)
}

/// Bounded TCP connect trying every resolved address in turn
pub(crate) fn tcp_connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, ConnectError> {
    let mut last = None;
    for addr in resolve(host, port)? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last = Some(e),
        }
    }
    Err(ConnectError::NetworkUnreachable(match last {
        Some(e) => format!("{}:{}: {}", host, port, e),
        None => format!("{}:{}: no address", host, port),
    }))
}
