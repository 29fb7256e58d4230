//! FTP and explicit-TLS FTP sessions
//!
//! Sessions run in passive mode with binary transfers. FTPS upgrades the
//! control connection with `AUTH TLS` right after the greeting, before any
//! credentials are sent.

use std::io::Write;
use std::time::Duration;

use suppaftp::types::FileType;
use suppaftp::{FtpError, Mode, NativeTlsConnector, NativeTlsFtpStream};
use tracing::{debug, warn};

use super::{base_name, remote_path, resolve, MoveOutcome, RemoteSession};
use crate::error::{ConnectError, TransferError};
use crate::models::ConnectionProfile;

/// Reply codes the transport gives a meaning to
const NOT_LOGGED_IN: u32 = 530;
const NEED_ACCOUNT: u32 = 532;
const FILE_UNAVAILABLE: u32 = 550;
const FILE_BUSY: u32 = 450;
const NAME_NOT_ALLOWED: u32 = 553;

pub struct FtpSession {
    stream: Option<NativeTlsFtpStream>,
    host: String,
}

impl FtpSession {
    pub fn connect(profile: &ConnectionProfile, secure: bool, timeout: Duration) -> Result<Self, ConnectError> {
        let mut stream = open_stream(&profile.host, profile.port, timeout)?;

        // connect_timeout only bounds the handshake; keep reads bounded too
        if let Err(e) = stream.get_ref().set_read_timeout(Some(timeout)) {
            debug!(error = %e, "could not set FTP read timeout");
        }

        if secure {
            debug!(host = %profile.host, "upgrading control channel to TLS");
            let connector = match native_tls::TlsConnector::new() {
                Ok(connector) => connector,
                Err(e) => {
                    quit_quietly(&mut stream);
                    return Err(ConnectError::Protocol(format!("TLS setup failed: {}", e)));
                },
            };
            // into_secure consumes the stream; on failure there is nothing left to close
            stream = stream
                .into_secure(NativeTlsConnector::from(connector), &profile.host)
                .map_err(|e| connect_error(&e))?;
        }

        stream.set_mode(Mode::Passive);

        debug!(user = %profile.username, "logging in");
        if let Err(e) = stream.login(profile.username.as_str(), profile.password.as_str()) {
            quit_quietly(&mut stream);
            return Err(connect_error(&e));
        }

        if let Err(e) = stream.transfer_type(FileType::Binary) {
            quit_quietly(&mut stream);
            return Err(connect_error(&e));
        }

        Ok(Self {
            stream: Some(stream),
            host: profile.host.clone(),
        })
    }

    fn stream(&mut self) -> Result<&mut NativeTlsFtpStream, TransferError> {
        self.stream
            .as_mut()
            .ok_or_else(|| TransferError::Network("session already closed".to_string()))
    }
}

fn open_stream(host: &str, port: u16, timeout: Duration) -> Result<NativeTlsFtpStream, ConnectError> {
    let mut last = None;
    for addr in resolve(host, port)? {
        match NativeTlsFtpStream::connect_timeout(addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last = Some(e),
        }
    }
    Err(match last {
        Some(e) => connect_error(&e),
        None => ConnectError::NetworkUnreachable(format!("{}:{}: no address", host, port)),
    })
}

fn quit_quietly(stream: &mut NativeTlsFtpStream) {
    if let Err(e) = stream.quit() {
        debug!(error = %e, "quit after failed connect");
    }
}

impl RemoteSession for FtpSession {
    fn list(&mut self, dir: &str) -> Result<Vec<String>, TransferError> {
        let stream = self.stream()?;
        match stream.nlst(Some(dir)) {
            Ok(entries) => Ok(entries
                .iter()
                .map(|entry| base_name(entry.trim()).to_string())
                .filter(|name| !name.is_empty() && name != "." && name != "..")
                .collect()),
            // Several servers answer NLST on an empty directory with 450/550
            Err(FtpError::UnexpectedResponse(ref response))
                if matches!(response.status.code(), FILE_BUSY | FILE_UNAVAILABLE) =>
            {
                debug!(dir, code = response.status.code(), "empty listing");
                Ok(Vec::new())
            },
            Err(e) => Err(transfer_error(&e)),
        }
    }

    fn download(&mut self, path: &str, sink: &mut dyn Write) -> Result<u64, TransferError> {
        let stream = self.stream()?;
        let bytes = stream
            .retr(path, |reader| std::io::copy(reader, &mut *sink).map_err(FtpError::ConnectionError))
            .map_err(|e| transfer_error(&e))?;
        debug!(path, bytes, "downloaded");
        Ok(bytes)
    }

    fn move_file(&mut self, path: &str, dest_dir: &str) -> MoveOutcome {
        let stream = match self.stream() {
            Ok(stream) => stream,
            Err(e) => return MoveOutcome::Failed(e.to_string()),
        };

        // Usually fails because the directory exists already
        if let Err(e) = stream.mkdir(dest_dir) {
            debug!(dir = dest_dir, error = %e, "mkdir failed, assuming it exists");
        }

        let target = remote_path(dest_dir, base_name(path));
        match stream.rename(path, target.as_str()) {
            Ok(()) => MoveOutcome::Moved(target),
            Err(e) => MoveOutcome::Failed(transfer_error(&e).to_string()),
        }
    }

    fn size(&mut self, path: &str) -> u64 {
        let Ok(stream) = self.stream() else {
            return 0;
        };
        match stream.size(path) {
            Ok(size) => size as u64,
            Err(e) => {
                debug!(path, error = %e, "SIZE not available");
                0
            },
        }
    }

    fn close(&mut self) -> bool {
        let Some(mut stream) = self.stream.take() else {
            return true;
        };
        match stream.quit() {
            Ok(()) => true,
            Err(e) => {
                warn!(host = %self.host, "Failed to quit FTP session gracefully: {}", e);
                false
            },
        }
    }
}

impl Drop for FtpSession {
    fn drop(&mut self) {
        if self.stream.is_some() {
            self.close();
        }
    }
}

/// What an FTP failure means for the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Authentication,
    Network,
    Permission,
    Protocol,
}

fn classify(err: &FtpError) -> Failure {
    match err {
        FtpError::ConnectionError(_) => Failure::Network,
        FtpError::InvalidAddress(_) => Failure::Network,
        FtpError::UnexpectedResponse(response) => classify_code(response.status.code()),
        _ => Failure::Protocol,
    }
}

fn classify_code(code: u32) -> Failure {
    match code {
        NOT_LOGGED_IN | NEED_ACCOUNT => Failure::Authentication,
        FILE_UNAVAILABLE | NAME_NOT_ALLOWED => Failure::Permission,
        _ => Failure::Protocol,
    }
}

fn describe(err: &FtpError) -> String {
    match err {
        FtpError::UnexpectedResponse(response) => format!(
            "{} {}",
            response.status.code(),
            String::from_utf8_lossy(&response.body).trim()
        ),
        other => other.to_string(),
    }
}

fn connect_error(err: &FtpError) -> ConnectError {
    let message = describe(err);
    match classify(err) {
        Failure::Authentication => ConnectError::Authentication(message),
        Failure::Network => ConnectError::NetworkUnreachable(message),
        Failure::Permission => ConnectError::Permission(message),
        Failure::Protocol => ConnectError::Protocol(message),
    }
}

fn transfer_error(err: &FtpError) -> TransferError {
    let message = describe(err);
    match classify(err) {
        Failure::Network => TransferError::Network(message),
        Failure::Permission => TransferError::Permission(message),
        Failure::Protocol => TransferError::Protocol(message),
        // Session lost its login mid-transfer
        Failure::Authentication => TransferError::Unknown(message),
    }
}
