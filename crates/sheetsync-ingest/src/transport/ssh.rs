//! SSH-based sessions: SFTP and exec-driven SCP
//!
//! Both variants authenticate with username and password. SCP servers are
//! only assumed to run a POSIX shell, so listing and sizing go through
//! remote commands; downloads open an SFTP channel on demand.

use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::time::Duration;

use ssh2::{ErrorCode, Session, Sftp};
use tracing::{debug, warn};

use super::{base_name, remote_path, tcp_connect, MoveOutcome, RemoteSession};
use crate::error::{ConnectError, TransferError};
use crate::models::ConnectionProfile;

// libssh2 session error codes
const LIBSSH2_ERROR_SOCKET_SEND: i32 = -7;
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
const LIBSSH2_ERROR_SOCKET_DISCONNECT: i32 = -13;
const LIBSSH2_ERROR_AUTHENTICATION_FAILED: i32 = -18;
const LIBSSH2_ERROR_SOCKET_RECV: i32 = -43;

// SFTP status codes
const SSH_FX_NO_SUCH_FILE: i32 = 2;
const SSH_FX_PERMISSION_DENIED: i32 = 3;

/// Authenticated SSH session shared by both variants
struct SshConnection {
    session: Session,
    host: String,
    closed: bool,
}

impl SshConnection {
    fn open(profile: &ConnectionProfile, timeout: Duration) -> Result<Self, ConnectError> {
        let tcp = tcp_connect(&profile.host, profile.port, timeout)?;

        let mut session = Session::new().map_err(|e| ConnectError::Unknown(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));

        let mut conn = Self {
            session,
            host: profile.host.clone(),
            closed: false,
        };

        if let Err(e) = conn.session.handshake() {
            conn.close();
            return Err(connect_error(&e));
        }

        debug!(user = %profile.username, "authenticating");
        if let Err(e) = conn
            .session
            .userauth_password(&profile.username, &profile.password)
        {
            conn.close();
            return Err(connect_error(&e));
        }
        if !conn.session.authenticated() {
            conn.close();
            return Err(ConnectError::Authentication(format!(
                "server rejected credentials for {}",
                profile.username
            )));
        }

        // The bound applies to connect and login only
        conn.session.set_timeout(0);
        Ok(conn)
    }

    fn sftp(&self) -> Result<Sftp, TransferError> {
        self.session.sftp().map_err(|e| transfer_error(&e))
    }

    /// Run a remote command, returning stdout; non-zero exit is an error
    fn exec(&self, command: &str) -> Result<String, TransferError> {
        let mut channel = self.session.channel_session().map_err(|e| transfer_error(&e))?;
        channel.exec(command).map_err(|e| transfer_error(&e))?;

        // Both streams share one flow-control window; drain them together
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        self.session.set_blocking(false);
        let drained = drain_streams(
            &mut channel.stream(0),
            &mut channel.stderr(),
            &mut stdout,
            &mut stderr,
            || channel.eof(),
        );
        self.session.set_blocking(true);
        drained?;

        channel.wait_close().map_err(|e| transfer_error(&e))?;
        let status = channel.exit_status().map_err(|e| transfer_error(&e))?;
        if status != 0 {
            return Err(classify_exec_failure(status, String::from_utf8_lossy(&stderr).trim()));
        }
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    fn close(&mut self) -> bool {
        if self.closed {
            return true;
        }
        self.closed = true;
        match self.session.disconnect(None, "closing", None) {
            Ok(()) => true,
            Err(e) => {
                warn!(host = %self.host, "Failed to close SSH session gracefully: {}", e);
                false
            },
        }
    }
}

impl Drop for SshConnection {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_file(sftp: &Sftp, path: &str, sink: &mut dyn Write) -> Result<u64, TransferError> {
    let mut file = sftp.open(Path::new(path)).map_err(|e| transfer_error(&e))?;
    let bytes = std::io::copy(&mut file, sink)?;
    debug!(path, bytes, "downloaded");
    Ok(bytes)
}

/// SFTP session with one long-lived file-transfer channel
pub struct SftpSession {
    // Declared first so the channel is released before the session
    sftp: Option<Sftp>,
    conn: SshConnection,
}

impl SftpSession {
    pub fn connect(profile: &ConnectionProfile, timeout: Duration) -> Result<Self, ConnectError> {
        let mut conn = SshConnection::open(profile, timeout)?;
        let sftp = match conn.session.sftp() {
            Ok(sftp) => sftp,
            Err(e) => {
                conn.close();
                return Err(connect_error(&e));
            },
        };
        Ok(Self { sftp: Some(sftp), conn })
    }

    fn sftp(&self) -> Result<&Sftp, TransferError> {
        self.sftp
            .as_ref()
            .ok_or_else(|| TransferError::Network("session already closed".to_string()))
    }
}

impl RemoteSession for SftpSession {
    fn list(&mut self, dir: &str) -> Result<Vec<String>, TransferError> {
        let entries = self.sftp()?.readdir(Path::new(dir)).map_err(|e| transfer_error(&e))?;
        Ok(entries
            .into_iter()
            .filter(|(_, stat)| !stat.is_dir())
            .filter_map(|(path, _)| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect())
    }

    fn download(&mut self, path: &str, sink: &mut dyn Write) -> Result<u64, TransferError> {
        read_file(self.sftp()?, path, sink)
    }

    fn move_file(&mut self, path: &str, dest_dir: &str) -> MoveOutcome {
        let sftp = match self.sftp() {
            Ok(sftp) => sftp,
            Err(e) => return MoveOutcome::Failed(e.to_string()),
        };

        if let Err(e) = sftp.mkdir(Path::new(dest_dir), 0o755) {
            debug!(dir = dest_dir, error = %e, "mkdir failed, assuming it exists");
        }

        let target = remote_path(dest_dir, base_name(path));
        match sftp.rename(Path::new(path), Path::new(&target), None) {
            Ok(()) => MoveOutcome::Moved(target),
            Err(e) => MoveOutcome::Failed(transfer_error(&e).to_string()),
        }
    }

    fn size(&mut self, path: &str) -> u64 {
        let Ok(sftp) = self.sftp() else {
            return 0;
        };
        match sftp.stat(Path::new(path)) {
            Ok(stat) => stat.size.unwrap_or(0),
            Err(e) => {
                debug!(path, error = %e, "stat failed");
                0
            },
        }
    }

    fn close(&mut self) -> bool {
        self.sftp.take();
        self.conn.close()
    }
}

/// SCP server driven by remote shell commands
pub struct ScpSession {
    conn: SshConnection,
}

impl ScpSession {
    pub fn connect(profile: &ConnectionProfile, timeout: Duration) -> Result<Self, ConnectError> {
        let mut conn = SshConnection::open(profile, timeout)?;
        // Confirms the account may run commands at all
        match conn.exec("pwd") {
            Ok(home) => debug!(home = %home.trim(), "remote shell ready"),
            Err(e) => {
                conn.close();
                return Err(ConnectError::Protocol(format!("remote shell unavailable: {}", e)));
            },
        }
        Ok(Self { conn })
    }
}

impl RemoteSession for ScpSession {
    fn list(&mut self, dir: &str) -> Result<Vec<String>, TransferError> {
        let output = self.conn.exec(&format!("ls -1p {}", shell_quote(dir)))?;
        Ok(parse_listing(&output))
    }

    fn download(&mut self, path: &str, sink: &mut dyn Write) -> Result<u64, TransferError> {
        let sftp = self.conn.sftp()?;
        read_file(&sftp, path, sink)
    }

    fn move_file(&mut self, path: &str, _dest_dir: &str) -> MoveOutcome {
        debug!(path, "move not supported over SCP");
        MoveOutcome::Unsupported
    }

    fn size(&mut self, path: &str) -> u64 {
        match self.conn.exec(&format!("stat -c %s {}", shell_quote(path))) {
            Ok(output) => output.trim().parse().unwrap_or(0),
            Err(e) => {
                debug!(path, error = %e, "remote stat failed");
                0
            },
        }
    }

    fn close(&mut self) -> bool {
        self.conn.close()
    }
}

/// Plain files from `ls -1p` output; directories carry a trailing `/`
fn parse_listing(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.ends_with('/'))
        .map(str::to_string)
        .collect()
}

/// Single-quote a path for a POSIX shell
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Read from both non-blocking streams in turn until `finished` reports end
/// of input and neither stream has data left
fn drain_streams(
    stdout: &mut impl Read,
    stderr: &mut impl Read,
    out: &mut Vec<u8>,
    err: &mut Vec<u8>,
    finished: impl Fn() -> bool,
) -> std::io::Result<()> {
    let mut buf = [0u8; 8192];
    loop {
        let mut progressed = false;
        let streams: [(&mut dyn Read, &mut Vec<u8>); 2] = [(&mut *stdout, &mut *out), (&mut *stderr, &mut *err)];
        for (stream, sink) in streams {
            match stream.read(&mut buf) {
                Ok(0) => {},
                Ok(n) => {
                    sink.extend_from_slice(&buf[..n]);
                    progressed = true;
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => {},
                Err(e) => return Err(e),
            }
        }
        if !progressed {
            if finished() {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

fn classify_exec_failure(status: i32, stderr: &str) -> TransferError {
    let message = format!("exit status {}: {}", status, stderr);
    if stderr.contains("Permission denied") {
        TransferError::Permission(message)
    } else {
        TransferError::Unknown(message)
    }
}

fn connect_error(err: &ssh2::Error) -> ConnectError {
    let message = err.message().to_string();
    match err.code() {
        ErrorCode::Session(LIBSSH2_ERROR_AUTHENTICATION_FAILED) => ConnectError::Authentication(message),
        ErrorCode::Session(
            LIBSSH2_ERROR_SOCKET_SEND
            | LIBSSH2_ERROR_TIMEOUT
            | LIBSSH2_ERROR_SOCKET_DISCONNECT
            | LIBSSH2_ERROR_SOCKET_RECV,
        ) => ConnectError::NetworkUnreachable(message),
        ErrorCode::SFTP(SSH_FX_PERMISSION_DENIED) => ConnectError::Permission(message),
        ErrorCode::Session(code) => ConnectError::Protocol(format!("{} ({})", message, code)),
        ErrorCode::SFTP(code) => ConnectError::Unknown(format!("{} (sftp {})", message, code)),
    }
}

fn transfer_error(err: &ssh2::Error) -> TransferError {
    let message = err.message().to_string();
    match err.code() {
        ErrorCode::SFTP(SSH_FX_PERMISSION_DENIED) => TransferError::Permission(message),
        ErrorCode::SFTP(SSH_FX_NO_SUCH_FILE) => TransferError::Unknown(format!("no such file: {}", message)),
        ErrorCode::Session(
            LIBSSH2_ERROR_SOCKET_SEND
            | LIBSSH2_ERROR_TIMEOUT
            | LIBSSH2_ERROR_SOCKET_DISCONNECT
            | LIBSSH2_ERROR_SOCKET_RECV,
        ) => TransferError::Network(message),
        ErrorCode::Session(_) => TransferError::Protocol(message),
        ErrorCode::SFTP(code) => TransferError::Unknown(format!("{} (sftp {})", message, code)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::Protocol;

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("/in"), "'/in'");
        assert_eq!(shell_quote("/in/o'brien files"), r"'/in/o'\''brien files'");
    }

    /// Replays a fixed sequence of reads, then reports end of stream
    struct Scripted(std::collections::VecDeque<std::io::Result<Vec<u8>>>);

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.0.pop_front() {
                Some(Ok(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                },
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }
    }

    fn would_block() -> std::io::Result<Vec<u8>> {
        Err(std::io::Error::from(ErrorKind::WouldBlock))
    }

    #[test]
    fn test_streams_are_drained_in_turn() {
        // stderr has data queued before stdout produces anything
        let mut stdout = Scripted(vec![would_block(), would_block(), Ok(b"orders.xlsx\n".to_vec())].into());
        let mut stderr = Scripted(
            vec![Ok(b"warning: ".to_vec()), Ok(b"slow disk\n".to_vec()), would_block()].into(),
        );
        let (mut out, mut err) = (Vec::new(), Vec::new());
        let polls = std::cell::Cell::new(0);

        drain_streams(&mut stdout, &mut stderr, &mut out, &mut err, || {
            polls.set(polls.get() + 1);
            true
        })
        .unwrap();

        assert_eq!(out, b"orders.xlsx\n");
        assert_eq!(err, b"warning: slow disk\n");
        assert_eq!(polls.get(), 1);
    }

    #[test]
    fn test_stream_failure_stops_draining() {
        let mut stdout = Scripted(vec![Err(std::io::Error::other("channel closed"))].into());
        let mut stderr = Scripted(Default::default());
        let (mut out, mut err) = (Vec::new(), Vec::new());

        let result = drain_streams(&mut stdout, &mut stderr, &mut out, &mut err, || true);
        assert_eq!(result.unwrap_err().to_string(), "channel closed");
    }

    #[test]
    fn test_listing_drops_directories_and_blank_lines() {
        let output = "orders.xlsx\narchive/\n\nstock.csv\n";
        assert_eq!(parse_listing(output), vec!["orders.xlsx", "stock.csv"]);
    }

    #[test]
    fn test_error_codes_are_classified() {
        let auth = ssh2::Error::new(ErrorCode::Session(LIBSSH2_ERROR_AUTHENTICATION_FAILED), "bad password");
        assert!(matches!(connect_error(&auth), ConnectError::Authentication(_)));

        let timeout = ssh2::Error::new(ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT), "timed out");
        assert!(matches!(connect_error(&timeout), ConnectError::NetworkUnreachable(_)));
        assert!(matches!(transfer_error(&timeout), TransferError::Network(_)));

        let denied = ssh2::Error::new(ErrorCode::SFTP(SSH_FX_PERMISSION_DENIED), "denied");
        assert!(matches!(transfer_error(&denied), TransferError::Permission(_)));
    }

    #[test]
    fn test_exec_failure_with_permission_message() {
        let err = classify_exec_failure(2, "ls: cannot open directory '/in': Permission denied");
        assert!(matches!(err, TransferError::Permission(_)));
        assert!(matches!(classify_exec_failure(1, "boom"), TransferError::Unknown(_)));
    }

    #[test]
    fn test_connect_to_closed_port_fails_as_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut profile = ConnectionProfile::new("closed", Protocol::Sftp, "127.0.0.1", "u", "p");
        profile.port = port;
        let err = SftpSession::connect(&profile, Duration::from_secs(2)).err().unwrap();
        assert!(matches!(err, ConnectError::NetworkUnreachable(_)));
    }
}
