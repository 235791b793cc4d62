//! SFTP (SSH File Transfer Protocol) client implementation
//!
//! Password authentication over ssh2, with optional host key verification
//! against an OpenSSH known_hosts file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use ssh2::{CheckResult, ErrorCode, KnownHostFileKind, Session, Sftp};

use crate::error::TransferError;
use crate::model::{FileServerData, Scheme};
use crate::protocols::{connect_any, FileTransferClient, SftpSettings};

// libssh2 session and SFTP status codes that no retry can fix
const LIBSSH2_ERROR_AUTHENTICATION_FAILED: i32 = -18;
const LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED: i32 = -19;
const LIBSSH2_FX_NO_SUCH_FILE: i32 = 2;
const LIBSSH2_FX_PERMISSION_DENIED: i32 = 3;
const LIBSSH2_FX_NO_SUCH_PATH: i32 = 10;

/// Maps an ssh2 error onto the transient/terminal split
pub(crate) fn classify(e: &ssh2::Error, context: &str) -> TransferError {
    let message = format!("[SFTP] {}: {}", context, e);
    match e.code() {
        ErrorCode::Session(LIBSSH2_ERROR_AUTHENTICATION_FAILED)
        | ErrorCode::Session(LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED)
        | ErrorCode::SFTP(LIBSSH2_FX_NO_SUCH_FILE)
        | ErrorCode::SFTP(LIBSSH2_FX_PERMISSION_DENIED)
        | ErrorCode::SFTP(LIBSSH2_FX_NO_SUCH_PATH) => TransferError::terminal(message),
        _ => TransferError::transient(message),
    }
}

/// libssh2 takes a `u32` of milliseconds; longer timeouts saturate
fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

/// SFTP client for one network element
pub struct SftpClient {
    host: String,
    port: u16,
    user: String,
    password: SecretString,
    settings: Arc<SftpSettings>,
    timeout: Duration,
    session: Option<(Session, Sftp)>,
}

impl SftpClient {
    /// Credentials from the location win over the configured defaults
    pub fn new(
        server: FileServerData,
        settings: Arc<SftpSettings>,
        timeout: Duration,
    ) -> Result<Self, TransferError> {
        let user = server
            .user
            .or_else(|| settings.default_user.clone())
            .ok_or_else(|| TransferError::terminal("[SFTP] no user in location or configuration"))?;
        let password = match server.password {
            Some(p) => p,
            None => settings
                .default_password
                .as_ref()
                .map(|p| SecretString::new(p.expose_secret().clone()))
                .ok_or_else(|| {
                    TransferError::terminal("[SFTP] no password in location or configuration")
                })?,
        };
        Ok(SftpClient {
            port: server.port.unwrap_or(Scheme::Sftp.default_port()),
            host: server.host,
            user,
            password,
            settings,
            timeout,
            session: None,
        })
    }

    fn verify_host_key(&self, session: &Session) -> Result<(), TransferError> {
        let Some(known_hosts_path) = &self.settings.known_hosts else {
            return Ok(());
        };
        let mut known_hosts = session
            .known_hosts()
            .map_err(|e| classify(&e, "cannot initialise known hosts"))?;
        known_hosts
            .read_file(known_hosts_path, KnownHostFileKind::OpenSSH)
            .map_err(|e| {
                TransferError::terminal(format!(
                    "[SFTP] cannot read {}: {}",
                    known_hosts_path.display(),
                    e
                ))
            })?;
        let (key, _) = session
            .host_key()
            .ok_or_else(|| TransferError::transient("[SFTP] server sent no host key"))?;

        match known_hosts.check_port(&self.host, self.port, key) {
            CheckResult::Match => Ok(()),
            CheckResult::Mismatch => Err(TransferError::terminal(format!(
                "[SFTP] host key for {} does not match known_hosts",
                self.host
            ))),
            CheckResult::NotFound if self.settings.strict_host_key_checking => {
                Err(TransferError::terminal(format!(
                    "[SFTP] host {} not in known_hosts and strict checking is on",
                    self.host
                )))
            }
            CheckResult::NotFound => Ok(()),
            CheckResult::Failure => Err(TransferError::transient(format!(
                "[SFTP] host key check failed for {}",
                self.host
            ))),
        }
    }
}

impl FileTransferClient for SftpClient {
    fn open(&mut self) -> Result<(), TransferError> {
        let timeout = self.timeout;
        let tcp = connect_any(&self.host, self.port, |addr| {
            let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
                TransferError::transient(format!("[SFTP] connect to {}: {}", addr, e))
            })?;
            stream.set_read_timeout(Some(timeout))?;
            stream.set_write_timeout(Some(timeout))?;
            Ok(stream)
        })?;

        let mut session = Session::new().map_err(|e| classify(&e, "cannot create SSH session"))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout_millis(timeout));
        session
            .handshake()
            .map_err(|e| classify(&e, "SSH handshake failed"))?;

        self.verify_host_key(&session)?;

        session
            .userauth_password(&self.user, self.password.expose_secret())
            .map_err(|e| classify(&e, &format!("authentication failed for user '{}'", self.user)))?;
        if !session.authenticated() {
            return Err(TransferError::terminal(format!(
                "[SFTP] authentication failed for user '{}'",
                self.user
            )));
        }

        let sftp = session
            .sftp()
            .map_err(|e| classify(&e, "cannot open SFTP channel"))?;
        self.session = Some((session, sftp));
        Ok(())
    }

    fn collect_file(&mut self, remote: &str, local: &Path) -> Result<(), TransferError> {
        let (_, sftp) = self
            .session
            .as_ref()
            .ok_or_else(|| TransferError::transient("[SFTP] client used before open"))?;

        let mut remote_file = sftp
            .open(Path::new(remote))
            .map_err(|e| classify(&e, &format!("cannot open '{}'", remote)))?;
        let local_file = File::create(local).map_err(|e| {
            TransferError::transient(format!("cannot create {}: {}", local.display(), e))
        })?;
        let mut writer = BufWriter::new(local_file);
        std::io::copy(&mut remote_file, &mut writer).map_err(|e| {
            TransferError::transient(format!("[SFTP] transfer of '{}' broke: {}", remote, e))
        })?;
        writer.flush()?;
        Ok(())
    }

    fn close(&mut self) {
        if let Some((session, sftp)) = self.session.take() {
            drop(sftp);
            let _ = session.disconnect(None, "done", None);
        }
    }
}
