//! File transfer clients
//!
//! One object-safe trait, one implementation per supported scheme. The
//! collector never sees protocol details: it asks the factory for a client
//! matching the file location, then drives open / collect_file / close.

pub mod ftpes;
pub mod sftp;

pub use ftpes::FtpesClient;
pub use sftp::SftpClient;

use crate::config::{FtpesConfig, SftpConfig};
use crate::error::{ConfigError, TransferError};
use crate::model::{FileServerData, Scheme};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Capability of fetching files from one remote server
///
/// Implementations classify every failure as transient or terminal through
/// `TransferError::kind`; callers never inspect protocol error codes.
pub trait FileTransferClient: Send {
    /// Connect and authenticate
    fn open(&mut self) -> Result<(), TransferError>;

    /// Copy `remote` into the local file `local`, creating or truncating it
    fn collect_file(&mut self, remote: &str, local: &Path) -> Result<(), TransferError>;

    /// Disconnect; safe to call on a client that never opened
    fn close(&mut self);
}

/// Creates a client for a scheme and server
pub trait TransferClientFactory: Send + Sync {
    fn create(
        &self,
        scheme: Scheme,
        server: FileServerData,
    ) -> Result<Box<dyn FileTransferClient>, TransferError>;
}

/// SSH settings shared by every SFTP client
#[derive(Debug)]
pub struct SftpSettings {
    pub known_hosts: Option<PathBuf>,
    pub strict_host_key_checking: bool,
    pub default_user: Option<String>,
    pub default_password: Option<SecretString>,
}

impl From<&SftpConfig> for SftpSettings {
    fn from(cfg: &SftpConfig) -> Self {
        SftpSettings {
            known_hosts: cfg.known_hosts.clone(),
            strict_host_key_checking: cfg.strict_host_key_checking,
            default_user: cfg.default_user.clone(),
            default_password: cfg
                .default_password
                .as_ref()
                .map(|p| SecretString::new(p.expose_secret().clone())),
        }
    }
}

/// Production factory producing real FTPES and SFTP clients
pub struct ProtocolClientFactory {
    tls: Arc<rustls::ClientConfig>,
    sftp: Arc<SftpSettings>,
    timeout: Duration,
}

impl ProtocolClientFactory {
    /// Loads TLS material once; every FTPES connection shares it
    pub fn new(
        ftpes: &FtpesConfig,
        sftp: &SftpConfig,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        Ok(ProtocolClientFactory {
            tls: ftpes::build_tls_config(ftpes)?,
            sftp: Arc::new(SftpSettings::from(sftp)),
            timeout,
        })
    }
}

impl TransferClientFactory for ProtocolClientFactory {
    fn create(
        &self,
        scheme: Scheme,
        server: FileServerData,
    ) -> Result<Box<dyn FileTransferClient>, TransferError> {
        match scheme {
            Scheme::Ftpes => Ok(Box::new(FtpesClient::new(
                server,
                Arc::clone(&self.tls),
                self.timeout,
            )?)),
            Scheme::Sftp => Ok(Box::new(SftpClient::new(
                server,
                Arc::clone(&self.sftp),
                self.timeout,
            )?)),
        }
    }
}

/// Resolves `host:port` and connects to the first address that answers
pub(crate) fn connect_any<T, F>(host: &str, port: u16, mut connect: F) -> Result<T, TransferError>
where
    F: FnMut(std::net::SocketAddr) -> Result<T, TransferError>,
{
    use std::net::ToSocketAddrs;

    let addrs: Vec<std::net::SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| TransferError::transient(format!("cannot resolve {}: {}", host, e)))?
        .collect();

    let mut last_error = None;
    for addr in addrs {
        match connect(addr) {
            Ok(conn) => return Ok(conn),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => last_error = Some(e),
        }
    }

    Err(last_error
        .unwrap_or_else(|| TransferError::transient(format!("no addresses found for {}", host))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    #[test]
    fn test_connect_any_stops_on_terminal() {
        let mut calls = 0;
        let result: Result<(), _> = connect_any("127.0.0.1", 21, |_| {
            calls += 1;
            Err(TransferError::terminal("login refused"))
        });
        assert_eq!(result.unwrap_err().kind, FailureKind::Terminal);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_connect_any_returns_first_success() {
        let result = connect_any("127.0.0.1", 22, |addr| Ok(addr.port()));
        assert_eq!(result.unwrap(), 22);
    }
}
