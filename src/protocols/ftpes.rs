//! FTPES (FTP with explicit TLS) client implementation
//!
//! Connects in plain FTP, upgrades with AUTH TLS using rustls, presents the
//! collector's client certificate when one is configured, then retrieves
//! files in binary passive mode.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use secrecy::{ExposeSecret, SecretString};
use suppaftp::types::{FileType, Mode};
use suppaftp::{FtpError, RustlsConnector, RustlsFtpStream};

use crate::config::FtpesConfig;
use crate::error::{ConfigError, TransferError};
use crate::logging::{log_at, Level};
use crate::model::{FileServerData, Scheme};
use crate::protocols::{connect_any, FileTransferClient};

// Accepts any server certificate (self-signed lab servers)
mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::DigitallySignedStruct;

    #[derive(Debug)]
    pub struct NoCertificateVerification;

    impl ServerCertVerifier for NoCertificateVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
            rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}

fn pem_error(path: &Path, e: impl std::fmt::Display) -> ConfigError {
    ConfigError::Invalid(format!("cannot load PEM {}: {}", path.display(), e))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    CertificateDer::pem_file_iter(path)
        .map_err(|e| pem_error(path, e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| pem_error(path, e))
}

/// Builds the TLS client configuration shared by all FTPES connections
pub fn build_tls_config(cfg: &FtpesConfig) -> Result<Arc<rustls::ClientConfig>, ConfigError> {
    let provider = rustls::crypto::ring::default_provider();
    let builder = rustls::ClientConfig::builder_with_provider(Arc::new(provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| ConfigError::Invalid(format!("TLS setup failed: {}", e)))?;

    let builder = if cfg.insecure_skip_verify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(danger::NoCertificateVerification))
    } else {
        let mut root_store = rustls::RootCertStore::empty();
        match &cfg.trusted_ca {
            Some(ca) => {
                for cert in load_certs(ca)? {
                    root_store.add(cert).map_err(|e| pem_error(ca, e))?;
                }
            }
            None => {
                let native = rustls_native_certs::load_native_certs();
                for cert in native.certs {
                    root_store.add(cert).ok();
                }
                if !native.errors.is_empty() {
                    log_at(
                        Level::Warn,
                        &format!("failed to load some native certificates: {:?}", native.errors),
                    );
                }
            }
        }
        builder.with_root_certificates(root_store)
    };

    let config = match (&cfg.client_cert, &cfg.client_key) {
        (Some(cert), Some(key)) => {
            let chain = load_certs(cert)?;
            let key = PrivateKeyDer::from_pem_file(key).map_err(|e| pem_error(key, e))?;
            builder
                .with_client_auth_cert(chain, key)
                .map_err(|e| ConfigError::Invalid(format!("client certificate rejected: {}", e)))?
        }
        _ => builder.with_no_client_auth(),
    };

    Ok(Arc::new(config))
}

/// Maps a suppaftp error onto the transient/terminal split
///
/// 5xx replies are permanent negative completions in FTP (530 not logged in,
/// 550 file unavailable, 553 name not allowed, 502 not implemented).
pub(crate) fn classify(e: FtpError, context: &str) -> TransferError {
    let message = format!("{}: {}", context, e.to_string().replace('\n', " "));
    match e {
        FtpError::UnexpectedResponse(ref response) if response.status.code() >= 500 => {
            TransferError::terminal(message)
        }
        FtpError::UnexpectedResponse(_) | FtpError::ConnectionError(_) => {
            TransferError::transient(message)
        }
        // TLS rejection, unparsable replies, bad PASV address
        _ => TransferError::terminal(message),
    }
}

/// FTPES client for one network element
pub struct FtpesClient {
    host: String,
    port: u16,
    user: String,
    password: SecretString,
    tls: Arc<rustls::ClientConfig>,
    timeout: Duration,
    stream: Option<RustlsFtpStream>,
}

impl FtpesClient {
    pub fn new(
        server: FileServerData,
        tls: Arc<rustls::ClientConfig>,
        timeout: Duration,
    ) -> Result<Self, TransferError> {
        let user = server
            .user
            .ok_or_else(|| TransferError::terminal("FTPES location carries no user"))?;
        Ok(FtpesClient {
            port: server.port.unwrap_or(Scheme::Ftpes.default_port()),
            host: server.host,
            user,
            password: server
                .password
                .unwrap_or_else(|| SecretString::new(String::new())),
            tls,
            timeout,
            stream: None,
        })
    }

    fn stream(&mut self) -> Result<&mut RustlsFtpStream, TransferError> {
        self.stream
            .as_mut()
            .ok_or_else(|| TransferError::transient("FTPES client used before open"))
    }
}

impl FileTransferClient for FtpesClient {
    fn open(&mut self) -> Result<(), TransferError> {
        let host = self.host.clone();
        let timeout = self.timeout;
        let tls = Arc::clone(&self.tls);

        let mut stream = connect_any(&self.host, self.port, |addr| {
            let plain = RustlsFtpStream::connect_timeout(addr, timeout)
                .map_err(|e| classify(e, &format!("connect to {}", addr)))?;
            plain
                .into_secure(RustlsConnector::from(Arc::clone(&tls)), &host)
                .map_err(|e| classify(e, &format!("TLS upgrade with {}", host)))
        })?;

        stream
            .login(&self.user, self.password.expose_secret())
            .map_err(|e| classify(e, &format!("login as '{}' on {}", self.user, self.host)))?;
        stream
            .custom_command("PROT P", &[suppaftp::Status::CommandOk])
            .map_err(|e| classify(e, "PROT P"))?;
        stream.set_mode(Mode::Passive);
        stream.set_passive_nat_workaround(true);
        stream
            .transfer_type(FileType::Binary)
            .map_err(|e| classify(e, "set binary mode"))?;

        self.stream = Some(stream);
        Ok(())
    }

    fn collect_file(&mut self, remote: &str, local: &Path) -> Result<(), TransferError> {
        let mut file = File::create(local).map_err(|e| {
            TransferError::transient(format!("cannot create {}: {}", local.display(), e))
        })?;
        let stream = self.stream()?;
        stream
            .retr(remote, |reader| {
                let mut reader = BufReader::new(reader);
                std::io::copy(&mut reader, &mut file).map_err(FtpError::ConnectionError)
            })
            .map_err(|e| classify(e, &format!("RETR {}", remote)))?;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.quit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    #[test]
    fn test_ftpes_client_send() {
        fn assert_send<T: Send>() {}
        assert_send::<FtpesClient>();
    }

    #[test]
    fn test_connection_error_is_transient() {
        let e = FtpError::ConnectionError(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "timed out",
        ));
        assert_eq!(classify(e, "RETR a").kind, FailureKind::Transient);
    }

    #[test]
    fn test_tls_failure_is_terminal() {
        let e = FtpError::SecureError("bad certificate".to_string());
        let classified = classify(e, "TLS upgrade");
        assert_eq!(classified.kind, FailureKind::Terminal);
        assert!(classified.message.contains("bad certificate"));
    }

    #[test]
    fn test_missing_user_is_terminal() {
        let tls = build_tls_config(&FtpesConfig {
            insecure_skip_verify: true,
            ..Default::default()
        })
        .unwrap();
        let server = FileServerData {
            host: "ne.example".to_string(),
            port: None,
            user: None,
            password: None,
        };
        let err = FtpesClient::new(server, tls, Duration::from_secs(1))
            .err()
            .unwrap();
        assert_eq!(err.kind, FailureKind::Terminal);
    }
}
