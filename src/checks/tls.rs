//! TLS certificate check
//!
//! Opens a TLS connection to the mirror and lets the verifier do the work:
//! hostname verification against the presented chain, path building through
//! the peer-supplied intermediates to the configured trust roots, and
//! validity-period checks on every certificate in the chain. Failures are
//! mapped to distinct reasons so `mirror.reason` says what actually broke.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{CertificateError, ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

use super::{Check, CheckError, PROBE_TIMEOUT};
use crate::error::{Error, Result};
use crate::mirrors::Mirror;

/// TLS validity probe against `host:443` (or the port in `host`)
pub struct TlsCheck {
    connector: TlsConnector,
}

impl TlsCheck {
    /// Build the verifier from the webpki root set, extended with an
    /// optional PEM bundle of additional trust roots.
    pub fn new(ca_bundle: Option<&Path>) -> Result<Self> {
        let mut roots =
            RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        if let Some(path) = ca_bundle {
            let file = std::fs::File::open(path)?;
            let mut reader = BufReader::new(file);

            let mut added = 0;
            for cert in rustls_pemfile::certs(&mut reader) {
                let cert = cert?;
                roots
                    .add(cert)
                    .map_err(|e| Error::config(format!("invalid CA bundle certificate: {e}")))?;
                added += 1;
            }

            tracing::info!(path = %path.display(), certs = added, "Loaded extra trust roots");
        }

        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
        })
    }
}

#[async_trait]
impl Check for TlsCheck {
    async fn check(&self, mirror: &Mirror) -> std::result::Result<(), CheckError> {
        let (host, port) = split_host_port(&mirror.host);

        let server_name = ServerName::try_from(host.clone())
            .map_err(|_| CheckError::InvalidTarget(mirror.host.clone()))?;

        let stream = timeout(PROBE_TIMEOUT, TcpStream::connect((host.as_str(), port)))
            .await
            .map_err(|_| CheckError::Timeout)??;

        match timeout(PROBE_TIMEOUT, self.connector.connect(server_name, stream)).await {
            Err(_) => Err(CheckError::Timeout),
            Ok(Err(e)) => Err(classify_tls_error(e, &host)),
            Ok(Ok(_)) => {
                // A verified handshake proves https works, whatever the
                // configuration claimed
                mirror.add_protocol("https");
                Ok(())
            }
        }
    }

    fn name(&self) -> &'static str {
        "tls"
    }
}

/// Split an optional `:port` suffix off a configured host, defaulting to 443
fn split_host_port(host: &str) -> (String, u16) {
    match host.rsplit_once(':') {
        Some((name, port)) => match port.parse() {
            Ok(port) => (name.to_string(), port),
            Err(_) => (host.to_string(), 443),
        },
        None => (host.to_string(), 443),
    }
}

/// Map a handshake failure onto the check error taxonomy
fn classify_tls_error(error: std::io::Error, host: &str) -> CheckError {
    if let Some(inner) = error.get_ref() {
        if let Some(tls_error) = inner.downcast_ref::<rustls::Error>() {
            if let rustls::Error::InvalidCertificate(cert_error) = tls_error {
                return match cert_error {
                    CertificateError::Expired => CheckError::CertificateExpired,
                    CertificateError::NotValidYet => CheckError::CertificateNotYetValid,
                    CertificateError::UnknownIssuer => CheckError::UnknownAuthority,
                    CertificateError::NotValidForName => {
                        CheckError::HostnameMismatch(host.to_string())
                    }
                    other => CheckError::Tls(format!("{other:?}")),
                };
            }

            return CheckError::Tls(tls_error.to_string());
        }
    }

    CheckError::Io(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn wrap(error: rustls::Error) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, error)
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("mirror.example.com"),
            ("mirror.example.com".to_string(), 443)
        );
        assert_eq!(
            split_host_port("mirror.example.com:8443"),
            ("mirror.example.com".to_string(), 8443)
        );
    }

    #[test]
    fn test_classify_expired_certificate() {
        let err = classify_tls_error(
            wrap(rustls::Error::InvalidCertificate(CertificateError::Expired)),
            "m.example.com",
        );
        assert!(matches!(err, CheckError::CertificateExpired));
    }

    #[test]
    fn test_classify_not_yet_valid_certificate() {
        let err = classify_tls_error(
            wrap(rustls::Error::InvalidCertificate(
                CertificateError::NotValidYet,
            )),
            "m.example.com",
        );
        assert!(matches!(err, CheckError::CertificateNotYetValid));
    }

    #[test]
    fn test_classify_unknown_authority() {
        let err = classify_tls_error(
            wrap(rustls::Error::InvalidCertificate(
                CertificateError::UnknownIssuer,
            )),
            "m.example.com",
        );
        assert!(matches!(err, CheckError::UnknownAuthority));
    }

    #[test]
    fn test_classify_hostname_mismatch() {
        let err = classify_tls_error(
            wrap(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName,
            )),
            "m.example.com",
        );
        assert!(matches!(err, CheckError::HostnameMismatch(host) if host == "m.example.com"));
    }

    #[test]
    fn test_plain_io_error_passes_through() {
        let err = classify_tls_error(
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
            "m.example.com",
        );
        assert!(matches!(err, CheckError::Io(_)));
    }
}
