//! Mirror health probes
//!
//! A sweep probes every mirror concurrently, running the configured chain of
//! checks in order and short-circuiting on the first failure. The observed
//! result drives the mirror's availability state machine; the first state
//! flip in a sweep purges the decision cache, exactly once per sweep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::Config;
use crate::mirrors::{Mirror, Selector};

pub mod http;
pub mod tls;
pub mod version;

pub use http::HttpCheck;
pub use tls::TlsCheck;
pub use version::VersionCheck;

/// Client-side timeout for probe requests
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(20);

/// Time between periodic sweeps
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// User-Agent sent on probe and version requests
pub const PROBE_USER_AGENT: &str = concat!("redirector/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Check Errors
// ============================================================================

/// A probe failure. Stored in `mirror.reason` and logged with structured
/// fields; never propagated to request handlers.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("unexpected http status {0}")]
    UnexpectedStatus(u16),

    #[error("insecure redirect from https to {0}")]
    InsecureRedirect(String),

    #[error("certificate is expired")]
    CertificateExpired,

    #[error("certificate is not yet valid")]
    CertificateNotYetValid,

    #[error("certificate signed by unknown authority")]
    UnknownAuthority,

    #[error("certificate is not valid for {0}")]
    HostnameMismatch(String),

    #[error("version mismatch: expected {expected:?}, got {actual:?}")]
    VersionMismatch { expected: String, actual: String },

    #[error("probe timed out")]
    Timeout,

    #[error("invalid probe target: {0}")]
    InvalidTarget(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("tls handshake failed: {0}")]
    Tls(String),
}

// ============================================================================
// Check Trait
// ============================================================================

/// One probe in the per-mirror chain
#[async_trait]
pub trait Check: Send + Sync {
    /// Probe the mirror once. `Ok(())` means this link of the chain passes.
    async fn check(&self, mirror: &Mirror) -> Result<(), CheckError>;

    /// Short name used in log fields
    fn name(&self) -> &'static str;
}

// ============================================================================
// Health Checker
// ============================================================================

/// Owns the probe chain and drives sweeps over the catalog
pub struct HealthChecker {
    checks: Vec<Box<dyn Check>>,
}

impl HealthChecker {
    /// Build the probe chain from configuration: HTTP, then TLS, then the
    /// optional version parity check.
    pub fn new(config: &Config) -> crate::error::Result<Self> {
        let mut checks: Vec<Box<dyn Check>> = vec![
            Box::new(HttpCheck::new()?),
            Box::new(TlsCheck::new(config.ca_bundle.as_deref())?),
        ];

        if let Some(url) = &config.check_url {
            checks.push(Box::new(VersionCheck::new(url.clone())?));
        }

        Ok(Self { checks })
    }

    #[cfg(test)]
    pub fn with_checks(checks: Vec<Box<dyn Check>>) -> Self {
        Self { checks }
    }

    /// Run the chain against one mirror, short-circuiting on failure
    pub async fn probe(&self, mirror: &Mirror) -> Result<(), CheckError> {
        for check in &self.checks {
            if let Err(e) = check.check(mirror).await {
                tracing::debug!(
                    host = %mirror.host,
                    check = check.name(),
                    error = %e,
                    "Probe failed"
                );
                return Err(e);
            }
        }

        Ok(())
    }

    /// Probe every mirror concurrently and wait for all to finish.
    ///
    /// If any mirror's state flips, the decision cache is purged once; the
    /// first mirror to flip owns the purge.
    pub async fn sweep(&self, mirrors: &[Arc<Mirror>], selector: &Selector) {
        let purged = AtomicBool::new(false);

        let probes = mirrors.iter().map(|mirror| {
            let purged = &purged;
            async move {
                let result = self.probe(mirror).await;

                if mirror.observe(result)
                    && purged
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                {
                    tracing::debug!(host = %mirror.host, "Mirror state changed, purging decision cache");
                    selector.purge();
                }
            }
        });

        futures::future::join_all(probes).await;

        tracing::debug!(mirrors = mirrors.len(), "Health sweep complete");
    }
}
