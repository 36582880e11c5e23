//! Version parity check
//!
//! Compares the mirror's published version marker against a reference URL.
//! The reference value is memoized for five minutes so a sweep over a large
//! catalog fetches it once, not per mirror.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::Mutex;

use super::{Check, CheckError, PROBE_TIMEOUT, PROBE_USER_AGENT};
use crate::error::Result;
use crate::mirrors::Mirror;

/// How long a fetched reference version stays valid
const REFERENCE_TTL: Duration = Duration::from_secs(300);

/// Version markers are tiny; anything beyond this is ignored
const MAX_VERSION_BYTES: usize = 128;

/// Compares `<mirror>/<path>/control` against the reference version URL
pub struct VersionCheck {
    client: Client,
    version_url: String,
    reference: Mutex<Option<(Instant, String)>>,
}

impl VersionCheck {
    pub fn new(version_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(PROBE_TIMEOUT)
            .user_agent(PROBE_USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            version_url,
            reference: Mutex::new(None),
        })
    }

    /// Fetch the reference version, reusing a value younger than the TTL
    async fn reference_version(&self) -> std::result::Result<String, CheckError> {
        let mut cached = self.reference.lock().await;

        if let Some((fetched_at, version)) = cached.as_ref() {
            if fetched_at.elapsed() < REFERENCE_TTL {
                return Ok(version.clone());
            }
        }

        let version = self.fetch(&self.version_url).await?;
        *cached = Some((Instant::now(), version.clone()));

        Ok(version)
    }

    async fn fetch(&self, url: &str) -> std::result::Result<String, CheckError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                CheckError::Timeout
            } else {
                CheckError::Request(e)
            }
        })?;

        let bytes = response.bytes().await?;

        Ok(normalize_version(&bytes))
    }
}

#[async_trait]
impl Check for VersionCheck {
    async fn check(&self, mirror: &Mirror) -> std::result::Result<(), CheckError> {
        let expected = self.reference_version().await?;

        let scheme = if mirror.supports("https") {
            "https"
        } else {
            "http"
        };

        let base = mirror.path.trim_matches('/');
        let url = if base.is_empty() {
            format!("{scheme}://{}/control", mirror.host)
        } else {
            format!("{scheme}://{}/{base}/control", mirror.host)
        };

        let actual = self.fetch(&url).await?;

        if actual != expected {
            return Err(CheckError::VersionMismatch { expected, actual });
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "version"
    }
}

/// Trim a version marker to its first 128 bytes and surrounding whitespace
fn normalize_version(bytes: &[u8]) -> String {
    let head = &bytes[..bytes.len().min(MAX_VERSION_BYTES)];
    String::from_utf8_lossy(head).trim().to_string()
}
