//! Configuration loading for the redirector
//!
//! Configuration comes from a single YAML file. Key names are part of the
//! deployment interface and keep their historical mixed casing.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::rules::Rule;

/// Default listen address
const DEFAULT_BIND: &str = ":8080";

/// Default decision cache capacity
const DEFAULT_CACHE_SIZE: usize = 1024;

/// Default number of nearby mirrors a client is spread across
pub const DEFAULT_TOP_CHOICES: usize = 3;

/// Default deviation cutoff in meters (0 disables)
const DEFAULT_MAX_DEVIATION: u64 = 50_000;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listen address, `:8080` style or a full `host:port`
    #[serde(default = "default_bind")]
    pub bind: String,

    /// GeoLite2 City database path
    pub geodb: PathBuf,

    /// GeoLite2 ASN database path (optional)
    #[serde(default)]
    pub asndb: Option<PathBuf>,

    /// Download path-remap table path (optional)
    #[serde(default)]
    pub dl_map: Option<PathBuf>,

    /// Decision cache capacity
    #[serde(rename = "cacheSize", default = "default_cache_size")]
    pub cache_size: usize,

    /// How many nearby mirrors a client is spread across; clamped to the
    /// mirror count on reload, `0` falls back to the default
    #[serde(rename = "topChoices", default)]
    pub top_choices: usize,

    /// Candidates farther than this many meters beyond the closest one are
    /// dropped from the choice list; `0` disables the cutoff
    #[serde(rename = "maxDeviation", default = "default_max_deviation")]
    pub max_deviation: u64,

    /// Bearer token required by `POST /reload`; a random token is generated
    /// when unset so the endpoint is never accidentally open
    #[serde(rename = "reloadToken", default)]
    pub reload_token: String,

    /// Reference URL for the version parity check (optional)
    #[serde(rename = "checkUrl", default)]
    pub check_url: Option<String>,

    /// PEM bundle of additional trust roots for the TLS check (optional)
    #[serde(rename = "caBundle", default)]
    pub ca_bundle: Option<PathBuf>,

    /// Substitute client address used when the request originates from a
    /// loopback or private network, for local testing
    #[serde(rename = "overrideIp", default)]
    pub override_ip: Option<IpAddr>,

    /// Mirror entries
    #[serde(default)]
    pub servers: Vec<MirrorEntry>,
}

/// A single mirror entry as it appears in the configuration.
///
/// This is the raw shape before DNS resolution and geo lookups turn it into
/// a catalog mirror.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorEntry {
    /// Mirror URL or bare host; a missing scheme is read as `https://`
    pub server: String,

    #[serde(default)]
    pub latitude: Option<f64>,

    #[serde(default)]
    pub longitude: Option<f64>,

    /// Two-letter region code; looked up from the mirror's address when unset
    #[serde(default)]
    pub continent: Option<String>,

    /// ISO country code (optional)
    #[serde(default)]
    pub country: Option<String>,

    /// Selection weight; `0` is coerced to the default at insertion
    #[serde(default)]
    pub weight: u32,

    /// Supported schemes; empty means both `http` and `https`
    #[serde(default)]
    pub protocols: Vec<String>,

    /// Eligibility rules; empty means unconditional accept
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// An empty `reloadToken` is left empty here; the server substitutes a
    /// generated token once at startup so it survives reloads.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("unable to read {}: {e}", path.display())))?;

        Ok(serde_yaml::from_str(&raw)?)
    }

    /// The listen address with the `:8080` shorthand expanded
    pub fn bind_address(&self) -> String {
        if self.bind.starts_with(':') {
            format!("0.0.0.0{}", self.bind)
        } else {
            self.bind.clone()
        }
    }
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_cache_size() -> usize {
    DEFAULT_CACHE_SIZE
}

fn default_max_deviation() -> u64 {
    DEFAULT_MAX_DEVIATION
}

/// An insecure, but "good enough" random alphanumeric sequence
pub fn random_sequence(n: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(n)
        .map(char::from)
        .collect()
}
