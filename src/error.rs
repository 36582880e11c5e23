//! Unified error handling for the redirector crate
//!
//! Request-path errors map onto HTTP statuses in the server module; health
//! probe failures are a separate type ([`CheckError`]) because they never
//! propagate to callers, they only mark a mirror unavailable.

use std::io;
use thiserror::Error;

pub use crate::checks::CheckError;

/// Unified error type for the redirector crate
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed request input (unparseable peer address, missing path parts)
    #[error("invalid request: {0}")]
    InputInvalid(String),

    /// City or ASN lookup failed
    #[error("geo lookup failed: {0}")]
    GeoLookup(#[from] maxminddb::MaxMindDBError),

    /// ASN lookups were requested but no ASN database is configured.
    ///
    /// Callers treat this as "no ASN facts", not as a failure.
    #[error("no ASN database loaded")]
    NoAsnDatabase,

    /// Selection found no mirrors, even after the unfiltered fallback
    #[error("no mirrors available")]
    NoCandidates,

    /// Weighted random selection could not produce a mirror
    #[error("weighted selection failed: {0}")]
    WeightedPick(String),

    /// Reload endpoint called with a missing or invalid bearer token
    #[error("unauthorized")]
    Unauthorized,

    /// Reload could not complete; the previous catalog stays in service
    #[error("reload failed: {0}")]
    Reload(String),

    /// Configuration file errors
    #[error("config error: {0}")]
    Config(String),

    /// Download map parse errors
    #[error("download map error: {0}")]
    DownloadMap(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parse errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Outbound HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a reload error
    pub fn reload(msg: impl Into<String>) -> Self {
        Self::Reload(msg.into())
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
