//! Mirror records and the in-memory catalog
//!
//! The catalog is the authoritative set of mirrors plus its derived indices
//! (`by_host`, `by_region`). It is rebuilt wholesale on reload and published
//! atomically, so readers never observe a partially reconstructed index.
//! Availability flips in place between reloads, driven by the health checks.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use prometheus::Counter;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::MirrorEntry;
use crate::error::{Error, Result};
use crate::geo::Provider;
use crate::metrics;
use crate::rules::Rule;

pub mod selection;

pub use selection::{Choice, Selector};

/// Weight given to mirrors configured without one (or with zero)
const DEFAULT_WEIGHT: u32 = 10;

/// The synthetic region served when a request names no known region
pub const DEFAULT_REGION: &str = "default";

/// Regions concatenated into the `default` pseudo-region, in order
const DEFAULT_REGION_PARTS: [&str; 2] = ["NA", "EU"];

// ============================================================================
// Mirror
// ============================================================================

/// A single mirror: the unit of selection.
///
/// Static identity and placement are plain fields; availability, failure
/// reason, and the protocol set are interior-mutable because health probes
/// update them while requests read them.
pub struct Mirror {
    /// Unique host (may carry an explicit port)
    pub host: String,

    /// Base path prefix prepended to request paths on redirect
    pub path: String,

    pub latitude: f64,
    pub longitude: f64,

    /// Two-letter region code
    pub continent: String,

    /// ISO country code, when configured
    pub country: Option<String>,

    /// Selection weight, always >= 1
    pub weight: u32,

    /// Eligibility rules; empty means unconditional accept
    pub rules: Vec<Rule>,

    /// Schemes this mirror is currently known to serve
    protocols: RwLock<BTreeSet<String>>,

    /// Authoritative availability flag
    available: AtomicBool,

    /// Last failure, kept while unavailable
    reason: RwLock<Option<String>>,

    /// When `available` last flipped
    last_change: RwLock<DateTime<Utc>>,

    /// Per-mirror redirect counter, preserved across reloads
    pub redirects: Counter,
}

impl Mirror {
    /// Build a mirror from resolved parts. New mirrors start available.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host: String,
        path: String,
        latitude: f64,
        longitude: f64,
        continent: String,
        country: Option<String>,
        weight: u32,
        protocols: Vec<String>,
        rules: Vec<Rule>,
        redirects: Counter,
    ) -> Self {
        let protocols: BTreeSet<String> = if protocols.is_empty() {
            ["http", "https"].iter().map(|s| s.to_string()).collect()
        } else {
            protocols.into_iter().collect()
        };

        Self {
            host,
            path,
            latitude,
            longitude,
            continent,
            country,
            weight: if weight == 0 { DEFAULT_WEIGHT } else { weight },
            rules,
            protocols: RwLock::new(protocols),
            available: AtomicBool::new(true),
            reason: RwLock::new(None),
            last_change: RwLock::new(Utc::now()),
            redirects,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Whether the mirror currently serves the given scheme
    pub fn supports(&self, scheme: &str) -> bool {
        self.protocols.read().unwrap().contains(scheme)
    }

    /// Current protocol set, sorted
    pub fn protocols(&self) -> Vec<String> {
        self.protocols.read().unwrap().iter().cloned().collect()
    }

    pub fn add_protocol(&self, scheme: &str) {
        self.protocols.write().unwrap().insert(scheme.to_string());
    }

    pub fn remove_protocol(&self, scheme: &str) {
        self.protocols.write().unwrap().remove(scheme);
    }

    /// Last failure reason, while unavailable
    pub fn reason(&self) -> Option<String> {
        self.reason.read().unwrap().clone()
    }

    pub fn last_change(&self) -> DateTime<Utc> {
        *self.last_change.read().unwrap()
    }

    /// Apply one observed probe result to the availability state machine.
    ///
    /// Returns `true` when the state flipped; the caller owns the follow-up
    /// (the once-per-sweep decision cache purge).
    pub fn observe(&self, result: std::result::Result<(), crate::checks::CheckError>) -> bool {
        let healthy = result.is_ok();
        let was = self.available.load(Ordering::SeqCst);

        if healthy == was {
            if let Err(e) = result {
                tracing::debug!(host = %self.host, error = %e, "Mirror is still offline");
            }
            return false;
        }

        match result {
            Ok(()) => {
                *self.reason.write().unwrap() = None;
                self.available.store(true, Ordering::SeqCst);
                tracing::info!(host = %self.host, "Mirror is online");
            }
            Err(e) => {
                *self.reason.write().unwrap() = Some(e.to_string());
                self.available.store(false, Ordering::SeqCst);
                tracing::info!(host = %self.host, reason = %e, "Mirror went offline");
            }
        }

        *self.last_change.write().unwrap() = Utc::now();

        true
    }

    /// Serializable snapshot for the `/mirrors.json` endpoint
    pub fn snapshot(&self) -> MirrorInfo {
        MirrorInfo {
            available: self.is_available(),
            host: self.host.clone(),
            path: self.path.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
            continent: self.continent.clone(),
            country: self.country.clone(),
            weight: self.weight,
            protocols: self.protocols(),
            reason: self.reason(),
            last_change: self.last_change(),
            redirects: self.redirects.get() as u64,
        }
    }
}

/// Point-in-time view of a mirror
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorInfo {
    pub available: bool,
    pub host: String,
    pub path: String,
    pub latitude: f64,
    pub longitude: f64,
    pub continent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    pub weight: u32,
    pub protocols: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub last_change: DateTime<Utc>,
    pub redirects: u64,
}

// ============================================================================
// Catalog
// ============================================================================

/// The mirror set plus derived indices, replaced as a unit on reload
pub struct Catalog {
    mirrors: Vec<Arc<Mirror>>,
    by_host: HashMap<String, Arc<Mirror>>,
    by_region: HashMap<String, Vec<Arc<Mirror>>>,
}

impl Catalog {
    /// Build a catalog and its indices from a mirror set
    pub fn new(mirrors: Vec<Arc<Mirror>>) -> Self {
        let mut by_host = HashMap::new();
        let mut by_region: HashMap<String, Vec<Arc<Mirror>>> = HashMap::new();

        for mirror in &mirrors {
            by_host.insert(mirror.host.clone(), mirror.clone());

            if !mirror.continent.is_empty() {
                by_region
                    .entry(mirror.continent.clone())
                    .or_default()
                    .push(mirror.clone());
            }
        }

        let mut default_region = Vec::new();
        for part in DEFAULT_REGION_PARTS {
            if let Some(mirrors) = by_region.get(part) {
                default_region.extend(mirrors.iter().cloned());
            }
        }
        by_region.insert(DEFAULT_REGION.to_string(), default_region);

        Self {
            mirrors,
            by_host,
            by_region,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn mirrors(&self) -> &[Arc<Mirror>] {
        &self.mirrors
    }

    pub fn len(&self) -> usize {
        self.mirrors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }

    pub fn host(&self, host: &str) -> Option<&Arc<Mirror>> {
        self.by_host.get(host)
    }

    pub fn region(&self, code: &str) -> Option<&[Arc<Mirror>]> {
        self.by_region.get(code).map(|m| m.as_slice())
    }

    /// Region code -> mirrors, for the legacy `/mirrors` listing
    pub fn regions(&self) -> &HashMap<String, Vec<Arc<Mirror>>> {
        &self.by_region
    }
}

// ============================================================================
// Catalog Builder
// ============================================================================

/// Reconciles configuration entries into a replacement catalog.
///
/// Hosts present in the previous catalog keep their redirect counters;
/// hosts absent from the new configuration have their counters unregistered
/// when the builder finishes.
pub struct CatalogBuilder<'a> {
    previous: &'a Catalog,
    mirrors: Vec<Arc<Mirror>>,
    seen: HashSet<String>,
}

impl<'a> CatalogBuilder<'a> {
    pub fn new(previous: &'a Catalog) -> Self {
        Self {
            previous,
            mirrors: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Resolve one configuration entry into a mirror and add it.
    ///
    /// The entry's host is resolved through DNS; when coordinates or the
    /// continent are not configured, they are looked up from the first
    /// resolved address.
    pub async fn add_or_update(
        &mut self,
        entry: &MirrorEntry,
        geo: &dyn Provider,
    ) -> Result<Arc<Mirror>> {
        let url = parse_mirror_url(&entry.server)?;

        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(Error::config(format!(
                    "mirror entry has no host: {}",
                    entry.server
                )))
            }
        };

        let path = match url.path() {
            "/" => String::new(),
            path => path.to_string(),
        };

        let ip = resolve_first_address(&host).await?;

        let needs_lookup = entry.latitude.is_none()
            || entry.longitude.is_none()
            || entry.continent.is_none();

        let city = if needs_lookup {
            geo.city(ip)?
        } else {
            crate::geo::City::default()
        };

        let latitude = entry.latitude.unwrap_or(city.location.latitude);
        let longitude = entry.longitude.unwrap_or(city.location.longitude);
        let continent = entry.continent.clone().unwrap_or(city.continent.code);

        let redirects = match self.previous.host(&host) {
            Some(existing) => existing.redirects.clone(),
            None => {
                tracing::info!(
                    server = %host,
                    path = %path,
                    latitude = latitude,
                    longitude = longitude,
                    "Added mirror"
                );
                metrics::mirror_redirect_counter(&host)
            }
        };

        let mirror = Arc::new(Mirror::new(
            host.clone(),
            path,
            latitude,
            longitude,
            continent,
            entry.country.clone(),
            entry.weight,
            entry.protocols.clone(),
            entry.rules.clone(),
            redirects,
        ));

        self.seen.insert(host);
        self.mirrors.push(mirror.clone());

        Ok(mirror)
    }

    /// Finish reconciliation: drop mirrors absent from the new configuration
    /// and build the replacement catalog with fresh indices.
    pub fn finish(self) -> Catalog {
        for old in self.previous.mirrors() {
            if !self.seen.contains(&old.host) {
                tracing::info!(server = %old.host, "Removed mirror");
                metrics::unregister_mirror_counter(&old.redirects);
            }
        }

        Catalog::new(self.mirrors)
    }
}

/// Parse a configured mirror entry, treating a missing scheme as `https://`
fn parse_mirror_url(server: &str) -> Result<Url> {
    let spec = if server.starts_with("http") {
        server.to_string()
    } else {
        format!("https://{server}")
    };

    Url::parse(&spec).map_err(|e| Error::config(format!("mirror entry is invalid: {e}")))
}

/// Resolve a host to its first address (the rule when a mirror name maps to
/// several addresses)
async fn resolve_first_address(host: &str) -> Result<std::net::IpAddr> {
    let lookup = if host.contains(':') {
        host.to_string()
    } else {
        format!("{host}:443")
    };

    let mut addresses = tokio::net::lookup_host(&lookup).await?;

    addresses
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| Error::config(format!("could not resolve address: {host}")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::checks::CheckError;

    pub(crate) fn test_mirror(host: &str, lat: f64, lon: f64, continent: &str) -> Arc<Mirror> {
        Arc::new(Mirror::new(
            host.to_string(),
            String::new(),
            lat,
            lon,
            continent.to_string(),
            None,
            0,
            vec!["http".to_string(), "https".to_string()],
            Vec::new(),
            Counter::new(format!("test_{}", metrics::sanitize_host(host)), "test").unwrap(),
        ))
    }

    #[test]
    fn test_weight_zero_coerced() {
        let mirror = test_mirror("m1.example.com", 0.0, 0.0, "NA");
        assert_eq!(mirror.weight, DEFAULT_WEIGHT);
    }

    #[test]
    fn test_empty_protocols_default_to_both() {
        let mirror = Mirror::new(
            "m1.example.com".to_string(),
            String::new(),
            0.0,
            0.0,
            "NA".to_string(),
            None,
            10,
            Vec::new(),
            Vec::new(),
            Counter::new("test_protocols_default", "test").unwrap(),
        );

        assert!(mirror.supports("http"));
        assert!(mirror.supports("https"));
    }

    #[test]
    fn test_protocol_set_mutation() {
        let mirror = test_mirror("m2.example.com", 0.0, 0.0, "NA");

        mirror.remove_protocol("http");
        assert!(!mirror.supports("http"));
        assert!(mirror.supports("https"));

        mirror.add_protocol("http");
        assert!(mirror.supports("http"));
    }

    #[test]
    fn test_observe_transition_table() {
        let mirror = test_mirror("m3.example.com", 0.0, 0.0, "NA");

        // AVAILABLE + pass -> no change
        assert!(!mirror.observe(Ok(())));
        assert!(mirror.is_available());
        assert!(mirror.reason().is_none());

        // AVAILABLE + fail -> UNAVAILABLE, reason set
        assert!(mirror.observe(Err(CheckError::UnexpectedStatus(500))));
        assert!(!mirror.is_available());
        assert!(mirror.reason().is_some());

        // UNAVAILABLE + fail -> no change, reason untouched
        let reason = mirror.reason();
        assert!(!mirror.observe(Err(CheckError::UnexpectedStatus(503))));
        assert_eq!(mirror.reason(), reason);

        // UNAVAILABLE + pass -> AVAILABLE, reason cleared
        assert!(mirror.observe(Ok(())));
        assert!(mirror.is_available());
        assert!(mirror.reason().is_none());
    }

    #[test]
    fn test_observe_updates_last_change_only_on_flip() {
        let mirror = test_mirror("m4.example.com", 0.0, 0.0, "NA");
        let initial = mirror.last_change();

        mirror.observe(Ok(()));
        assert_eq!(mirror.last_change(), initial);

        mirror.observe(Err(CheckError::UnexpectedStatus(500)));
        assert!(mirror.last_change() >= initial);
    }

    #[test]
    fn test_catalog_indices() {
        let catalog = Catalog::new(vec![
            test_mirror("na1.example.com", 40.0, -74.0, "NA"),
            test_mirror("eu1.example.com", 52.0, 13.0, "EU"),
            test_mirror("as1.example.com", 35.0, 139.0, "AS"),
        ]);

        assert_eq!(catalog.len(), 3);
        assert!(catalog.host("eu1.example.com").is_some());
        assert!(catalog.host("missing.example.com").is_none());

        assert_eq!(catalog.region("NA").unwrap().len(), 1);
        assert_eq!(catalog.region("AS").unwrap().len(), 1);
    }

    #[test]
    fn test_default_region_is_na_then_eu() {
        let catalog = Catalog::new(vec![
            test_mirror("eu1.example.com", 52.0, 13.0, "EU"),
            test_mirror("na1.example.com", 40.0, -74.0, "NA"),
            test_mirror("na2.example.com", 34.0, -118.0, "NA"),
        ]);

        let default = catalog.region(DEFAULT_REGION).unwrap();
        let hosts: Vec<&str> = default.iter().map(|m| m.host.as_str()).collect();

        assert_eq!(
            hosts,
            vec!["na1.example.com", "na2.example.com", "eu1.example.com"]
        );
    }

    #[test]
    fn test_parse_mirror_url_default_scheme() {
        let url = parse_mirror_url("mirror.example.com/downloads").unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("mirror.example.com"));
        assert_eq!(url.path(), "/downloads");

        let url = parse_mirror_url("http://mirror.example.com:8080").unwrap();
        assert_eq!(url.scheme(), "http");
        assert_eq!(url.port(), Some(8080));
    }

    #[test]
    fn test_snapshot_shape() {
        let mirror = test_mirror("snap.example.com", 1.0, 2.0, "EU");
        mirror.observe(Err(CheckError::UnexpectedStatus(500)));

        let info = mirror.snapshot();
        assert!(!info.available);
        assert_eq!(info.host, "snap.example.com");
        assert_eq!(info.weight, DEFAULT_WEIGHT);
        assert!(info.reason.is_some());

        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"available\":false"));
        assert!(json.contains("\"protocols\""));
    }
}
