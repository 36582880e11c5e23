//! Geo-IP lookups and great-circle distance
//!
//! The selection engine only ever talks to the [`Provider`] trait; the
//! MaxMind-backed implementation lives in [`maxmind`] and a deterministic
//! in-memory provider for tests lives in [`mock`].

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod maxmind;
pub mod mock;

pub use maxmind::MaxmindProvider;
pub use mock::MockProvider;

/// Earth radius in meters used by the haversine formula
const EARTH_RADIUS_METERS: f64 = 6_378_100.0;

// ============================================================================
// Lookup Records
// ============================================================================

/// A city-level lookup record.
///
/// Field names follow the GeoLite2 City database layout so the same struct
/// deserializes straight out of the database and serializes to JSON for the
/// `/geoip` endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct City {
    #[serde(default)]
    pub continent: Continent,

    #[serde(default)]
    pub country: Country,

    #[serde(default)]
    pub location: Location,

    #[serde(default)]
    pub registered_country: Country,
}

/// Continent sub-record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Continent {
    #[serde(default)]
    pub code: String,
}

/// Country sub-record, also used for the registered country
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Country {
    #[serde(default)]
    pub iso_code: String,
}

/// Coordinates sub-record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub latitude: f64,

    #[serde(default)]
    pub longitude: f64,
}

/// An autonomous-system lookup record from the GeoLite2 ASN database
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Asn {
    #[serde(default)]
    pub autonomous_system_number: u32,

    #[serde(default)]
    pub autonomous_system_organization: String,
}

// ============================================================================
// Provider
// ============================================================================

/// Abstract geo-IP backend.
///
/// Lookups are in-memory and cheap, so the trait is synchronous. Backing
/// resources are released when the provider is dropped.
pub trait Provider: Send + Sync {
    /// Look up the city record for an address
    fn city(&self, ip: IpAddr) -> Result<City>;

    /// Look up the ASN record for an address.
    ///
    /// Returns [`crate::error::Error::NoAsnDatabase`] when no ASN database
    /// is configured;
    /// callers treat that as "no ASN facts available" rather than a failure.
    fn asn(&self, ip: IpAddr) -> Result<Asn>;
}

// ============================================================================
// Distance
// ============================================================================

/// Great-circle distance in meters between two coordinate pairs, via the
/// haversine formula on a sphere. Inputs are degrees.
pub fn distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let la1 = lat1.to_radians();
    let lo1 = lon1.to_radians();
    let la2 = lat2.to_radians();
    let lo2 = lon2.to_radians();

    let h = hsin(la2 - la1) + la1.cos() * la2.cos() * hsin(lo2 - lo1);

    2.0 * EARTH_RADIUS_METERS * h.sqrt().asin()
}

/// haversin(θ)
fn hsin(theta: f64) -> f64 {
    (theta / 2.0).sin().powi(2)
}
