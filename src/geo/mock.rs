//! Deterministic in-memory geo provider for tests
//!
//! Maps specific addresses to preset city and ASN records, so selection
//! tests run without database files.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::RwLock;

use super::{Asn, City, Location, Provider};
use crate::error::{Error, Result};

/// In-memory provider answering from preset records
#[derive(Default)]
pub struct MockProvider {
    cities: RwLock<HashMap<IpAddr, City>>,
    asns: RwLock<HashMap<IpAddr, Asn>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset the city record for an address
    pub fn set_city(&self, ip: IpAddr, city: City) {
        self.cities.write().unwrap().insert(ip, city);
    }

    /// Preset an address to the given coordinates
    pub fn set_location(&self, ip: IpAddr, latitude: f64, longitude: f64) {
        self.set_city(
            ip,
            City {
                location: Location {
                    latitude,
                    longitude,
                },
                ..Default::default()
            },
        );
    }

    /// Preset the ASN record for an address
    pub fn set_asn(&self, ip: IpAddr, asn: Asn) {
        self.asns.write().unwrap().insert(ip, asn);
    }
}

impl Provider for MockProvider {
    fn city(&self, ip: IpAddr) -> Result<City> {
        self.cities
            .read()
            .unwrap()
            .get(&ip)
            .cloned()
            .ok_or_else(|| Error::InputInvalid(format!("no preset city for {ip}")))
    }

    fn asn(&self, ip: IpAddr) -> Result<Asn> {
        self.asns
            .read()
            .unwrap()
            .get(&ip)
            .cloned()
            .ok_or(Error::NoAsnDatabase)
    }
}
