//! MaxMind database backed geo provider

use std::net::IpAddr;
use std::path::Path;

use maxminddb::Reader;

use super::{Asn, City, Provider};
use crate::error::{Error, Result};

/// Geo provider reading GeoLite2 City and (optionally) ASN databases
pub struct MaxmindProvider {
    city_db: Reader<Vec<u8>>,
    asn_db: Option<Reader<Vec<u8>>>,
}

impl MaxmindProvider {
    /// Open the city database, and the ASN database when a path is given.
    ///
    /// Any open failure is returned without side effects, so a reload can
    /// abort cleanly and keep serving from the previous handles.
    pub fn open(city_path: &Path, asn_path: Option<&Path>) -> Result<Self> {
        let city_db = Reader::open_readfile(city_path)?;

        let asn_db = match asn_path {
            Some(path) => Some(Reader::open_readfile(path)?),
            None => None,
        };

        tracing::info!(
            city = %city_path.display(),
            asn = asn_path.map(|p| p.display().to_string()).as_deref().unwrap_or("none"),
            "Opened geo databases"
        );

        Ok(Self { city_db, asn_db })
    }
}

impl Provider for MaxmindProvider {
    fn city(&self, ip: IpAddr) -> Result<City> {
        Ok(self.city_db.lookup(ip)?)
    }

    fn asn(&self, ip: IpAddr) -> Result<Asn> {
        let db = self.asn_db.as_ref().ok_or(Error::NoAsnDatabase)?;

        Ok(db.lookup(ip)?)
    }
}
