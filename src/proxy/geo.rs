//! Country lookup for proxy hosts using a local MaxMind database

use crate::Result;
use maxminddb::{geoip2, Reader};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

/// Looks up the country of an IP address in an MMDB file
#[derive(Clone)]
pub struct GeoLocator {
    reader: Arc<Reader<Vec<u8>>>,
}

impl GeoLocator {
    /// Open an MMDB file (GeoLite2-Country or GeoLite2-City)
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = Reader::open_readfile(path)?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    /// ISO country code for a host, if it is an IP literal the database knows
    pub fn country_code(&self, host: &str) -> Option<String> {
        let ip: IpAddr = host.parse().ok()?;
        match self.lookup_country(ip) {
            Ok(code) => code,
            Err(e) => {
                tracing::debug!(%ip, error = %e, "country lookup failed");
                None
            }
        }
    }

    fn lookup_country(&self, ip: IpAddr) -> Result<Option<String>> {
        let lookup_result = self.reader.lookup(ip)?;
        let country: Option<geoip2::Country> = lookup_result.decode()?;
        Ok(country.and_then(|c| c.country.iso_code.map(String::from)))
    }
}

impl std::fmt::Debug for GeoLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoLocator").finish_non_exhaustive()
    }
}
