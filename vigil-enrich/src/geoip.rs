//! GeoIP lookups against a local MaxMind database.

use std::net::IpAddr;

use maxminddb::geoip2;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct GeoLocation {
    pub country: String,
    pub city: String,
    pub iso: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// A missing or unreadable database degrades to "no geo data" — the
/// worker keeps running without the geo fields.
pub struct GeoProvider {
    reader: Option<maxminddb::Reader<Vec<u8>>>,
}

impl GeoProvider {
    pub fn open(path: &str) -> GeoProvider {
        if path.is_empty() {
            return GeoProvider { reader: None };
        }
        match maxminddb::Reader::open_readfile(path) {
            Ok(reader) => GeoProvider { reader: Some(reader) },
            Err(err) => {
                warn!(path, error = %err, "geoip database unavailable, geo enrichment disabled");
                GeoProvider { reader: None }
            }
        }
    }

    pub fn enabled(&self) -> bool {
        self.reader.is_some()
    }

    pub fn lookup(&self, ip_str: &str) -> Option<GeoLocation> {
        let reader = self.reader.as_ref()?;
        let ip: IpAddr = ip_str.parse().ok()?;
        let city: geoip2::City = reader.lookup(ip).ok()?;

        let country_name = city
            .country
            .as_ref()
            .and_then(|c| c.names.as_ref())
            .and_then(|n| n.get("en"))
            .map(|s| s.to_string())
            .unwrap_or_default();
        let iso = city
            .country
            .as_ref()
            .and_then(|c| c.iso_code)
            .map(|s| s.to_string())
            .unwrap_or_default();
        let city_name = city
            .city
            .as_ref()
            .and_then(|c| c.names.as_ref())
            .and_then(|n| n.get("en"))
            .map(|s| s.to_string())
            .unwrap_or_default();
        let (latitude, longitude) = city
            .location
            .as_ref()
            .map(|l| (l.latitude.unwrap_or(0.0), l.longitude.unwrap_or(0.0)))
            .unwrap_or((0.0, 0.0));

        Some(GeoLocation {
            country: country_name,
            city: city_name,
            iso,
            latitude,
            longitude,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_database_degrades() {
        let provider = GeoProvider::open("/nonexistent/GeoLite2-City.mmdb");
        assert!(!provider.enabled());
        assert!(provider.lookup("8.8.8.8").is_none());
    }

    #[test]
    fn test_empty_path_disables() {
        let provider = GeoProvider::open("");
        assert!(!provider.enabled());
    }
}
