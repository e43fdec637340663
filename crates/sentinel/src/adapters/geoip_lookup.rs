// Rust guideline compliant 2026-02-16

//! `GeoIpLookup` adapter over a `MaxMind` `GeoLite2-City.mmdb` file loaded
//! via the `maxminddb` crate (`geoip.data_path`, §6.5), grounded on
//! `original_source/core/collector/ip_enrich.py`'s city lookup (`zh-CN`
//! preferred, English fallback) without retrieving that module verbatim —
//! only the two-locale preference order survives into this adapter.

use std::collections::HashMap;
use std::net::IpAddr;

use domain::{CityInfo, DocumentStoreError, GeoIpLookup};

#[derive(Debug, Clone, thiserror::Error)]
pub enum GeoIpAdapterError {
    #[error("failed to open GeoIP database {path}: {source}")]
    Open { path: String, source: std::sync::Arc<maxminddb::MaxMindDbError> },
}

pub struct MaxMindGeoIpLookup {
    reader: maxminddb::Reader<Vec<u8>>,
}

impl std::fmt::Debug for MaxMindGeoIpLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaxMindGeoIpLookup").finish_non_exhaustive()
    }
}

impl MaxMindGeoIpLookup {
    /// Load the `.mmdb` file at `path` into memory.
    ///
    /// # Errors
    ///
    /// Returns [`GeoIpAdapterError::Open`] if the file cannot be read or is
    /// not a valid `MaxMind` database.
    pub fn open(path: &str) -> Result<Self, GeoIpAdapterError> {
        let reader = maxminddb::Reader::open_readfile(path)
            .map_err(|source| GeoIpAdapterError::Open { path: path.to_owned(), source: std::sync::Arc::new(source) })?;
        Ok(Self { reader })
    }
}

impl GeoIpLookup for MaxMindGeoIpLookup {
    /// `zh-CN` locale preferred when present, English fallback otherwise (§4.6).
    async fn query_cities(&self, ips: &[String]) -> Result<HashMap<String, CityInfo>, DocumentStoreError> {
        let mut out = HashMap::new();
        for ip in ips {
            let Ok(parsed) = ip.parse::<IpAddr>() else { continue };
            let Ok(Some(city)): Result<Option<maxminddb::geoip2::City<'_>>, _> = self.reader.lookup(parsed) else {
                continue;
            };
            out.insert(ip.clone(), city_info_of(&city));
        }
        Ok(out)
    }
}

fn city_info_of(city: &maxminddb::geoip2::City<'_>) -> CityInfo {
    let localized_name = |names: Option<&std::collections::BTreeMap<&str, &str>>| -> Option<String> {
        let names = names?;
        names.get("zh-CN").or_else(|| names.get("en")).map(|s| (*s).to_owned())
    };

    CityInfo {
        city_name: city.city.as_ref().and_then(|c| localized_name(c.names.as_ref())),
        country_name: city.country.as_ref().and_then(|c| localized_name(c.names.as_ref())),
        country_code: city.country.as_ref().and_then(|c| c.iso_code.map(ToOwned::to_owned)),
        continent_name: city.continent.as_ref().and_then(|c| localized_name(c.names.as_ref())),
        continent_code: city.continent.as_ref().and_then(|c| c.code.map(ToOwned::to_owned)),
    }
}
