use std::time::Duration;

use log::{debug, info, warn};
use reqwest::{
    blocking::Client,
    header::{HeaderMap, HeaderValue, USER_AGENT},
};
use serde_json::Value;

use crate::cache::GeocodeCache;
use crate::error::Result;
use crate::location::Location;

pub const PHOTON_REVERSE_URL: &str = "https://photon.komoot.io/reverse";
pub const DEFAULT_LANGUAGE: &str = "de";
pub const DEFAULT_USER_AGENT: &str = concat!("geotagger/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub trait ReverseGeocoder {
    /// `Ok(None)` when the service knows no place at the coordinate.
    fn reverse(&self, lat: f64, lon: f64) -> Result<Option<Location>>;
}

/// Client for the Photon reverse geocoding API.
pub struct PhotonClient {
    client: Client,
    base_url: String,
    lang: String,
}

impl PhotonClient {
    pub fn new(base_url: &str, lang: &str, user_agent: &str) -> Result<PhotonClient> {
        let mut headers = HeaderMap::new();
        let agent = HeaderValue::from_str(user_agent)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_USER_AGENT));
        headers.insert(USER_AGENT, agent);
        let client = Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(PhotonClient {
            client,
            base_url: base_url.to_string(),
            lang: lang.to_string(),
        })
    }

    pub fn with_language(lang: &str, user_agent: &str) -> Result<PhotonClient> {
        PhotonClient::new(PHOTON_REVERSE_URL, lang, user_agent)
    }
}

impl ReverseGeocoder for PhotonClient {
    fn reverse(&self, lat: f64, lon: f64) -> Result<Option<Location>> {
        let params = [
            ("lat", lat.to_string()),
            ("lon", lon.to_string()),
            ("lang", self.lang.clone()),
        ];
        debug!("GET {} lat={} lon={}", self.base_url, lat, lon);
        let res_json = self
            .client
            .get(&self.base_url)
            .query(&params)
            .send()?
            .error_for_status()?
            .json::<Value>()?;
        Ok(json_to_location(&res_json))
    }
}

/// Takes the properties of the first feature of a Photon GeoJSON answer.
pub fn json_to_location(json_response: &Value) -> Option<Location> {
    let props = json_response["features"].get(0)?.get("properties")?;
    match serde_json::from_value::<Location>(props.clone()) {
        Ok(location) => Some(location),
        Err(e) => {
            warn!("Unexpected geocoder properties: {}", e);
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Api,
}

/// Outcome of a lookup. `source` is `Api` whenever the service was asked,
/// even if it knew no place.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub source: Source,
    pub location: Option<Location>,
}

/// Looks the coordinate up in the cache first, asking the geocoder on a miss.
///
/// Errors come only from the geocoder, so an `Err` means the API was called.
pub fn resolve(
    lat: f64,
    lon: f64,
    cache: &mut GeocodeCache,
    geocoder: &dyn ReverseGeocoder,
) -> Result<Resolution> {
    if let Some(location) = cache.get(lat, lon) {
        if !location.is_empty() {
            info!("  cache hit");
            return Ok(Resolution {
                source: Source::Cache,
                location: Some(location),
            });
        }
    }

    info!("  querying geocoder");
    let location = match geocoder.reverse(lat, lon)? {
        Some(location) if !location.is_empty() => location,
        _ => {
            return Ok(Resolution {
                source: Source::Api,
                location: None,
            })
        }
    };
    if let Err(e) = cache.set(lat, lon, &location) {
        warn!("Could not save cache {}: {}", cache.path().display(), e);
    }
    Ok(Resolution {
        source: Source::Api,
        location: Some(location),
    })
}
