use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Largest number of addresses sent in one lookup request.
pub const GEO_BATCH_SIZE: usize = 100;

pub const DEFAULT_GEO_URL: &str = "http://ip-api.com";

const GEO_FIELDS: &str = "status,message,country,countryCode,city,lat,lon,query";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoLocation {
    pub country: String,
    pub country_code: Option<String>,
    pub city: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeoRecord {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
}

/// Best-effort IP geolocation against an ip-api compatible batch endpoint.
///
/// Answers are cached for the life of the client. Addresses the service
/// refused to resolve (private ranges, reserved space) are cached as misses;
/// transport failures are not, so they are retried on the next lookup.
#[derive(Clone)]
pub struct GeoClient {
    base_url: String,
    http: Client,
    timeout: Duration,
    cache: Arc<RwLock<HashMap<String, Option<GeoLocation>>>>,
}

impl GeoClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            timeout,
            cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Locations for whichever of `ips` could be resolved. Never fails.
    pub async fn locate(&self, ips: &[String]) -> HashMap<String, GeoLocation> {
        let wanted: Vec<String> = {
            let cache = self.cache.read().await;
            let mut seen = HashSet::new();
            ips.iter()
                .filter(|ip| !cache.contains_key(ip.as_str()))
                .filter(|ip| seen.insert(ip.as_str()))
                .cloned()
                .collect()
        };

        for batch in wanted.chunks(GEO_BATCH_SIZE) {
            match self.lookup_batch(batch).await {
                Ok(found) => {
                    let mut cache = self.cache.write().await;
                    for (ip, location) in found {
                        cache.insert(ip, location);
                    }
                }
                Err(e) => {
                    warn!("Geolocation lookup for {} address(es) failed: {}", batch.len(), e);
                }
            }
        }

        let cache = self.cache.read().await;
        ips.iter()
            .filter_map(|ip| {
                let location = cache.get(ip)?.clone()?;
                Some((ip.clone(), location))
            })
            .collect()
    }

    async fn lookup_batch(
        &self,
        batch: &[String],
    ) -> Result<Vec<(String, Option<GeoLocation>)>, reqwest::Error> {
        let url = format!("{}/batch?fields={}", self.base_url, GEO_FIELDS);
        debug!("Geolocating {} address(es) via {}", batch.len(), url);

        let records = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .json(batch)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<GeoRecord>>()
            .await?;

        Ok(records
            .into_iter()
            .filter_map(|r| {
                let ip = r.query?;
                let location = match (r.status.as_deref(), r.country) {
                    (Some("success"), Some(country)) if !country.is_empty() => Some(GeoLocation {
                        country,
                        country_code: r.country_code,
                        city: r.city.filter(|c| !c.is_empty()),
                        lat: r.lat,
                        lon: r.lon,
                    }),
                    _ => None,
                };
                Some((ip, location))
            })
            .collect())
    }
}
