//! Best-effort IP geolocation for new sessions.
//!
//! A lookup never fails a login: every error collapses to
//! [`UNKNOWN_LOCATION`].

use serde::Deserialize;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

use crate::config::GeolocationConfig;

/// Location recorded when a lookup is skipped or fails.
pub const UNKNOWN_LOCATION: &str = "unknown";

/// Boxed future returned by [`Geolocator::locate`].
pub type LocateFuture<'a> = Pin<Box<dyn Future<Output = String> + Send + 'a>>;

/// Resolves a client address to a human-readable location.
pub trait Geolocator: Send + Sync + 'static {
    /// Return `"city, region, country"` or [`UNKNOWN_LOCATION`].
    fn locate(&self, ip: Option<IpAddr>) -> LocateFuture<'_>;
}

/// Always answers [`UNKNOWN_LOCATION`].
pub struct DisabledGeolocator;

impl Geolocator for DisabledGeolocator {
    fn locate(&self, _ip: Option<IpAddr>) -> LocateFuture<'_> {
        Box::pin(async { UNKNOWN_LOCATION.to_string() })
    }
}

#[derive(Debug, Deserialize)]
struct IpInfoResponse {
    #[serde(default)]
    city: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    country: String,
}

/// Looks addresses up against an ipinfo-style JSON endpoint.
pub struct IpInfoGeolocator {
    client: reqwest::Client,
    /// URL template containing `{ip}`.
    endpoint: String,
}

impl IpInfoGeolocator {
    pub fn new(config: &GeolocationConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }

    async fn lookup(&self, ip: IpAddr) -> anyhow::Result<String> {
        let url = self.endpoint.replace("{ip}", &ip.to_string());
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("geolocation lookup failed: status {}", resp.status());
        }
        let body: IpInfoResponse = resp.json().await?;
        Ok(format!("{}, {}, {}", body.city, body.region, body.country))
    }
}

impl Geolocator for IpInfoGeolocator {
    fn locate(&self, ip: Option<IpAddr>) -> LocateFuture<'_> {
        Box::pin(async move {
            let Some(ip) = ip.filter(is_routable) else {
                return UNKNOWN_LOCATION.to_string();
            };
            match self.lookup(ip).await {
                Ok(location) => location,
                Err(e) => {
                    debug!("geolocation for {} failed: {}", ip, e);
                    UNKNOWN_LOCATION.to_string()
                }
            }
        })
    }
}

/// Build the geolocator selected by config.
pub fn from_config(config: &GeolocationConfig) -> anyhow::Result<Box<dyn Geolocator>> {
    if config.enabled {
        Ok(Box::new(IpInfoGeolocator::new(config)?))
    } else {
        Ok(Box::new(DisabledGeolocator))
    }
}

fn is_routable(ip: &IpAddr) -> bool {
    !(ip.is_loopback() || ip.is_unspecified())
}
