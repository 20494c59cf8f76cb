// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Best-effort, time-bounded device location

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{GeolocationConfig, LocationSource};
use crate::error::GeoError;

/// A latitude/longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Platform location capability
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn locate(&self) -> Result<Coordinates, GeoError>;
}

/// No location capability at all
pub struct NoLocation;

#[async_trait]
impl LocationProvider for NoLocation {
    async fn locate(&self) -> Result<Coordinates, GeoError> {
        Err(GeoError::Unavailable("no location source configured".to_string()))
    }
}

/// Always reports the same position
pub struct FixedLocation(pub Coordinates);

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn locate(&self) -> Result<Coordinates, GeoError> {
        Ok(self.0)
    }
}

/// Looks the position up from an HTTP endpoint
pub struct HttpLocation {
    client: Client,
    url: String,
}

#[derive(Deserialize)]
struct HttpLocationResponse {
    #[serde(alias = "lat")]
    latitude: f64,
    #[serde(alias = "lon", alias = "lng")]
    longitude: f64,
}

impl HttpLocation {
    pub fn new(url: &str) -> crate::Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl LocationProvider for HttpLocation {
    async fn locate(&self) -> Result<Coordinates, GeoError> {
        let response = self.client.get(&self.url).send().await?;

        match response.status() {
            s if s == reqwest::StatusCode::FORBIDDEN || s == reqwest::StatusCode::UNAUTHORIZED => {
                return Err(GeoError::PermissionDenied)
            }
            s if !s.is_success() => {
                return Err(GeoError::Unavailable(format!("status {}", s)))
            }
            _ => {}
        }

        let body: HttpLocationResponse = response.json().await?;
        Ok(Coordinates {
            lat: body.latitude,
            lng: body.longitude,
        })
    }
}

/// Races a location provider against a timer. Never fails outward.
#[derive(Clone)]
pub struct GeolocationResolver {
    provider: Arc<dyn LocationProvider>,
    timeout: Duration,
}

impl GeolocationResolver {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);

    pub fn new(provider: Arc<dyn LocationProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Build the resolver described by the config
    pub fn from_config(config: &GeolocationConfig) -> crate::Result<Self> {
        let provider: Arc<dyn LocationProvider> = match &config.source {
            LocationSource::None => Arc::new(NoLocation),
            LocationSource::Fixed { lat, lng } => Arc::new(FixedLocation(Coordinates {
                lat: *lat,
                lng: *lng,
            })),
            LocationSource::Http { url } => Arc::new(HttpLocation::new(url)?),
        };
        Ok(Self::new(provider, config.timeout()))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve with the configured bound
    pub async fn resolve(&self) -> Option<Coordinates> {
        self.resolve_within(self.timeout).await
    }

    /// Resolve, giving up after `timeout`. The losing branch is dropped.
    pub async fn resolve_within(&self, timeout: Duration) -> Option<Coordinates> {
        tokio::select! {
            located = self.provider.locate() => match located {
                Ok(coords) if coords.is_valid() => Some(coords),
                Ok(coords) => {
                    debug!("Discarding out-of-range location {:?}", coords);
                    None
                }
                Err(e) => {
                    debug!("Location unavailable: {}", e);
                    None
                }
            },
            _ = tokio::time::sleep(timeout) => {
                debug!("Location lookup timed out after {:?}", timeout);
                None
            }
        }
    }
}

impl Default for GeolocationResolver {
    fn default() -> Self {
        Self::new(Arc::new(NoLocation), Self::DEFAULT_TIMEOUT)
    }
}
