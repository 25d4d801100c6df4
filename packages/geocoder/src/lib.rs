#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Best-effort reverse geocoding for polling mode.
//!
//! Turns a coordinate into a human-readable address using the providers
//! configured via TOML files in `services/`, tried in priority order. Any
//! failure falls through to the next provider, and when every provider
//! fails the result is [`fallback_address`]. Callers never see an error.

pub mod nominatim;
pub mod photon;
pub mod service_registry;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use service_registry::{GeocodingService, ProviderConfig};
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors from a single provider call. Never escapes [`ReverseGeocoder`].
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response parsing failed.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parsing failure.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimited,
}

/// The address used when no provider resolves a coordinate.
#[must_use]
pub fn fallback_address(lat: f64, lon: f64) -> String {
    format!("Lat: {lat:.4}, Lon: {lon:.4}")
}

/// Resolves coordinates to addresses. Infallible by contract.
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    /// Returns a human-readable address for `(lat, lon)`, or
    /// [`fallback_address`] if none can be found.
    async fn address_for(&self, lat: f64, lon: f64) -> String;
}

/// A geocoder that never makes a request.
pub struct FallbackGeocoder;

#[async_trait]
impl ReverseGeocoder for FallbackGeocoder {
    async fn address_for(&self, lat: f64, lon: f64) -> String {
        fallback_address(lat, lon)
    }
}

struct Provider {
    service: GeocodingService,
    last_request: Mutex<Option<Instant>>,
}

impl Provider {
    async fn wait_for_slot(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let min_gap = Duration::from_millis(self.service.rate_limit_ms());
            let elapsed = previous.elapsed();
            if elapsed < min_gap {
                tokio::time::sleep(min_gap.saturating_sub(elapsed)).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn reverse(
        &self,
        client: &reqwest::Client,
        lat: f64,
        lon: f64,
    ) -> Result<Option<String>, GeocodeError> {
        self.wait_for_slot().await;
        match &self.service.provider {
            ProviderConfig::Nominatim {
                base_url, language, ..
            } => nominatim::reverse(client, base_url, lat, lon, language.as_deref()).await,
            ProviderConfig::Photon { base_url, .. } => {
                photon::reverse(client, base_url, lat, lon).await
            }
        }
    }
}

/// Tries each configured provider in order and falls back to the
/// coordinate string.
pub struct ServiceChainGeocoder {
    client: reqwest::Client,
    providers: Vec<Provider>,
}

impl ServiceChainGeocoder {
    /// Builds a chain over `services` (already ordered).
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Http`] if the HTTP client cannot be built.
    pub fn new(services: Vec<GeocodingService>, timeout: Duration) -> Result<Self, GeocodeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("traffic-sweep/0.1 (reverse geocoding)")
            .build()?;

        let providers = services
            .into_iter()
            .map(|service| Provider {
                service,
                last_request: Mutex::new(None),
            })
            .collect::<Vec<_>>();

        log::info!(
            "Reverse geocoding via [{}]",
            providers
                .iter()
                .map(|p| p.service.id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self { client, providers })
    }

    /// Builds a chain over every enabled service in the registry.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Http`] if the HTTP client cannot be built.
    pub fn from_registry(timeout: Duration) -> Result<Self, GeocodeError> {
        Self::new(service_registry::enabled_services(), timeout)
    }

    /// Number of providers in the chain.
    #[must_use]
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }
}

#[async_trait]
impl ReverseGeocoder for ServiceChainGeocoder {
    async fn address_for(&self, lat: f64, lon: f64) -> String {
        for provider in &self.providers {
            match provider.reverse(&self.client, lat, lon).await {
                Ok(Some(address)) => return address,
                Ok(None) => {
                    log::debug!("{}: no address for ({lat}, {lon})", provider.service.id);
                }
                Err(e) => {
                    log::debug!("{}: reverse geocode failed: {e}", provider.service.id);
                }
            }
        }
        fallback_address(lat, lon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_formats_four_decimals() {
        assert_eq!(
            fallback_address(-33.456_789, -70.6),
            "Lat: -33.4568, Lon: -70.6000"
        );
    }

    #[tokio::test]
    async fn empty_chain_returns_fallback() {
        let geocoder = ServiceChainGeocoder::new(Vec::new(), Duration::from_secs(1)).unwrap();
        assert_eq!(geocoder.provider_count(), 0);
        assert_eq!(
            geocoder.address_for(1.0, 2.0).await,
            fallback_address(1.0, 2.0)
        );
    }

    #[tokio::test]
    async fn unreachable_provider_falls_back() {
        let service = GeocodingService {
            id: "local".to_string(),
            name: "Unreachable".to_string(),
            enabled: true,
            priority: 1,
            provider: ProviderConfig::Nominatim {
                base_url: "http://127.0.0.1:9/reverse".to_string(),
                rate_limit_ms: 0,
                language: None,
            },
        };
        let geocoder = ServiceChainGeocoder::new(vec![service], Duration::from_secs(2)).unwrap();
        assert_eq!(
            geocoder.address_for(-33.45, -70.66).await,
            "Lat: -33.4500, Lon: -70.6600"
        );
    }

    #[tokio::test]
    async fn fallback_geocoder_never_requests() {
        assert_eq!(
            FallbackGeocoder.address_for(0.0, 0.0).await,
            "Lat: 0.0000, Lon: 0.0000"
        );
    }
}
