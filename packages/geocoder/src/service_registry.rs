//! Compile-time registry of reverse-geocoding services.
//!
//! Each provider is defined in a TOML file under `services/`. The registry
//! embeds these at compile time and exposes them via [`all_services`] and
//! [`enabled_services`].

use serde::Deserialize;

/// A reverse-geocoding service configuration loaded from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct GeocodingService {
    /// Unique identifier (e.g., `"nominatim"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Whether this service is tried at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Execution order. Lower values are tried first.
    pub priority: u32,
    /// Provider-specific configuration.
    pub provider: ProviderConfig,
}

/// Provider-specific configuration, tagged by `type` in TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Nominatim / `OpenStreetMap` reverse endpoint.
    Nominatim {
        /// Reverse endpoint URL (e.g., `"https://nominatim.openstreetmap.org/reverse"`).
        base_url: String,
        /// Minimum delay between requests in milliseconds.
        rate_limit_ms: u64,
        /// Preferred language for the returned address.
        #[serde(default)]
        language: Option<String>,
    },
    /// Photon reverse endpoint.
    Photon {
        /// Reverse endpoint URL (e.g., `"https://photon.komoot.io/reverse"`).
        base_url: String,
        /// Minimum delay between requests in milliseconds.
        rate_limit_ms: u64,
    },
}

const fn default_true() -> bool {
    true
}

impl GeocodingService {
    /// Returns the provider's base URL regardless of variant.
    #[must_use]
    pub fn base_url(&self) -> &str {
        match &self.provider {
            ProviderConfig::Nominatim { base_url, .. } | ProviderConfig::Photon { base_url, .. } => {
                base_url
            }
        }
    }

    /// Returns the minimum delay between requests in milliseconds.
    #[must_use]
    pub const fn rate_limit_ms(&self) -> u64 {
        match &self.provider {
            ProviderConfig::Nominatim { rate_limit_ms, .. }
            | ProviderConfig::Photon { rate_limit_ms, .. } => *rate_limit_ms,
        }
    }
}

// ── Compile-time embedded TOML files ────────────────────────────────

const SERVICE_TOMLS: &[(&str, &str)] = &[
    ("nominatim", include_str!("../services/nominatim.toml")),
    ("photon", include_str!("../services/photon.toml")),
];

#[cfg(test)]
const EXPECTED_SERVICE_COUNT: usize = 2;

/// Returns all geocoding service configurations (enabled and disabled).
///
/// # Panics
///
/// Panics if any TOML config is malformed (this is a compile-time guarantee
/// since the configs are embedded).
#[must_use]
pub fn all_services() -> Vec<GeocodingService> {
    SERVICE_TOMLS
        .iter()
        .map(|(name, toml_str)| {
            toml::de::from_str(toml_str)
                .unwrap_or_else(|e| panic!("Failed to parse geocoding service '{name}': {e}"))
        })
        .collect()
}

/// Returns only enabled services, sorted by priority (ascending).
#[must_use]
pub fn enabled_services() -> Vec<GeocodingService> {
    let mut services: Vec<GeocodingService> =
        all_services().into_iter().filter(|s| s.enabled).collect();
    services.sort_by_key(|s| s.priority);
    services
}

/// Looks up services by id, preserving the order given in `ids`.
///
/// Unknown ids are logged and skipped.
#[must_use]
pub fn services_by_id(ids: &[String]) -> Vec<GeocodingService> {
    let all = all_services();
    ids.iter()
        .filter_map(|id| {
            let found = all.iter().find(|s| &s.id == id).cloned();
            if found.is_none() {
                log::warn!("Unknown geocoding service '{id}', skipping");
            }
            found
        })
        .collect()
}
