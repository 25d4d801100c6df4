//! Layered TOML configuration.
//!
//! The embedded `config/default.toml` is the base layer. An optional file
//! given on the command line is merged over it, then the
//! `TRAFFIC_SWEEP_MODE` and `TRAFFIC_SWEEP_OUTPUT` environment variables
//! override the mode and output path.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use traffic_sweep_database::paths;
use traffic_sweep_discover_models::{DiscoveryMode, GridSettings, SweepSettings};
use traffic_sweep_geography_models::{BoundingBox, InvalidBoundsError};
use traffic_sweep_scraper::extractor::ExtractorSettings;
use traffic_sweep_scraper::panner::PanSettings;
use traffic_sweep_scraper::webdriver::WebDriverSettings;
use traffic_sweep_source::telemetry::TelemetrySettings;

/// Environment variable overriding [`IngestConfig::mode`].
pub const MODE_ENV: &str = "TRAFFIC_SWEEP_MODE";

/// Environment variable overriding [`IngestConfig::output_path`].
pub const OUTPUT_ENV: &str = "TRAFFIC_SWEEP_OUTPUT";

const DEFAULT_TOML: &str = include_str!("../config/default.toml");

/// Errors from loading or validating the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The override file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Read {
        /// The file that was requested.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A layer is not valid TOML or does not match the schema.
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The target rectangle is malformed.
    #[error("Invalid bounds: {0}")]
    Bounds(#[from] InvalidBoundsError),

    /// A setting is out of range.
    #[error("Invalid setting {key}: {reason}")]
    Invalid {
        /// Dotted key of the setting.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Reverse-geocoding options for the grid poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocoderSettings {
    /// Registry service ids, in the order they are tried. Empty selects
    /// every enabled service by priority.
    pub services: Vec<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for GeocoderSettings {
    fn default() -> Self {
        Self {
            services: Vec::new(),
            timeout_secs: 10,
        }
    }
}

/// The in-memory map behind `run --simulate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulateSettings {
    /// Distance between simulated incidents, in degrees.
    pub lattice_spacing: f64,
    /// Distance the simulated map moves per move signal, in degrees.
    pub step_degrees: f64,
    /// Event list written by simulated runs.
    pub output_path: PathBuf,
}

impl Default for SimulateSettings {
    fn default() -> Self {
        Self {
            lattice_spacing: 0.01,
            step_degrees: 0.002,
            output_path: paths::data_dir().join("simulated_events.json"),
        }
    }
}

/// Everything the ingestion driver needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Which discovery engine to run.
    pub mode: DiscoveryMode,
    /// Rectangle every pass covers.
    pub bounds: BoundingBox,
    /// Durable event list. `None` means [`paths::default_events_path`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    /// Pause between passes in seconds.
    pub sleep_between_passes_secs: u64,
    /// Panning sweep tuning.
    pub sweep: SweepSettings,
    /// Grid polling tuning.
    pub grid: GridSettings,
    /// Move signal timing.
    pub pan: PanSettings,
    /// Detail view timing.
    pub extractor: ExtractorSettings,
    /// Browser automation backend.
    pub webdriver: WebDriverSettings,
    /// Telemetry endpoint.
    pub telemetry: TelemetrySettings,
    /// Reverse geocoding.
    pub geocoder: GeocoderSettings,
    /// Simulated map.
    pub simulate: SimulateSettings,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            mode: DiscoveryMode::default(),
            bounds: BoundingBox::new(-33.6106, -33.3503, -70.7778, -70.4990),
            output_path: None,
            sleep_between_passes_secs: 300,
            sweep: SweepSettings::default(),
            grid: GridSettings::default(),
            pan: PanSettings::default(),
            extractor: ExtractorSettings::default(),
            webdriver: WebDriverSettings::default(),
            telemetry: TelemetrySettings::default(),
            geocoder: GeocoderSettings::default(),
            simulate: SimulateSettings::default(),
        }
    }
}

impl IngestConfig {
    /// Loads the embedded defaults, merges `path` over them when given,
    /// applies environment overrides and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a layer cannot be read or parsed, or if
    /// the merged configuration is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let overlay = path
            .map(|path| {
                std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            })
            .transpose()?;

        let mut config = Self::from_layers(overlay.as_deref())?;
        config.apply_overrides(
            std::env::var(MODE_ENV).ok().as_deref(),
            std::env::var(OUTPUT_ENV).ok().as_deref(),
        )?;
        config.validate()?;

        log::debug!(
            "Loaded {} config{}",
            config.mode,
            path.map_or_else(String::new, |p| format!(" from {}", p.display()))
        );
        Ok(config)
    }

    /// The embedded defaults with `overlay` merged over them.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if `overlay` is not valid TOML or the
    /// merged document does not match the schema.
    ///
    /// # Panics
    ///
    /// Panics if the embedded default config is malformed (this is a
    /// compile-time guarantee since it is embedded).
    pub fn from_layers(overlay: Option<&str>) -> Result<Self, ConfigError> {
        let mut base: toml::Table = toml::from_str(DEFAULT_TOML)
            .unwrap_or_else(|e| panic!("Failed to parse embedded default config: {e}"));

        if let Some(text) = overlay {
            let overlay: toml::Table = toml::from_str(text)?;
            merge(&mut base, overlay);
        }

        Ok(toml::Value::Table(base).try_into()?)
    }

    /// Applies `TRAFFIC_SWEEP_MODE` / `TRAFFIC_SWEEP_OUTPUT` style
    /// overrides. Empty values are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unknown mode.
    pub fn apply_overrides(
        &mut self,
        mode: Option<&str>,
        output: Option<&str>,
    ) -> Result<(), ConfigError> {
        if let Some(mode) = mode.map(str::trim).filter(|m| !m.is_empty()) {
            self.mode = mode.parse().map_err(|reason| ConfigError::Invalid {
                key: "mode",
                reason,
            })?;
        }
        if let Some(output) = output.map(str::trim).filter(|o| !o.is_empty()) {
            self.output_path = Some(PathBuf::from(output));
        }
        Ok(())
    }

    /// Checks the bounds and every setting a pass depends on.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bounds.validate()?;

        let positive = |key: &'static str, value: u32| {
            if value == 0 {
                Err(ConfigError::Invalid {
                    key,
                    reason: "must be at least 1".to_string(),
                })
            } else {
                Ok(())
            }
        };
        positive("sweep.steps_vertical", self.sweep.steps_vertical)?;
        positive("sweep.steps_horizontal", self.sweep.steps_horizontal)?;
        positive("sweep.stuck_threshold", self.sweep.stuck_threshold)?;
        positive(
            "sweep.max_consecutive_failures",
            self.sweep.max_consecutive_failures,
        )?;
        positive("sweep.max_transitions", self.sweep.max_transitions)?;
        positive("sweep.repetition_cap", self.sweep.repetition_cap)?;
        positive("grid.repetition_cap", self.grid.repetition_cap)?;

        let positive_degrees = |key: &'static str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid {
                    key,
                    reason: format!("must be a positive number of degrees, got {value}"),
                })
            }
        };
        positive_degrees("sweep.reposition_tolerance", self.sweep.reposition_tolerance)?;
        positive_degrees("grid.grid_size", self.grid.grid_size)?;
        positive_degrees("simulate.step_degrees", self.simulate.step_degrees)?;
        positive_degrees("simulate.lattice_spacing", self.simulate.lattice_spacing)?;

        Ok(())
    }

    /// Resolved path of the durable event list.
    #[must_use]
    pub fn output_path(&self) -> PathBuf {
        self.output_path
            .clone()
            .unwrap_or_else(paths::default_events_path)
    }

    /// Repetition cap of the configured mode.
    #[must_use]
    pub const fn repetition_cap(&self) -> u32 {
        match self.mode {
            DiscoveryMode::Sweep => self.sweep.repetition_cap,
            DiscoveryMode::Grid => self.grid.repetition_cap,
        }
    }

    /// Pause between passes.
    #[must_use]
    pub const fn sleep_between_passes(&self) -> Duration {
        Duration::from_secs(self.sleep_between_passes_secs)
    }

    /// Geocoder request timeout.
    #[must_use]
    pub const fn geocoder_timeout(&self) -> Duration {
        Duration::from_secs(self.geocoder.timeout_secs)
    }

    /// This configuration rewritten for a simulated sweep: sweep mode,
    /// writing to the simulation's own event list.
    #[must_use]
    pub fn simulated(&self) -> Self {
        Self {
            mode: DiscoveryMode::Sweep,
            output_path: Some(self.simulate.output_path.clone()),
            ..self.clone()
        }
    }

    /// Renders the effective configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`toml::ser::Error`] if a value cannot be represented.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Merges `overlay` into `base`: tables merge key by key, every other
/// value replaces what was there.
fn merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use traffic_sweep_incident_models::FingerprintPolicy;

    use super::*;

    #[test]
    fn embedded_defaults_match_code_defaults() {
        assert_eq!(
            IngestConfig::from_layers(None).unwrap(),
            IngestConfig::default()
        );
    }

    #[test]
    fn defaults_are_valid() {
        IngestConfig::from_layers(None).unwrap().validate().unwrap();
    }

    #[test]
    fn overlay_replaces_only_the_keys_it_sets() {
        let config = IngestConfig::from_layers(Some(
            r#"
            mode = "grid"

            [grid]
            grid_size = 0.1

            [pan.locator]
            retries = 4
            "#,
        ))
        .unwrap();

        assert_eq!(config.mode, DiscoveryMode::Grid);
        assert!((config.grid.grid_size - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.grid.repetition_cap, 1);
        assert_eq!(
            config.grid.fingerprint_policy,
            FingerprintPolicy::TypeLocationTime
        );
        assert_eq!(config.pan.locator.retries, 4);
        assert_eq!(config.pan.locator.retry_delay_ms, 600);
        assert_eq!(config.pan.settle_ms, 2000);
        assert_eq!(config.repetition_cap(), 1);
    }

    #[test]
    fn overlay_with_unknown_mode_is_rejected() {
        let err = IngestConfig::from_layers(Some(r#"mode = "drive""#)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn environment_style_overrides() {
        let mut config = IngestConfig::default();
        config
            .apply_overrides(Some("grid"), Some("/tmp/out.json"))
            .unwrap();
        assert_eq!(config.mode, DiscoveryMode::Grid);
        assert_eq!(config.output_path(), PathBuf::from("/tmp/out.json"));

        config.apply_overrides(Some(" "), None).unwrap();
        assert_eq!(config.mode, DiscoveryMode::Grid);

        let err = config.apply_overrides(Some("drive"), None).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "mode", .. }));
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let config = IngestConfig::from_layers(Some(
            "[bounds]\nlat_min = 1.0\nlat_max = 0.0\nlon_min = 0.0\nlon_max = 1.0\n",
        ))
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Bounds(_))));
    }

    #[test]
    fn zero_grid_size_is_rejected() {
        let mut config = IngestConfig::default();
        config.grid.grid_size = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                key: "grid.grid_size",
                ..
            })
        ));
    }

    #[test]
    fn zero_cap_is_rejected() {
        let mut config = IngestConfig::default();
        config.sweep.repetition_cap = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn simulated_config_sweeps_into_its_own_file() {
        let mut config = IngestConfig::default();
        config.mode = DiscoveryMode::Grid;
        let simulated = config.simulated();

        assert_eq!(simulated.mode, DiscoveryMode::Sweep);
        assert_eq!(simulated.output_path(), config.simulate.output_path);
        assert_eq!(simulated.bounds, config.bounds);
    }

    #[test]
    fn effective_config_renders_and_parses_back() {
        let config = IngestConfig::from_layers(None).unwrap();
        let text = config.to_toml().unwrap();
        let reparsed: IngestConfig = toml::from_str(&text).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn missing_override_file_is_a_read_error() {
        let path = std::env::temp_dir().join("traffic_sweep_missing_config.toml");
        let _ = std::fs::remove_file(&path);
        let err = IngestConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
