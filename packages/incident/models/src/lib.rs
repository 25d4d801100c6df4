#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Traffic event records and the fingerprints used to deduplicate them.
//!
//! An [`EventRecord`] is what the discovery engine persists. Its
//! `event_id` is not a provider identifier but a fingerprint derived by a
//! configurable [`FingerprintPolicy`]; two records with the same
//! fingerprint are the same logical incident occurrence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Placeholder for a missing type or reporter.
pub const UNKNOWN: &str = "Desconocido";

/// Placeholder for a missing address or report time.
pub const NOT_AVAILABLE: &str = "No disponible";

/// A normalized traffic event as written to the durable event list.
///
/// Field names match the JSON consumed by the downstream document store
/// importer, which upserts on `event_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Fingerprint used as the deduplication key.
    #[serde(default)]
    pub event_id: String,
    /// Event type as displayed or reported (e.g. `"ACCIDENT"`).
    #[serde(rename = "type", default = "unknown")]
    pub event_type: String,
    /// Human-readable address.
    #[serde(default = "not_available")]
    pub address: String,
    /// When the event was reported. Relative text in panning mode
    /// (`"hace 5 minutos"`), RFC 3339 in polling mode.
    #[serde(default = "not_available")]
    pub report_time: String,
    /// Who reported the event.
    #[serde(default = "unknown")]
    pub reporter: String,
    /// Latitude (WGS84), if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    /// Longitude (WGS84), if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// Provider confidence score (polling mode only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<i64>,
}

fn unknown() -> String {
    UNKNOWN.to_string()
}

fn not_available() -> String {
    NOT_AVAILABLE.to_string()
}

/// Fields that may feed a fingerprint.
///
/// Panning mode fills the text fields from the marker's detail view;
/// polling mode fills the coordinate and publication time from the raw
/// alert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FingerprintInput<'a> {
    /// Event type.
    pub event_type: &'a str,
    /// Address text.
    pub address: &'a str,
    /// Reporter name.
    pub reporter: &'a str,
    /// Latitude.
    pub latitude: Option<f64>,
    /// Longitude.
    pub longitude: Option<f64>,
    /// Provider publication time in epoch milliseconds.
    pub pub_millis: Option<i64>,
}

/// How an event's fingerprint is derived.
///
/// Both policies are heuristics: `ReporterAddressType` merges distinct
/// incidents filed by the same reporter at the same address, while
/// `TypeLocationTime` only matches exact coordinate and time repeats.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FingerprintPolicy {
    /// `reporter-address-type`, the key event lists written by the
    /// panning scraper already carry.
    ReporterAddressType,
    /// `type|lat(4dp)|lon(4dp)|pubMillis`
    TypeLocationTime,
}

impl FingerprintPolicy {
    /// Computes the fingerprint for `input`.
    ///
    /// Missing numeric parts render as `-`.
    #[must_use]
    pub fn fingerprint(self, input: &FingerprintInput<'_>) -> String {
        match self {
            Self::ReporterAddressType => {
                format!("{}-{}-{}", input.reporter, input.address, input.event_type)
            }
            Self::TypeLocationTime => {
                let lat = input
                    .latitude
                    .map_or_else(|| "-".to_string(), |v| format!("{v:.4}"));
                let lon = input
                    .longitude
                    .map_or_else(|| "-".to_string(), |v| format!("{v:.4}"));
                let millis = input
                    .pub_millis
                    .map_or_else(|| "-".to_string(), |v| v.to_string());
                format!("{}|{lat}|{lon}|{millis}", input.event_type)
            }
        }
    }

    /// Whether the fingerprint depends on the address, which in polling
    /// mode costs a reverse-geocoding request.
    #[must_use]
    pub const fn needs_address(self) -> bool {
        matches!(self, Self::ReporterAddressType)
    }
}

/// Location of a raw telemetry alert (`x` = longitude, `y` = latitude).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertLocation {
    /// Longitude.
    pub x: f64,
    /// Latitude.
    pub y: f64,
}

/// An alert as returned by the telemetry endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAlert {
    /// Alert type (e.g. `"JAM"`, `"ACCIDENT"`).
    #[serde(rename = "type", default)]
    pub alert_type: Option<String>,
    /// Alert subtype, if any.
    #[serde(default)]
    pub subtype: Option<String>,
    /// Alert position.
    #[serde(default)]
    pub location: Option<AlertLocation>,
    /// Publication time in epoch milliseconds.
    #[serde(default)]
    pub pub_millis: Option<i64>,
    /// Reporter display name.
    #[serde(default)]
    pub report_by: Option<String>,
    /// Provider confidence score.
    #[serde(default)]
    pub confidence: Option<i64>,
    /// Provider-issued identifier. Not used for deduplication.
    #[serde(default)]
    pub uuid: Option<String>,
}

impl RawAlert {
    /// The alert type, or [`UNKNOWN`].
    #[must_use]
    pub fn type_or_unknown(&self) -> &str {
        self.alert_type.as_deref().unwrap_or(UNKNOWN)
    }

    /// Latitude/longitude of the alert, if it carries a location.
    #[must_use]
    pub fn lat_lon(&self) -> Option<(f64, f64)> {
        self.location.map(|loc| (loc.y, loc.x))
    }

    /// Publication time as a UTC timestamp.
    #[must_use]
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.pub_millis.and_then(DateTime::from_timestamp_millis)
    }

    /// Fingerprint input built from this alert and a resolved address.
    #[must_use]
    pub fn fingerprint_input<'a>(&'a self, address: &'a str) -> FingerprintInput<'a> {
        let (latitude, longitude) = self.lat_lon().unzip();
        FingerprintInput {
            event_type: self.type_or_unknown(),
            address,
            reporter: self.report_by.as_deref().unwrap_or(UNKNOWN),
            latitude,
            longitude,
            pub_millis: self.pub_millis,
        }
    }
}

/// Body of a telemetry response. A missing `alerts` key means no alerts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryResponse {
    /// Alerts inside the requested rectangle.
    #[serde(default)]
    pub alerts: Vec<RawAlert>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reporter_address_type_fingerprint() {
        let input = FingerprintInput {
            event_type: "Accidente",
            address: "CalleX",
            reporter: "Juan",
            ..FingerprintInput::default()
        };
        assert_eq!(
            FingerprintPolicy::ReporterAddressType.fingerprint(&input),
            "Juan-CalleX-Accidente"
        );
    }

    #[test]
    fn reporter_address_type_fingerprint_uses_placeholders_verbatim() {
        let input = FingerprintInput {
            event_type: "Peligro",
            address: NOT_AVAILABLE,
            reporter: UNKNOWN,
            ..FingerprintInput::default()
        };
        assert_eq!(
            FingerprintPolicy::ReporterAddressType.fingerprint(&input),
            "Desconocido-No disponible-Peligro"
        );
    }

    #[test]
    fn type_location_time_fingerprint_rounds_coordinates() {
        let input = FingerprintInput {
            event_type: "JAM",
            latitude: Some(-33.456_789),
            longitude: Some(-70.654_321),
            pub_millis: Some(1_700_000_000_000),
            ..FingerprintInput::default()
        };
        assert_eq!(
            FingerprintPolicy::TypeLocationTime.fingerprint(&input),
            "JAM|-33.4568|-70.6543|1700000000000"
        );
    }

    #[test]
    fn type_location_time_fingerprint_marks_missing_parts() {
        let input = FingerprintInput {
            event_type: "HAZARD",
            ..FingerprintInput::default()
        };
        assert_eq!(
            FingerprintPolicy::TypeLocationTime.fingerprint(&input),
            "HAZARD|-|-|-"
        );
    }

    #[test]
    fn policy_parses_from_snake_case() {
        assert_eq!(
            "type_location_time".parse::<FingerprintPolicy>().unwrap(),
            FingerprintPolicy::TypeLocationTime
        );
        assert!(FingerprintPolicy::ReporterAddressType.needs_address());
        assert!(!FingerprintPolicy::TypeLocationTime.needs_address());
    }

    #[test]
    fn event_record_serializes_with_expected_keys() {
        let record = EventRecord {
            event_id: "a-b-c".to_string(),
            event_type: "c".to_string(),
            address: "b".to_string(),
            report_time: "hace 2 minutos".to_string(),
            reporter: "a".to_string(),
            latitude: None,
            longitude: None,
            confidence: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "c");
        assert_eq!(json["report_time"], "hace 2 minutos");
        assert!(json.get("latitude").is_none());
        assert!(json.get("confidence").is_none());
    }

    #[test]
    fn event_record_tolerates_missing_fields() {
        let record: EventRecord = serde_json::from_str(r#"{"event_id": "x"}"#).unwrap();
        assert_eq!(record.event_type, UNKNOWN);
        assert_eq!(record.address, NOT_AVAILABLE);
        assert_eq!(record.reporter, UNKNOWN);
        assert!(record.latitude.is_none());
    }

    #[test]
    fn raw_alert_parses_telemetry_shape() {
        let body = serde_json::json!({
            "alerts": [{
                "type": "ACCIDENT",
                "subtype": "ACCIDENT_MAJOR",
                "location": {"x": -70.65, "y": -33.45},
                "pubMillis": 1_700_000_000_000_i64,
                "reportBy": "driver42",
                "confidence": 3,
                "uuid": "abc"
            }, {
                "type": "JAM"
            }]
        });
        let response: TelemetryResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.alerts.len(), 2);

        let first = &response.alerts[0];
        assert_eq!(first.lat_lon(), Some((-33.45, -70.65)));
        assert_eq!(first.report_by.as_deref(), Some("driver42"));
        assert_eq!(
            first.published_at().unwrap().timestamp_millis(),
            1_700_000_000_000
        );

        let second = &response.alerts[1];
        assert!(second.lat_lon().is_none());
        assert!(second.published_at().is_none());
        assert_eq!(second.fingerprint_input("addr").reporter, UNKNOWN);
    }

    #[test]
    fn missing_alerts_key_is_empty() {
        let response: TelemetryResponse = serde_json::from_str("{}").unwrap();
        assert!(response.alerts.is_empty());
    }
}
