#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Coordinate, bounding rectangle, and map direction types.
//!
//! These types describe where the map view is and which region a sweep or
//! polling cycle must cover. They carry no traversal logic; see
//! `traffic_sweep_spatial` for grid partitioning and reflection.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A WGS84 point as read from the map's coordinate display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
}

impl Coordinate {
    /// Creates a coordinate from a latitude/longitude pair.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Location key rounded to four decimal places (`"lat,lon"`).
    ///
    /// Two coordinates with the same key are treated as the same view
    /// position for stall and no-movement detection.
    #[must_use]
    pub fn location_key(&self) -> String {
        format!("{:.4},{:.4}", self.latitude, self.longitude)
    }

    /// Whether both axes are within `tolerance` degrees of `other`.
    #[must_use]
    pub fn is_near(&self, other: &Self, tolerance: f64) -> bool {
        (self.latitude - other.latitude).abs() < tolerance
            && (self.longitude - other.longitude).abs() < tolerance
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lat={:.4}, Lon={:.4}", self.latitude, self.longitude)
    }
}

/// A closed latitude/longitude rectangle.
///
/// Used both for the deployment's target area and for individual polling
/// grid cells.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Southern edge.
    pub lat_min: f64,
    /// Northern edge.
    pub lat_max: f64,
    /// Western edge.
    pub lon_min: f64,
    /// Eastern edge.
    pub lon_max: f64,
}

/// Error returned when a [`BoundingBox`] is malformed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidBoundsError {
    /// A bound is NaN or infinite.
    #[error("bounding box has a non-finite edge")]
    NonFinite,
    /// A minimum edge is greater than its maximum.
    #[error("bounding box {axis} minimum {min} exceeds maximum {max}")]
    Inverted {
        /// `"latitude"` or `"longitude"`.
        axis: &'static str,
        /// The minimum edge.
        min: f64,
        /// The maximum edge.
        max: f64,
    },
    /// An edge lies outside the valid WGS84 range.
    #[error("bounding box {axis} edge {value} is out of range")]
    OutOfRange {
        /// `"latitude"` or `"longitude"`.
        axis: &'static str,
        /// The offending edge.
        value: f64,
    },
}

impl BoundingBox {
    /// Creates a bounding box from its four edges.
    #[must_use]
    pub const fn new(lat_min: f64, lat_max: f64, lon_min: f64, lon_max: f64) -> Self {
        Self {
            lat_min,
            lat_max,
            lon_min,
            lon_max,
        }
    }

    /// Checks that all edges are finite, ordered, and within WGS84 range.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidBoundsError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), InvalidBoundsError> {
        let edges = [self.lat_min, self.lat_max, self.lon_min, self.lon_max];
        if edges.iter().any(|v| !v.is_finite()) {
            return Err(InvalidBoundsError::NonFinite);
        }
        if self.lat_min > self.lat_max {
            return Err(InvalidBoundsError::Inverted {
                axis: "latitude",
                min: self.lat_min,
                max: self.lat_max,
            });
        }
        if self.lon_min > self.lon_max {
            return Err(InvalidBoundsError::Inverted {
                axis: "longitude",
                min: self.lon_min,
                max: self.lon_max,
            });
        }
        for value in [self.lat_min, self.lat_max] {
            if !(-90.0..=90.0).contains(&value) {
                return Err(InvalidBoundsError::OutOfRange {
                    axis: "latitude",
                    value,
                });
            }
        }
        for value in [self.lon_min, self.lon_max] {
            if !(-180.0..=180.0).contains(&value) {
                return Err(InvalidBoundsError::OutOfRange {
                    axis: "longitude",
                    value,
                });
            }
        }
        Ok(())
    }

    /// The centre point of the rectangle.
    #[must_use]
    pub fn center(&self) -> Coordinate {
        Coordinate::new(
            f64::midpoint(self.lat_min, self.lat_max),
            f64::midpoint(self.lon_min, self.lon_max),
        )
    }

    /// Whether `point` lies inside the closed rectangle.
    #[must_use]
    pub fn contains(&self, point: &Coordinate) -> bool {
        (self.lat_min..=self.lat_max).contains(&point.latitude)
            && (self.lon_min..=self.lon_max).contains(&point.longitude)
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.4}, {:.4}] x [{:.4}, {:.4}]",
            self.lat_min, self.lat_max, self.lon_min, self.lon_max
        )
    }
}

/// A directional move command for the map surface.
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
pub enum PanDirection {
    /// North (increasing latitude).
    Up,
    /// South (decreasing latitude).
    Down,
    /// West (decreasing longitude).
    Left,
    /// East (increasing longitude).
    Right,
}

impl PanDirection {
    /// The direction pointing the other way along the same axis.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    /// Whether this direction moves along the latitude axis.
    #[must_use]
    pub const fn is_vertical(self) -> bool {
        matches!(self, Self::Up | Self::Down)
    }
}
