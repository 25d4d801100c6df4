#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Planar geometry over the sweep's bounding rectangle.
//!
//! Provides the two spatial computations the discovery engine relies on:
//!
//! * [`grid_cells`] partitions a rectangle into fixed-size cells for the
//!   telemetry poller. Cells are emitted latitude-major, stepping up from
//!   the south-west corner, with the last row/column clamped to the edge.
//! * [`reflect_through_center`] computes the stall-recovery jump target by
//!   mirroring a position through the rectangle's centre.
//!
//! Rectangles are handled as [`geo::Rect`] with `x = longitude` and
//! `y = latitude`.

use geo::{Area, Coord, Intersects, Rect};
use traffic_sweep_geography_models::{BoundingBox, Coordinate};

/// Upper bound on the number of cells a single grid may contain.
pub const MAX_GRID_CELLS: usize = 1_000_000;

/// Slack used when deciding whether the final step overshoots an edge.
const EDGE_EPSILON: f64 = 1e-9;

/// Errors from grid partitioning.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GridError {
    /// The grid size is zero, negative, or not finite.
    #[error("grid size must be a positive finite number of degrees, got {0}")]
    InvalidSize(f64),
    /// The requested grid would exceed [`MAX_GRID_CELLS`].
    #[error("grid of {rows}x{columns} cells exceeds the limit of {MAX_GRID_CELLS}")]
    TooManyCells {
        /// Number of latitude rows.
        rows: usize,
        /// Number of longitude columns.
        columns: usize,
    },
}

/// Converts a bounding box to a [`Rect`] (`x = lon`, `y = lat`).
#[must_use]
pub fn to_rect(bbox: &BoundingBox) -> Rect<f64> {
    Rect::new(
        Coord {
            x: bbox.lon_min,
            y: bbox.lat_min,
        },
        Coord {
            x: bbox.lon_max,
            y: bbox.lat_max,
        },
    )
}

/// Converts a [`Rect`] back to a bounding box.
#[must_use]
pub fn from_rect(rect: &Rect<f64>) -> BoundingBox {
    BoundingBox::new(rect.min().y, rect.max().y, rect.min().x, rect.max().x)
}

/// Whether `point` lies inside the closed rectangle.
#[must_use]
pub fn contains(bbox: &BoundingBox, point: &Coordinate) -> bool {
    to_rect(bbox).intersects(&Coord {
        x: point.longitude,
        y: point.latitude,
    })
}

/// Clamps `point` onto the closed rectangle.
#[must_use]
pub fn clamp(bbox: &BoundingBox, point: &Coordinate) -> Coordinate {
    let rect = to_rect(bbox);
    Coordinate::new(
        point.latitude.clamp(rect.min().y, rect.max().y),
        point.longitude.clamp(rect.min().x, rect.max().x),
    )
}

/// Mirrors `point` through the centre of `bbox`, clamped to the rectangle.
///
/// Per axis this is `max - (current - min)`. For any point inside the
/// rectangle the operation is its own inverse.
#[must_use]
pub fn reflect_through_center(bbox: &BoundingBox, point: &Coordinate) -> Coordinate {
    let rect = to_rect(bbox);
    let (min, max) = (rect.min(), rect.max());
    let mirrored = Coordinate::new(
        max.y - (point.latitude - min.y),
        max.x - (point.longitude - min.x),
    );
    clamp(bbox, &mirrored)
}

/// Area of the rectangle in square degrees.
#[must_use]
pub fn area(bbox: &BoundingBox) -> f64 {
    to_rect(bbox).unsigned_area()
}

/// Number of steps of `size` needed to span `extent`; a zero extent still
/// yields one (degenerate) step.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn step_count(extent: f64, size: f64) -> usize {
    let steps = (extent / size - EDGE_EPSILON).ceil();
    if steps < 1.0 { 1 } else { steps as usize }
}

/// Splits `[min, max]` into consecutive `[lo, hi]` intervals of width `size`,
/// the last one clamped to `max`. Adjacent intervals share their edge
/// exactly.
#[allow(clippy::cast_precision_loss)]
fn axis_intervals(min: f64, max: f64, size: f64) -> Vec<(f64, f64)> {
    let count = step_count(max - min, size);
    (0..count)
        .map(|i| {
            let lo = (i as f64).mul_add(size, min);
            let hi = if i + 1 == count {
                max
            } else {
                ((i + 1) as f64).mul_add(size, min)
            };
            (lo, hi)
        })
        .collect()
}

/// Partitions `bbox` into cells of `grid_size` degrees.
///
/// Cells are ordered by latitude row (south to north), then by longitude
/// column (west to east). The union of the cells is exactly `bbox`; no cell
/// extends past it.
///
/// # Errors
///
/// Returns [`GridError::InvalidSize`] for a non-positive or non-finite
/// `grid_size`, or [`GridError::TooManyCells`] if the grid would be
/// unreasonably large.
pub fn grid_cells(bbox: &BoundingBox, grid_size: f64) -> Result<Vec<BoundingBox>, GridError> {
    if !grid_size.is_finite() || grid_size <= 0.0 {
        return Err(GridError::InvalidSize(grid_size));
    }

    let rect = to_rect(bbox);
    let rows = step_count(rect.height(), grid_size);
    let columns = step_count(rect.width(), grid_size);
    if rows.saturating_mul(columns) > MAX_GRID_CELLS {
        return Err(GridError::TooManyCells { rows, columns });
    }

    let lat_intervals = axis_intervals(rect.min().y, rect.max().y, grid_size);
    let lon_intervals = axis_intervals(rect.min().x, rect.max().x, grid_size);

    let mut cells = Vec::with_capacity(rows * columns);
    for &(lat_lo, lat_hi) in &lat_intervals {
        for &(lon_lo, lon_hi) in &lon_intervals {
            cells.push(BoundingBox::new(lat_lo, lat_hi, lon_lo, lon_hi));
        }
    }

    log::debug!(
        "Partitioned {bbox} into {rows}x{columns} cells of {grid_size} degrees"
    );

    Ok(cells)
}
