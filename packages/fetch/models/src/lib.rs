#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Plain data types shared by the bulk-fetch toolkit.
//!
//! [`BoundingBox`] and [`DateWindow`] describe *what* to fetch, [`PageInfo`]
//! is the cursor envelope returned by paginated GraphQL connections, and
//! [`FlatRecord`] is the shape every fetched record is flattened into
//! before it is handed to a sink.

use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// A flattened record: field name to scalar JSON value.
///
/// Sinks treat `Null` as an empty cell. Nested objects and arrays should
/// be flattened away before a record reaches a sink.
pub type FlatRecord = BTreeMap<String, serde_json::Value>;

/// A WGS84 coordinate, serialized as `{"lat": .., "lon": ..}` which is the
/// `InputLocation` shape the upstream GraphQL API expects.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
}

impl LatLon {
    #[must_use]
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// A rectangular region given by its northeast and southwest corners.
///
/// Callers are responsible for `ne.lat >= sw.lat` and `ne.lon >= sw.lon`;
/// [`BoundingBox::is_well_formed`] only performs a shape check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Northeast corner.
    pub ne: LatLon,
    /// Southwest corner.
    pub sw: LatLon,
}

impl BoundingBox {
    #[must_use]
    pub const fn new(ne: LatLon, sw: LatLon) -> Self {
        Self { ne, sw }
    }

    /// Returns `true` if every coordinate is finite, within the valid
    /// latitude/longitude ranges, and the corners are ordered.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        let in_range = |p: &LatLon| {
            p.lat.is_finite()
                && p.lon.is_finite()
                && (-90.0..=90.0).contains(&p.lat)
                && (-180.0..=180.0).contains(&p.lon)
        };
        in_range(&self.ne)
            && in_range(&self.sw)
            && self.ne.lat >= self.sw.lat
            && self.ne.lon >= self.sw.lon
    }

    /// Partitions the box into `rows * cols` equal sub-boxes in row-major
    /// order, starting at the southwest corner.
    ///
    /// Grid lines are computed by linear interpolation between the corners
    /// and the outer edges are copied from `self` verbatim, so adjacent
    /// tiles share exactly the same boundary values and the union of all
    /// tiles is exactly `self`. A zero dimension is treated as one.
    #[must_use]
    pub fn tiles(&self, rows: u32, cols: u32) -> Vec<Self> {
        let rows = rows.max(1);
        let cols = cols.max(1);

        let lat_edges = interpolate_edges(self.sw.lat, self.ne.lat, rows);
        let lon_edges = interpolate_edges(self.sw.lon, self.ne.lon, cols);

        let mut tiles = Vec::with_capacity((rows as usize) * (cols as usize));
        for lat in lat_edges.windows(2) {
            for lon in lon_edges.windows(2) {
                tiles.push(Self {
                    ne: LatLon::new(lat[1], lon[1]),
                    sw: LatLon::new(lat[0], lon[0]),
                });
            }
        }
        tiles
    }
}

/// Returns `steps + 1` edge values from `start` to `end` inclusive, with
/// the endpoints exact.
fn interpolate_edges(start: f64, end: f64, steps: u32) -> Vec<f64> {
    let span = end - start;
    (0..=steps)
        .map(|i| {
            if i == 0 {
                start
            } else if i == steps {
                end
            } else {
                start + span * f64::from(i) / f64::from(steps)
            }
        })
        .collect()
}

/// Returned by [`DateWindow::new`] when `from` is after `to`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid date window: {from} is after {to}")]
pub struct InvalidDateWindow {
    /// Requested start date.
    pub from: NaiveDate,
    /// Requested end date.
    pub to: NaiveDate,
}

/// An inclusive range of calendar days.
///
/// Serializes as `{"from": "YYYY-MM-DD", "to": "YYYY-MM-DD"}`, which is the
/// `InputDuration` shape of the upstream GraphQL `period` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    /// First day (inclusive).
    pub from: NaiveDate,
    /// Last day (inclusive).
    pub to: NaiveDate,
}

impl DateWindow {
    /// Creates a window, rejecting `from > to`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidDateWindow`] if `from` is after `to`.
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self, InvalidDateWindow> {
        if from > to {
            return Err(InvalidDateWindow { from, to });
        }
        Ok(Self { from, to })
    }

    /// Narrows the start of the window to `earliest` when data is known not
    /// to exist before that day.
    ///
    /// Returns `None` when `earliest` is after the end of the window, i.e.
    /// nothing inside the window can have data.
    #[must_use]
    pub fn narrowed_to(&self, earliest: NaiveDate) -> Option<Self> {
        if earliest > self.to {
            return None;
        }
        Some(Self {
            from: self.from.max(earliest),
            to: self.to,
        })
    }

    /// Number of days in the window (always at least 1).
    #[must_use]
    pub fn num_days(&self) -> u64 {
        u64::try_from((self.to - self.from).num_days()).unwrap_or(0) + 1
    }

    /// Iterates every day of the window in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let to = self.to;
        std::iter::successors(Some(self.from), move |d| {
            d.checked_add_days(Days::new(1)).filter(|next| *next <= to)
        })
    }
}

impl std::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} → {}", self.from, self.to)
    }
}

/// Cursor envelope of a paginated GraphQL connection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// Whether another page follows this one.
    pub has_next_page: bool,
    /// Opaque continuation token for the next page.
    #[serde(default)]
    pub end_cursor: Option<String>,
}
