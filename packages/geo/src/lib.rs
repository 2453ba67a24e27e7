#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Pure geographic math shared by every geotrack engine.
//!
//! All functions are stateless and deterministic. Distances use a spherical
//! Earth model (radius [`EARTH_RADIUS_METERS`]); there is no ellipsoid
//! correction. Travel time estimates use fixed average speeds per
//! [`TravelMode`] and stand in for a real routing provider.

use geo::{Contains, LineString, Point, Polygon};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A WGS84 latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinate {
    /// Latitude in degrees (-90 to 90).
    pub latitude: f64,
    /// Longitude in degrees (-180 to 180).
    pub longitude: f64,
}

impl Coordinate {
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether both components are finite and inside their valid ranges.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        is_valid_coordinate(self.latitude, self.longitude)
    }
}

/// Returns `true` if `lat` is in `[-90, 90]` and `lon` is in `[-180, 180]`.
#[must_use]
pub fn is_valid_coordinate(lat: f64, lon: f64) -> bool {
    lat.is_finite()
        && lon.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lon)
}

/// Great-circle distance in meters between two coordinates.
#[must_use]
pub fn haversine_distance(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Initial great-circle bearing from `a` to `b`, in degrees `[0, 360)`
/// clockwise from true north.
#[must_use]
pub fn initial_bearing_degrees(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos().mul_add(lat2.sin(), -(lat1.sin() * lat2.cos() * d_lon.cos()));

    y.atan2(x).to_degrees().rem_euclid(360.0)
}

/// The eight compass octants.
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CompassDirection {
    North,
    Northeast,
    East,
    Southeast,
    South,
    Southwest,
    West,
    Northwest,
}

impl CompassDirection {
    const OCTANTS: [Self; 8] = [
        Self::North,
        Self::Northeast,
        Self::East,
        Self::Southeast,
        Self::South,
        Self::Southwest,
        Self::West,
        Self::Northwest,
    ];

    /// Snaps a bearing in degrees to the nearest 45° octant.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_degrees(degrees: f64) -> Self {
        let normalized = degrees.rem_euclid(360.0);
        let idx = ((normalized / 45.0).round() as usize) % 8;
        Self::OCTANTS[idx]
    }
}

/// Compass octant from `a` towards `b`.
#[must_use]
pub fn bearing(a: &Coordinate, b: &Coordinate) -> CompassDirection {
    CompassDirection::from_degrees(initial_bearing_degrees(a, b))
}

/// Whether `point` lies within `radius_meters` of `center`.
///
/// The boundary is inclusive: a point exactly `radius_meters` away is
/// inside.
#[must_use]
pub fn point_in_circle(point: &Coordinate, center: &Coordinate, radius_meters: f64) -> bool {
    haversine_distance(point, center) <= radius_meters
}

/// Builds a planar polygon from lat/lon vertices, longitude as `x`.
///
/// The ring is closed automatically if the last vertex does not repeat the
/// first.
#[must_use]
pub fn polygon_from(vertices: &[Coordinate]) -> Polygon<f64> {
    let ring: Vec<(f64, f64)> = vertices
        .iter()
        .map(|v| (v.longitude, v.latitude))
        .collect();
    Polygon::new(LineString::from(ring), vec![])
}

/// Whether `point` lies strictly inside the polygon described by
/// `vertices`, in either winding order. Points on an edge are outside.
/// Rings with fewer than three vertices contain nothing.
#[must_use]
pub fn point_in_polygon(point: &Coordinate, vertices: &[Coordinate]) -> bool {
    if vertices.len() < 3 {
        return false;
    }
    polygon_from(vertices).contains(&Point::new(point.longitude, point.latitude))
}

/// How a traveller moves along a route.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
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
pub enum TravelMode {
    #[default]
    Driving,
    Walking,
    Cycling,
    Transit,
}

impl TravelMode {
    /// Fixed average speed in km/h used for estimates.
    #[must_use]
    pub const fn average_speed_kmh(self) -> f64 {
        match self {
            Self::Driving => 50.0,
            Self::Walking => 5.0,
            Self::Cycling => 15.0,
            Self::Transit => 30.0,
        }
    }

    #[must_use]
    pub fn average_speed_mps(self) -> f64 {
        self.average_speed_kmh() / 3.6
    }
}

/// Estimated seconds to cover `distance_meters` at the mode's average speed.
#[must_use]
pub fn travel_time_estimate(distance_meters: f64, mode: TravelMode) -> f64 {
    distance_meters / mode.average_speed_mps()
}
