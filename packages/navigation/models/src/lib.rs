#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Navigation types.
//!
//! Routes are straight lines between consecutive waypoints; there is no
//! road graph. Each [`RouteSegment`] carries the instructions shown while
//! travelling it, and a [`NavigationSession`] walks those instructions with
//! a `(segment, instruction)` cursor.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use geotrack_geo::{Coordinate, TravelMode};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Role of a waypoint within a route.
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
pub enum WaypointKind {
    Start,
    #[default]
    Intermediate,
    End,
    Poi,
}

/// An ordered stop defining a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Waypoint {
    /// Position of the stop.
    pub location: Coordinate,
    /// Label shown in instructions.
    #[serde(default)]
    pub name: Option<String>,
    /// Role within the route.
    #[serde(default)]
    pub kind: WaypointKind,
}

impl Waypoint {
    #[must_use]
    pub const fn new(location: Coordinate, kind: WaypointKind) -> Self {
        Self {
            location,
            name: None,
            kind,
        }
    }
}

/// A disk the traveller asked to avoid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvoidArea {
    /// Center of the disk.
    pub center: Coordinate,
    /// Radius in meters.
    pub radius_meters: f64,
}

/// Route preferences. Avoidance flags are recorded for clients but do not
/// affect the straight-line geometry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RouteOptions {
    /// Travel mode used for duration estimates.
    pub mode: TravelMode,
    /// Prefer toll-free roads.
    pub avoid_tolls: bool,
    /// Prefer non-highway roads.
    pub avoid_highways: bool,
    /// Regions to route around.
    pub avoid_areas: Vec<AvoidArea>,
}

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
pub enum Maneuver {
    Depart,
    Head,
    Arrive,
}

/// One step shown to the traveller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationInstruction {
    /// Unique instruction ID.
    pub id: Uuid,
    /// Kind of action.
    pub maneuver: Maneuver,
    /// Human-readable instruction.
    pub text: String,
    /// Meters until the next instruction applies.
    pub distance_to_next_meters: f64,
    /// Seconds until the next instruction applies.
    pub duration_to_next_seconds: f64,
    /// Where the instruction applies. The cursor advances when the
    /// traveller comes close to it.
    pub location: Coordinate,
    /// Street or waypoint name, when known.
    pub street_name: Option<String>,
}

/// Observed or reported congestion.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TrafficLevel {
    #[default]
    Unknown,
    Light,
    Moderate,
    Heavy,
    Severe,
}

/// The straight leg between two consecutive waypoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSegment {
    /// Waypoint the leg starts at.
    pub start_point: Coordinate,
    /// Waypoint the leg ends at.
    pub end_point: Coordinate,
    /// Great-circle length in meters.
    pub distance_meters: f64,
    /// Estimated travel time for the route's mode.
    pub duration_seconds: f64,
    /// Steps shown while on this leg, in order.
    pub instructions: Vec<NavigationInstruction>,
    /// Worst traffic reported near either end of the leg.
    pub traffic_condition: TrafficLevel,
}

/// A precomputed route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationRoute {
    /// Unique route ID.
    pub id: Uuid,
    /// User who planned the route.
    pub owner_user_id: String,
    /// Optional display name.
    pub name: Option<String>,
    /// At least two.
    pub waypoints: Vec<Waypoint>,
    /// `waypoints.len() - 1` legs.
    pub segments: Vec<RouteSegment>,
    /// Sum of segment distances.
    pub total_distance_meters: f64,
    /// Sum of segment durations.
    pub total_duration_seconds: f64,
    /// Preferences the route was planned with.
    pub options: RouteOptions,
    /// Free-form client data, opaque to the engine.
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Cleared when a reroute replaces the route.
    pub is_active: bool,
    /// When the route was planned.
    pub created_at: DateTime<Utc>,
}

impl NavigationRoute {
    /// Instruction at a cursor position.
    #[must_use]
    pub fn instruction(&self, segment: usize, instruction: usize) -> Option<&NavigationInstruction> {
        self.segments.get(segment)?.instructions.get(instruction)
    }

    /// Instructions from the cursor onwards, across segment boundaries.
    pub fn instructions_from(
        &self,
        segment: usize,
        instruction: usize,
    ) -> impl Iterator<Item = &NavigationInstruction> {
        self.segments
            .iter()
            .enumerate()
            .skip(segment)
            .flat_map(move |(idx, seg)| {
                let skip = if idx == segment { instruction } else { 0 };
                seg.instructions.iter().skip(skip)
            })
    }
}

/// Input for creating a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRoute {
    /// Ordered stops, at least two.
    pub waypoints: Vec<Waypoint>,
    #[serde(default)]
    pub options: RouteOptions,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// A recorded departure from the planned route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationDeviation {
    /// Unique deviation ID.
    pub id: Uuid,
    /// Server time of the sample.
    pub timestamp: DateTime<Utc>,
    /// Where the traveller was.
    pub location: Coordinate,
    /// Distance to the nearest route segment.
    pub deviation_distance_meters: f64,
    /// Set when a reroute resolved this deviation.
    pub was_rerouted: bool,
}

/// A traveller following a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationSession {
    /// Unique session ID.
    pub id: Uuid,
    /// Traveller following the route.
    pub user_id: String,
    /// Route currently followed. Changes on reroute.
    pub route_id: Uuid,
    /// Cursor segment.
    pub current_segment_index: usize,
    /// Cursor instruction within the segment.
    pub current_instruction_index: usize,
    /// Last reported position.
    pub current_location: Coordinate,
    /// When navigation started.
    pub start_time: DateTime<Utc>,
    /// Now plus the remaining instruction durations.
    pub estimated_arrival: DateTime<Utc>,
    /// Every recorded deviation, oldest first.
    pub deviations: Vec<NavigationDeviation>,
    /// Number of reroutes so far.
    pub reroute_count: u32,
    /// Raised by a large or repeated deviation; cleared by a reroute.
    pub needs_reroute: bool,
    /// Cleared when navigation stops or arrives.
    pub is_active: bool,
    /// The cursor ran past the final instruction.
    pub arrived: bool,
    /// When the most recent reroute happened.
    pub last_reroute_at: Option<DateTime<Utc>>,
    /// When the session stopped being active.
    pub ended_at: Option<DateTime<Utc>>,
}

impl NavigationSession {
    /// Deviations recorded since the most recent reroute.
    #[must_use]
    pub fn recent_deviation_count(&self) -> usize {
        self.deviations
            .iter()
            .filter(|d| self.last_reroute_at.is_none_or(|at| d.timestamp > at))
            .count()
    }
}

/// Result of feeding a location into a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationUpdate {
    pub session_id: Uuid,
    pub route_id: Uuid,
    pub current_segment_index: usize,
    pub current_instruction_index: usize,
    /// `None` once the session has arrived.
    pub current_instruction: Option<NavigationInstruction>,
    /// Up to the configured lookahead of following instructions.
    pub upcoming_instructions: Vec<NavigationInstruction>,
    pub deviation_meters: f64,
    pub needs_reroute: bool,
    pub arrived: bool,
    pub is_active: bool,
    pub estimated_arrival: DateTime<Utc>,
}

/// A session after a reroute, with the route it now follows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationReroute {
    pub session: NavigationSession,
    pub route: NavigationRoute,
}

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
pub enum TrafficType {
    Accident,
    Construction,
    Congestion,
    RoadClosure,
    Event,
}

/// A reported traffic incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficUpdate {
    /// Unique report ID.
    pub id: Uuid,
    /// Center of the affected area.
    pub location: Coordinate,
    /// Radius of the affected area in meters.
    pub radius_meters: f64,
    /// How bad it is.
    pub severity: TrafficLevel,
    /// What happened.
    pub traffic_type: TrafficType,
    /// Free-text details.
    pub description: Option<String>,
    /// When the incident began.
    pub start_time: DateTime<Utc>,
    /// Without an end time the update expires after the default TTL.
    pub end_time: Option<DateTime<Utc>>,
    /// User who reported it.
    pub reported_by: String,
}

/// Input for reporting traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTrafficUpdate {
    pub location: Coordinate,
    pub radius_meters: f64,
    pub severity: TrafficLevel,
    pub traffic_type: TrafficType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointOfInterest {
    /// Provider-assigned ID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Category used for filtering (e.g. "fuel").
    pub category: String,
    /// Position.
    pub location: Coordinate,
    /// Street address, when known.
    pub address: Option<String>,
    /// Distance from the query location, filled in by searches.
    pub distance_meters: Option<f64>,
}

/// Tunables for the navigation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NavigationConfig {
    /// Deviations beyond this are recorded.
    pub deviation_threshold_meters: f64,
    /// A single deviation beyond this requests a reroute.
    pub reroute_threshold_meters: f64,
    /// More recorded deviations than this request a reroute.
    pub max_deviations: usize,
    /// Distance at which the cursor moves past an instruction.
    pub advance_radius_meters: f64,
    /// Upcoming instructions returned with each update.
    pub lookahead: usize,
    /// Lifetime of traffic reports without an end time.
    pub traffic_default_ttl_hours: i64,
    /// Ended sessions are dropped this long after they end.
    pub session_retention_hours: i64,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            deviation_threshold_meters: 100.0,
            reroute_threshold_meters: 500.0,
            max_deviations: 3,
            advance_radius_meters: 50.0,
            lookahead: 3,
            traffic_default_ttl_hours: 24,
            session_retention_hours: 24,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instruction(text: &str) -> NavigationInstruction {
        NavigationInstruction {
            id: Uuid::new_v4(),
            maneuver: Maneuver::Head,
            text: text.to_string(),
            distance_to_next_meters: 0.0,
            duration_to_next_seconds: 0.0,
            location: Coordinate::new(0.0, 0.0),
            street_name: None,
        }
    }

    fn segment(texts: &[&str]) -> RouteSegment {
        RouteSegment {
            start_point: Coordinate::new(0.0, 0.0),
            end_point: Coordinate::new(0.0, 0.0),
            distance_meters: 0.0,
            duration_seconds: 0.0,
            instructions: texts.iter().map(|t| instruction(t)).collect(),
            traffic_condition: TrafficLevel::Unknown,
        }
    }

    #[test]
    fn instructions_from_crosses_segments() {
        let route = NavigationRoute {
            id: Uuid::new_v4(),
            owner_user_id: "alice".to_string(),
            name: None,
            waypoints: vec![],
            segments: vec![segment(&["a", "b"]), segment(&["c"]), segment(&["d", "e"])],
            total_distance_meters: 0.0,
            total_duration_seconds: 0.0,
            options: RouteOptions::default(),
            metadata: BTreeMap::new(),
            is_active: true,
            created_at: Utc::now(),
        };

        let texts: Vec<&str> = route
            .instructions_from(0, 1)
            .map(|i| i.text.as_str())
            .collect();
        assert_eq!(texts, vec!["b", "c", "d", "e"]);

        let texts: Vec<&str> = route
            .instructions_from(2, 0)
            .map(|i| i.text.as_str())
            .collect();
        assert_eq!(texts, vec!["d", "e"]);

        assert_eq!(route.instruction(1, 0).unwrap().text, "c");
        assert!(route.instruction(1, 1).is_none());
        assert!(route.instruction(3, 0).is_none());
    }

    #[test]
    fn route_options_default_to_driving() {
        let options: RouteOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.mode, TravelMode::Driving);
        assert!(options.avoid_areas.is_empty());
    }

    #[test]
    fn traffic_levels_are_ordered() {
        assert!(TrafficLevel::Severe > TrafficLevel::Heavy);
        assert!(TrafficLevel::Light > TrafficLevel::Unknown);
        assert_eq!("road_closure".parse::<TrafficType>().unwrap(), TrafficType::RoadClosure);
    }
}
