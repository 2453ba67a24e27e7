#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geofence zone, membership and event types.
//!
//! A [`GeofenceZone`] is a circle or polygon with enter/exit/dwell
//! triggers. Membership per user is tracked in [`UserGeofenceState`], which
//! is transient and rebuilt from incoming samples. [`GeofenceEvent`]s are
//! immutable once emitted.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use geotrack_geo::{Coordinate, point_in_circle, point_in_polygon};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Zone shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum GeofenceGeometry {
    Circle {
        /// Center of the disk.
        center: Coordinate,
        /// Great-circle radius in meters.
        radius_meters: f64,
    },
    /// Open ring; the closing edge back to the first vertex is implied.
    Polygon { vertices: Vec<Coordinate> },
}

impl GeofenceGeometry {
    /// Circle boundary is inclusive. Points on a polygon edge or vertex are
    /// outside.
    #[must_use]
    pub fn contains(&self, point: &Coordinate) -> bool {
        match self {
            Self::Circle {
                center,
                radius_meters,
            } => point_in_circle(point, center, *radius_meters),
            Self::Polygon { vertices } => point_in_polygon(point, vertices),
        }
    }
}

/// Which transitions produce events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GeofenceTriggers {
    /// Emit `enter` on an outside to inside transition.
    pub on_enter: bool,
    /// Emit `exit` on an inside to outside transition.
    pub on_exit: bool,
    /// Emit repeating `dwell` events while inside. Requires `on_enter`.
    pub on_dwell: bool,
    /// Minutes of continuous containment per dwell event. Falls back to
    /// [`GeofenceConfig::default_dwell_minutes`] when unset.
    pub dwell_minutes: Option<u32>,
}

impl Default for GeofenceTriggers {
    fn default() -> Self {
        Self {
            on_enter: true,
            on_exit: true,
            on_dwell: false,
            dwell_minutes: None,
        }
    }
}

/// A named spatial region watched for membership transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceZone {
    /// Unique zone ID.
    pub id: Uuid,
    /// User who created the zone and receives its notifications.
    pub owner_id: String,
    /// Display name. Never blank.
    pub name: String,
    /// Optional longer description.
    pub description: Option<String>,
    /// Circle or polygon shape.
    pub geometry: GeofenceGeometry,
    /// Which transitions produce events.
    pub triggers: GeofenceTriggers,
    /// Inactive zones are skipped and hold no memberships.
    pub is_active: bool,
    /// Free-form client data, opaque to the engine.
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// When the zone was created.
    pub created_at: DateTime<Utc>,
    /// When the zone was last modified.
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGeofence {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub geometry: GeofenceGeometry,
    #[serde(default)]
    pub triggers: GeofenceTriggers,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Partial update of a zone. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GeofenceUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub geometry: Option<GeofenceGeometry>,
    pub triggers: Option<GeofenceTriggers>,
    pub is_active: Option<bool>,
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
}

/// A user's current zone memberships and dwell timers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserGeofenceState {
    /// User this state belongs to.
    pub user_id: String,
    /// Active zones the user was inside at the last update.
    pub current_zone_ids: BTreeSet<Uuid>,
    /// Zone ID -> start of the current dwell period.
    pub dwell_entry_timestamps: BTreeMap<Uuid, DateTime<Utc>>,
    /// Server time of the last processed sample.
    pub updated_at: DateTime<Utc>,
}

impl UserGeofenceState {
    #[must_use]
    pub const fn new(user_id: String, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            current_zone_ids: BTreeSet::new(),
            dwell_entry_timestamps: BTreeMap::new(),
            updated_at: now,
        }
    }
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
pub enum GeofenceEventType {
    Enter,
    Exit,
    Dwell,
}

/// An emitted membership transition. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceEvent {
    /// Unique event ID.
    pub id: Uuid,
    /// User whose movement caused the event.
    pub user_id: String,
    /// Zone the transition happened in.
    pub geofence_id: Uuid,
    /// Enter, exit or dwell.
    pub event_type: GeofenceEventType,
    /// Server time of the triggering sample.
    pub timestamp: DateTime<Utc>,
    /// Where the user was.
    pub location: Coordinate,
    /// Only set for dwell events.
    pub dwell_duration_minutes: Option<i64>,
}

/// Filters for the event log. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GeofenceEventFilter {
    /// Only events for this user.
    pub user_id: Option<String>,
    /// Only events in this zone.
    pub geofence_id: Option<Uuid>,
    /// Only events of this type.
    pub event_type: Option<GeofenceEventType>,
    /// Inclusive lower bound on event time.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on event time.
    pub to: Option<DateTime<Utc>>,
    /// Keep only the most recent `limit` matches.
    pub limit: Option<usize>,
}

impl GeofenceEventFilter {
    #[must_use]
    pub fn matches(&self, event: &GeofenceEvent) -> bool {
        self.user_id.as_ref().is_none_or(|u| *u == event.user_id)
            && self.geofence_id.is_none_or(|g| g == event.geofence_id)
            && self.event_type.is_none_or(|t| t == event.event_type)
            && self.from.is_none_or(|from| event.timestamp >= from)
            && self.to.is_none_or(|to| event.timestamp <= to)
    }
}

/// Tunables for the geofence engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GeofenceConfig {
    /// Largest accepted circle radius.
    pub max_circle_radius_meters: f64,
    /// Fewest polygon vertices accepted.
    pub min_polygon_vertices: usize,
    /// Most polygon vertices accepted.
    pub max_polygon_vertices: usize,
    /// Dwell duration for zones that leave `dwell_minutes` unset.
    pub default_dwell_minutes: u32,
    /// Events and notification records older than this are pruned.
    pub retention_days: i64,
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            max_circle_radius_meters: 50_000.0,
            min_polygon_vertices: 3,
            max_polygon_vertices: 100,
            default_dwell_minutes: 5,
            retention_days: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_uses_tagged_json() {
        let json = r#"{"type":"circle","center":{"latitude":52.0,"longitude":4.0},"radiusMeters":100.0}"#;
        let geometry: GeofenceGeometry = serde_json::from_str(json).unwrap();
        assert_eq!(
            geometry,
            GeofenceGeometry::Circle {
                center: Coordinate::new(52.0, 4.0),
                radius_meters: 100.0,
            }
        );

        let json = r#"{"type":"polygon","vertices":[
            {"latitude":0.0,"longitude":0.0},
            {"latitude":0.0,"longitude":1.0},
            {"latitude":1.0,"longitude":1.0}]}"#;
        let geometry: GeofenceGeometry = serde_json::from_str(json).unwrap();
        assert!(matches!(geometry, GeofenceGeometry::Polygon { ref vertices } if vertices.len() == 3));
    }

    #[test]
    fn triggers_default_to_enter_and_exit() {
        let triggers: GeofenceTriggers = serde_json::from_str("{}").unwrap();
        assert!(triggers.on_enter);
        assert!(triggers.on_exit);
        assert!(!triggers.on_dwell);
    }

    #[test]
    fn circle_contains_is_inclusive() {
        let center = Coordinate::new(52.0, 4.0);
        let point = Coordinate::new(52.0, 4.001);
        let distance = geotrack_geo::haversine_distance(&center, &point);

        let at = GeofenceGeometry::Circle {
            center,
            radius_meters: distance,
        };
        let inside = GeofenceGeometry::Circle {
            center,
            radius_meters: distance + 0.01,
        };
        let outside = GeofenceGeometry::Circle {
            center,
            radius_meters: distance - 0.01,
        };

        assert!(at.contains(&point));
        assert!(inside.contains(&point));
        assert!(!outside.contains(&point));
    }

    #[test]
    fn event_filter_matches_fields() {
        let now = Utc::now();
        let zone = Uuid::new_v4();
        let event = GeofenceEvent {
            id: Uuid::new_v4(),
            user_id: "alice".to_string(),
            geofence_id: zone,
            event_type: GeofenceEventType::Enter,
            timestamp: now,
            location: Coordinate::new(52.0, 4.0),
            dwell_duration_minutes: None,
        };

        assert!(GeofenceEventFilter::default().matches(&event));
        assert!(
            GeofenceEventFilter {
                user_id: Some("alice".to_string()),
                geofence_id: Some(zone),
                event_type: Some(GeofenceEventType::Enter),
                ..GeofenceEventFilter::default()
            }
            .matches(&event)
        );
        assert!(
            !GeofenceEventFilter {
                event_type: Some(GeofenceEventType::Exit),
                ..GeofenceEventFilter::default()
            }
            .matches(&event)
        );
        assert!(
            !GeofenceEventFilter {
                from: Some(now + chrono::Duration::seconds(1)),
                ..GeofenceEventFilter::default()
            }
            .matches(&event)
        );
    }
}
