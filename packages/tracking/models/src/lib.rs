#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Location tracking types.
//!
//! A [`LocationPoint`] is immutable once recorded. Each user owns at most
//! one [`UserLocationHistory`], which is capped at
//! [`TrackingConfig::max_history`] samples (oldest evicted first).

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use geotrack_geo::Coordinate;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// A single location sample reported by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in meters.
    pub accuracy: f64,
    /// Meters above sea level.
    pub altitude: Option<f64>,
    /// Degrees clockwise from true north.
    pub heading: Option<f64>,
    /// Meters per second.
    pub speed: Option<f64>,
    /// When the client took the sample.
    pub timestamp: DateTime<Utc>,
}

impl LocationPoint {
    /// A bare sample with only position and time.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: 0.0,
            altitude: None,
            heading: None,
            speed: None,
            timestamp,
        }
    }

    #[must_use]
    pub const fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// Client-side sampling profile.
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
pub enum TrackingMode {
    Precise,
    #[default]
    Balanced,
    BatterySaving,
}

impl TrackingMode {
    /// How often a client in this mode should report, in seconds.
    #[must_use]
    pub const fn suggested_interval_seconds(self) -> u32 {
        match self {
            Self::Precise => 5,
            Self::Balanced => 30,
            Self::BatterySaving => 120,
        }
    }
}

/// A user's tracking session and recent location history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLocationHistory {
    pub user_id: String,
    /// Oldest first.
    pub locations: Vec<LocationPoint>,
    pub tracking_mode: TrackingMode,
    pub is_tracking: bool,
    pub started_at: DateTime<Utc>,
    /// Server time of the most recent accepted sample.
    pub last_update: Option<DateTime<Utc>>,
}

impl UserLocationHistory {
    #[must_use]
    pub fn latest(&self) -> Option<&LocationPoint> {
        self.locations.last()
    }
}

/// Summary of a user's tracking state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingStatus {
    pub user_id: String,
    pub is_tracking: bool,
    pub tracking_mode: TrackingMode,
    pub suggested_interval_seconds: u32,
    pub point_count: usize,
    pub last_update: Option<DateTime<Utc>>,
}

/// What a share recipient is allowed to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharePermissions {
    /// Exact coordinates rather than a coarse area.
    #[serde(default = "default_true")]
    pub precise_location: bool,
    /// Access to the owner's location history.
    #[serde(default)]
    pub history: bool,
}

impl Default for SharePermissions {
    fn default() -> Self {
        Self {
            precise_location: true,
            history: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

/// A time-boxed grant letting other users see the owner's location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationShareSession {
    pub id: Uuid,
    pub owner_user_id: String,
    pub shared_with: BTreeSet<String>,
    pub last_location: Option<LocationPoint>,
    pub permissions: SharePermissions,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Cleared by `stop_sharing`; the session is kept until cleanup.
    pub is_active: bool,
}

impl LocationShareSession {
    /// Active and not yet past its expiry at `now`.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at > now
    }
}

/// A one-shot "tell me when the target is near me" registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProximityAlert {
    pub id: Uuid,
    pub owner_user_id: String,
    pub target_user_id: String,
    pub radius_meters: f64,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set the first time the target comes within range. Never cleared.
    pub triggered_at: Option<DateTime<Utc>>,
}

impl ProximityAlert {
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.triggered_at.is_none()
    }
}

/// A cluster of samples produced by the visited-area analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitedArea {
    /// Running centroid of the clustered points.
    pub center: Coordinate,
    pub point_count: usize,
}

/// Movement statistics over a trailing window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationAnalytics {
    pub user_id: String,
    pub days: u32,
    pub point_count: usize,
    pub total_distance_meters: f64,
    /// Mean of per-segment speeds over segments with positive elapsed time.
    pub average_speed_mps: f64,
    /// Largest clusters first.
    pub most_visited_areas: Vec<VisitedArea>,
    pub first_timestamp: DateTime<Utc>,
    pub last_timestamp: DateTime<Utc>,
}

/// Tunables for the tracking store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackingConfig {
    pub max_history: usize,
    pub retention_days: i64,
    pub cluster_radius_meters: f64,
    pub max_visited_areas: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            max_history: 1000,
            retention_days: 30,
            cluster_radius_meters: 100.0,
            max_visited_areas: 10,
        }
    }
}
