#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Wire contract of the real-time gateway.
//!
//! Clients send [`InboundEvent`]s; the gateway answers with
//! [`OutboundEnvelope`]s, each an [`OutboundEvent`] plus the [`Scope`] it
//! is delivered to. Both event enums serialize as
//! `{"event": "<name>", "data": {...}}`. These types are kept separate from
//! the engine models so the wire format can evolve on its own.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use geotrack_geo::Coordinate;
use geotrack_geofence_models::{GeofenceEvent, GeofenceZone, NewGeofence};
use geotrack_navigation_models::{
    AvoidArea, NavigationReroute, NavigationRoute, NavigationSession, NavigationUpdate, NewRoute,
    NewTrafficUpdate, TrafficUpdate,
};
use geotrack_tracking_models::{
    LocationPoint, LocationShareSession, ProximityAlert, SharePermissions, TrackingMode,
    TrackingStatus,
};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Events a connected client can send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum InboundEvent {
    StartTracking {
        #[serde(default)]
        mode: TrackingMode,
    },
    LocationUpdate {
        location: LocationPoint,
    },
    StopTracking,
    ShareLocation {
        recipients: Vec<String>,
        minutes: i64,
        #[serde(default)]
        permissions: SharePermissions,
    },
    CreateProximityAlert {
        target_user_id: String,
        radius_meters: f64,
        #[serde(default)]
        message: Option<String>,
    },
    CreateGeofence {
        geofence: NewGeofence,
    },
    DeleteGeofence {
        geofence_id: Uuid,
    },
    SubscribeGeofence {
        geofence_id: Uuid,
    },
    CreateRoute {
        route: NewRoute,
    },
    StartNavigation {
        route_id: Uuid,
        current_location: Coordinate,
    },
    /// Falls back to the caller's last tracked location when
    /// `current_location` is omitted.
    RerouteNavigation {
        #[serde(default)]
        current_location: Option<Coordinate>,
        #[serde(default)]
        avoid_areas: Vec<AvoidArea>,
    },
    /// Stops the caller's active session when `session_id` is omitted.
    StopNavigation {
        #[serde(default)]
        session_id: Option<Uuid>,
    },
    ReportTraffic {
        traffic: NewTrafficUpdate,
    },
    EmergencyBroadcast {
        message: String,
        #[serde(default)]
        location: Option<Coordinate>,
    },
}

/// Events pushed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum OutboundEvent {
    #[serde(rename = "tracking-started")]
    TrackingStarted(TrackingStatus),
    #[serde(rename = "tracking-stopped")]
    TrackingStopped { user_id: String },
    #[serde(rename = "user-moved")]
    UserMoved {
        user_id: String,
        location: LocationPoint,
    },
    #[serde(rename = "share-started")]
    ShareStarted(LocationShareSession),
    #[serde(rename = "proximity-alert-created")]
    ProximityAlertCreated(ProximityAlert),
    #[serde(rename = "geofence-created")]
    GeofenceCreated(GeofenceZone),
    #[serde(rename = "geofence-deleted")]
    GeofenceDeleted { geofence_id: Uuid },
    #[serde(rename = "geofence-subscribed")]
    GeofenceSubscribed { geofence_id: Uuid },
    #[serde(rename = "geofence:event")]
    GeofenceEvent {
        event: GeofenceEvent,
        geofence_name: String,
    },
    #[serde(rename = "route-created")]
    RouteCreated(NavigationRoute),
    #[serde(rename = "navigation-started")]
    NavigationStarted(NavigationSession),
    #[serde(rename = "navigation-instruction")]
    NavigationInstruction(NavigationUpdate),
    #[serde(rename = "navigation:needs-reroute")]
    NavigationNeedsReroute {
        session_id: Uuid,
        deviation_meters: f64,
    },
    #[serde(rename = "navigation-rerouted")]
    NavigationRerouted(NavigationReroute),
    #[serde(rename = "navigation-stopped")]
    NavigationStopped(NavigationSession),
    #[serde(rename = "traffic-reported")]
    TrafficReported(TrafficUpdate),
    #[serde(rename = "emergency-alert")]
    EmergencyAlert {
        user_id: String,
        message: String,
        location: Option<Coordinate>,
        timestamp: DateTime<Utc>,
    },
    /// An inbound event failed. The connection stays open.
    #[serde(rename = "error")]
    Error { code: FailureCode, message: String },
}

impl OutboundEvent {
    /// Wire name of the event, as used in the `event` tag.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::TrackingStarted(_) => "tracking-started",
            Self::TrackingStopped { .. } => "tracking-stopped",
            Self::UserMoved { .. } => "user-moved",
            Self::ShareStarted(_) => "share-started",
            Self::ProximityAlertCreated(_) => "proximity-alert-created",
            Self::GeofenceCreated(_) => "geofence-created",
            Self::GeofenceDeleted { .. } => "geofence-deleted",
            Self::GeofenceSubscribed { .. } => "geofence-subscribed",
            Self::GeofenceEvent { .. } => "geofence:event",
            Self::RouteCreated(_) => "route-created",
            Self::NavigationStarted(_) => "navigation-started",
            Self::NavigationInstruction(_) => "navigation-instruction",
            Self::NavigationNeedsReroute { .. } => "navigation:needs-reroute",
            Self::NavigationRerouted(_) => "navigation-rerouted",
            Self::NavigationStopped(_) => "navigation-stopped",
            Self::TrafficReported(_) => "traffic-reported",
            Self::EmergencyAlert { .. } => "emergency-alert",
            Self::Error { .. } => "error",
        }
    }
}

/// Stable failure classes reported to clients.
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
pub enum FailureCode {
    Validation,
    NotFound,
    Unauthorized,
    Internal,
}

/// Who receives an outbound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum Scope {
    /// Only this user.
    User(String),
    /// Each of these users.
    Users(BTreeSet<String>),
    /// Everyone subscribed to the zone.
    Zone(Uuid),
    /// Every connected client.
    Global,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEnvelope {
    pub scope: Scope,
    pub event: OutboundEvent,
}

impl OutboundEnvelope {
    #[must_use]
    pub const fn new(scope: Scope, event: OutboundEvent) -> Self {
        Self { scope, event }
    }

    #[must_use]
    pub fn to_user(user_id: &str, event: OutboundEvent) -> Self {
        Self::new(Scope::User(user_id.to_string()), event)
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHealth {
    pub healthy: bool,
    pub version: String,
}

/// Error body for HTTP requests that fail before dispatch.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub code: FailureCode,
    pub error: String,
}

/// Query parameters for `GET /api/history`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Query parameters for `GET /api/analytics`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsParams {
    /// Look-back window in days. Defaults to 7.
    pub days: Option<u32>,
}

/// Query parameters for `GET /api/geofences`.
///
/// With `latitude`, `longitude` and `radiusKm` set, zones overlapping that
/// area are returned; otherwise the caller's own zones.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceListParams {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius_km: Option<f64>,
}

/// Query parameters for `GET /api/pois`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoiParams {
    pub latitude: f64,
    pub longitude: f64,
    /// Defaults to 1000 m.
    pub radius_meters: Option<f64>,
    pub category: Option<String>,
    /// Defaults to 20.
    pub limit: Option<usize>,
}
