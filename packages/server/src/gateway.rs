//! Inbound event dispatch.
//!
//! A location sample flows through the tracking store, then the geofence
//! engine, then the caller's active navigation session. Every engine error
//! becomes a single `error` event for the caller; the connection is never
//! dropped because an operation failed.
//!
//! Events from one user run one at a time through that user's lane, so the
//! three engines always see that user's samples in the same order. Lanes
//! are taken before any engine lock.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use dashmap::DashMap;
use geotrack_geofence::{GeofenceEngine, GeofenceError};
use geotrack_navigation::{NavigationEngine, NavigationError};
use geotrack_runtime::Clock;
use geotrack_server_models::{FailureCode, InboundEvent, OutboundEnvelope, OutboundEvent, Scope};
use geotrack_tracking::{TrackingError, TrackingStore};
use geotrack_tracking_models::LocationPoint;
use parking_lot::Mutex;
use thiserror::Error;

use crate::hub::EventHub;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Tracking(#[from] TrackingError),

    #[error(transparent)]
    Geofence(#[from] GeofenceError),

    #[error(transparent)]
    Navigation(#[from] NavigationError),

    /// A request the engines never saw, e.g. a missing active session.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    #[must_use]
    pub const fn code(&self) -> FailureCode {
        match self {
            Self::Tracking(TrackingError::NotFound { .. })
            | Self::Geofence(GeofenceError::NotFound { .. })
            | Self::Navigation(NavigationError::NotFound { .. }) => FailureCode::NotFound,
            Self::Tracking(TrackingError::Unauthorized { .. })
            | Self::Geofence(GeofenceError::Unauthorized { .. })
            | Self::Navigation(NavigationError::Unauthorized { .. }) => FailureCode::Unauthorized,
            Self::Tracking(TrackingError::Validation { .. })
            | Self::Geofence(GeofenceError::Validation { .. })
            | Self::Navigation(
                NavigationError::Validation { .. } | NavigationError::Inactive { .. },
            )
            | Self::Validation(_) => FailureCode::Validation,
            Self::Internal(_) => FailureCode::Internal,
        }
    }
}

/// Routes authenticated inbound events into the engines.
pub struct Gateway {
    clock: Arc<dyn Clock>,
    tracking: Arc<TrackingStore>,
    geofence: Arc<GeofenceEngine>,
    navigation: Arc<NavigationEngine>,
    hub: Arc<EventHub>,
    /// User ID -> lock serializing that user's inbound events.
    lanes: DashMap<String, Arc<Mutex<()>>>,
}

impl Gateway {
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        tracking: Arc<TrackingStore>,
        geofence: Arc<GeofenceEngine>,
        navigation: Arc<NavigationEngine>,
        hub: Arc<EventHub>,
    ) -> Self {
        Self {
            clock,
            tracking,
            geofence,
            navigation,
            hub,
            lanes: DashMap::new(),
        }
    }

    #[must_use]
    pub fn tracking(&self) -> &TrackingStore {
        &self.tracking
    }

    #[must_use]
    pub fn geofence(&self) -> &GeofenceEngine {
        &self.geofence
    }

    #[must_use]
    pub fn navigation(&self) -> &NavigationEngine {
        &self.navigation
    }

    #[must_use]
    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    fn lane(&self, user_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.lanes
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Handles one event from `user_id` and returns what should be sent
    /// where. Failures come back as an `error` event for the caller.
    pub fn dispatch(&self, user_id: &str, event: InboundEvent) -> Vec<OutboundEnvelope> {
        let lane = self.lane(user_id);
        let _serialized = lane.lock();
        self.dispatch_in_lane(user_id, event)
    }

    /// [`Self::dispatch`], then publishes every envelope through the hub.
    /// The caller's lane is held until publishing is done, so streams see
    /// one user's events in dispatch order.
    pub fn dispatch_and_publish(&self, user_id: &str, event: InboundEvent) -> Vec<OutboundEnvelope> {
        let lane = self.lane(user_id);
        let _serialized = lane.lock();
        let envelopes = self.dispatch_in_lane(user_id, event);
        for envelope in &envelopes {
            self.hub.publish(envelope.clone());
        }
        envelopes
    }

    /// Drops lanes nobody is waiting on. Returns how many were removed.
    pub fn prune_lanes(&self) -> usize {
        let before = self.lanes.len();
        self.lanes.retain(|_, lane| Arc::strong_count(lane) > 1);
        before - self.lanes.len()
    }

    fn dispatch_in_lane(&self, user_id: &str, event: InboundEvent) -> Vec<OutboundEnvelope> {
        let result = catch_unwind(AssertUnwindSafe(|| self.handle(user_id, event)))
            .unwrap_or_else(|_| Err(GatewayError::Internal("operation panicked".to_string())));

        result.unwrap_or_else(|e| {
            log::error!("Inbound event from {user_id} failed: {e}");
            vec![OutboundEnvelope::to_user(
                user_id,
                OutboundEvent::Error {
                    code: e.code(),
                    message: e.to_string(),
                },
            )]
        })
    }

    fn handle(
        &self,
        user_id: &str,
        event: InboundEvent,
    ) -> Result<Vec<OutboundEnvelope>, GatewayError> {
        let to_user = |event: OutboundEvent| -> Result<Vec<OutboundEnvelope>, GatewayError> {
            Ok(vec![OutboundEnvelope::to_user(user_id, event)])
        };

        match event {
            InboundEvent::StartTracking { mode } => {
                let status = self.tracking.start_tracking(user_id, mode);
                to_user(OutboundEvent::TrackingStarted(status))
            }
            InboundEvent::LocationUpdate { location } => self.location_update(user_id, location),
            InboundEvent::StopTracking => {
                self.tracking.stop_tracking(user_id);
                to_user(OutboundEvent::TrackingStopped {
                    user_id: user_id.to_string(),
                })
            }
            InboundEvent::ShareLocation {
                recipients,
                minutes,
                permissions,
            } => {
                let share = self
                    .tracking
                    .start_sharing(user_id, recipients, minutes, permissions)?;
                let mut audience = share.shared_with.clone();
                audience.insert(user_id.to_string());
                Ok(vec![OutboundEnvelope::new(
                    Scope::Users(audience),
                    OutboundEvent::ShareStarted(share),
                )])
            }
            InboundEvent::CreateProximityAlert {
                target_user_id,
                radius_meters,
                message,
            } => {
                let alert = self.tracking.create_proximity_alert(
                    user_id,
                    &target_user_id,
                    radius_meters,
                    message,
                )?;
                to_user(OutboundEvent::ProximityAlertCreated(alert))
            }
            InboundEvent::CreateGeofence { geofence } => {
                let zone = self.geofence.create_geofence(user_id, geofence)?;
                self.hub.subscribe_zone(zone.id, user_id);
                to_user(OutboundEvent::GeofenceCreated(zone))
            }
            InboundEvent::DeleteGeofence { geofence_id } => {
                self.geofence.delete_geofence(user_id, geofence_id)?;
                let mut audience = self.hub.zone_subscribers(geofence_id);
                audience.insert(user_id.to_string());
                self.hub.forget_zone(geofence_id);
                Ok(vec![OutboundEnvelope::new(
                    Scope::Users(audience),
                    OutboundEvent::GeofenceDeleted { geofence_id },
                )])
            }
            InboundEvent::SubscribeGeofence { geofence_id } => {
                if !self
                    .geofence
                    .geofence(geofence_id)
                    .is_some_and(|zone| zone.is_active)
                {
                    return Err(GeofenceError::NotFound { id: geofence_id }.into());
                }
                self.hub.subscribe_zone(geofence_id, user_id);
                to_user(OutboundEvent::GeofenceSubscribed { geofence_id })
            }
            InboundEvent::CreateRoute { route } => {
                let route = self.navigation.create_route(user_id, route)?;
                to_user(OutboundEvent::RouteCreated(route))
            }
            InboundEvent::StartNavigation {
                route_id,
                current_location,
            } => {
                let session =
                    self.navigation
                        .start_navigation(user_id, route_id, current_location)?;
                to_user(OutboundEvent::NavigationStarted(session))
            }
            InboundEvent::RerouteNavigation {
                current_location,
                avoid_areas,
            } => {
                let session = self.active_session_id(user_id)?;
                let location = current_location
                    .or_else(|| {
                        self.tracking
                            .current_location(user_id)
                            .map(|p| p.coordinate())
                    })
                    .ok_or_else(|| {
                        GatewayError::Validation(
                            "a current location is required to reroute".to_string(),
                        )
                    })?;
                let rerouted =
                    self.navigation
                        .reroute_navigation(user_id, session, location, avoid_areas)?;
                to_user(OutboundEvent::NavigationRerouted(rerouted))
            }
            InboundEvent::StopNavigation { session_id } => {
                let session_id = match session_id {
                    Some(id) => id,
                    None => self.active_session_id(user_id)?,
                };
                let session = self.navigation.stop_navigation(user_id, session_id)?;
                to_user(OutboundEvent::NavigationStopped(session))
            }
            InboundEvent::ReportTraffic { traffic } => {
                let update = self.navigation.add_traffic_update(user_id, traffic)?;
                Ok(vec![OutboundEnvelope::new(
                    Scope::Global,
                    OutboundEvent::TrafficReported(update),
                )])
            }
            InboundEvent::EmergencyBroadcast { message, location } => {
                if message.trim().is_empty() {
                    return Err(GatewayError::Validation(
                        "emergency message is required".to_string(),
                    ));
                }
                let location = location.or_else(|| {
                    self.tracking
                        .current_location(user_id)
                        .map(|p| p.coordinate())
                });
                log::warn!("Emergency broadcast from {user_id}: {message}");
                Ok(vec![OutboundEnvelope::new(
                    Scope::Global,
                    OutboundEvent::EmergencyAlert {
                        user_id: user_id.to_string(),
                        message,
                        location,
                        timestamp: self.clock.now(),
                    },
                )])
            }
        }
    }

    fn location_update(
        &self,
        user_id: &str,
        location: LocationPoint,
    ) -> Result<Vec<OutboundEnvelope>, GatewayError> {
        let point = location.coordinate();
        if !point.is_valid() {
            return Err(GatewayError::Validation(format!(
                "({}, {}) is not a valid coordinate",
                point.latitude, point.longitude
            )));
        }
        if !self.tracking.update(user_id, location.clone()) {
            return Err(GatewayError::Validation(format!(
                "{user_id} is not tracking"
            )));
        }

        let mut viewers = self.tracking.share_viewers(user_id);
        viewers.insert(user_id.to_string());
        let mut out = vec![OutboundEnvelope::new(
            Scope::Users(viewers),
            OutboundEvent::UserMoved {
                user_id: user_id.to_string(),
                location,
            },
        )];

        for event in self.geofence.process_location_update(user_id, &point) {
            let geofence_name = self
                .geofence
                .geofence(event.geofence_id)
                .map(|zone| zone.name)
                .unwrap_or_default();
            out.push(OutboundEnvelope::new(
                Scope::Zone(event.geofence_id),
                OutboundEvent::GeofenceEvent {
                    event,
                    geofence_name,
                },
            ));
        }

        if let Some(session) = self.navigation.active_session_for_user(user_id) {
            match self.navigation.update_navigation(user_id, session.id, point) {
                Ok(update) => {
                    let needs_reroute = update.needs_reroute;
                    let deviation_meters = update.deviation_meters;
                    out.push(OutboundEnvelope::to_user(
                        user_id,
                        OutboundEvent::NavigationInstruction(update),
                    ));
                    if needs_reroute {
                        out.push(OutboundEnvelope::to_user(
                            user_id,
                            OutboundEvent::NavigationNeedsReroute {
                                session_id: session.id,
                                deviation_meters,
                            },
                        ));
                    }
                }
                // The session can end between the lookup and the update.
                Err(e) => log::debug!("Skipping navigation update for {user_id}: {e}"),
            }
        }

        Ok(out)
    }

    fn active_session_id(&self, user_id: &str) -> Result<uuid::Uuid, GatewayError> {
        self.navigation
            .active_session_for_user(user_id)
            .map(|s| s.id)
            .ok_or_else(|| {
                GatewayError::Validation(format!("{user_id} has no active navigation session"))
            })
    }
}
