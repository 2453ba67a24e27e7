#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geofence registry and per-user membership state machine.
//!
//! For every `(user, zone)` pair the engine runs
//! `outside -> inside -> outside`, emitting `enter` and `exit` events when
//! the zone's triggers ask for them and repeating `dwell` events every
//! `dwell_minutes` of continuous containment. Samples for one user are
//! serialized through that user's state lock, and the user's events are
//! appended to the log before the lock is released so the log preserves
//! per-user ordering.

pub mod validate;

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use geotrack_geo::{Coordinate, haversine_distance};
use geotrack_geofence_models::{
    GeofenceConfig, GeofenceEvent, GeofenceEventFilter, GeofenceEventType, GeofenceGeometry,
    GeofenceUpdate, GeofenceZone, NewGeofence, UserGeofenceState,
};
use geotrack_runtime::{Clock, NotificationKind, NotificationSink, PendingNotification};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during geofence operations.
#[derive(Debug, Error)]
pub enum GeofenceError {
    /// Invalid geometry, triggers or other input.
    #[error("Validation error: {message}")]
    Validation {
        /// Description of what went wrong.
        message: String,
    },

    /// No zone with this ID.
    #[error("Geofence not found: {id}")]
    NotFound {
        /// Requested zone ID.
        id: Uuid,
    },

    /// The zone belongs to someone else.
    #[error("User {user_id} does not own geofence {id}")]
    Unauthorized {
        /// Acting user.
        user_id: String,
        /// Zone ID.
        id: Uuid,
    },
}

impl GeofenceError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Counts of what a [`GeofenceEngine::cleanup`] pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeofenceCleanup {
    pub events_removed: usize,
    pub notifications_removed: usize,
}

/// Zone registry, membership state and event log.
pub struct GeofenceEngine {
    config: GeofenceConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn NotificationSink>,
    zones: DashMap<Uuid, GeofenceZone>,
    states: DashMap<String, Arc<Mutex<UserGeofenceState>>>,
    events: RwLock<Vec<GeofenceEvent>>,
    notifications: RwLock<Vec<PendingNotification>>,
}

impl GeofenceEngine {
    #[must_use]
    pub fn new(
        config: GeofenceConfig,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            config,
            clock,
            sink,
            zones: DashMap::new(),
            states: DashMap::new(),
            events: RwLock::new(Vec::new()),
            notifications: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &GeofenceConfig {
        &self.config
    }

    /// Registers a new active zone owned by `owner_id`.
    ///
    /// # Errors
    ///
    /// * [`GeofenceError::Validation`] if the name is blank or the geometry
    ///   or triggers are invalid.
    pub fn create_geofence(
        &self,
        owner_id: &str,
        input: NewGeofence,
    ) -> Result<GeofenceZone, GeofenceError> {
        if input.name.trim().is_empty() {
            return Err(GeofenceError::validation("geofence name is required"));
        }
        validate::geometry(&self.config, &input.geometry)?;
        validate::triggers(&input.triggers)?;

        let now = self.clock.now();
        let zone = GeofenceZone {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            name: input.name,
            description: input.description,
            geometry: input.geometry,
            triggers: input.triggers,
            is_active: true,
            metadata: input.metadata,
            created_at: now,
            updated_at: now,
        };

        log::debug!("Geofence {} ({}) created by {owner_id}", zone.id, zone.name);

        self.zones.insert(zone.id, zone.clone());
        Ok(zone)
    }

    /// Applies a partial update.
    ///
    /// Deactivating a zone drops it from every user's membership without
    /// emitting exit events.
    ///
    /// # Errors
    ///
    /// * [`GeofenceError::NotFound`] if the zone does not exist.
    /// * [`GeofenceError::Unauthorized`] if `user_id` is not the owner.
    /// * [`GeofenceError::Validation`] if the new geometry or triggers are
    ///   invalid.
    pub fn update_geofence(
        &self,
        user_id: &str,
        id: Uuid,
        update: GeofenceUpdate,
    ) -> Result<GeofenceZone, GeofenceError> {
        if let Some(geometry) = &update.geometry {
            validate::geometry(&self.config, geometry)?;
        }
        if let Some(triggers) = &update.triggers {
            validate::triggers(triggers)?;
        }
        if update.name.as_ref().is_some_and(|n| n.trim().is_empty()) {
            return Err(GeofenceError::validation("geofence name is required"));
        }

        let updated = {
            let mut zone = self
                .zones
                .get_mut(&id)
                .ok_or(GeofenceError::NotFound { id })?;
            if zone.owner_id != user_id {
                return Err(GeofenceError::Unauthorized {
                    user_id: user_id.to_string(),
                    id,
                });
            }

            if let Some(name) = update.name {
                zone.name = name;
            }
            if let Some(description) = update.description {
                zone.description = Some(description);
            }
            if let Some(geometry) = update.geometry {
                zone.geometry = geometry;
            }
            if let Some(triggers) = update.triggers {
                zone.triggers = triggers;
            }
            if let Some(is_active) = update.is_active {
                zone.is_active = is_active;
            }
            if let Some(metadata) = update.metadata {
                zone.metadata = metadata;
            }
            zone.updated_at = self.clock.now();
            zone.clone()
        };

        if !updated.is_active {
            self.forget_zone(id);
        }

        Ok(updated)
    }

    /// Deletes a zone and removes it from every user's membership and
    /// dwell timers. Past events are kept.
    ///
    /// # Errors
    ///
    /// * [`GeofenceError::NotFound`] if the zone does not exist.
    /// * [`GeofenceError::Unauthorized`] if `user_id` is not the owner.
    pub fn delete_geofence(&self, user_id: &str, id: Uuid) -> Result<GeofenceZone, GeofenceError> {
        let removed = self
            .zones
            .remove_if(&id, |_, zone| zone.owner_id == user_id)
            .map(|(_, zone)| zone);

        let Some(zone) = removed else {
            return Err(if self.zones.contains_key(&id) {
                GeofenceError::Unauthorized {
                    user_id: user_id.to_string(),
                    id,
                }
            } else {
                GeofenceError::NotFound { id }
            });
        };

        self.forget_zone(id);
        log::debug!("Geofence {id} deleted by {user_id}");

        Ok(zone)
    }

    fn forget_zone(&self, id: Uuid) {
        for handle in self.state_handles() {
            let mut state = handle.lock();
            state.current_zone_ids.remove(&id);
            state.dwell_entry_timestamps.remove(&id);
        }
    }

    fn state_handles(&self) -> Vec<Arc<Mutex<UserGeofenceState>>> {
        self.states.iter().map(|e| Arc::clone(e.value())).collect()
    }

    #[must_use]
    pub fn geofence(&self, id: Uuid) -> Option<GeofenceZone> {
        self.zones.get(&id).map(|z| z.value().clone())
    }

    /// Zones owned by `owner_id`, oldest first.
    #[must_use]
    pub fn geofences_by_owner(&self, owner_id: &str) -> Vec<GeofenceZone> {
        let mut zones: Vec<GeofenceZone> = self
            .zones
            .iter()
            .filter(|z| z.owner_id == owner_id)
            .map(|z| z.value().clone())
            .collect();
        zones.sort_by_key(|z| z.created_at);
        zones
    }

    /// Active zones that plausibly intersect the disk of `radius_km` around
    /// `center`.
    ///
    /// Circles match when the two disks overlap. Polygons match only when
    /// one of their vertices lies inside the disk, so a polygon whose edge
    /// crosses the disk without a vertex inside is missed.
    #[must_use]
    pub fn geofences_in_area(&self, center: &Coordinate, radius_km: f64) -> Vec<GeofenceZone> {
        let radius_meters = radius_km * 1000.0;

        self.zones
            .iter()
            .filter(|z| z.is_active)
            .filter(|z| match &z.geometry {
                GeofenceGeometry::Circle {
                    center: zone_center,
                    radius_meters: zone_radius,
                } => haversine_distance(center, zone_center) <= radius_meters + zone_radius,
                GeofenceGeometry::Polygon { vertices } => vertices
                    .iter()
                    .any(|v| haversine_distance(center, v) <= radius_meters),
            })
            .map(|z| z.value().clone())
            .collect()
    }

    /// Evaluates one location sample for `user_id` against every active
    /// zone and returns the events it produced.
    ///
    /// 1. `outside -> inside` emits `enter` (if `on_enter`) and starts a
    ///    dwell timer (if `on_dwell`).
    /// 2. `inside -> inside` emits `dwell` (if `on_dwell`) once the timer
    ///    reaches the dwell duration, then restarts the timer.
    /// 3. `inside -> outside` emits `exit` (if `on_exit`) and clears the
    ///    timer.
    ///
    /// Each event also produces a pending notification for the zone owner.
    pub fn process_location_update(
        &self,
        user_id: &str,
        location: &Coordinate,
    ) -> Vec<GeofenceEvent> {
        let now = self.clock.now();
        let handle = Arc::clone(
            self.states
                .entry(user_id.to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(UserGeofenceState::new(user_id.to_string(), now)))
                })
                .value(),
        );

        let mut state = handle.lock();
        let previous = state.current_zone_ids.clone();
        let mut inside_now = BTreeSet::new();
        let mut events = Vec::new();
        let mut notifications = Vec::new();

        let mut emit = |zone: &GeofenceZone,
                        event_type: GeofenceEventType,
                        dwell_duration_minutes: Option<i64>| {
            log::debug!(
                "Geofence {event_type}: user {user_id} zone {} ({})",
                zone.id,
                zone.name
            );
            let event = GeofenceEvent {
                id: Uuid::new_v4(),
                user_id: user_id.to_string(),
                geofence_id: zone.id,
                event_type,
                timestamp: now,
                location: *location,
                dwell_duration_minutes,
            };
            notifications.push(notification_for(&event, zone));
            events.push(event);
        };

        for zone in self.zones.iter().filter(|z| z.is_active) {
            let inside = zone.geometry.contains(location);
            let was_inside = previous.contains(&zone.id);
            let triggers = zone.triggers;

            match (was_inside, inside) {
                (false, true) => {
                    inside_now.insert(zone.id);
                    if triggers.on_enter {
                        emit(zone.value(), GeofenceEventType::Enter, None);
                    }
                    if triggers.on_dwell {
                        state.dwell_entry_timestamps.insert(zone.id, now);
                    }
                }
                (true, true) => {
                    inside_now.insert(zone.id);
                    if !triggers.on_dwell {
                        state.dwell_entry_timestamps.remove(&zone.id);
                        continue;
                    }

                    let dwell = Duration::minutes(i64::from(
                        triggers
                            .dwell_minutes
                            .unwrap_or(self.config.default_dwell_minutes),
                    ));
                    match state.dwell_entry_timestamps.get(&zone.id).copied() {
                        Some(since) if now - since >= dwell => {
                            emit(
                                zone.value(),
                                GeofenceEventType::Dwell,
                                Some((now - since).num_minutes()),
                            );
                            state.dwell_entry_timestamps.insert(zone.id, now);
                        }
                        Some(_) => {}
                        // dwell enabled while already inside: no enter was
                        // emitted, so the timer waits for the next entry
                        None => {}
                    }
                }
                (true, false) => {
                    if triggers.on_exit {
                        emit(zone.value(), GeofenceEventType::Exit, None);
                    }
                    state.dwell_entry_timestamps.remove(&zone.id);
                }
                (false, false) => {}
            }
        }

        state
            .dwell_entry_timestamps
            .retain(|id, _| inside_now.contains(id));
        state.current_zone_ids = inside_now;
        state.updated_at = now;

        if !events.is_empty() {
            self.events.write().extend(events.iter().cloned());
            self.notifications
                .write()
                .extend(notifications.iter().cloned());
        }
        drop(state);

        for notification in notifications {
            self.sink.notify(notification);
        }

        events
    }

    /// Events matching `filter`, oldest first.
    #[must_use]
    pub fn events(&self, filter: &GeofenceEventFilter) -> Vec<GeofenceEvent> {
        let events = self.events.read();
        let matching: Vec<&GeofenceEvent> = events.iter().filter(|e| filter.matches(e)).collect();
        let skip = filter
            .limit
            .map_or(0, |limit| matching.len().saturating_sub(limit));
        matching.into_iter().skip(skip).cloned().collect()
    }

    /// Zones `user_id` is currently inside.
    #[must_use]
    pub fn current_zones(&self, user_id: &str) -> Vec<GeofenceZone> {
        let Some(ids) = self
            .states
            .get(user_id)
            .map(|e| Arc::clone(e.value()))
            .map(|handle| handle.lock().current_zone_ids.clone())
        else {
            return Vec::new();
        };

        ids.iter().filter_map(|id| self.geofence(*id)).collect()
    }

    /// Snapshot of `user_id`'s membership state.
    #[must_use]
    pub fn user_state(&self, user_id: &str) -> Option<UserGeofenceState> {
        let handle = self.states.get(user_id).map(|e| Arc::clone(e.value()))?;
        let state = handle.lock().clone();
        Some(state)
    }

    /// Pending notification records addressed to `user_id`, oldest first.
    #[must_use]
    pub fn notifications(&self, user_id: &str) -> Vec<PendingNotification> {
        self.notifications
            .read()
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Drops events and notification records older than the retention
    /// window.
    pub fn cleanup(&self) -> GeofenceCleanup {
        let now = self.clock.now();
        let cutoff = Duration::try_days(self.config.retention_days)
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let events_removed = {
            let mut events = self.events.write();
            let before = events.len();
            events.retain(|e| e.timestamp >= cutoff);
            before - events.len()
        };

        let notifications_removed = {
            let mut notifications = self.notifications.write();
            let before = notifications.len();
            notifications.retain(|n| n.created_at >= cutoff);
            before - notifications.len()
        };

        log::info!(
            "Geofence cleanup removed {events_removed} events and {notifications_removed} notifications"
        );

        GeofenceCleanup {
            events_removed,
            notifications_removed,
        }
    }
}

/// Builds the pending notification for `event`, addressed to the zone
/// owner.
fn notification_for(event: &GeofenceEvent, zone: &GeofenceZone) -> PendingNotification {
    let name = &zone.name;
    let (kind, title) = match event.event_type {
        GeofenceEventType::Enter => (NotificationKind::GeofenceEnter, format!("Entered {name}")),
        GeofenceEventType::Exit => (NotificationKind::GeofenceExit, format!("Left {name}")),
        GeofenceEventType::Dwell => (NotificationKind::GeofenceDwell, format!("Still at {name}")),
    };

    let body = match event.dwell_duration_minutes {
        Some(minutes) => format!("{} has been in {name} for {minutes} minutes", event.user_id),
        None => format!("{} triggered {} on {name}", event.user_id, event.event_type),
    };

    PendingNotification {
        id: Uuid::new_v4(),
        user_id: zone.owner_id.clone(),
        kind,
        title,
        body,
        data: serde_json::json!({
            "eventId": event.id,
            "geofenceId": event.geofence_id,
            "userId": event.user_id,
            "eventType": event.event_type,
        }),
        created_at: event.timestamp,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use geotrack_geofence_models::GeofenceTriggers;
    use geotrack_runtime::{ManualClock, RecordingSink};

    use super::*;

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn engine() -> (GeofenceEngine, Arc<ManualClock>, Arc<RecordingSink>) {
        let clock = Arc::new(ManualClock::new(start()));
        let sink = Arc::new(RecordingSink::new());
        let engine = GeofenceEngine::new(GeofenceConfig::default(), clock.clone(), sink.clone());
        (engine, clock, sink)
    }

    fn circle(name: &str, radius_meters: f64, triggers: GeofenceTriggers) -> NewGeofence {
        NewGeofence {
            name: name.to_string(),
            description: None,
            geometry: GeofenceGeometry::Circle {
                center: Coordinate::new(52.0, 4.0),
                radius_meters,
            },
            triggers,
            metadata: BTreeMap::new(),
        }
    }

    fn all_triggers(dwell_minutes: u32) -> GeofenceTriggers {
        GeofenceTriggers {
            on_enter: true,
            on_exit: true,
            on_dwell: true,
            dwell_minutes: Some(dwell_minutes),
        }
    }

    /// A point `meters` north of the test circle center.
    fn north_of_center(meters: f64) -> Coordinate {
        let degrees = (meters / geotrack_geo::EARTH_RADIUS_METERS).to_degrees();
        Coordinate::new(52.0 + degrees, 4.0)
    }

    fn types(events: &[GeofenceEvent]) -> Vec<GeofenceEventType> {
        events.iter().map(|e| e.event_type).collect()
    }

    #[test]
    fn single_enter_when_moving_inside() {
        let (engine, _, sink) = engine();
        let zone = engine
            .create_geofence(
                "owner",
                circle(
                    "office",
                    100.0,
                    GeofenceTriggers {
                        on_enter: true,
                        on_exit: false,
                        on_dwell: false,
                        dwell_minutes: None,
                    },
                ),
            )
            .unwrap();

        assert!(engine
            .process_location_update("alice", &north_of_center(200.0))
            .is_empty());

        let events = engine.process_location_update("alice", &north_of_center(50.0));
        assert_eq!(types(&events), vec![GeofenceEventType::Enter]);
        assert_eq!(events[0].geofence_id, zone.id);
        assert_eq!(events[0].user_id, "alice");

        assert_eq!(engine.current_zones("alice").len(), 1);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.received()[0].user_id, "owner");
        assert_eq!(engine.notifications("owner").len(), 1);
    }

    #[test]
    fn circle_boundary_counts_as_inside() {
        let (engine, _, _) = engine();
        let zone = engine
            .create_geofence("owner", circle("edge", 100.0, GeofenceTriggers::default()))
            .unwrap();

        assert!(engine
            .process_location_update("alice", &north_of_center(100.5))
            .is_empty());
        let events = engine.process_location_update("alice", &north_of_center(99.5));
        assert_eq!(types(&events), vec![GeofenceEventType::Enter]);
        let events = engine.process_location_update("alice", &north_of_center(100.5));
        assert_eq!(types(&events), vec![GeofenceEventType::Exit]);
        assert_eq!(events[0].geofence_id, zone.id);
    }

    #[test]
    fn exit_not_emitted_without_trigger() {
        let (engine, _, _) = engine();
        engine
            .create_geofence(
                "owner",
                circle(
                    "silent exit",
                    100.0,
                    GeofenceTriggers {
                        on_exit: false,
                        ..GeofenceTriggers::default()
                    },
                ),
            )
            .unwrap();

        engine.process_location_update("alice", &north_of_center(10.0));
        let events = engine.process_location_update("alice", &north_of_center(500.0));
        assert!(events.is_empty());
        assert!(engine.current_zones("alice").is_empty());
    }

    #[test]
    fn enter_and_exit_strictly_alternate() {
        let (engine, clock, _) = engine();
        engine
            .create_geofence("owner", circle("home", 100.0, all_triggers(1)))
            .unwrap();

        // deterministic pseudo-random walk in and out of the zone
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            #[allow(clippy::cast_precision_loss)]
            let meters = (seed % 300) as f64;
            clock.advance(chrono::Duration::seconds(20));
            engine.process_location_update("alice", &north_of_center(meters));
        }

        let log = engine.events(&GeofenceEventFilter::default());
        let transitions: Vec<GeofenceEventType> = log
            .iter()
            .map(|e| e.event_type)
            .filter(|t| *t != GeofenceEventType::Dwell)
            .collect();

        assert!(!transitions.is_empty());
        assert_eq!(transitions[0], GeofenceEventType::Enter);
        for pair in transitions.windows(2) {
            assert_ne!(pair[0], pair[1], "consecutive {:?} events", pair[0]);
        }

        // dwell only ever occurs between an enter and the following exit
        let mut inside = false;
        for event in &log {
            match event.event_type {
                GeofenceEventType::Enter => inside = true,
                GeofenceEventType::Exit => inside = false,
                GeofenceEventType::Dwell => assert!(inside, "dwell outside the zone"),
            }
        }
    }

    #[test]
    fn dwell_fires_after_duration_and_repeats() {
        let (engine, clock, _) = engine();
        engine
            .create_geofence("owner", circle("cafe", 100.0, all_triggers(5)))
            .unwrap();
        let inside = north_of_center(10.0);

        assert_eq!(
            types(&engine.process_location_update("alice", &inside)),
            vec![GeofenceEventType::Enter]
        );

        clock.advance(chrono::Duration::minutes(4));
        assert!(engine.process_location_update("alice", &inside).is_empty());

        clock.advance(chrono::Duration::minutes(1));
        let events = engine.process_location_update("alice", &inside);
        assert_eq!(types(&events), vec![GeofenceEventType::Dwell]);
        assert_eq!(events[0].dwell_duration_minutes, Some(5));

        // timer restarted at the dwell event
        clock.advance(chrono::Duration::minutes(3));
        assert!(engine.process_location_update("alice", &inside).is_empty());
        clock.advance(chrono::Duration::minutes(2));
        assert_eq!(
            types(&engine.process_location_update("alice", &inside)),
            vec![GeofenceEventType::Dwell]
        );
    }

    #[test]
    fn exit_clears_dwell_timer() {
        let (engine, clock, _) = engine();
        let zone = engine
            .create_geofence("owner", circle("park", 100.0, all_triggers(5)))
            .unwrap();
        let inside = north_of_center(10.0);
        let outside = north_of_center(1_000.0);

        engine.process_location_update("alice", &inside);
        assert!(engine
            .user_state("alice")
            .unwrap()
            .dwell_entry_timestamps
            .contains_key(&zone.id));

        clock.advance(chrono::Duration::minutes(4));
        engine.process_location_update("alice", &outside);
        assert!(engine.user_state("alice").unwrap().dwell_entry_timestamps.is_empty());

        clock.advance(chrono::Duration::minutes(2));
        assert_eq!(
            types(&engine.process_location_update("alice", &inside)),
            vec![GeofenceEventType::Enter]
        );
        clock.advance(chrono::Duration::minutes(4));
        assert!(engine.process_location_update("alice", &inside).is_empty());
    }

    #[test]
    fn dwell_uses_default_duration_when_unset() {
        let (engine, clock, _) = engine();
        engine
            .create_geofence(
                "owner",
                circle(
                    "lobby",
                    100.0,
                    GeofenceTriggers {
                        on_dwell: true,
                        dwell_minutes: None,
                        ..GeofenceTriggers::default()
                    },
                ),
            )
            .unwrap();
        let inside = north_of_center(10.0);

        engine.process_location_update("alice", &inside);
        clock.advance(chrono::Duration::minutes(4));
        assert!(engine.process_location_update("alice", &inside).is_empty());
        clock.advance(chrono::Duration::minutes(1));
        assert_eq!(
            types(&engine.process_location_update("alice", &inside)),
            vec![GeofenceEventType::Dwell]
        );
    }

    #[test]
    fn dwell_without_enter_is_rejected() {
        let (engine, _, _) = engine();
        let dwell_only = GeofenceTriggers {
            on_enter: false,
            on_exit: false,
            on_dwell: true,
            dwell_minutes: Some(5),
        };
        assert!(matches!(
            engine.create_geofence("owner", circle("bench", 100.0, dwell_only)),
            Err(GeofenceError::Validation { .. })
        ));

        let zone = engine
            .create_geofence("owner", circle("bench", 100.0, all_triggers(5)))
            .unwrap();
        assert!(matches!(
            engine.update_geofence(
                "owner",
                zone.id,
                GeofenceUpdate {
                    triggers: Some(dwell_only),
                    ..GeofenceUpdate::default()
                }
            ),
            Err(GeofenceError::Validation { .. })
        ));
        assert_eq!(engine.geofence(zone.id).unwrap().triggers, all_triggers(5));
    }

    #[test]
    fn dwell_enabled_while_inside_waits_for_next_enter() {
        let (engine, clock, _) = engine();
        let zone = engine
            .create_geofence(
                "owner",
                circle(
                    "plaza",
                    100.0,
                    GeofenceTriggers {
                        on_enter: false,
                        ..GeofenceTriggers::default()
                    },
                ),
            )
            .unwrap();
        let inside = north_of_center(10.0);
        assert!(engine.process_location_update("alice", &inside).is_empty());

        engine
            .update_geofence(
                "owner",
                zone.id,
                GeofenceUpdate {
                    triggers: Some(all_triggers(5)),
                    ..GeofenceUpdate::default()
                },
            )
            .unwrap();

        clock.advance(chrono::Duration::minutes(10));
        assert!(engine.process_location_update("alice", &inside).is_empty());
        clock.advance(chrono::Duration::minutes(10));
        assert!(engine.process_location_update("alice", &inside).is_empty());

        engine.process_location_update("alice", &north_of_center(1_000.0));
        let events = engine.process_location_update("alice", &inside);
        assert_eq!(types(&events), vec![GeofenceEventType::Enter]);
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(
            types(&engine.process_location_update("alice", &inside)),
            vec![GeofenceEventType::Dwell]
        );
    }

    #[test]
    fn polygon_zone_membership() {
        let (engine, _, _) = engine();
        engine
            .create_geofence(
                "owner",
                NewGeofence {
                    name: "block".to_string(),
                    description: Some("city block".to_string()),
                    geometry: GeofenceGeometry::Polygon {
                        vertices: vec![
                            Coordinate::new(52.0, 4.0),
                            Coordinate::new(52.0, 4.01),
                            Coordinate::new(52.01, 4.01),
                            Coordinate::new(52.01, 4.0),
                        ],
                    },
                    triggers: GeofenceTriggers::default(),
                    metadata: BTreeMap::new(),
                },
            )
            .unwrap();

        let events = engine.process_location_update("alice", &Coordinate::new(52.005, 4.005));
        assert_eq!(types(&events), vec![GeofenceEventType::Enter]);
        let events = engine.process_location_update("alice", &Coordinate::new(52.02, 4.005));
        assert_eq!(types(&events), vec![GeofenceEventType::Exit]);
    }

    #[test]
    fn invalid_geometry_rejected() {
        let (engine, _, _) = engine();
        assert!(matches!(
            engine.create_geofence("owner", circle("huge", 60_000.0, GeofenceTriggers::default())),
            Err(GeofenceError::Validation { .. })
        ));
        assert!(matches!(
            engine.create_geofence("owner", circle("  ", 10.0, GeofenceTriggers::default())),
            Err(GeofenceError::Validation { .. })
        ));
    }

    #[test]
    fn delete_cascades_to_membership() {
        let (engine, _, _) = engine();
        let zone = engine
            .create_geofence("owner", circle("gym", 100.0, all_triggers(5)))
            .unwrap();
        engine.process_location_update("alice", &north_of_center(10.0));
        engine.process_location_update("bob", &north_of_center(20.0));

        assert!(matches!(
            engine.delete_geofence("mallory", zone.id),
            Err(GeofenceError::Unauthorized { .. })
        ));
        engine.delete_geofence("owner", zone.id).unwrap();
        assert!(matches!(
            engine.delete_geofence("owner", zone.id),
            Err(GeofenceError::NotFound { .. })
        ));

        for user in ["alice", "bob"] {
            let state = engine.user_state(user).unwrap();
            assert!(state.current_zone_ids.is_empty());
            assert!(state.dwell_entry_timestamps.is_empty());
        }
        // no exit for a deleted zone
        assert!(engine
            .process_location_update("alice", &north_of_center(1_000.0))
            .is_empty());
    }

    #[test]
    fn deactivating_drops_membership_silently() {
        let (engine, _, _) = engine();
        let zone = engine
            .create_geofence("owner", circle("pool", 100.0, GeofenceTriggers::default()))
            .unwrap();
        engine.process_location_update("alice", &north_of_center(10.0));

        let updated = engine
            .update_geofence(
                "owner",
                zone.id,
                GeofenceUpdate {
                    is_active: Some(false),
                    ..GeofenceUpdate::default()
                },
            )
            .unwrap();
        assert!(!updated.is_active);
        assert!(engine.current_zones("alice").is_empty());
        assert!(engine
            .process_location_update("alice", &north_of_center(1_000.0))
            .is_empty());
    }

    #[test]
    fn update_checks_owner_and_geometry() {
        let (engine, _, _) = engine();
        let zone = engine
            .create_geofence("owner", circle("pier", 100.0, GeofenceTriggers::default()))
            .unwrap();

        let rename = GeofenceUpdate {
            name: Some("dock".to_string()),
            ..GeofenceUpdate::default()
        };
        assert!(matches!(
            engine.update_geofence("mallory", zone.id, rename.clone()),
            Err(GeofenceError::Unauthorized { .. })
        ));
        assert!(matches!(
            engine.update_geofence("owner", Uuid::new_v4(), rename.clone()),
            Err(GeofenceError::NotFound { .. })
        ));
        assert!(matches!(
            engine.update_geofence(
                "owner",
                zone.id,
                GeofenceUpdate {
                    geometry: Some(GeofenceGeometry::Polygon { vertices: vec![] }),
                    ..GeofenceUpdate::default()
                }
            ),
            Err(GeofenceError::Validation { .. })
        ));

        let updated = engine.update_geofence("owner", zone.id, rename).unwrap();
        assert_eq!(updated.name, "dock");
        assert_eq!(engine.geofence(zone.id).unwrap().name, "dock");
    }

    #[test]
    fn area_query_matches_circles_and_polygon_vertices() {
        let (engine, _, _) = engine();
        let near = engine
            .create_geofence("owner", circle("near", 500.0, GeofenceTriggers::default()))
            .unwrap();
        let far_polygon = engine
            .create_geofence(
                "owner",
                NewGeofence {
                    name: "far".to_string(),
                    description: None,
                    geometry: GeofenceGeometry::Polygon {
                        vertices: vec![
                            Coordinate::new(53.0, 4.0),
                            Coordinate::new(53.0, 4.1),
                            Coordinate::new(53.1, 4.1),
                        ],
                    },
                    triggers: GeofenceTriggers::default(),
                    metadata: BTreeMap::new(),
                },
            )
            .unwrap();

        let found = engine.geofences_in_area(&Coordinate::new(52.01, 4.0), 1.0);
        let ids: Vec<Uuid> = found.iter().map(|z| z.id).collect();
        assert_eq!(ids, vec![near.id]);

        let found = engine.geofences_in_area(&Coordinate::new(53.0, 4.0), 0.5);
        let ids: Vec<Uuid> = found.iter().map(|z| z.id).collect();
        assert_eq!(ids, vec![far_polygon.id]);
    }

    #[test]
    fn geofences_by_owner_sorted_by_creation() {
        let (engine, clock, _) = engine();
        let first = engine
            .create_geofence("owner", circle("a", 10.0, GeofenceTriggers::default()))
            .unwrap();
        clock.advance(chrono::Duration::seconds(1));
        let second = engine
            .create_geofence("owner", circle("b", 10.0, GeofenceTriggers::default()))
            .unwrap();
        engine
            .create_geofence("other", circle("c", 10.0, GeofenceTriggers::default()))
            .unwrap();

        let ids: Vec<Uuid> = engine
            .geofences_by_owner("owner")
            .iter()
            .map(|z| z.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[test]
    fn event_log_filters_and_cleanup() {
        let (engine, clock, _) = engine();
        let zone = engine
            .create_geofence("owner", circle("home", 100.0, GeofenceTriggers::default()))
            .unwrap();

        engine.process_location_update("alice", &north_of_center(10.0));
        engine.process_location_update("bob", &north_of_center(10.0));
        clock.advance(chrono::Duration::days(31));
        engine.process_location_update("alice", &north_of_center(1_000.0));

        let alice = engine.events(&GeofenceEventFilter {
            user_id: Some("alice".to_string()),
            ..GeofenceEventFilter::default()
        });
        assert_eq!(
            types(&alice),
            vec![GeofenceEventType::Enter, GeofenceEventType::Exit]
        );

        let latest = engine.events(&GeofenceEventFilter {
            geofence_id: Some(zone.id),
            limit: Some(1),
            ..GeofenceEventFilter::default()
        });
        assert_eq!(types(&latest), vec![GeofenceEventType::Exit]);

        let summary = engine.cleanup();
        assert_eq!(summary.events_removed, 2);
        assert_eq!(summary.notifications_removed, 2);
        assert_eq!(engine.events(&GeofenceEventFilter::default()).len(), 1);
    }

    #[test]
    fn users_are_processed_in_parallel() {
        let (engine, _, _) = engine();
        engine
            .create_geofence("owner", circle("plaza", 100.0, GeofenceTriggers::default()))
            .unwrap();
        let engine = Arc::new(engine);

        std::thread::scope(|scope| {
            for i in 0..8 {
                let engine = &engine;
                scope.spawn(move || {
                    let user = format!("user-{i}");
                    for step in 0..100 {
                        let meters = if step % 2 == 0 { 10.0 } else { 500.0 };
                        engine.process_location_update(&user, &north_of_center(meters));
                    }
                });
            }
        });

        let mut per_user: HashMap<String, Vec<GeofenceEventType>> = HashMap::new();
        for event in engine.events(&GeofenceEventFilter::default()) {
            per_user.entry(event.user_id).or_default().push(event.event_type);
        }
        assert_eq!(per_user.len(), 8);
        for (user, events) in per_user {
            assert_eq!(events.len(), 100, "{user}");
            for pair in events.windows(2) {
                assert_ne!(pair[0], pair[1], "{user}");
            }
        }
    }
}
