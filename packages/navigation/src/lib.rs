#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Route planning and turn-by-turn session tracking.
//!
//! Routes are synthesized as straight legs between waypoints (see
//! [`route`]). A session walks the route's instructions with a monotonic
//! `(segment, instruction)` cursor, records deviations from the current
//! leg and raises `needs_reroute` when a single deviation is too large or
//! too many accumulate. A reroute replaces the route from the traveller's
//! position through the remaining waypoints.
//!
//! Each session sits behind its own mutex. Updates for one session are
//! serialized; different sessions proceed in parallel.

pub mod poi;
pub mod route;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use geotrack_geo::{Coordinate, haversine_distance};
use geotrack_navigation_models::{
    AvoidArea, NavigationConfig, NavigationDeviation, NavigationReroute, NavigationRoute,
    NavigationSession, NavigationUpdate, NewRoute, NewTrafficUpdate, PointOfInterest,
    TrafficUpdate, Waypoint, WaypointKind,
};
use geotrack_runtime::Clock;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use uuid::Uuid;

pub use poi::{PoiSource, StaticPoiSource};

/// Errors that can occur during navigation operations.
#[derive(Debug, Error)]
pub enum NavigationError {
    /// Invalid waypoints, coordinates or traffic reports.
    #[error("Validation error: {message}")]
    Validation {
        /// Description of what went wrong.
        message: String,
    },

    #[error("{kind} not found: {id}")]
    NotFound {
        /// `"route"` or `"session"`.
        kind: &'static str,
        id: Uuid,
    },

    #[error("User {user_id} does not own {kind} {id}")]
    Unauthorized {
        user_id: String,
        kind: &'static str,
        id: Uuid,
    },

    /// The session was stopped or has arrived.
    #[error("Navigation session {id} is no longer active")]
    Inactive {
        /// Session ID.
        id: Uuid,
    },
}

impl NavigationError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Counts of what a [`NavigationEngine::cleanup`] pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NavigationCleanup {
    pub traffic_removed: usize,
    pub sessions_removed: usize,
}

/// Routes, sessions, traffic reports and the POI cache.
pub struct NavigationEngine {
    config: NavigationConfig,
    clock: Arc<dyn Clock>,
    poi_source: Arc<dyn PoiSource>,
    routes: DashMap<Uuid, NavigationRoute>,
    sessions: DashMap<Uuid, Arc<Mutex<NavigationSession>>>,
    active_by_user: DashMap<String, Uuid>,
    traffic: RwLock<Vec<TrafficUpdate>>,
    poi_cache: DashMap<String, Vec<PointOfInterest>>,
}

impl NavigationEngine {
    #[must_use]
    pub fn new(
        config: NavigationConfig,
        clock: Arc<dyn Clock>,
        poi_source: Arc<dyn PoiSource>,
    ) -> Self {
        Self {
            config,
            clock,
            poi_source,
            routes: DashMap::new(),
            sessions: DashMap::new(),
            active_by_user: DashMap::new(),
            traffic: RwLock::new(Vec::new()),
            poi_cache: DashMap::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &NavigationConfig {
        &self.config
    }

    /// Plans and stores a route for `user_id`.
    ///
    /// # Errors
    ///
    /// * [`NavigationError::Validation`] if fewer than two waypoints are
    ///   given or any coordinate is invalid.
    pub fn create_route(
        &self,
        user_id: &str,
        input: NewRoute,
    ) -> Result<NavigationRoute, NavigationError> {
        let route = route::build(user_id, input, self.clock.now())?;

        log::debug!(
            "Route {} for {user_id}: {} segments, {:.0} m",
            route.id,
            route.segments.len(),
            route.total_distance_meters
        );

        self.routes.insert(route.id, route.clone());
        Ok(route)
    }

    #[must_use]
    pub fn route(&self, id: Uuid) -> Option<NavigationRoute> {
        self.routes.get(&id).map(|r| r.clone())
    }

    /// All routes owned by `user_id`, oldest first.
    #[must_use]
    pub fn routes_for_user(&self, user_id: &str) -> Vec<NavigationRoute> {
        let mut routes: Vec<NavigationRoute> = self
            .routes
            .iter()
            .filter(|r| r.owner_user_id == user_id)
            .map(|r| r.clone())
            .collect();
        routes.sort_by_key(|r| r.created_at);
        routes
    }

    /// Starts following `route_id`. Any session the user already has
    /// running is stopped first.
    ///
    /// # Errors
    ///
    /// * [`NavigationError::NotFound`] if the route does not exist.
    /// * [`NavigationError::Unauthorized`] if the route belongs to someone
    ///   else.
    /// * [`NavigationError::Validation`] if `current_location` is invalid.
    pub fn start_navigation(
        &self,
        user_id: &str,
        route_id: Uuid,
        current_location: Coordinate,
    ) -> Result<NavigationSession, NavigationError> {
        if !current_location.is_valid() {
            return Err(NavigationError::validation("current location is invalid"));
        }

        let total_duration_seconds = {
            let route = self.routes.get(&route_id).ok_or(NavigationError::NotFound {
                kind: "route",
                id: route_id,
            })?;
            if route.owner_user_id != user_id {
                return Err(NavigationError::Unauthorized {
                    user_id: user_id.to_string(),
                    kind: "route",
                    id: route_id,
                });
            }
            route.total_duration_seconds
        };

        let previous = self.active_by_user.get(user_id).map(|id| *id);
        if let Some(previous) = previous {
            log::debug!("Stopping session {previous} for {user_id} before starting a new one");
            self.stop_navigation(user_id, previous)?;
        }

        let now = self.clock.now();
        let session = NavigationSession {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            route_id,
            current_segment_index: 0,
            current_instruction_index: 0,
            current_location,
            start_time: now,
            estimated_arrival: after(now, seconds(total_duration_seconds)),
            deviations: Vec::new(),
            reroute_count: 0,
            needs_reroute: false,
            is_active: true,
            arrived: false,
            last_reroute_at: None,
            ended_at: None,
        };

        log::info!("Navigation session {} started for {user_id} on route {route_id}", session.id);

        self.sessions
            .insert(session.id, Arc::new(Mutex::new(session.clone())));
        self.active_by_user.insert(user_id.to_string(), session.id);
        Ok(session)
    }

    /// Feeds a position into a session.
    ///
    /// Records a deviation when the traveller is further than the
    /// deviation threshold from both ends of the current leg, raises
    /// `needs_reroute` on a large deviation or too many recent ones, and
    /// advances the cursor one step when the traveller reaches the current
    /// instruction. Advancing past the last instruction ends the session as
    /// arrived.
    ///
    /// # Errors
    ///
    /// * [`NavigationError::NotFound`] if the session does not exist.
    /// * [`NavigationError::Unauthorized`] if the session belongs to
    ///   someone else.
    /// * [`NavigationError::Inactive`] if the session already ended.
    /// * [`NavigationError::Validation`] if `location` is invalid.
    pub fn update_navigation(
        &self,
        user_id: &str,
        session_id: Uuid,
        location: Coordinate,
    ) -> Result<NavigationUpdate, NavigationError> {
        if !location.is_valid() {
            return Err(NavigationError::validation("location is invalid"));
        }

        let handle = self.session_handle(session_id)?;
        let mut session = handle.lock();
        authorize(&session, user_id)?;
        if !session.is_active {
            return Err(NavigationError::Inactive { id: session_id });
        }

        let route = self.route(session.route_id).ok_or(NavigationError::NotFound {
            kind: "route",
            id: session.route_id,
        })?;
        let segment = route
            .segments
            .get(session.current_segment_index)
            .ok_or_else(|| NavigationError::validation("session cursor is past the route"))?;

        let now = self.clock.now();
        session.current_location = location;

        let deviation_meters = haversine_distance(&location, &segment.start_point)
            .min(haversine_distance(&location, &segment.end_point));

        if deviation_meters > self.config.deviation_threshold_meters {
            log::debug!("Session {session_id} deviated {deviation_meters:.0} m from route");
            session.deviations.push(NavigationDeviation {
                id: Uuid::new_v4(),
                timestamp: now,
                location,
                deviation_distance_meters: deviation_meters,
                was_rerouted: false,
            });
        }

        if !session.needs_reroute
            && (deviation_meters > self.config.reroute_threshold_meters
                || session.recent_deviation_count() > self.config.max_deviations)
        {
            log::info!("Session {session_id} needs a reroute");
            session.needs_reroute = true;
        }

        let reached = route
            .instruction(session.current_segment_index, session.current_instruction_index)
            .is_some_and(|i| {
                haversine_distance(&location, &i.location) <= self.config.advance_radius_meters
            });
        if reached && advance(&mut session, &route) {
            log::info!("Session {session_id} arrived");
            session.is_active = false;
            session.arrived = true;
            session.ended_at = Some(now);
            self.active_by_user
                .remove_if(user_id, |_, active| *active == session_id);
        }

        session.estimated_arrival = if session.is_active {
            after(now, seconds(remaining_seconds(&route, session.current_segment_index)))
        } else {
            now
        };

        let (current_instruction, upcoming_instructions) = if session.is_active {
            let mut remaining = route
                .instructions_from(session.current_segment_index, session.current_instruction_index)
                .cloned();
            let current = remaining.next();
            (current, remaining.take(self.config.lookahead).collect())
        } else {
            (None, Vec::new())
        };

        Ok(NavigationUpdate {
            session_id,
            route_id: route.id,
            current_segment_index: session.current_segment_index,
            current_instruction_index: session.current_instruction_index,
            current_instruction,
            upcoming_instructions,
            deviation_meters,
            needs_reroute: session.needs_reroute,
            arrived: session.arrived,
            is_active: session.is_active,
            estimated_arrival: session.estimated_arrival,
        })
    }

    /// Plans a new route from `current_location` through the waypoints the
    /// session has not reached yet and switches the session onto it.
    ///
    /// The old route is deactivated and the cursor restarts at `(0, 0)`.
    ///
    /// # Errors
    ///
    /// * [`NavigationError::NotFound`] if the session or its route does not
    ///   exist.
    /// * [`NavigationError::Unauthorized`] if the session belongs to
    ///   someone else.
    /// * [`NavigationError::Inactive`] if the session already ended.
    /// * [`NavigationError::Validation`] if `current_location` is invalid.
    pub fn reroute_navigation(
        &self,
        user_id: &str,
        session_id: Uuid,
        current_location: Coordinate,
        avoid_areas: Vec<AvoidArea>,
    ) -> Result<NavigationReroute, NavigationError> {
        let handle = self.session_handle(session_id)?;
        let mut session = handle.lock();
        authorize(&session, user_id)?;
        if !session.is_active {
            return Err(NavigationError::Inactive { id: session_id });
        }

        let previous = self.route(session.route_id).ok_or(NavigationError::NotFound {
            kind: "route",
            id: session.route_id,
        })?;

        let mut waypoints = vec![Waypoint {
            location: current_location,
            name: Some("Current location".to_string()),
            kind: WaypointKind::Start,
        }];
        waypoints.extend(
            previous
                .waypoints
                .iter()
                .skip(session.current_segment_index + 1)
                .cloned(),
        );

        let mut options = previous.options.clone();
        options.avoid_areas.extend(avoid_areas);

        let now = self.clock.now();
        let route = route::build(
            user_id,
            NewRoute {
                waypoints,
                options,
                name: previous.name.clone(),
                metadata: previous.metadata.clone(),
            },
            now,
        )?;

        if let Some(mut old) = self.routes.get_mut(&previous.id) {
            old.is_active = false;
        }
        self.routes.insert(route.id, route.clone());

        session.route_id = route.id;
        session.current_segment_index = 0;
        session.current_instruction_index = 0;
        session.current_location = current_location;
        session.reroute_count += 1;
        session.needs_reroute = false;
        session.last_reroute_at = Some(now);
        session.estimated_arrival = after(now, seconds(route.total_duration_seconds));
        if let Some(last) = session.deviations.last_mut() {
            last.was_rerouted = true;
        }

        log::info!(
            "Session {session_id} rerouted onto {} (reroute #{})",
            route.id,
            session.reroute_count
        );

        Ok(NavigationReroute {
            session: session.clone(),
            route,
        })
    }

    /// Ends a session. Stopping an ended session returns it unchanged.
    ///
    /// # Errors
    ///
    /// * [`NavigationError::NotFound`] if the session does not exist.
    /// * [`NavigationError::Unauthorized`] if the session belongs to
    ///   someone else.
    pub fn stop_navigation(
        &self,
        user_id: &str,
        session_id: Uuid,
    ) -> Result<NavigationSession, NavigationError> {
        let handle = self.session_handle(session_id)?;
        let mut session = handle.lock();
        authorize(&session, user_id)?;

        if session.is_active {
            session.is_active = false;
            session.ended_at = Some(self.clock.now());
            self.active_by_user
                .remove_if(user_id, |_, active| *active == session_id);
            log::info!("Navigation session {session_id} stopped by {user_id}");
        }

        Ok(session.clone())
    }

    #[must_use]
    pub fn session(&self, id: Uuid) -> Option<NavigationSession> {
        let handle = self.sessions.get(&id).map(|s| Arc::clone(s.value()))?;
        let session = handle.lock().clone();
        Some(session)
    }

    #[must_use]
    pub fn active_session_for_user(&self, user_id: &str) -> Option<NavigationSession> {
        let id = self.active_by_user.get(user_id).map(|id| *id)?;
        self.session(id).filter(|s| s.is_active)
    }

    /// Points of interest within `radius_meters`, nearest first, at most
    /// `limit` of them. Results are cached per location bucket, radius and
    /// category.
    #[must_use]
    pub fn points_of_interest(
        &self,
        location: &Coordinate,
        radius_meters: f64,
        category: Option<&str>,
        limit: usize,
    ) -> Vec<PointOfInterest> {
        let key = poi::cache_key(location, radius_meters, category);

        let cached = self.poi_cache.get(&key).map(|c| c.clone());
        let mut found = if let Some(cached) = cached {
            log::trace!("POI cache hit for {key}");
            cached
        } else {
            let found = self.poi_source.search(location, radius_meters, category);
            self.poi_cache.insert(key, found.clone());
            found
        };

        found.truncate(limit);
        found
    }

    /// Records a traffic report and marks matching legs of active routes
    /// with its severity. A leg matches when either end lies within the
    /// report's radius.
    ///
    /// # Errors
    ///
    /// * [`NavigationError::Validation`] if the location or radius is
    ///   invalid or the end time is not after the start time.
    pub fn add_traffic_update(
        &self,
        reported_by: &str,
        input: NewTrafficUpdate,
    ) -> Result<TrafficUpdate, NavigationError> {
        if !input.location.is_valid() {
            return Err(NavigationError::validation("traffic location is invalid"));
        }
        if !input.radius_meters.is_finite() || input.radius_meters <= 0.0 {
            return Err(NavigationError::validation(format!(
                "traffic radius must be positive, got {}",
                input.radius_meters
            )));
        }

        let now = self.clock.now();
        let start_time = input.start_time.unwrap_or(now);
        if input.end_time.is_some_and(|end| end <= start_time) {
            return Err(NavigationError::validation(
                "traffic end time must be after its start time",
            ));
        }

        let update = TrafficUpdate {
            id: Uuid::new_v4(),
            location: input.location,
            radius_meters: input.radius_meters,
            severity: input.severity,
            traffic_type: input.traffic_type,
            description: input.description,
            start_time,
            end_time: input.end_time,
            reported_by: reported_by.to_string(),
        };

        let mut affected = 0_usize;
        for mut route in self.routes.iter_mut() {
            if !route.is_active {
                continue;
            }
            for segment in &mut route.segments {
                let within = |point: &Coordinate| {
                    haversine_distance(point, &update.location) <= update.radius_meters
                };
                if within(&segment.start_point) || within(&segment.end_point) {
                    segment.traffic_condition = segment.traffic_condition.max(update.severity);
                    affected += 1;
                }
            }
        }

        log::info!(
            "Traffic {} ({}, {}) reported by {reported_by}; {affected} segments affected",
            update.id,
            update.traffic_type,
            update.severity
        );

        self.traffic.write().push(update.clone());
        Ok(update)
    }

    /// Unexpired traffic reports whose area overlaps the query disk.
    #[must_use]
    pub fn traffic_near(&self, location: &Coordinate, radius_meters: f64) -> Vec<TrafficUpdate> {
        let now = self.clock.now();
        let ttl = hours(self.config.traffic_default_ttl_hours);

        self.traffic
            .read()
            .iter()
            .filter(|t| !is_expired(t, now, ttl))
            .filter(|t| {
                haversine_distance(location, &t.location) <= radius_meters + t.radius_meters
            })
            .cloned()
            .collect()
    }

    /// Drops expired traffic reports and sessions that ended longer ago
    /// than the retention period.
    pub fn cleanup(&self) -> NavigationCleanup {
        let now = self.clock.now();
        let ttl = hours(self.config.traffic_default_ttl_hours);
        let session_cutoff = now
            .checked_sub_signed(hours(self.config.session_retention_hours))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let traffic_removed = {
            let mut traffic = self.traffic.write();
            let before = traffic.len();
            traffic.retain(|t| !is_expired(t, now, ttl));
            before - traffic.len()
        };

        let handles: Vec<(Uuid, Arc<Mutex<NavigationSession>>)> = self
            .sessions
            .iter()
            .map(|s| (*s.key(), Arc::clone(s.value())))
            .collect();

        let mut sessions_removed = 0;
        for (id, handle) in handles {
            let expired = handle
                .lock()
                .ended_at
                .is_some_and(|ended| ended <= session_cutoff);
            if expired && self.sessions.remove(&id).is_some() {
                sessions_removed += 1;
            }
        }

        if traffic_removed > 0 || sessions_removed > 0 {
            log::info!(
                "Navigation cleanup removed {traffic_removed} traffic reports and {sessions_removed} sessions"
            );
        }

        NavigationCleanup {
            traffic_removed,
            sessions_removed,
        }
    }

    fn session_handle(&self, id: Uuid) -> Result<Arc<Mutex<NavigationSession>>, NavigationError> {
        self.sessions
            .get(&id)
            .map(|s| Arc::clone(s.value()))
            .ok_or(NavigationError::NotFound {
                kind: "session",
                id,
            })
    }
}

fn authorize(session: &NavigationSession, user_id: &str) -> Result<(), NavigationError> {
    if session.user_id == user_id {
        Ok(())
    } else {
        Err(NavigationError::Unauthorized {
            user_id: user_id.to_string(),
            kind: "session",
            id: session.id,
        })
    }
}

/// Moves the cursor one instruction forward. Returns `true` when it was
/// already on the final instruction.
fn advance(session: &mut NavigationSession, route: &NavigationRoute) -> bool {
    let in_segment = route
        .segments
        .get(session.current_segment_index)
        .map_or(0, |s| s.instructions.len());

    if session.current_instruction_index + 1 < in_segment {
        session.current_instruction_index += 1;
        false
    } else if session.current_segment_index + 1 < route.segments.len() {
        session.current_segment_index += 1;
        session.current_instruction_index = 0;
        false
    } else {
        true
    }
}

fn remaining_seconds(route: &NavigationRoute, from_segment: usize) -> f64 {
    route
        .segments
        .iter()
        .skip(from_segment)
        .map(|s| s.duration_seconds)
        .sum()
}

/// A default expiry past the end of representable time never arrives.
fn is_expired(update: &TrafficUpdate, now: DateTime<Utc>, ttl: Duration) -> bool {
    update.end_time.map_or_else(
        || {
            update
                .start_time
                .checked_add_signed(ttl)
                .is_some_and(|expiry| expiry <= now)
        },
        |end| end <= now,
    )
}

fn hours(hours: i64) -> Duration {
    Duration::try_hours(hours).unwrap_or(Duration::MAX)
}

#[allow(clippy::cast_possible_truncation)]
fn seconds(secs: f64) -> Duration {
    Duration::try_milliseconds((secs * 1000.0).round() as i64).unwrap_or(Duration::MAX)
}

fn after(now: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
