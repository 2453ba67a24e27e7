#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Per-user location tracking store.
//!
//! Holds each user's capped location history, time-boxed location sharing
//! sessions, and one-shot proximity alerts. Every update for a given user
//! is serialized through that user's lock; different users proceed in
//! parallel.
//!
//! Lock order is always "user history lock, then map shards". Map guards
//! are never held while waiting on a history lock.

pub mod analytics;

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use geotrack_geo::haversine_distance;
use geotrack_runtime::{Clock, NotificationKind, NotificationSink, PendingNotification};
use geotrack_tracking_models::{
    LocationAnalytics, LocationPoint, LocationShareSession, ProximityAlert, SharePermissions,
    TrackingConfig, TrackingMode, TrackingStatus, UserLocationHistory,
};
use parking_lot::Mutex;
use thiserror::Error;
use uuid::Uuid;

/// Errors returned by [`TrackingStore`] operations.
#[derive(Debug, Error)]
pub enum TrackingError {
    /// The request itself is malformed or a precondition is unmet.
    #[error("Validation error: {message}")]
    Validation {
        /// What was wrong with the request.
        message: String,
    },

    /// The referenced share session or alert does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Resource kind (e.g. "share session").
        kind: &'static str,
        /// Requested identifier.
        id: String,
    },

    /// The caller does not own the referenced resource.
    #[error("User {user_id} may not modify {kind} {id}")]
    Unauthorized {
        /// Acting user.
        user_id: String,
        /// Resource kind.
        kind: &'static str,
        /// Resource identifier.
        id: String,
    },
}

impl TrackingError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Time range and size limit for history reads.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    /// Inclusive lower bound on sample timestamp.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on sample timestamp.
    pub to: Option<DateTime<Utc>>,
    /// Keep only the most recent `limit` matches.
    pub limit: Option<usize>,
}

/// Counts of what a [`TrackingStore::cleanup`] pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackingCleanup {
    pub points_removed: usize,
    pub histories_removed: usize,
    pub shares_removed: usize,
    /// Latest-location entries older than the retention window.
    pub locations_removed: usize,
    /// Triggered alerts older than the retention window.
    pub alerts_removed: usize,
}

/// In-memory location tracking state for all users.
pub struct TrackingStore {
    config: TrackingConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn NotificationSink>,
    histories: DashMap<String, Arc<Mutex<UserLocationHistory>>>,
    /// Most recent accepted sample per user.
    latest: DashMap<String, LocationPoint>,
    shares: DashMap<Uuid, LocationShareSession>,
    /// Owner user ID -> that owner's alerts.
    alerts: DashMap<String, Vec<ProximityAlert>>,
}

impl TrackingStore {
    #[must_use]
    pub fn new(
        config: TrackingConfig,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            config,
            clock,
            sink,
            histories: DashMap::new(),
            latest: DashMap::new(),
            shares: DashMap::new(),
            alerts: DashMap::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &TrackingConfig {
        &self.config
    }

    fn history_handle(&self, user_id: &str) -> Option<Arc<Mutex<UserLocationHistory>>> {
        self.histories
            .get(user_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Starts (or resumes) tracking for `user_id` in the given mode.
    ///
    /// Idempotent: an existing history is kept and only its mode and
    /// tracking flag change.
    pub fn start_tracking(&self, user_id: &str, mode: TrackingMode) -> TrackingStatus {
        let now = self.clock.now();
        loop {
            let handle = Arc::clone(
                self.histories
                    .entry(user_id.to_string())
                    .or_insert_with(|| {
                        Arc::new(Mutex::new(UserLocationHistory {
                            user_id: user_id.to_string(),
                            locations: Vec::new(),
                            tracking_mode: mode,
                            is_tracking: false,
                            started_at: now,
                            last_update: None,
                        }))
                    })
                    .value(),
            );

            let mut history = handle.lock();

            // Cleanup may have removed an idle history between the clone
            // and the lock. Activating that detached copy would lose it.
            let attached = self
                .histories
                .get(user_id)
                .is_some_and(|entry| Arc::ptr_eq(entry.value(), &handle));
            if !attached {
                log::trace!("History for {user_id} was removed concurrently, retrying");
                continue;
            }

            if !history.is_tracking {
                history.started_at = now;
            }
            history.is_tracking = true;
            history.tracking_mode = mode;

            log::debug!("Tracking started for {user_id} ({mode})");

            return status_of(&history);
        }
    }

    /// Stops tracking. Returns `false` if the user was not tracking.
    pub fn stop_tracking(&self, user_id: &str) -> bool {
        let Some(handle) = self.history_handle(user_id) else {
            return false;
        };
        let mut history = handle.lock();
        let was_tracking = history.is_tracking;
        history.is_tracking = false;

        if was_tracking {
            log::debug!("Tracking stopped for {user_id}");
        }
        was_tracking
    }

    /// Records a location sample.
    ///
    /// Returns `false` (and records nothing) if the user is not currently
    /// tracking or the sample's coordinate is out of range. On success the history is truncated to the most recent
    /// `max_history` samples, proximity alerts owned by the user are
    /// evaluated, and the user's live share sessions are refreshed.
    pub fn update(&self, user_id: &str, sample: LocationPoint) -> bool {
        if !sample.coordinate().is_valid() {
            log::warn!(
                "Rejected location update for {user_id}: invalid coordinate ({}, {})",
                sample.latitude,
                sample.longitude
            );
            return false;
        }

        let Some(handle) = self.history_handle(user_id) else {
            log::warn!("Rejected location update for {user_id}: tracking never started");
            return false;
        };

        let mut history = handle.lock();
        if !history.is_tracking {
            log::warn!("Rejected location update for {user_id}: tracking stopped");
            return false;
        }

        let now = self.clock.now();
        history.locations.push(sample.clone());
        let len = history.locations.len();
        if len > self.config.max_history {
            history.locations.drain(..len - self.config.max_history);
        }
        history.last_update = Some(now);

        self.latest.insert(user_id.to_string(), sample.clone());

        let notifications = self.check_proximity_alerts(user_id, &sample, now);
        self.refresh_shares(user_id, &sample, now);
        drop(history);

        for notification in notifications {
            self.sink.notify(notification);
        }

        true
    }

    /// Latches every armed alert owned by `user_id` whose target is now in
    /// range. Alerts never re-arm.
    fn check_proximity_alerts(
        &self,
        user_id: &str,
        sample: &LocationPoint,
        now: DateTime<Utc>,
    ) -> Vec<PendingNotification> {
        let Some(mut alerts) = self.alerts.get_mut(user_id) else {
            return Vec::new();
        };

        let here = sample.coordinate();
        let mut notifications = Vec::new();

        for alert in alerts.iter_mut().filter(|a| a.is_armed()) {
            let Some(target) = self
                .latest
                .get(&alert.target_user_id)
                .map(|entry| entry.coordinate())
            else {
                continue;
            };

            let distance = haversine_distance(&here, &target);
            if distance > alert.radius_meters {
                continue;
            }

            alert.triggered_at = Some(now);
            log::debug!(
                "Proximity alert {} triggered: {} within {distance:.0} m of {}",
                alert.id,
                alert.target_user_id,
                alert.owner_user_id
            );

            notifications.push(PendingNotification {
                id: Uuid::new_v4(),
                user_id: alert.owner_user_id.clone(),
                kind: NotificationKind::ProximityAlert,
                title: "Proximity alert".to_string(),
                body: alert.message.clone().unwrap_or_else(|| {
                    format!(
                        "{} is within {:.0} m of you",
                        alert.target_user_id, alert.radius_meters
                    )
                }),
                data: serde_json::json!({
                    "alertId": alert.id,
                    "targetUserId": alert.target_user_id,
                    "distanceMeters": distance,
                }),
                created_at: now,
            });
        }

        notifications
    }

    fn refresh_shares(&self, user_id: &str, sample: &LocationPoint, now: DateTime<Utc>) {
        for mut share in self.shares.iter_mut() {
            if share.owner_user_id == user_id && share.is_live(now) {
                share.last_location = Some(sample.clone());
            }
        }
    }

    /// Most recent accepted sample, if any.
    #[must_use]
    pub fn current_location(&self, user_id: &str) -> Option<LocationPoint> {
        self.latest.get(user_id).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn tracking_status(&self, user_id: &str) -> Option<TrackingStatus> {
        self.history_handle(user_id)
            .map(|handle| status_of(&handle.lock()))
    }

    /// Samples matching `query`, oldest first.
    #[must_use]
    pub fn history(&self, user_id: &str, query: &HistoryQuery) -> Vec<LocationPoint> {
        let Some(handle) = self.history_handle(user_id) else {
            return Vec::new();
        };
        let history = handle.lock();

        let matching: Vec<&LocationPoint> = history
            .locations
            .iter()
            .filter(|p| query.from.is_none_or(|from| p.timestamp >= from))
            .filter(|p| query.to.is_none_or(|to| p.timestamp <= to))
            .collect();

        let skip = query
            .limit
            .map_or(0, |limit| matching.len().saturating_sub(limit));

        matching.into_iter().skip(skip).cloned().collect()
    }

    /// Shares the owner's live location with `recipients` for `minutes`.
    ///
    /// # Errors
    ///
    /// * [`TrackingError::Validation`] if the owner has no known location,
    ///   the recipient list is empty, or the duration is not positive or
    ///   too large to represent.
    pub fn start_sharing(
        &self,
        user_id: &str,
        recipients: impl IntoIterator<Item = String>,
        minutes: i64,
        permissions: SharePermissions,
    ) -> Result<LocationShareSession, TrackingError> {
        if minutes <= 0 {
            return Err(TrackingError::validation(
                "share duration must be at least one minute",
            ));
        }

        let shared_with: BTreeSet<String> = recipients
            .into_iter()
            .filter(|r| r != user_id)
            .collect();
        if shared_with.is_empty() {
            return Err(TrackingError::validation(
                "at least one recipient is required",
            ));
        }

        let Some(last_location) = self.current_location(user_id) else {
            return Err(TrackingError::validation(
                "cannot share location before any location has been reported",
            ));
        };

        let now = self.clock.now();
        let Some(expires_at) =
            Duration::try_minutes(minutes).and_then(|d| now.checked_add_signed(d))
        else {
            return Err(TrackingError::validation(format!(
                "share duration of {minutes} minutes is out of range"
            )));
        };

        let session = LocationShareSession {
            id: Uuid::new_v4(),
            owner_user_id: user_id.to_string(),
            shared_with,
            last_location: Some(last_location),
            permissions,
            created_at: now,
            expires_at,
            is_active: true,
        };

        log::debug!(
            "User {user_id} sharing location with {} users until {}",
            session.shared_with.len(),
            session.expires_at
        );

        self.shares.insert(session.id, session.clone());
        Ok(session)
    }

    /// Marks a share session inactive. The record stays until cleanup.
    ///
    /// # Errors
    ///
    /// * [`TrackingError::NotFound`] if the session does not exist.
    /// * [`TrackingError::Unauthorized`] if `user_id` is not the owner.
    pub fn stop_sharing(&self, user_id: &str, session_id: Uuid) -> Result<(), TrackingError> {
        let mut share = self
            .shares
            .get_mut(&session_id)
            .ok_or_else(|| TrackingError::NotFound {
                kind: "share session",
                id: session_id.to_string(),
            })?;

        if share.owner_user_id != user_id {
            return Err(TrackingError::Unauthorized {
                user_id: user_id.to_string(),
                kind: "share session",
                id: session_id.to_string(),
            });
        }

        share.is_active = false;
        Ok(())
    }

    /// Live share sessions that include `viewer_id` as a recipient.
    #[must_use]
    pub fn shared_locations_for(&self, viewer_id: &str) -> Vec<LocationShareSession> {
        let now = self.clock.now();
        self.shares
            .iter()
            .filter(|s| s.is_live(now) && s.shared_with.contains(viewer_id))
            .map(|s| s.value().clone())
            .collect()
    }

    /// Live share sessions created by `owner_id`.
    #[must_use]
    pub fn active_shares_by_owner(&self, owner_id: &str) -> Vec<LocationShareSession> {
        let now = self.clock.now();
        self.shares
            .iter()
            .filter(|s| s.is_live(now) && s.owner_user_id == owner_id)
            .map(|s| s.value().clone())
            .collect()
    }

    /// Everyone currently allowed to see `owner_id`'s location.
    #[must_use]
    pub fn share_viewers(&self, owner_id: &str) -> BTreeSet<String> {
        self.active_shares_by_owner(owner_id)
            .into_iter()
            .flat_map(|s| s.shared_with)
            .collect()
    }

    /// Registers a one-shot alert that fires when `target_id` is within
    /// `radius_meters` of `owner_id` on one of the owner's updates.
    ///
    /// # Errors
    ///
    /// * [`TrackingError::Validation`] if the radius is not positive or the
    ///   owner targets themselves.
    pub fn create_proximity_alert(
        &self,
        owner_id: &str,
        target_id: &str,
        radius_meters: f64,
        message: Option<String>,
    ) -> Result<ProximityAlert, TrackingError> {
        if !radius_meters.is_finite() || radius_meters <= 0.0 {
            return Err(TrackingError::validation(
                "proximity radius must be greater than zero",
            ));
        }
        if owner_id == target_id {
            return Err(TrackingError::validation(
                "a proximity alert cannot target its owner",
            ));
        }

        let alert = ProximityAlert {
            id: Uuid::new_v4(),
            owner_user_id: owner_id.to_string(),
            target_user_id: target_id.to_string(),
            radius_meters,
            message,
            created_at: self.clock.now(),
            triggered_at: None,
        };

        self.alerts
            .entry(owner_id.to_string())
            .or_default()
            .push(alert.clone());

        Ok(alert)
    }

    #[must_use]
    pub fn proximity_alerts(&self, owner_id: &str) -> Vec<ProximityAlert> {
        self.alerts
            .get(owner_id)
            .map(|alerts| alerts.value().clone())
            .unwrap_or_default()
    }

    /// # Errors
    ///
    /// * [`TrackingError::NotFound`] if `owner_id` has no alert `alert_id`.
    pub fn delete_proximity_alert(&self, owner_id: &str, alert_id: Uuid) -> Result<(), TrackingError> {
        let not_found = || TrackingError::NotFound {
            kind: "proximity alert",
            id: alert_id.to_string(),
        };

        let mut alerts = self.alerts.get_mut(owner_id).ok_or_else(not_found)?;
        let before = alerts.len();
        alerts.retain(|a| a.id != alert_id);

        if alerts.len() == before {
            return Err(not_found());
        }
        Ok(())
    }

    /// Movement statistics over the trailing `days`.
    ///
    /// # Errors
    ///
    /// * [`TrackingError::Validation`] if the window reaches past the
    ///   representable time range or fewer than two samples fall in it.
    pub fn analytics(&self, user_id: &str, days: u32) -> Result<LocationAnalytics, TrackingError> {
        let since = Duration::try_days(i64::from(days))
            .and_then(|d| self.clock.now().checked_sub_signed(d))
            .ok_or_else(|| {
                TrackingError::validation(format!("analytics window of {days} days is out of range"))
            })?;
        let points = self.history(
            user_id,
            &HistoryQuery {
                from: Some(since),
                ..HistoryQuery::default()
            },
        );

        analytics::compute(
            user_id,
            days,
            &points,
            self.config.cluster_radius_meters,
            self.config.max_visited_areas,
        )
        .ok_or_else(|| {
            TrackingError::validation("at least two location samples are required for analytics")
        })
    }

    /// Drops history, latest locations and triggered alerts older than the
    /// retention window, and share sessions that are stopped or expired.
    ///
    /// Each user's lock is held for one prune only.
    pub fn cleanup(&self) -> TrackingCleanup {
        let now = self.clock.now();
        let cutoff = Duration::try_days(self.config.retention_days)
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut summary = TrackingCleanup::default();

        let handles: Vec<(String, Arc<Mutex<UserLocationHistory>>)> = self
            .histories
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        for (user_id, handle) in handles {
            let mut history = handle.lock();
            let before = history.locations.len();
            history.locations.retain(|p| p.timestamp >= cutoff);
            summary.points_removed += before - history.locations.len();

            let idle = !history.is_tracking && history.locations.is_empty();
            drop(history);

            // Re-checked under the shard lock: a concurrent start_tracking
            // may have revived the history since. try_lock keeps the lock
            // order intact; a busy history is simply left for the next pass.
            if idle
                && self
                    .histories
                    .remove_if(&user_id, |_, current| {
                        Arc::ptr_eq(current, &handle)
                            && current
                                .try_lock()
                                .is_some_and(|h| !h.is_tracking && h.locations.is_empty())
                    })
                    .is_some()
            {
                summary.histories_removed += 1;
            }
        }

        let before = self.latest.len();
        self.latest.retain(|_, point| point.timestamp >= cutoff);
        summary.locations_removed = before - self.latest.len();

        self.alerts.retain(|_, alerts| {
            let before = alerts.len();
            alerts.retain(|a| a.triggered_at.is_none_or(|at| at >= cutoff));
            summary.alerts_removed += before - alerts.len();
            !alerts.is_empty()
        });

        let before = self.shares.len();
        self.shares.retain(|_, share| share.is_live(now));
        summary.shares_removed = before - self.shares.len();

        log::info!(
            "Tracking cleanup removed {} points, {} idle histories, {} latest locations, {} alerts, {} share sessions",
            summary.points_removed,
            summary.histories_removed,
            summary.locations_removed,
            summary.alerts_removed,
            summary.shares_removed
        );

        summary
    }
}

fn status_of(history: &UserLocationHistory) -> TrackingStatus {
    TrackingStatus {
        user_id: history.user_id.clone(),
        is_tracking: history.is_tracking,
        tracking_mode: history.tracking_mode,
        suggested_interval_seconds: history.tracking_mode.suggested_interval_seconds(),
        point_count: history.locations.len(),
        last_update: history.last_update,
    }
}
