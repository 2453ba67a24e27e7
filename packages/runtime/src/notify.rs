//! Notification hand-off.
//!
//! The engines only record *intent* to notify. Choosing a delivery channel
//! (push, email, SMS) is the job of an external dispatcher that consumes
//! [`PendingNotification`] records through a [`NotificationSink`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// What triggered a notification.
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
pub enum NotificationKind {
    GeofenceEnter,
    GeofenceExit,
    GeofenceDwell,
    ProximityAlert,
}

/// A notification the core wants delivered. Channel selection is deferred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingNotification {
    /// Unique notification ID.
    pub id: Uuid,
    /// Recipient.
    pub user_id: String,
    /// What triggered it.
    pub kind: NotificationKind,
    /// Short headline.
    pub title: String,
    /// Human-readable message.
    pub body: String,
    /// Structured payload for the dispatcher (ids, coordinates).
    pub data: serde_json::Value,
    /// Server time the triggering event happened.
    pub created_at: DateTime<Utc>,
}

/// Receiver of notification intents.
pub trait NotificationSink: Send + Sync {
    /// Hands a notification to the dispatcher. Must not block.
    fn notify(&self, notification: PendingNotification);
}

/// Drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _notification: PendingNotification) {}
}

/// Logs each notification at `info` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, notification: PendingNotification) {
        log::info!(
            "Notification {} for {}: {} ({})",
            notification.kind,
            notification.user_id,
            notification.title,
            notification.body
        );
    }
}

/// Keeps every notification in memory for later inspection.
#[derive(Debug, Default)]
pub struct RecordingSink {
    received: Mutex<Vec<PendingNotification>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything received so far, oldest first.
    #[must_use]
    pub fn received(&self) -> Vec<PendingNotification> {
        self.received.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.received.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.received.lock().is_empty()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: PendingNotification) {
        self.received.lock().push(notification);
    }
}
