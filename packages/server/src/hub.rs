//! Fan-out of outbound events to connected clients.
//!
//! Every user with an open stream has a broadcast channel; a separate
//! global channel carries [`Scope::Global`] events. Zone subscriptions are
//! plain user sets resolved at publish time.

use std::collections::BTreeSet;

use dashmap::DashMap;
use geotrack_server_models::{OutboundEnvelope, OutboundEvent, Scope};
use tokio::sync::broadcast;
use uuid::Uuid;

pub struct EventHub {
    capacity: usize,
    users: DashMap<String, broadcast::Sender<OutboundEvent>>,
    zones: DashMap<Uuid, BTreeSet<String>>,
    global: broadcast::Sender<OutboundEvent>,
}

impl EventHub {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (global, _) = broadcast::channel(capacity);
        Self {
            capacity,
            users: DashMap::new(),
            zones: DashMap::new(),
            global,
        }
    }

    /// Receiver for events addressed to `user_id`.
    pub fn subscribe_user(&self, user_id: &str) -> broadcast::Receiver<OutboundEvent> {
        self.users
            .entry(user_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Receiver for global events.
    #[must_use]
    pub fn subscribe_global(&self) -> broadcast::Receiver<OutboundEvent> {
        self.global.subscribe()
    }

    /// Adds `user_id` to the zone's subscribers. Returns `false` if it was
    /// already subscribed.
    pub fn subscribe_zone(&self, zone_id: Uuid, user_id: &str) -> bool {
        self.zones
            .entry(zone_id)
            .or_default()
            .insert(user_id.to_string())
    }

    pub fn unsubscribe_zone(&self, zone_id: Uuid, user_id: &str) -> bool {
        self.zones
            .get_mut(&zone_id)
            .is_some_and(|mut users| users.remove(user_id))
    }

    #[must_use]
    pub fn zone_subscribers(&self, zone_id: Uuid) -> BTreeSet<String> {
        self.zones
            .get(&zone_id)
            .map(|users| users.clone())
            .unwrap_or_default()
    }

    /// Drops every subscription to a deleted zone.
    pub fn forget_zone(&self, zone_id: Uuid) {
        self.zones.remove(&zone_id);
    }

    /// Delivers an envelope to its scope. Returns the number of receivers
    /// that got it; users without an open stream are skipped.
    pub fn publish(&self, envelope: OutboundEnvelope) -> usize {
        let OutboundEnvelope { scope, event } = envelope;
        log::trace!("Publishing {} to {scope:?}", event.name());

        match scope {
            Scope::User(user_id) => self.send_to(&user_id, &event),
            Scope::Users(user_ids) => user_ids
                .iter()
                .map(|user_id| self.send_to(user_id, &event))
                .sum(),
            Scope::Zone(zone_id) => self
                .zone_subscribers(zone_id)
                .iter()
                .map(|user_id| self.send_to(user_id, &event))
                .sum(),
            Scope::Global => self.global.send(event).unwrap_or(0),
        }
    }

    fn send_to(&self, user_id: &str, event: &OutboundEvent) -> usize {
        let Some(sender) = self.users.get(user_id).map(|s| s.clone()) else {
            return 0;
        };
        sender.send(event.clone()).unwrap_or(0)
    }

    /// Removes user channels nobody is listening on. Returns how many were
    /// removed.
    pub fn prune(&self) -> usize {
        let before = self.users.len();
        self.users.retain(|_, sender| sender.receiver_count() > 0);
        before - self.users.len()
    }

    #[must_use]
    pub fn connected_users(&self) -> usize {
        self.users
            .iter()
            .filter(|s| s.receiver_count() > 0)
            .count()
    }
}
