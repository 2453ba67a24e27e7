//! Periodic pruning of expired engine state.

use std::sync::Arc;
use std::time::Duration;

use geotrack_geofence::GeofenceCleanup;
use geotrack_navigation::NavigationCleanup;
use geotrack_tracking::TrackingCleanup;

use crate::gateway::Gateway;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub tracking: TrackingCleanup,
    pub geofence: GeofenceCleanup,
    pub navigation: NavigationCleanup,
    pub channels_pruned: usize,
    pub lanes_pruned: usize,
}

/// Runs one cleanup pass over every engine and the event hub.
pub fn run_once(gateway: &Gateway) -> CleanupReport {
    let report = CleanupReport {
        tracking: gateway.tracking().cleanup(),
        geofence: gateway.geofence().cleanup(),
        navigation: gateway.navigation().cleanup(),
        channels_pruned: gateway.hub().prune(),
        lanes_pruned: gateway.prune_lanes(),
    };
    log::info!(
        "Cleanup pass done; {} idle stream channels and {} idle user lanes dropped",
        report.channels_pruned,
        report.lanes_pruned
    );
    report
}

/// Spawns the cleanup loop on the current actix runtime. The first pass
/// runs one `period` after startup.
pub fn spawn(gateway: Arc<Gateway>, period: Duration) -> actix_rt::task::JoinHandle<()> {
    let period = period.max(Duration::from_secs(1));
    log::debug!("Scheduling cleanup every {}s", period.as_secs());

    actix_rt::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            ticker.tick().await;
            run_once(&gateway);
        }
    })
}
