#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web server for the geotrack engines.
//!
//! Clients post inbound events to `/api/events` and receive outbound
//! events over a Server-Sent Events stream at `/api/stream`. Read-only
//! queries against the engines are plain JSON endpoints. All state lives
//! in memory; a background task prunes it on a fixed interval.

pub mod cleanup;
pub mod config;
pub mod gateway;
mod handlers;
pub mod hub;

use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, HttpServer, middleware, web};
use geotrack_geofence::GeofenceEngine;
use geotrack_navigation::{NavigationEngine, PoiSource, StaticPoiSource};
use geotrack_runtime::{Clock, LogSink, NotificationSink, SystemClock};
use geotrack_tracking::TrackingStore;

pub use config::{ConfigError, Settings};
pub use gateway::{Gateway, GatewayError};
pub use handlers::USER_HEADER;
pub use hub::EventHub;

/// Shared application state.
pub struct AppState {
    pub gateway: Arc<Gateway>,
}

impl AppState {
    /// Wires the engines and the event hub from `settings`.
    #[must_use]
    pub fn new(
        settings: &Settings,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn NotificationSink>,
        poi_source: Arc<dyn PoiSource>,
    ) -> Self {
        let tracking = TrackingStore::new(settings.tracking.clone(), clock.clone(), sink.clone());
        let geofence = GeofenceEngine::new(settings.geofence.clone(), clock.clone(), sink);
        let navigation = NavigationEngine::new(settings.navigation.clone(), clock.clone(), poi_source);

        Self {
            gateway: Arc::new(Gateway::new(
                clock,
                Arc::new(tracking),
                Arc::new(geofence),
                Arc::new(navigation),
                Arc::new(EventHub::new(settings.stream_buffer)),
            )),
        }
    }
}

/// Registers every API route under `/api`.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/events", web::post().to(handlers::post_event))
            .route("/stream", web::get().to(handlers::stream))
            .route("/history", web::get().to(handlers::history))
            .route("/analytics", web::get().to(handlers::analytics))
            .route("/geofences", web::get().to(handlers::geofences))
            .route("/geofence-events", web::get().to(handlers::geofence_events))
            .route("/shared", web::get().to(handlers::shared))
            .route("/navigation", web::get().to(handlers::navigation))
            .route("/pois", web::get().to(handlers::pois)),
    );
}

/// Loads settings, starts the cleanup task and serves until shutdown.
///
/// # Errors
///
/// * If the settings cannot be loaded
/// * If the server fails to bind or run
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let settings = Settings::load().map_err(std::io::Error::other)?;

    let state = web::Data::new(AppState::new(
        &settings,
        SystemClock::shared(),
        Arc::new(LogSink),
        Arc::new(StaticPoiSource::default()),
    ));

    let cleanup = cleanup::spawn(
        state.gateway.clone(),
        Duration::from_secs(settings.cleanup_interval_secs),
    );

    log::info!("Starting server on {}:{}", settings.bind_addr, settings.port);

    let result = HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(routes)
    })
    .bind((settings.bind_addr.as_str(), settings.port))?
    .run()
    .await;

    cleanup.abort();
    result
}
