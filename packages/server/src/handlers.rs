//! HTTP handler functions for the geotrack API.
//!
//! The caller is identified by the `X-User-Id` header, which an upstream
//! authentication layer is trusted to set.

use actix_web::{HttpRequest, HttpResponse, http::StatusCode, web};
use geotrack_geo::Coordinate;
use geotrack_geofence_models::GeofenceEventFilter;
use geotrack_server_models::{
    AnalyticsParams, ApiError, ApiHealth, FailureCode, GeofenceListParams, HistoryParams,
    InboundEvent, OutboundEvent, PoiParams,
};
use geotrack_tracking::HistoryQuery;
use tokio::sync::broadcast::error::RecvError;

use crate::AppState;
use crate::gateway::GatewayError;

pub const USER_HEADER: &str = "X-User-Id";

fn caller(req: &HttpRequest) -> Result<String, HttpResponse> {
    req.headers()
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| {
            HttpResponse::Unauthorized().json(ApiError {
                code: FailureCode::Unauthorized,
                error: format!("missing {USER_HEADER} header"),
            })
        })
}

fn error_response(e: &GatewayError) -> HttpResponse {
    let code = e.code();
    let status = match code {
        FailureCode::Validation => StatusCode::BAD_REQUEST,
        FailureCode::NotFound => StatusCode::NOT_FOUND,
        FailureCode::Unauthorized => StatusCode::FORBIDDEN,
        FailureCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    HttpResponse::build(status).json(ApiError {
        code,
        error: e.to_string(),
    })
}

/// `GET /api/health`
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    log::trace!(
        "Health check with {} connected streams",
        state.gateway.hub().connected_users()
    );
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `POST /api/events`
///
/// Dispatches one inbound event, publishes the results to connected
/// streams and returns them to the caller as well.
pub async fn post_event(
    req: HttpRequest,
    state: web::Data<AppState>,
    event: web::Json<InboundEvent>,
) -> HttpResponse {
    let user_id = match caller(&req) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };

    let envelopes = state
        .gateway
        .dispatch_and_publish(&user_id, event.into_inner());
    HttpResponse::Ok().json(envelopes)
}

fn sse_frame(event: &OutboundEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(json) => Some(format!("event: {}\ndata: {json}\n\n", event.name())),
        Err(e) => {
            log::error!("Failed to serialize {} event: {e}", event.name());
            None
        }
    }
}

/// `GET /api/stream`
///
/// Server-Sent Events carrying everything addressed to the caller plus
/// global broadcasts.
pub async fn stream(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let user_id = match caller(&req) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };

    let mut user_rx = state.gateway.hub().subscribe_user(&user_id);
    let mut global_rx = state.gateway.hub().subscribe_global();
    log::info!("{user_id} opened an event stream");

    let body = async_stream::stream! {
        loop {
            let received = tokio::select! {
                event = user_rx.recv() => event,
                event = global_rx.recv() => event,
            };

            match received {
                Ok(event) => {
                    if let Some(frame) = sse_frame(&event) {
                        yield Ok::<_, std::io::Error>(web::Bytes::from(frame));
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    log::warn!("Event stream for {user_id} lagged by {n} events");
                }
                Err(RecvError::Closed) => {
                    log::debug!("Event stream for {user_id} closed");
                    break;
                }
            }
        }
    };

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(body)
}

/// `GET /api/history`
pub async fn history(
    req: HttpRequest,
    state: web::Data<AppState>,
    params: web::Query<HistoryParams>,
) -> HttpResponse {
    let user_id = match caller(&req) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };

    let params = params.into_inner();
    let points = state.gateway.tracking().history(
        &user_id,
        &HistoryQuery {
            from: params.from,
            to: params.to,
            limit: params.limit,
        },
    );
    HttpResponse::Ok().json(points)
}

/// `GET /api/analytics`
pub async fn analytics(
    req: HttpRequest,
    state: web::Data<AppState>,
    params: web::Query<AnalyticsParams>,
) -> HttpResponse {
    let user_id = match caller(&req) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };

    match state
        .gateway
        .tracking()
        .analytics(&user_id, params.days.unwrap_or(7))
    {
        Ok(analytics) => HttpResponse::Ok().json(analytics),
        Err(e) => error_response(&GatewayError::from(e)),
    }
}

/// `GET /api/geofences`
///
/// Zones overlapping an area when one is given, the caller's own zones
/// otherwise.
pub async fn geofences(
    req: HttpRequest,
    state: web::Data<AppState>,
    params: web::Query<GeofenceListParams>,
) -> HttpResponse {
    let user_id = match caller(&req) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };

    let engine = state.gateway.geofence();
    let zones = match (params.latitude, params.longitude, params.radius_km) {
        (Some(latitude), Some(longitude), Some(radius_km)) => {
            let center = Coordinate::new(latitude, longitude);
            if !center.is_valid() || !radius_km.is_finite() || radius_km <= 0.0 {
                return error_response(&GatewayError::Validation(
                    "area queries need a valid center and a positive radius".to_string(),
                ));
            }
            engine.geofences_in_area(&center, radius_km)
        }
        _ => engine.geofences_by_owner(&user_id),
    };
    HttpResponse::Ok().json(zones)
}

/// `GET /api/geofence-events`
///
/// The caller's own events, filtered by zone, type and time.
pub async fn geofence_events(
    req: HttpRequest,
    state: web::Data<AppState>,
    filter: web::Query<GeofenceEventFilter>,
) -> HttpResponse {
    let user_id = match caller(&req) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };

    let filter = GeofenceEventFilter {
        user_id: Some(user_id),
        ..filter.into_inner()
    };
    HttpResponse::Ok().json(state.gateway.geofence().events(&filter))
}

/// `GET /api/shared`
///
/// Live location shares the caller can see.
pub async fn shared(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let user_id = match caller(&req) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };

    HttpResponse::Ok().json(state.gateway.tracking().shared_locations_for(&user_id))
}

/// `GET /api/navigation`
pub async fn navigation(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let user_id = match caller(&req) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };

    HttpResponse::Ok().json(state.gateway.navigation().active_session_for_user(&user_id))
}

/// `GET /api/pois`
pub async fn pois(state: web::Data<AppState>, params: web::Query<PoiParams>) -> HttpResponse {
    let location = Coordinate::new(params.latitude, params.longitude);
    if !location.is_valid() {
        return error_response(&GatewayError::Validation(
            "latitude/longitude out of range".to_string(),
        ));
    }

    let found = state.gateway.navigation().points_of_interest(
        &location,
        params.radius_meters.unwrap_or(1_000.0),
        params.category.as_deref(),
        params.limit.unwrap_or(20),
    );
    HttpResponse::Ok().json(found)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::{App, test};
    use geotrack_navigation::StaticPoiSource;
    use geotrack_runtime::{NullSink, SystemClock};
    use geotrack_server_models::OutboundEnvelope;
    use serde_json::json;

    use super::*;
    use crate::config::Settings;

    fn state() -> web::Data<AppState> {
        web::Data::new(AppState::new(
            &Settings::default(),
            SystemClock::shared(),
            Arc::new(NullSink),
            Arc::new(StaticPoiSource::default()),
        ))
    }

    fn app() -> App<
        impl actix_web::dev::ServiceFactory<
            actix_web::dev::ServiceRequest,
            Config = (),
            Response = actix_web::dev::ServiceResponse,
            Error = actix_web::Error,
            InitError = (),
        >,
    > {
        App::new().app_data(state()).configure(crate::routes)
    }

    #[actix_web::test]
    async fn health_is_ok() {
        let app = test::init_service(app()).await;
        let req = test::TestRequest::get().uri("/api/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn events_require_a_caller() {
        let app = test::init_service(app()).await;
        let req = test::TestRequest::post()
            .uri("/api/events")
            .set_json(json!({"event": "stop-tracking"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn events_dispatch_and_history_reads_back() {
        let app = test::init_service(app()).await;

        let req = test::TestRequest::post()
            .uri("/api/events")
            .insert_header((USER_HEADER, "alice"))
            .set_json(json!({"event": "start-tracking", "data": {"mode": "precise"}}))
            .to_request();
        let out: Vec<OutboundEnvelope> = test::call_and_read_body_json(&app, req).await;
        assert!(matches!(out[0].event, OutboundEvent::TrackingStarted(_)));

        let req = test::TestRequest::post()
            .uri("/api/events")
            .insert_header((USER_HEADER, "alice"))
            .set_json(json!({
                "event": "location-update",
                "data": {"location": {
                    "latitude": 52.0,
                    "longitude": 4.0,
                    "accuracy": 5.0,
                    "timestamp": "2026-02-01T12:00:00Z"
                }}
            }))
            .to_request();
        let out: Vec<OutboundEnvelope> = test::call_and_read_body_json(&app, req).await;
        assert!(matches!(out[0].event, OutboundEvent::UserMoved { .. }));

        let req = test::TestRequest::get()
            .uri("/api/history?limit=10")
            .insert_header((USER_HEADER, "alice"))
            .to_request();
        let points: Vec<serde_json::Value> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(points.len(), 1);
        assert_eq!(points[0]["latitude"], 52.0);
    }

    #[actix_web::test]
    async fn analytics_errors_map_to_status() {
        let app = test::init_service(app()).await;
        let req = test::TestRequest::get()
            .uri("/api/analytics?days=7")
            .insert_header((USER_HEADER, "nobody"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[::core::prelude::v1::test]
    fn sse_frames_carry_event_name() {
        let frame = sse_frame(&OutboundEvent::TrackingStopped {
            user_id: "alice".to_string(),
        })
        .unwrap();
        assert!(frame.starts_with("event: tracking-stopped\ndata: {"));
        assert!(frame.ends_with("\n\n"));
    }
}
