//! Geometry and trigger validation.

use geotrack_geofence_models::{GeofenceConfig, GeofenceGeometry, GeofenceTriggers};

use crate::GeofenceError;

/// Checks a zone shape against the configured limits.
///
/// # Errors
///
/// * [`GeofenceError::Validation`] if a circle's radius is not in
///   `(0, max_circle_radius_meters]`, a coordinate is out of range, or a
///   polygon's vertex count is outside the configured bounds.
pub fn geometry(config: &GeofenceConfig, geometry: &GeofenceGeometry) -> Result<(), GeofenceError> {
    match geometry {
        GeofenceGeometry::Circle {
            center,
            radius_meters,
        } => {
            if !center.is_valid() {
                return Err(GeofenceError::validation(format!(
                    "circle center ({}, {}) is not a valid coordinate",
                    center.latitude, center.longitude
                )));
            }
            if !radius_meters.is_finite()
                || *radius_meters <= 0.0
                || *radius_meters > config.max_circle_radius_meters
            {
                return Err(GeofenceError::validation(format!(
                    "circle radius must be in (0, {}] meters, got {radius_meters}",
                    config.max_circle_radius_meters
                )));
            }
        }
        GeofenceGeometry::Polygon { vertices } => {
            let count = vertices.len();
            if count < config.min_polygon_vertices || count > config.max_polygon_vertices {
                return Err(GeofenceError::validation(format!(
                    "polygon must have {}-{} vertices, got {count}",
                    config.min_polygon_vertices, config.max_polygon_vertices
                )));
            }
            if let Some((idx, bad)) = vertices.iter().enumerate().find(|(_, v)| !v.is_valid()) {
                return Err(GeofenceError::validation(format!(
                    "polygon vertex {idx} ({}, {}) is not a valid coordinate",
                    bad.latitude, bad.longitude
                )));
            }
        }
    }

    Ok(())
}

/// # Errors
///
/// * [`GeofenceError::Validation`] if a dwell duration of zero is given,
///   or dwell is enabled without enter. Dwell timers start on an enter
///   event, so a dwell-only zone could never fire.
pub fn triggers(triggers: &GeofenceTriggers) -> Result<(), GeofenceError> {
    if triggers.dwell_minutes == Some(0) {
        return Err(GeofenceError::validation(
            "dwell duration must be at least one minute",
        ));
    }
    if triggers.on_dwell && !triggers.on_enter {
        return Err(GeofenceError::validation(
            "dwell triggers require enter triggers",
        ));
    }
    Ok(())
}
