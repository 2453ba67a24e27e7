//! Straight-line route synthesis.
//!
//! One [`RouteSegment`] per consecutive waypoint pair, with haversine
//! length and a mode-based duration estimate. The last segment also gets
//! an `arrive` instruction at the destination.

use chrono::{DateTime, Utc};
use geotrack_geo::{bearing, haversine_distance, travel_time_estimate};
use geotrack_navigation_models::{
    Maneuver, NavigationInstruction, NavigationRoute, NewRoute, RouteOptions, RouteSegment,
    TrafficLevel, Waypoint,
};
use uuid::Uuid;

use crate::NavigationError;

/// Builds a route owned by `owner_id` from `input`.
///
/// # Errors
///
/// * [`NavigationError::Validation`] if fewer than two waypoints are given
///   or any waypoint has an invalid coordinate.
pub fn build(
    owner_id: &str,
    input: NewRoute,
    now: DateTime<Utc>,
) -> Result<NavigationRoute, NavigationError> {
    let NewRoute {
        waypoints,
        options,
        name,
        metadata,
    } = input;

    if waypoints.len() < 2 {
        return Err(NavigationError::validation(format!(
            "a route needs at least 2 waypoints, got {}",
            waypoints.len()
        )));
    }
    if let Some((idx, _)) = waypoints
        .iter()
        .enumerate()
        .find(|(_, w)| !w.location.is_valid())
    {
        return Err(NavigationError::validation(format!(
            "waypoint {idx} is not a valid coordinate"
        )));
    }

    let segments = segments(&waypoints, &options);
    let total_distance_meters = segments.iter().map(|s| s.distance_meters).sum();
    let total_duration_seconds = segments.iter().map(|s| s.duration_seconds).sum();

    Ok(NavigationRoute {
        id: Uuid::new_v4(),
        owner_user_id: owner_id.to_string(),
        name,
        waypoints,
        segments,
        total_distance_meters,
        total_duration_seconds,
        options,
        metadata,
        is_active: true,
        created_at: now,
    })
}

fn segments(waypoints: &[Waypoint], options: &RouteOptions) -> Vec<RouteSegment> {
    let last = waypoints.len() - 2;

    waypoints
        .windows(2)
        .enumerate()
        .map(|(idx, pair)| {
            let (from, to) = (&pair[0], &pair[1]);
            let distance_meters = haversine_distance(&from.location, &to.location);
            let duration_seconds = travel_time_estimate(distance_meters, options.mode);
            let target = label(to, idx + 1, idx == last);

            let mut instructions = vec![NavigationInstruction {
                id: Uuid::new_v4(),
                maneuver: if idx == 0 {
                    Maneuver::Depart
                } else {
                    Maneuver::Head
                },
                text: format!(
                    "Head {} towards {target}",
                    bearing(&from.location, &to.location)
                ),
                distance_to_next_meters: distance_meters,
                duration_to_next_seconds: duration_seconds,
                location: from.location,
                street_name: None,
            }];

            if idx == last {
                instructions.push(NavigationInstruction {
                    id: Uuid::new_v4(),
                    maneuver: Maneuver::Arrive,
                    text: format!("Arrive at {target}"),
                    distance_to_next_meters: 0.0,
                    duration_to_next_seconds: 0.0,
                    location: to.location,
                    street_name: None,
                });
            }

            RouteSegment {
                start_point: from.location,
                end_point: to.location,
                distance_meters,
                duration_seconds,
                instructions,
                traffic_condition: TrafficLevel::Unknown,
            }
        })
        .collect()
}

fn label(waypoint: &Waypoint, position: usize, is_destination: bool) -> String {
    match &waypoint.name {
        Some(name) => name.clone(),
        None if is_destination => "your destination".to_string(),
        None => format!("waypoint {}", position + 1),
    }
}
