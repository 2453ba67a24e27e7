//! Point-of-interest lookup.

use geotrack_geo::{Coordinate, haversine_distance};
use geotrack_navigation_models::PointOfInterest;

/// Supplies points of interest around a location.
///
/// Results must be sorted nearest first with `distance_meters` filled in.
pub trait PoiSource: Send + Sync {
    fn search(
        &self,
        location: &Coordinate,
        radius_meters: f64,
        category: Option<&str>,
    ) -> Vec<PointOfInterest>;
}

/// In-memory catalogue searched by great-circle distance.
#[derive(Debug, Clone, Default)]
pub struct StaticPoiSource {
    catalogue: Vec<PointOfInterest>,
}

impl StaticPoiSource {
    #[must_use]
    pub const fn new(catalogue: Vec<PointOfInterest>) -> Self {
        Self { catalogue }
    }
}

impl PoiSource for StaticPoiSource {
    fn search(
        &self,
        location: &Coordinate,
        radius_meters: f64,
        category: Option<&str>,
    ) -> Vec<PointOfInterest> {
        let mut found: Vec<(f64, &PointOfInterest)> = self
            .catalogue
            .iter()
            .filter(|poi| category.is_none_or(|c| poi.category.eq_ignore_ascii_case(c)))
            .map(|poi| (haversine_distance(location, &poi.location), poi))
            .filter(|(distance, _)| *distance <= radius_meters)
            .collect();

        found.sort_by(|a, b| a.0.total_cmp(&b.0));
        found
            .into_iter()
            .map(|(distance, poi)| PointOfInterest {
                distance_meters: Some(distance),
                ..poi.clone()
            })
            .collect()
    }
}

/// Cache key for a search. Locations are bucketed to four decimal places
/// (roughly 11 m) so nearby queries share results.
#[must_use]
pub fn cache_key(location: &Coordinate, radius_meters: f64, category: Option<&str>) -> String {
    format!(
        "{:.4},{:.4}:{radius_meters}:{}",
        location.latitude,
        location.longitude,
        category.unwrap_or("*").to_ascii_lowercase()
    )
}
