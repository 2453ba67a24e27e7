//! Movement statistics over a slice of location samples.

use geotrack_geo::{Coordinate, haversine_distance};
use geotrack_tracking_models::{LocationAnalytics, LocationPoint, VisitedArea};

/// Computes distance, speed and visited-area statistics for `points`
/// (oldest first). Returns `None` for fewer than two points.
#[must_use]
pub fn compute(
    user_id: &str,
    days: u32,
    points: &[LocationPoint],
    cluster_radius_meters: f64,
    max_areas: usize,
) -> Option<LocationAnalytics> {
    let (first, last) = match points {
        [first, .., last] => (first, last),
        _ => return None,
    };

    Some(LocationAnalytics {
        user_id: user_id.to_string(),
        days,
        point_count: points.len(),
        total_distance_meters: total_distance(points),
        average_speed_mps: average_speed(points),
        most_visited_areas: visited_areas(points, cluster_radius_meters, max_areas),
        first_timestamp: first.timestamp,
        last_timestamp: last.timestamp,
    })
}

/// Sum of haversine distances between consecutive points.
#[must_use]
pub fn total_distance(points: &[LocationPoint]) -> f64 {
    points
        .windows(2)
        .map(|w| haversine_distance(&w[0].coordinate(), &w[1].coordinate()))
        .sum()
}

/// Mean of `distance / elapsed` over consecutive pairs with positive
/// elapsed time. Zero when no pair qualifies.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn average_speed(points: &[LocationPoint]) -> f64 {
    let speeds: Vec<f64> = points
        .windows(2)
        .filter_map(|w| {
            let elapsed = (w[1].timestamp - w[0].timestamp).num_milliseconds();
            (elapsed > 0).then(|| {
                let distance = haversine_distance(&w[0].coordinate(), &w[1].coordinate());
                distance / (elapsed as f64 / 1000.0)
            })
        })
        .collect();

    if speeds.is_empty() {
        0.0
    } else {
        speeds.iter().sum::<f64>() / speeds.len() as f64
    }
}

struct Cluster {
    lat_sum: f64,
    lon_sum: f64,
    count: usize,
}

impl Cluster {
    #[allow(clippy::cast_precision_loss)]
    fn centroid(&self) -> Coordinate {
        let n = self.count as f64;
        Coordinate::new(self.lat_sum / n, self.lon_sum / n)
    }
}

/// Single-pass greedy clustering.
///
/// Each point joins the first existing cluster whose running centroid is
/// within `radius_meters`, otherwise it seeds a new cluster. Results are
/// ordered by point count (descending) and truncated to `max_areas`.
/// Ties keep creation order.
#[must_use]
pub fn visited_areas(
    points: &[LocationPoint],
    radius_meters: f64,
    max_areas: usize,
) -> Vec<VisitedArea> {
    let mut clusters: Vec<Cluster> = Vec::new();

    for point in points {
        let here = point.coordinate();
        if let Some(cluster) = clusters
            .iter_mut()
            .find(|c| haversine_distance(&c.centroid(), &here) <= radius_meters)
        {
            cluster.lat_sum += point.latitude;
            cluster.lon_sum += point.longitude;
            cluster.count += 1;
        } else {
            clusters.push(Cluster {
                lat_sum: point.latitude,
                lon_sum: point.longitude,
                count: 1,
            });
        }
    }

    clusters.sort_by(|a, b| b.count.cmp(&a.count));
    clusters
        .into_iter()
        .take(max_areas)
        .map(|c| VisitedArea {
            center: c.centroid(),
            point_count: c.count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};
    use geotrack_geo::EARTH_RADIUS_METERS;

    use super::*;

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn total_distance_of_equally_spaced_points() {
        // 0.01° of latitude along a meridian
        let step = 0.01_f64;
        let spacing = EARTH_RADIUS_METERS * step.to_radians();

        for n in [2_usize, 5, 37, 200] {
            let points: Vec<LocationPoint> = (0..n)
                .map(|i| {
                    #[allow(clippy::cast_precision_loss)]
                    let lat = i as f64 * step;
                    LocationPoint::new(lat, 0.0, start() + Duration::seconds(i64::try_from(i).unwrap()))
                })
                .collect();

            #[allow(clippy::cast_precision_loss)]
            let expected = (n - 1) as f64 * spacing;
            let total = total_distance(&points);
            assert!(
                (total - expected).abs() < 1e-6 * expected,
                "n={n}: got {total}, expected {expected}"
            );
        }
    }

    #[test]
    fn average_speed_skips_non_positive_intervals() {
        let points = vec![
            LocationPoint::new(0.0, 0.0, start()),
            // same timestamp: ignored
            LocationPoint::new(0.001, 0.0, start()),
            LocationPoint::new(0.002, 0.0, start() + Duration::seconds(10)),
        ];

        let leg = haversine_distance(&points[1].coordinate(), &points[2].coordinate());
        let speed = average_speed(&points);
        assert!((speed - leg / 10.0).abs() < 1e-9, "got {speed}");
    }

    #[test]
    fn average_speed_zero_without_elapsed_time() {
        let points = vec![
            LocationPoint::new(0.0, 0.0, start()),
            LocationPoint::new(1.0, 0.0, start()),
        ];
        assert!(average_speed(&points).abs() < f64::EPSILON);
    }

    #[test]
    fn clustering_groups_nearby_points() {
        let mut points = Vec::new();
        // five samples around home, two at work (~5.5 km away)
        for i in 0..5 {
            points.push(LocationPoint::new(
                52.0 + f64::from(i) * 0.0001,
                4.0,
                start() + Duration::minutes(i64::from(i)),
            ));
        }
        for i in 0..2 {
            points.push(LocationPoint::new(
                52.05,
                4.0 + f64::from(i) * 0.0001,
                start() + Duration::hours(1 + i64::from(i)),
            ));
        }

        let areas = visited_areas(&points, 100.0, 10);
        assert_eq!(areas.len(), 2);
        assert_eq!(areas[0].point_count, 5);
        assert_eq!(areas[1].point_count, 2);
        assert!((areas[0].center.latitude - 52.0002).abs() < 1e-9);
    }

    #[test]
    fn clustering_truncates_to_max_areas() {
        let points: Vec<LocationPoint> = (0..20)
            .map(|i| LocationPoint::new(f64::from(i), 0.0, start()))
            .collect();
        let areas = visited_areas(&points, 100.0, 10);
        assert_eq!(areas.len(), 10);
        assert!(areas.iter().all(|a| a.point_count == 1));
    }

    #[test]
    fn compute_needs_two_points() {
        let one = [LocationPoint::new(0.0, 0.0, start())];
        assert!(compute("alice", 7, &one, 100.0, 10).is_none());
        assert!(compute("alice", 7, &[], 100.0, 10).is_none());
    }
}
