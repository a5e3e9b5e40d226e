//! Geographic utilities: distance, bounds, and overlap calculations.

use crate::{Bounds, GeoPoint};

/// Mean Earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two GPS points in meters (haversine).
pub fn haversine_distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Total distance along a path in meters.
pub fn polyline_length(points: &[GeoPoint]) -> f64 {
    points
        .windows(2)
        .map(|pair| haversine_distance(&pair[0], &pair[1]))
        .sum()
}

/// Bounding box of a point slice. `None` for an empty slice.
pub fn compute_bounds(points: &[GeoPoint]) -> Option<Bounds> {
    Bounds::from_points(points)
}

/// Whether two bounding boxes at least partially overlap.
///
/// Touching edges count as overlap: a track whose box shares an edge with
/// the viewport is still (just) visible.
pub fn bounds_overlap(a: &Bounds, b: &Bounds) -> bool {
    !(a.east < b.west || a.west > b.east || a.north < b.south || a.south > b.north)
}

/// Whether `inner` lies entirely within `outer` (inclusive on all edges).
pub fn bounds_contained(inner: &Bounds, outer: &Bounds) -> bool {
    inner.north <= outer.north
        && inner.south >= outer.south
        && inner.east <= outer.east
        && inner.west >= outer.west
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_known_distance() {
        // London -> Paris, roughly 344 km
        let london = GeoPoint::new(51.5074, -0.1278);
        let paris = GeoPoint::new(48.8566, 2.3522);
        let d = haversine_distance(&london, &paris);
        assert!((d - 344_000.0).abs() < 5_000.0, "got {}", d);
    }

    #[test]
    fn test_haversine_zero() {
        let p = GeoPoint::new(45.0, 5.0);
        assert_eq!(haversine_distance(&p, &p), 0.0);
    }

    #[test]
    fn test_polyline_length_accumulates() {
        let points = vec![
            GeoPoint::new(45.0, 5.0),
            GeoPoint::new(45.01, 5.0),
            GeoPoint::new(45.02, 5.0),
        ];
        let total = polyline_length(&points);
        let half = haversine_distance(&points[0], &points[1]);
        assert!((total - 2.0 * half).abs() < 1.0);
    }

    #[test]
    fn test_bounds_overlap_partial() {
        // Partial overlap from the worked example: included.
        let track = Bounds {
            north: 45.95,
            south: 45.6,
            east: 5.0,
            west: 4.7,
        };
        let viewport = Bounds {
            north: 45.9,
            south: 45.6,
            east: 5.0,
            west: 4.7,
        };
        assert!(bounds_overlap(&track, &viewport));
    }

    #[test]
    fn test_bounds_overlap_disjoint() {
        // Track fully north of the viewport: excluded.
        let track = Bounds {
            north: 46.0,
            south: 45.9,
            east: 5.0,
            west: 4.7,
        };
        let viewport = Bounds {
            north: 45.8,
            south: 45.6,
            east: 5.0,
            west: 4.7,
        };
        assert!(!bounds_overlap(&track, &viewport));
    }

    #[test]
    fn test_bounds_overlap_touching_edge() {
        let a = Bounds {
            north: 46.0,
            south: 45.0,
            east: 5.0,
            west: 4.0,
        };
        let b = Bounds {
            north: 47.0,
            south: 46.0,
            east: 6.0,
            west: 5.0,
        };
        assert!(bounds_overlap(&a, &b));
    }

    #[test]
    fn test_bounds_contained_inclusive() {
        let outer = Bounds {
            north: 46.0,
            south: 45.0,
            east: 6.0,
            west: 5.0,
        };
        let inner = Bounds {
            north: 45.8,
            south: 45.2,
            east: 5.9,
            west: 5.1,
        };
        assert!(bounds_contained(&inner, &outer));
        assert!(bounds_contained(&outer, &outer));
        assert!(!bounds_contained(&outer, &inner));
    }
}
