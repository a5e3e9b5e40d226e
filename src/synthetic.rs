//! Deterministic synthetic track data for scenario tests and benches.
//!
//! Generation is fully seeded so test runs never depend on OS randomness:
//! track `i` always has the same bounds, points, and classification.

use crate::{Bounds, GeoPoint, TrackId, TrackSummary, TrackType, Tire};

/// Base region the synthetic catalog is laid out in (Lyon hinterland).
const BASE_LAT: f64 = 45.6;
const BASE_LON: f64 = 4.6;
/// Grid spacing between neighbouring tracks, in degrees.
const GRID_STEP: f64 = 0.05;
/// Extent of one synthetic track's bounding box, in degrees.
const TRACK_EXTENT: f64 = 0.03;

/// Minimal linear congruential generator for reproducible jitter.
pub struct SeededRng(u64);

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(2_862_933_555_777_941_757).wrapping_add(1))
    }

    pub fn next_u32(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 33) as u32
    }

    /// Uniform float in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        self.next_u32() as f64 / (u32::MAX as f64 + 1.0)
    }
}

/// Origin cell of track `i` on the synthetic grid, 8 tracks per row.
fn grid_origin(i: u32) -> GeoPoint {
    let row = (i / 8) as f64;
    let col = (i % 8) as f64;
    GeoPoint::new(BASE_LAT + row * GRID_STEP, BASE_LON + col * GRID_STEP)
}

/// Deterministic summary for track `i`.
pub fn synthetic_summary(i: u32) -> TrackSummary {
    let origin = grid_origin(i);
    let bounds = Bounds {
        north: origin.lat + TRACK_EXTENT,
        south: origin.lat,
        east: origin.lon + TRACK_EXTENT,
        west: origin.lon,
    };
    let track_type = if i % 3 == 0 {
        TrackType::Route
    } else {
        TrackType::Segment
    };

    TrackSummary {
        id: TrackId::new(format!("syn-{}", i)),
        name: format!("Synthetic track {}", i),
        track_type,
        bounds,
        barycenter: bounds.center(),
        difficulty: (i % 5 + 1) as u8,
        surface_types: vec!["gravel".to_string(), "forest-road".to_string()],
        tire_dry: Tire::SemiSlick,
        tire_wet: Tire::Knobby,
        comments: String::new(),
        file_path: format!("tracks/syn-{}.json", i),
    }
}

/// Deterministic point sequence for track `i`: a jittered diagonal across
/// its bounding box with a gentle climb.
pub fn synthetic_points(i: u32, count: usize) -> Vec<(f64, f64, f64)> {
    let origin = grid_origin(i);
    let mut rng = SeededRng::new(u64::from(i) + 1);
    let steps = count.max(2);

    (0..steps)
        .map(|step| {
            let t = step as f64 / (steps - 1) as f64;
            let jitter = (rng.next_f64() - 0.5) * 0.001;
            (
                origin.lat + t * TRACK_EXTENT + jitter,
                origin.lon + t * TRACK_EXTENT - jitter,
                250.0 + t * 120.0 + (rng.next_f64() - 0.5),
            )
        })
        .collect()
}

/// Raw geometry payload for track `i`, as served by the geometry endpoint.
pub fn synthetic_geometry_payload(i: u32, count: usize) -> serde_json::Value {
    let points: Vec<serde_json::Value> = synthetic_points(i, count)
        .into_iter()
        .map(|(lat, lon, ele)| serde_json::json!({"lat": lat, "lon": lon, "ele": ele}))
        .collect();
    serde_json::json!({ "points": points })
}

/// One raw catalog record, as ingested by the server-side store.
pub fn synthetic_record(i: u32) -> serde_json::Value {
    serde_json::json!({
        "summary": synthetic_summary(i),
        "geometry": synthetic_geometry_payload(i, 32),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_is_deterministic() {
        assert_eq!(synthetic_summary(7), synthetic_summary(7));
        assert_eq!(synthetic_points(7, 16), synthetic_points(7, 16));
    }

    #[test]
    fn test_points_stay_near_bounds() {
        let summary = synthetic_summary(3);
        for (lat, lon, _) in synthetic_points(3, 32) {
            assert!(lat > summary.bounds.south - 0.01 && lat < summary.bounds.north + 0.01);
            assert!(lon > summary.bounds.west - 0.01 && lon < summary.bounds.east + 0.01);
        }
    }
}
