//! Geometry decoding: raw track payloads into typed points plus derived
//! statistics and a bounding box.
//!
//! Decoding is purely functional and safe to invoke concurrently for
//! multiple tracks. All derived data (distance, elevation gain/loss,
//! bounds, the simplified render line) is computed once at decode time.

use chrono::{DateTime, Utc};
use geo::{algorithm::simplify::Simplify, Coord, LineString};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScoutError};
use crate::geo_utils::haversine_distance;
use crate::GeoPoint;

/// Configuration for geometry decoding.
#[derive(Debug, Clone)]
pub struct DecodeConfig {
    /// Elevation deltas accumulate per direction and only count towards
    /// gain/loss once the running magnitude crosses this threshold, so
    /// barometric micro-oscillation does not inflate totals.
    /// Default: 2.0 meters
    pub elevation_noise_threshold_m: f64,

    /// Tolerance for Douglas-Peucker simplification of the render line
    /// (in degrees). Smaller values preserve more detail.
    /// Default: 0.00001 (~1 meter)
    pub simplify_tolerance_deg: f64,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            elevation_noise_threshold_m: 2.0,
            simplify_tolerance_deg: 0.00001,
        }
    }
}

/// One point of a decoded track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub lat: f64,
    pub lon: f64,
    #[serde(alias = "ele")]
    pub elevation: f64,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

impl TrackPoint {
    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }
}

/// Derived whole-track statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalStats {
    /// Cumulative haversine distance in meters.
    pub distance_m: f64,
    /// Total climb in meters, noise-filtered.
    pub elevation_gain_m: f64,
    /// Total descent in meters, noise-filtered.
    pub elevation_loss_m: f64,
}

/// Bounding box of a decoded track, including the elevation range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeometryBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
    pub min_elevation: f64,
    pub max_elevation: f64,
}

impl GeometryBounds {
    /// The horizontal extent, without the elevation range.
    pub fn horizontal(&self) -> crate::Bounds {
        crate::Bounds {
            north: self.north,
            south: self.south,
            east: self.east,
            west: self.west,
        }
    }
}

/// A fully decoded track: ordered points, derived stats, bounds, and a
/// pre-simplified polyline for map rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackGeometry {
    pub points: Vec<TrackPoint>,
    /// Douglas-Peucker-simplified line used for drawing. Derived once so
    /// the map never re-simplifies on re-render.
    pub render_line: Vec<GeoPoint>,
    pub stats: TotalStats,
    pub bounds: GeometryBounds,
}

impl TrackGeometry {
    pub fn start(&self) -> Option<GeoPoint> {
        self.points.first().map(TrackPoint::position)
    }

    pub fn end(&self) -> Option<GeoPoint> {
        self.points.last().map(TrackPoint::position)
    }
}

/// Raw wire shape of a geometry payload.
#[derive(Debug, Deserialize)]
struct RawGeometry {
    points: Vec<TrackPoint>,
}

/// Decode a raw geometry payload into a [`TrackGeometry`].
///
/// Fails with [`ScoutError::MalformedGeometry`] on unparsable input, an
/// empty point list, or non-finite coordinates. Callers must treat this
/// as non-fatal: skip the track and keep the others rendered.
pub fn decode_geometry(raw: &[u8], config: &DecodeConfig) -> Result<TrackGeometry> {
    let parsed: RawGeometry = serde_json::from_slice(raw)
        .map_err(|e| ScoutError::malformed(None, format!("unparsable payload: {}", e)))?;

    if parsed.points.is_empty() {
        return Err(ScoutError::malformed(None, "geometry contains no points"));
    }
    for (i, p) in parsed.points.iter().enumerate() {
        if !p.position().is_valid() {
            return Err(ScoutError::malformed(
                None,
                format!("invalid coordinates at point {}", i),
            ));
        }
        if !p.elevation.is_finite() {
            return Err(ScoutError::malformed(
                None,
                format!("non-finite elevation at point {}", i),
            ));
        }
    }

    let positions: Vec<GeoPoint> = parsed.points.iter().map(TrackPoint::position).collect();

    let (gain, loss) = elevation_delta(&parsed.points, config.elevation_noise_threshold_m);
    let stats = TotalStats {
        distance_m: cumulative_distance(&positions),
        elevation_gain_m: gain,
        elevation_loss_m: loss,
    };

    let bounds = compute_geometry_bounds(&parsed.points);
    let render_line = simplify_line(&positions, config.simplify_tolerance_deg);

    Ok(TrackGeometry {
        points: parsed.points,
        render_line,
        stats,
        bounds,
    })
}

fn cumulative_distance(positions: &[GeoPoint]) -> f64 {
    positions
        .windows(2)
        .map(|pair| haversine_distance(&pair[0], &pair[1]))
        .sum()
}

/// Sum positive/negative elevation deltas with a hysteresis accumulator:
/// a signed running delta only commits to gain or loss once its magnitude
/// crosses the noise threshold, so +1/-1 oscillation cancels out instead
/// of counting double.
fn elevation_delta(points: &[TrackPoint], threshold_m: f64) -> (f64, f64) {
    let mut gain = 0.0;
    let mut loss = 0.0;
    let mut pending = 0.0;

    for pair in points.windows(2) {
        pending += pair[1].elevation - pair[0].elevation;
        if pending >= threshold_m {
            gain += pending;
            pending = 0.0;
        } else if pending <= -threshold_m {
            loss += -pending;
            pending = 0.0;
        }
    }

    (gain, loss)
}

fn compute_geometry_bounds(points: &[TrackPoint]) -> GeometryBounds {
    let mut bounds = GeometryBounds {
        north: f64::MIN,
        south: f64::MAX,
        east: f64::MIN,
        west: f64::MAX,
        min_elevation: f64::MAX,
        max_elevation: f64::MIN,
    };

    for p in points {
        bounds.north = bounds.north.max(p.lat);
        bounds.south = bounds.south.min(p.lat);
        bounds.east = bounds.east.max(p.lon);
        bounds.west = bounds.west.min(p.lon);
        bounds.min_elevation = bounds.min_elevation.min(p.elevation);
        bounds.max_elevation = bounds.max_elevation.max(p.elevation);
    }

    bounds
}

fn simplify_line(positions: &[GeoPoint], tolerance: f64) -> Vec<GeoPoint> {
    if positions.len() < 3 {
        return positions.to_vec();
    }

    let coords: Vec<Coord> = positions
        .iter()
        .map(|p| Coord { x: p.lon, y: p.lat })
        .collect();
    let line = LineString::new(coords);
    let simplified = line.simplify(&tolerance);

    simplified
        .coords()
        .map(|c| GeoPoint::new(c.y, c.x))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(points: &[(f64, f64, f64)]) -> Vec<u8> {
        let points: Vec<serde_json::Value> = points
            .iter()
            .map(|(lat, lon, ele)| serde_json::json!({"lat": lat, "lon": lon, "ele": ele}))
            .collect();
        serde_json::to_vec(&serde_json::json!({ "points": points })).unwrap()
    }

    #[test]
    fn test_decode_ramp() {
        let raw = payload(&[
            (45.0, 5.0, 200.0),
            (45.01, 5.0, 210.0),
            (45.02, 5.0, 230.0),
        ]);
        let geometry = decode_geometry(&raw, &DecodeConfig::default()).unwrap();

        assert_eq!(geometry.points.len(), 3);
        assert!((geometry.stats.elevation_gain_m - 30.0).abs() < 1e-9);
        assert_eq!(geometry.stats.elevation_loss_m, 0.0);
        // Two ~1.1km legs along a meridian.
        assert!((geometry.stats.distance_m - 2_224.0).abs() < 10.0);
        assert_eq!(geometry.bounds.min_elevation, 200.0);
        assert_eq!(geometry.bounds.max_elevation, 230.0);
        assert_eq!(geometry.bounds.north, 45.02);
    }

    #[test]
    fn test_noise_oscillation_suppressed() {
        // +-1m jitter around a flat profile stays below the 2m threshold.
        let raw = payload(&[
            (45.0, 5.0, 100.0),
            (45.001, 5.0, 101.0),
            (45.002, 5.0, 100.0),
            (45.003, 5.0, 101.0),
            (45.004, 5.0, 100.0),
        ]);
        let geometry = decode_geometry(&raw, &DecodeConfig::default()).unwrap();
        assert_eq!(geometry.stats.elevation_gain_m, 0.0);
        assert_eq!(geometry.stats.elevation_loss_m, 0.0);
    }

    #[test]
    fn test_gentle_climb_still_counts() {
        // A steady climb of 0.5m steps crosses the threshold cumulatively.
        let points: Vec<(f64, f64, f64)> = (0..21)
            .map(|i| (45.0 + i as f64 * 0.001, 5.0, 100.0 + i as f64 * 0.5))
            .collect();
        let geometry = decode_geometry(&payload(&points), &DecodeConfig::default()).unwrap();
        assert!((geometry.stats.elevation_gain_m - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_geometry(b"not json at all", &DecodeConfig::default()).unwrap_err();
        assert!(matches!(err, ScoutError::MalformedGeometry { .. }));

        let err = decode_geometry(br#"{"points": []}"#, &DecodeConfig::default()).unwrap_err();
        assert!(matches!(err, ScoutError::MalformedGeometry { .. }));
    }

    #[test]
    fn test_decode_rejects_out_of_range() {
        let raw = payload(&[(95.0, 5.0, 100.0)]);
        let err = decode_geometry(&raw, &DecodeConfig::default()).unwrap_err();
        assert!(matches!(err, ScoutError::MalformedGeometry { .. }));
    }

    #[test]
    fn test_decode_parses_time() {
        let raw = br#"{"points": [
            {"lat": 45.0, "lon": 5.0, "ele": 100.0, "time": "2024-05-01T09:30:00Z"},
            {"lat": 45.01, "lon": 5.0, "ele": 105.0}
        ]}"#;
        let geometry = decode_geometry(raw, &DecodeConfig::default()).unwrap();
        assert!(geometry.points[0].time.is_some());
        assert!(geometry.points[1].time.is_none());
    }

    #[test]
    fn test_render_line_simplified() {
        // Collinear points collapse to the two endpoints.
        let raw = payload(&[
            (45.0, 5.0, 100.0),
            (45.01, 5.0, 100.0),
            (45.02, 5.0, 100.0),
            (45.03, 5.0, 100.0),
        ]);
        let geometry = decode_geometry(&raw, &DecodeConfig::default()).unwrap();
        assert_eq!(geometry.render_line.len(), 2);
        assert_eq!(geometry.render_line[0], GeoPoint::new(45.0, 5.0));
        assert_eq!(geometry.render_line[1], GeoPoint::new(45.03, 5.0));
        // The full point sequence is untouched.
        assert_eq!(geometry.points.len(), 4);
    }
}
