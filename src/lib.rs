//! # Track Scout
//!
//! Bounded live search and incremental map rendering for GPS track catalogs.
//!
//! This library provides:
//! - Viewport-scoped streaming search over a bounding-box track index
//! - Client-side geometry decoding with derived ride statistics
//! - An incremental layer registry that never redraws unchanged tracks
//! - Single/hover selection semantics with exclusivity invariants
//!
//! ## Features
//!
//! - **`synthetic`** - Deterministic test-data generators for scenario tests
//!
//! ## Quick Start
//!
//! ```rust
//! use track_scout::{marker_radius, Bounds, Viewport, ZoomConfig};
//!
//! // Endpoint markers grow with zoom, clamped to a sane range.
//! let r = marker_radius(12.0, &ZoomConfig::default());
//! assert!((r - 6.8).abs() < 1e-9);
//!
//! // A track is visible when its bounding box overlaps the viewport.
//! let viewport = Viewport::new(45.9, 45.6, 5.0, 4.7, 13.0);
//! let track = Bounds { north: 45.95, south: 45.6, east: 5.0, west: 4.7 };
//! assert!(viewport.bounds().intersects(&track));
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{Result, ScoutError};

// Geographic utilities (distance, bounds, overlap calculations)
pub mod geo_utils;

// Geometry decoding (raw payload -> points + derived stats)
pub mod geometry;
pub use geometry::{decode_geometry, DecodeConfig, GeometryBounds, TotalStats, TrackGeometry, TrackPoint};

// Viewport type and local visibility filtering
pub mod viewport;
pub use viewport::{Viewport, ViewportFilter};

// Zoom -> marker radius scaling
pub mod zoom;
pub use zoom::{marker_radius, ZoomConfig};

// Map rendering capability boundary
pub mod surface;
pub use surface::{LayerHandle, MapSurface};

// Incremental layer registry (diff-and-patch rendering)
pub mod layers;
pub use layers::{GeometryProvider, LayerRegistry, LayerSet, ReconcileOutcome};

// Selection state machine (click/hover exclusivity)
pub mod selection;
pub use selection::{HighlightKind, SelectionEffect, SelectionStateMachine};

// Streaming search client (server-push sessions)
pub mod stream;
pub use stream::{
    HttpGeometryProvider, HttpSummarySource, StreamEvent, StreamSession, SummarySource,
};

// Search coordination (debounce, cancellation, incremental apply)
pub mod search;
pub use search::{LoadingState, SearchConfig, SearchCoordinator};

// Server-side bounds query engine and HTTP surface
pub mod server;
pub use server::{BoundsQueryEngine, TrackStore};

// Deterministic test-data generators
#[cfg(feature = "synthetic")]
pub mod synthetic;

// ============================================================================
// Core Types
// ============================================================================

/// Identifier of a track in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Kind of catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackType {
    Segment,
    Route,
}

/// Tire recommendation for a track, per condition.
///
/// Unknown wire values map to `Unknown` so a stream never aborts on a
/// vocabulary mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Tire {
    Slick,
    SemiSlick,
    Knobby,
    #[serde(other)]
    Unknown,
}

/// A GPS coordinate with latitude and longitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Create a new GPS point.
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && self.lat >= -90.0
            && self.lat <= 90.0
            && self.lon >= -180.0
            && self.lon <= 180.0
    }
}

/// Axis-aligned bounding box delimiting a geographic extent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl Bounds {
    /// Create bounds from GPS points. `None` for an empty slice.
    pub fn from_points(points: &[GeoPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut north = f64::MIN;
        let mut south = f64::MAX;
        let mut east = f64::MIN;
        let mut west = f64::MAX;

        for p in points {
            north = north.max(p.lat);
            south = south.min(p.lat);
            east = east.max(p.lon);
            west = west.min(p.lon);
        }

        Some(Self {
            north,
            south,
            east,
            west,
        })
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new((self.north + self.south) / 2.0, (self.east + self.west) / 2.0)
    }

    /// Whether this box at least partially overlaps `other`.
    pub fn intersects(&self, other: &Bounds) -> bool {
        geo_utils::bounds_overlap(self, other)
    }

    /// Whether this box lies entirely within `other` (inclusive edges).
    pub fn contained_in(&self, other: &Bounds) -> bool {
        geo_utils::bounds_contained(self, other)
    }
}

/// Result cap for a single search. Only four values are accepted on the
/// wire; anything else clamps to the nearest legal cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u32", from = "u32")]
pub enum ResultLimit {
    L25,
    L50,
    L75,
    L100,
}

impl ResultLimit {
    pub fn as_u32(self) -> u32 {
        match self {
            ResultLimit::L25 => 25,
            ResultLimit::L50 => 50,
            ResultLimit::L75 => 75,
            ResultLimit::L100 => 100,
        }
    }
}

impl Default for ResultLimit {
    fn default() -> Self {
        ResultLimit::L50
    }
}

impl From<u32> for ResultLimit {
    fn from(raw: u32) -> Self {
        match raw {
            0..=25 => ResultLimit::L25,
            26..=50 => ResultLimit::L50,
            51..=75 => ResultLimit::L75,
            _ => ResultLimit::L100,
        }
    }
}

impl From<ResultLimit> for u32 {
    fn from(limit: ResultLimit) -> u32 {
        limit.as_u32()
    }
}

/// Metadata for one track as streamed from the server.
///
/// Immutable once received; owned by the coordinator's result set for the
/// lifetime of the current search session. Full geometry is fetched on
/// demand via `file_path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSummary {
    pub id: TrackId,
    pub name: String,
    pub track_type: TrackType,
    pub bounds: Bounds,
    pub barycenter: GeoPoint,
    /// Difficulty rating, 1 (easy) to 5 (hard).
    pub difficulty: u8,
    #[serde(default)]
    pub surface_types: Vec<String>,
    pub tire_dry: Tire,
    pub tire_wet: Tire,
    #[serde(default)]
    pub comments: String,
    /// Server-side reference used to fetch full geometry on demand.
    pub file_path: String,
}

/// Parameters of one bounds-scoped search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_type: Option<TrackType>,
    #[serde(default)]
    pub limit: ResultLimit,
}

impl SearchQuery {
    /// Build a query covering `viewport` with the given cap.
    pub fn for_viewport(
        viewport: &Viewport,
        track_type: Option<TrackType>,
        limit: ResultLimit,
    ) -> Self {
        Self {
            north: viewport.north,
            south: viewport.south,
            east: viewport.east,
            west: viewport.west,
            track_type,
            limit,
        }
    }

    /// The queried bounding box.
    pub fn bounds(&self) -> Bounds {
        Bounds {
            north: self.north,
            south: self.south,
            east: self.east,
            west: self.west,
        }
    }

    /// Reject geometrically impossible queries before they reach the index.
    pub fn validate(&self) -> Result<()> {
        if !(self.north.is_finite()
            && self.south.is_finite()
            && self.east.is_finite()
            && self.west.is_finite())
        {
            return Err(ScoutError::rejected("bounds must be finite"));
        }
        if self.west > self.east {
            return Err(ScoutError::rejected(format!(
                "west ({}) > east ({})",
                self.west, self.east
            )));
        }
        if self.south > self.north {
            return Err(ScoutError::rejected(format!(
                "south ({}) > north ({})",
                self.south, self.north
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_point_validation() {
        assert!(GeoPoint::new(45.9, 4.8).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, 181.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_bounds_from_points() {
        let points = vec![
            GeoPoint::new(45.6, 4.7),
            GeoPoint::new(45.95, 5.0),
            GeoPoint::new(45.7, 4.9),
        ];
        let bounds = Bounds::from_points(&points).unwrap();
        assert_eq!(bounds.north, 45.95);
        assert_eq!(bounds.south, 45.6);
        assert_eq!(bounds.east, 5.0);
        assert_eq!(bounds.west, 4.7);

        assert!(Bounds::from_points(&[]).is_none());
    }

    #[test]
    fn test_result_limit_clamps() {
        assert_eq!(ResultLimit::from(0), ResultLimit::L25);
        assert_eq!(ResultLimit::from(25), ResultLimit::L25);
        assert_eq!(ResultLimit::from(40), ResultLimit::L50);
        assert_eq!(ResultLimit::from(75), ResultLimit::L75);
        assert_eq!(ResultLimit::from(100), ResultLimit::L100);
        assert_eq!(ResultLimit::from(10_000), ResultLimit::L100);
    }

    #[test]
    fn test_query_validation() {
        let viewport = Viewport::new(45.9, 45.6, 5.0, 4.7, 13.0);
        let query = SearchQuery::for_viewport(&viewport, None, ResultLimit::L25);
        assert!(query.validate().is_ok());

        let mut inverted = query.clone();
        inverted.west = 6.0;
        assert!(matches!(
            inverted.validate(),
            Err(ScoutError::QueryRejected { .. })
        ));

        let mut nan = query;
        nan.north = f64::NAN;
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_summary_wire_format() {
        let json = r#"{
            "id": "t-1",
            "name": "Col de la Luere loop",
            "trackType": "segment",
            "bounds": {"north": 45.8, "south": 45.7, "east": 4.7, "west": 4.6},
            "barycenter": {"lat": 45.75, "lon": 4.65},
            "difficulty": 3,
            "surfaceTypes": ["gravel", "forest-road"],
            "tireDry": "semiSlick",
            "tireWet": "knobby",
            "comments": "",
            "filePath": "tracks/t-1.json"
        }"#;
        let summary: TrackSummary = serde_json::from_str(json).unwrap();
        assert_eq!(summary.id.as_str(), "t-1");
        assert_eq!(summary.track_type, TrackType::Segment);
        assert_eq!(summary.tire_dry, Tire::SemiSlick);

        // Unknown tire vocabulary must not abort decoding.
        let patched = json.replace("\"knobby\"", "\"studded\"");
        let summary: TrackSummary = serde_json::from_str(&patched).unwrap();
        assert_eq!(summary.tire_wet, Tire::Unknown);
    }
}
