//! Viewport type and local visibility filtering.
//!
//! The viewport is an external input sampled from the map widget; the
//! engine validates it before use and never mutates it.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScoutError};
use crate::geo_utils::bounds_overlap;
use crate::{Bounds, TrackId, TrackSummary};

/// The map's currently visible bounding box plus zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
    pub zoom: f64,
}

impl Viewport {
    pub fn new(north: f64, south: f64, east: f64, west: f64, zoom: f64) -> Self {
        Self {
            north,
            south,
            east,
            west,
            zoom,
        }
    }

    /// The visible bounding box, without the zoom level.
    pub fn bounds(&self) -> Bounds {
        Bounds {
            north: self.north,
            south: self.south,
            east: self.east,
            west: self.west,
        }
    }

    /// Reject geometrically impossible viewports.
    pub fn validate(&self) -> Result<()> {
        if !(self.north.is_finite()
            && self.south.is_finite()
            && self.east.is_finite()
            && self.west.is_finite()
            && self.zoom.is_finite())
        {
            return Err(ScoutError::rejected("viewport must be finite"));
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

    /// Whether this viewport is a pure zoom-in on `previous`: fully inside
    /// its bounds (inclusive edges) at an equal or tighter zoom. Already
    /// loaded data is then a superset of what is visible, and a fresh
    /// search can be skipped.
    pub fn contained_in(&self, previous: &Viewport) -> bool {
        self.zoom >= previous.zoom && self.bounds().contained_in(&previous.bounds())
    }
}

/// Local subset filter over already-known track summaries.
///
/// Avoids a full re-search when the user merely re-frames currently
/// loaded data: anything whose bounding box at least partially overlaps
/// the viewport stays visible.
pub struct ViewportFilter;

impl ViewportFilter {
    /// Ids of the summaries that at least partially overlap `viewport`.
    pub fn visible<'a, I>(summaries: I, viewport: &Viewport) -> Vec<TrackId>
    where
        I: IntoIterator<Item = &'a TrackSummary>,
    {
        let view = viewport.bounds();
        summaries
            .into_iter()
            .filter(|s| bounds_overlap(&s.bounds, &view))
            .map(|s| s.id.clone())
            .collect()
    }
}
