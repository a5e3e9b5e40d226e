//! Map rendering capability boundary.
//!
//! The engine depends on an abstract drawing surface rather than a
//! concrete map library, so any rendering backend can be plugged in.
//! Draw calls are synchronous from the caller's perspective and return
//! opaque handles the registry uses for later mutation and removal.

#[cfg(any(test, feature = "synthetic"))]
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Bounds, GeoPoint, TrackId};

/// Opaque handle to one drawn primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerHandle(pub u64);

/// Primitive draw capabilities the map widget must provide.
pub trait MapSurface: Send + Sync {
    /// Draw a polyline for a track; returns its handle.
    fn draw_polyline(&self, track: &TrackId, points: &[GeoPoint]) -> LayerHandle;

    /// Draw a circular marker for a track; returns its handle.
    fn draw_marker(&self, track: &TrackId, at: GeoPoint, radius: f64) -> LayerHandle;

    /// Draw a highlight rectangle for a track; returns its handle.
    fn draw_rectangle(&self, track: &TrackId, bounds: &Bounds) -> LayerHandle;

    /// Update an existing marker's radius in place. Never recreates the
    /// marker.
    fn set_marker_radius(&self, handle: LayerHandle, radius: f64);

    /// Remove a previously drawn primitive. Removing an already-removed
    /// handle is a no-op.
    fn remove(&self, handle: LayerHandle);
}

/// A surface that records every call, for assertions in tests.
#[cfg(any(test, feature = "synthetic"))]
pub struct RecordingSurface {
    next_handle: AtomicU64,
    state: std::sync::Mutex<RecordingState>,
}

#[cfg(any(test, feature = "synthetic"))]
#[derive(Default)]
struct RecordingState {
    live: std::collections::HashMap<LayerHandle, DrawnLayer>,
    draw_calls: u64,
    remove_calls: u64,
}

/// What the recording surface knows about one live primitive.
#[cfg(any(test, feature = "synthetic"))]
#[derive(Debug, Clone, PartialEq)]
pub struct DrawnLayer {
    pub track: TrackId,
    pub kind: DrawnKind,
    pub radius: Option<f64>,
}

#[cfg(any(test, feature = "synthetic"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawnKind {
    Polyline,
    Marker,
    Rectangle,
}

#[cfg(any(test, feature = "synthetic"))]
impl RecordingSurface {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            state: std::sync::Mutex::new(RecordingState::default()),
        }
    }

    fn draw(&self, layer: DrawnLayer) -> LayerHandle {
        let handle = LayerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let mut state = self.state.lock().unwrap();
        state.live.insert(handle, layer);
        state.draw_calls += 1;
        handle
    }

    /// All currently live primitives for a track.
    pub fn live_for(&self, track: &TrackId) -> Vec<(LayerHandle, DrawnLayer)> {
        let state = self.state.lock().unwrap();
        let mut layers: Vec<_> = state
            .live
            .iter()
            .filter(|(_, l)| &l.track == track)
            .map(|(h, l)| (*h, l.clone()))
            .collect();
        layers.sort_by_key(|(h, _)| *h);
        layers
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }

    pub fn draw_calls(&self) -> u64 {
        self.state.lock().unwrap().draw_calls
    }

    pub fn remove_calls(&self) -> u64 {
        self.state.lock().unwrap().remove_calls
    }

    pub fn radius_of(&self, handle: LayerHandle) -> Option<f64> {
        self.state
            .lock()
            .unwrap()
            .live
            .get(&handle)
            .and_then(|l| l.radius)
    }

    pub fn is_live(&self, handle: LayerHandle) -> bool {
        self.state.lock().unwrap().live.contains_key(&handle)
    }
}

#[cfg(any(test, feature = "synthetic"))]
impl Default for RecordingSurface {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "synthetic"))]
impl MapSurface for RecordingSurface {
    fn draw_polyline(&self, track: &TrackId, _points: &[GeoPoint]) -> LayerHandle {
        self.draw(DrawnLayer {
            track: track.clone(),
            kind: DrawnKind::Polyline,
            radius: None,
        })
    }

    fn draw_marker(&self, track: &TrackId, _at: GeoPoint, radius: f64) -> LayerHandle {
        self.draw(DrawnLayer {
            track: track.clone(),
            kind: DrawnKind::Marker,
            radius: Some(radius),
        })
    }

    fn draw_rectangle(&self, track: &TrackId, _bounds: &Bounds) -> LayerHandle {
        self.draw(DrawnLayer {
            track: track.clone(),
            kind: DrawnKind::Rectangle,
            radius: None,
        })
    }

    fn set_marker_radius(&self, handle: LayerHandle, radius: f64) {
        let mut state = self.state.lock().unwrap();
        if let Some(layer) = state.live.get_mut(&handle) {
            layer.radius = Some(radius);
        }
    }

    fn remove(&self, handle: LayerHandle) {
        let mut state = self.state.lock().unwrap();
        if state.live.remove(&handle).is_some() {
            state.remove_calls += 1;
        }
    }
}
