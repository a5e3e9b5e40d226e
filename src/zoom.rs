//! Zoom-to-radius scaling for endpoint markers.

/// Configuration for marker radius scaling.
#[derive(Debug, Clone)]
pub struct ZoomConfig {
    /// Radius at the reference zoom, in pixels. Default: 6.0
    pub base_radius: f64,
    /// Radius change per zoom level. Default: 0.4
    pub slope: f64,
    /// Zoom level at which markers have `base_radius`. Default: 10.0
    pub reference_zoom: f64,
    /// Lower clamp. Default: 2.0
    pub min_radius: f64,
    /// Upper clamp. Default: 10.0
    pub max_radius: f64,
}

impl Default for ZoomConfig {
    fn default() -> Self {
        Self {
            base_radius: 6.0,
            slope: 0.4,
            reference_zoom: 10.0,
            min_radius: 2.0,
            max_radius: 10.0,
        }
    }
}

/// Marker radius for a zoom level: linear in zoom, clamped to
/// `[min_radius, max_radius]`. Pure and idempotent; applied to existing
/// markers on every zoom-end, never by recreating them.
pub fn marker_radius(zoom: f64, config: &ZoomConfig) -> f64 {
    let raw = config.base_radius + (zoom - config.reference_zoom) * config.slope;
    raw.clamp(config.min_radius, config.max_radius)
}
