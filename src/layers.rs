//! Incremental layer registry: the diff-and-patch step between a result
//! set and the drawn map.
//!
//! `reconcile` is the single mutation entry point for the id -> LayerSet
//! map. It computes what changed against the new result set and touches
//! only that: tracks present in both the old and new set keep their
//! LayerSet untouched, which is what keeps the map from visibly jumping
//! on every incremental stream tick.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use futures::future::BoxFuture;
use log::{debug, warn};
use lru::LruCache;

use crate::error::{Result, ScoutError};
use crate::geometry::{decode_geometry, DecodeConfig, TrackGeometry};
use crate::selection::HighlightKind;
use crate::surface::{LayerHandle, MapSurface};
use crate::zoom::{marker_radius, ZoomConfig};
use crate::{TrackId, TrackSummary};

/// Decoded geometries of recently removed tracks are parked here so a
/// re-add within the session needs no refetch.
const GEOMETRY_CACHE_CAPACITY: usize = 64;

/// Source of raw geometry payloads, fetched lazily per track.
pub trait GeometryProvider: Send + Sync {
    fn fetch(&self, summary: &TrackSummary) -> BoxFuture<'static, Result<Vec<u8>>>;
}

/// The bundle of visual primitives representing one track on the map.
///
/// Exclusively owned by the registry; a LayerSet exists for a track id if
/// and only if that id is currently a member of the active result set.
#[derive(Debug)]
pub struct LayerSet {
    pub polyline: LayerHandle,
    pub start_marker: Option<LayerHandle>,
    pub end_marker: Option<LayerHandle>,
    pub selected_rectangle: Option<LayerHandle>,
    pub hover_rectangle: Option<LayerHandle>,
    /// Monotonic creation token; stays constant for as long as the entry
    /// survives reconciliation.
    pub created_seq: u64,
    geometry: Arc<TrackGeometry>,
}

impl LayerSet {
    pub fn geometry(&self) -> &Arc<TrackGeometry> {
        &self.geometry
    }

    fn marker_handles(&self) -> impl Iterator<Item = LayerHandle> {
        [self.start_marker, self.end_marker].into_iter().flatten()
    }

    fn all_handles(&self) -> impl Iterator<Item = LayerHandle> {
        [
            Some(self.polyline),
            self.start_marker,
            self.end_marker,
            self.selected_rectangle,
            self.hover_rectangle,
        ]
        .into_iter()
        .flatten()
    }
}

/// What one `reconcile` call did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub added: Vec<TrackId>,
    pub removed: Vec<TrackId>,
    /// Tracks whose geometry could not be fetched or decoded; they are
    /// skipped, everything else stays rendered.
    pub skipped: Vec<TrackId>,
    pub unchanged: usize,
}

/// Keyed store of rendered map layers per track id.
pub struct LayerRegistry {
    surface: Arc<dyn MapSurface>,
    provider: Arc<dyn GeometryProvider>,
    decode_config: DecodeConfig,
    zoom_config: ZoomConfig,
    entries: HashMap<TrackId, LayerSet>,
    geometry_cache: LruCache<TrackId, Arc<TrackGeometry>>,
    current_zoom: f64,
    next_seq: u64,
}

impl LayerRegistry {
    pub fn new(surface: Arc<dyn MapSurface>, provider: Arc<dyn GeometryProvider>) -> Self {
        Self::with_configs(surface, provider, DecodeConfig::default(), ZoomConfig::default())
    }

    pub fn with_configs(
        surface: Arc<dyn MapSurface>,
        provider: Arc<dyn GeometryProvider>,
        decode_config: DecodeConfig,
        zoom_config: ZoomConfig,
    ) -> Self {
        let current_zoom = zoom_config.reference_zoom;
        Self {
            surface,
            provider,
            decode_config,
            zoom_config,
            entries: HashMap::new(),
            geometry_cache: LruCache::new(
                NonZeroUsize::new(GEOMETRY_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            ),
            current_zoom,
            next_seq: 0,
        }
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Update the rendered set to match `target` exactly.
    ///
    /// Removed entries are detached and disposed; new entries lazily fetch
    /// and decode geometry; ids present in both sets are left completely
    /// untouched. Per-track fetch/decode failures skip that track only.
    pub async fn reconcile(
        &mut self,
        target: &HashMap<TrackId, TrackSummary>,
    ) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();

        let to_remove: Vec<TrackId> = self
            .entries
            .keys()
            .filter(|id| !target.contains_key(*id))
            .cloned()
            .collect();
        let mut to_add: Vec<&TrackSummary> = target
            .values()
            .filter(|s| !self.entries.contains_key(&s.id))
            .collect();
        to_add.sort_by(|a, b| a.id.cmp(&b.id));

        outcome.unchanged = self.entries.len() - to_remove.len();

        for id in &to_remove {
            self.remove_entry(id);
        }
        outcome.removed = to_remove;

        for summary in to_add {
            match self.add_entry(summary).await {
                Ok(()) => outcome.added.push(summary.id.clone()),
                Err(err) => {
                    warn!("[LayerRegistry] skipping track {}: {}", summary.id, err);
                    outcome.skipped.push(summary.id.clone());
                }
            }
        }

        debug!(
            "[LayerRegistry] reconcile: +{} -{} ~{} skipped {}",
            outcome.added.len(),
            outcome.removed.len(),
            outcome.unchanged,
            outcome.skipped.len()
        );
        outcome
    }

    fn remove_entry(&mut self, id: &TrackId) {
        if let Some(set) = self.entries.remove(id) {
            for handle in set.all_handles() {
                self.surface.remove(handle);
            }
            self.geometry_cache.put(id.clone(), set.geometry);
        }
    }

    async fn add_entry(&mut self, summary: &TrackSummary) -> Result<()> {
        let geometry = match self.geometry_cache.pop(&summary.id) {
            Some(cached) => cached,
            None => {
                let provider = Arc::clone(&self.provider);
                let raw = provider.fetch(summary).await?;
                let decoded =
                    decode_geometry(&raw, &self.decode_config).map_err(|err| match err {
                        ScoutError::MalformedGeometry { message, .. } => {
                            ScoutError::malformed(Some(summary.id.as_str()), message)
                        }
                        other => other,
                    })?;
                Arc::new(decoded)
            }
        };

        let radius = marker_radius(self.current_zoom, &self.zoom_config);
        let polyline = self
            .surface
            .draw_polyline(&summary.id, &geometry.render_line);
        let start_marker = geometry
            .start()
            .map(|p| self.surface.draw_marker(&summary.id, p, radius));
        let end_marker = if geometry.points.len() > 1 {
            geometry
                .end()
                .map(|p| self.surface.draw_marker(&summary.id, p, radius))
        } else {
            None
        };

        let created_seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            summary.id.clone(),
            LayerSet {
                polyline,
                start_marker,
                end_marker,
                selected_rectangle: None,
                hover_rectangle: None,
                created_seq,
                geometry,
            },
        );
        Ok(())
    }

    // ========================================================================
    // Highlight rectangles
    // ========================================================================

    /// Draw the highlight rectangle of the given kind over a track's
    /// bounds. At most one rectangle exists per track id at a time: any
    /// existing rectangle of either kind is removed first.
    pub fn set_highlight(&mut self, id: &TrackId, kind: HighlightKind) {
        self.clear_highlight(id, HighlightKind::Selected);
        self.clear_highlight(id, HighlightKind::Hover);

        let Some(set) = self.entries.get_mut(id) else {
            return;
        };
        let bounds = set.geometry.bounds.horizontal();
        let handle = self.surface.draw_rectangle(id, &bounds);
        match kind {
            HighlightKind::Selected => set.selected_rectangle = Some(handle),
            HighlightKind::Hover => set.hover_rectangle = Some(handle),
        }
    }

    /// Remove a track's highlight rectangle of the given kind, if any.
    pub fn clear_highlight(&mut self, id: &TrackId, kind: HighlightKind) {
        let Some(set) = self.entries.get_mut(id) else {
            return;
        };
        let slot = match kind {
            HighlightKind::Selected => &mut set.selected_rectangle,
            HighlightKind::Hover => &mut set.hover_rectangle,
        };
        if let Some(handle) = slot.take() {
            self.surface.remove(handle);
        }
    }

    // ========================================================================
    // Zoom
    // ========================================================================

    /// Re-apply marker radii for a new zoom level. Writes the radius onto
    /// every existing endpoint marker; polylines are untouched and no
    /// marker is recreated.
    pub fn apply_zoom(&mut self, zoom: f64) {
        self.current_zoom = zoom;
        let radius = marker_radius(zoom, &self.zoom_config);
        for set in self.entries.values() {
            for handle in set.marker_handles() {
                self.surface.set_marker_radius(handle, radius);
            }
        }
    }

    // ========================================================================
    // Queries and teardown
    // ========================================================================

    pub fn contains(&self, id: &TrackId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn entry(&self, id: &TrackId) -> Option<&LayerSet> {
        self.entries.get(id)
    }

    pub fn ids(&self) -> Vec<TrackId> {
        let mut ids: Vec<TrackId> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every rendered layer, e.g. on view teardown.
    pub fn clear(&mut self) {
        let ids: Vec<TrackId> = self.entries.keys().cloned().collect();
        for id in &ids {
            self.remove_entry(id);
        }
    }
}
