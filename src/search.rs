//! Search coordination: debounced viewport-driven re-search with a
//! single-active-stream invariant.
//!
//! Each viewport change bumps a generation counter; the debounce task,
//! the stream loop, and every effect application re-check their captured
//! generation against the current one before acting. Cancellation is the
//! sole concurrency-control mechanism: a superseded session's pending
//! events are discarded unconditionally, so a slow old stream can never
//! overwrite a newer result set.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::error::{Result, ScoutError};
use crate::layers::LayerRegistry;
use crate::selection::{apply_effects, SelectionStateMachine};
use crate::stream::{CancelToken, StreamEvent, SummarySource};
use crate::viewport::{Viewport, ViewportFilter};
use crate::{ResultLimit, SearchQuery, TrackId, TrackSummary, TrackType};

/// Configuration for the search coordinator.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Quiet period before a viewport change becomes a search; a burst of
    /// changes collapses to one search scoped to the last viewport.
    /// Default: 300 ms
    pub debounce: Duration,

    /// Result cap sent to the server. Default: 50
    pub limit: ResultLimit,

    /// Optional track-type filter applied server-side.
    /// Default: None (both kinds)
    pub track_type: Option<TrackType>,

    /// Bound on waiting for the next streamed event before the loading
    /// indicator is cleared and an error surfaced. Default: 10 s
    pub item_timeout: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            limit: ResultLimit::L50,
            track_type: None,
            item_timeout: Duration::from_secs(10),
        }
    }
}

/// Running counts published for UI feedback on every stream tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadingState {
    pub loading: bool,
    pub total_expected: u32,
    pub loaded_so_far: u32,
}

pub type LoadingCallback = Arc<dyn Fn(LoadingState) + Send + Sync>;

/// Latest-error publication; the UI replaces any prior banner rather than
/// stacking them.
pub type SearchErrorCallback = Arc<dyn Fn(&ScoutError) + Send + Sync>;

/// Mutable search state, guarded by one async mutex. Reconciliation runs
/// to completion under this guard before the next application starts.
struct SearchState {
    /// The committed result set of the last completed search.
    results: HashMap<TrackId, TrackSummary>,
    /// Items of the in-flight search, applied additively until `done`.
    incoming: HashMap<TrackId, TrackSummary>,
    /// Viewport of the last *completed* search; basis for the pure
    /// zoom-in skip.
    last_search_viewport: Option<Viewport>,
    /// Cancel handle of the in-flight session, if any.
    active_cancel: Option<CancelToken>,
}

/// Owns the debounce policy and the single-active-stream invariant.
pub struct SearchCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    source: Arc<dyn SummarySource>,
    registry: Arc<Mutex<LayerRegistry>>,
    selection: Arc<std::sync::Mutex<SelectionStateMachine>>,
    config: SearchConfig,
    epoch: AtomicU64,
    state: Mutex<SearchState>,
    on_loading: std::sync::Mutex<Option<LoadingCallback>>,
    on_error: std::sync::Mutex<Option<SearchErrorCallback>>,
}

impl SearchCoordinator {
    pub fn new(
        source: Arc<dyn SummarySource>,
        registry: Arc<Mutex<LayerRegistry>>,
        selection: Arc<std::sync::Mutex<SelectionStateMachine>>,
    ) -> Self {
        Self::with_config(source, registry, selection, SearchConfig::default())
    }

    pub fn with_config(
        source: Arc<dyn SummarySource>,
        registry: Arc<Mutex<LayerRegistry>>,
        selection: Arc<std::sync::Mutex<SelectionStateMachine>>,
        config: SearchConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                registry,
                selection,
                config,
                epoch: AtomicU64::new(0),
                state: Mutex::new(SearchState {
                    results: HashMap::new(),
                    incoming: HashMap::new(),
                    last_search_viewport: None,
                    active_cancel: None,
                }),
                on_loading: std::sync::Mutex::new(None),
                on_error: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Register the loading-indicator callback.
    pub fn set_loading_callback(&self, callback: LoadingCallback) {
        if let Ok(mut slot) = self.inner.on_loading.lock() {
            *slot = Some(callback);
        }
    }

    /// Register the error-banner callback.
    pub fn set_error_callback(&self, callback: SearchErrorCallback) {
        if let Ok(mut slot) = self.inner.on_error.lock() {
            *slot = Some(callback);
        }
    }

    // ========================================================================
    // Viewport events
    // ========================================================================

    /// Called on every pan/zoom tick. Must run inside a tokio runtime.
    pub fn on_viewport_changed(&self, viewport: Viewport) {
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.config.debounce).await;
            if inner.epoch.load(Ordering::SeqCst) != epoch {
                // Superseded within the quiet period.
                return;
            }
            if let Err(err) = inner.search_viewport(epoch, viewport).await {
                warn!("[SearchCoordinator] search failed: {}", err);
                // Previously rendered results stay; only the indicator is
                // cleared and the latest error published.
                inner.publish_loading(LoadingState {
                    loading: false,
                    total_expected: 0,
                    loaded_so_far: 0,
                });
                inner.publish_error(&err);
            }
        });
    }

    /// Zoom-end event: re-apply marker radii on every rendered marker.
    pub async fn on_zoom_changed(&self, zoom: f64) {
        self.inner.registry.lock().await.apply_zoom(zoom);
    }

    // ========================================================================
    // Interaction events
    // ========================================================================

    pub async fn click(&self, id: &TrackId) {
        let Ok(effects) = self.inner.selection.lock().map(|mut s| s.click(id)) else {
            return;
        };
        apply_effects(&mut *self.inner.registry.lock().await, &effects);
    }

    pub async fn hover(&self, id: &TrackId) {
        let Ok(effects) = self.inner.selection.lock().map(|mut s| s.hover(id)) else {
            return;
        };
        apply_effects(&mut *self.inner.registry.lock().await, &effects);
    }

    pub async fn leave(&self) {
        let Ok(effects) = self.inner.selection.lock().map(|mut s| s.leave()) else {
            return;
        };
        apply_effects(&mut *self.inner.registry.lock().await, &effects);
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Committed result set, sorted by id.
    pub async fn current_results(&self) -> Vec<TrackSummary> {
        let state = self.inner.state.lock().await;
        let mut results: Vec<TrackSummary> = state.results.values().cloned().collect();
        results.sort_by(|a, b| a.id.cmp(&b.id));
        results
    }

    /// Ids currently rendered by the layer registry.
    pub async fn rendered_ids(&self) -> Vec<TrackId> {
        self.inner.registry.lock().await.ids()
    }
}

impl Inner {
    async fn search_viewport(&self, epoch: u64, viewport: Viewport) -> Result<()> {
        viewport.validate()?;

        {
            let mut state = self.state.lock().await;

            // Pure zoom-in with no pan: already-loaded data is a superset
            // of what is visible, so filter locally instead of re-querying.
            if let Some(previous) = state.last_search_viewport {
                if viewport.contained_in(&previous) {
                    debug!(
                        "[SearchCoordinator] #{} viewport contained in last search, filtering locally",
                        epoch
                    );
                    let visible: HashSet<TrackId> =
                        ViewportFilter::visible(state.results.values(), &viewport)
                            .into_iter()
                            .collect();
                    let target: HashMap<TrackId, TrackSummary> = state
                        .results
                        .iter()
                        .filter(|(id, _)| visible.contains(*id))
                        .map(|(id, s)| (id.clone(), s.clone()))
                        .collect();
                    self.reconcile_and_sync(&target).await;
                    return Ok(());
                }
            }

            // Opening a new search immediately cancels the prior one.
            if let Some(token) = state.active_cancel.take() {
                token.cancel();
            }
            state.incoming.clear();
        }

        self.publish_loading(LoadingState {
            loading: true,
            total_expected: self.config.limit.as_u32(),
            loaded_so_far: 0,
        });

        let query = SearchQuery::for_viewport(&viewport, self.config.track_type, self.config.limit);
        let mut session = self.source.open(&query).await?;
        session.set_item_timeout(self.config.item_timeout);

        {
            let mut state = self.state.lock().await;
            if self.epoch.load(Ordering::SeqCst) != epoch {
                session.cancel();
                return Ok(());
            }
            state.active_cancel = Some(session.cancel_token());
        }
        info!("[SearchCoordinator] #{} stream opened", epoch);

        loop {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                session.cancel();
                return Ok(());
            }
            let Some(event) = session.next_event().await else {
                // Cancelled: discarded silently, not an error.
                return Ok(());
            };

            match event {
                Ok(StreamEvent::Item(summary)) => {
                    let mut state = self.state.lock().await;
                    if self.epoch.load(Ordering::SeqCst) != epoch {
                        session.cancel();
                        return Ok(());
                    }
                    state.incoming.insert(summary.id.clone(), summary);
                    let loaded = state.incoming.len() as u32;

                    // Additive while streaming: stale tracks are only
                    // dropped at completion, in one pass, so survivors are
                    // never destroyed and recreated mid-stream.
                    let mut target = state.results.clone();
                    for (id, s) in &state.incoming {
                        target.insert(id.clone(), s.clone());
                    }
                    self.reconcile_and_sync(&target).await;
                    drop(state);

                    self.publish_loading(LoadingState {
                        loading: true,
                        total_expected: self.config.limit.as_u32(),
                        loaded_so_far: loaded,
                    });
                }
                Ok(StreamEvent::Done { total }) => {
                    let mut state = self.state.lock().await;
                    if self.epoch.load(Ordering::SeqCst) != epoch {
                        session.cancel();
                        return Ok(());
                    }
                    state.results = std::mem::take(&mut state.incoming);
                    state.last_search_viewport = Some(viewport);
                    state.active_cancel = None;
                    let target = state.results.clone();
                    let loaded = target.len() as u32;
                    self.reconcile_and_sync(&target).await;
                    drop(state);

                    self.publish_loading(LoadingState {
                        loading: false,
                        total_expected: total.max(loaded),
                        loaded_so_far: loaded,
                    });
                    info!(
                        "[SearchCoordinator] #{} complete: {} tracks",
                        epoch, loaded
                    );
                    return Ok(());
                }
                Err(err) => {
                    let mut state = self.state.lock().await;
                    if self.epoch.load(Ordering::SeqCst) != epoch {
                        // A superseded session's failure is as stale as its
                        // data: discard silently.
                        session.cancel();
                        return Ok(());
                    }
                    // Keep the partial result visible; merge it into the
                    // committed set so local filtering still knows it.
                    let partial = std::mem::take(&mut state.incoming);
                    state.results.extend(partial);
                    state.active_cancel = None;
                    drop(state);
                    return Err(err);
                }
            }
        }
    }

    /// Reconcile the registry to `target` and clear selection slots for
    /// anything that fell out of the rendered set. Runs fully to
    /// completion before the next application is processed.
    async fn reconcile_and_sync(&self, target: &HashMap<TrackId, TrackSummary>) {
        let outcome = self.registry.lock().await.reconcile(target).await;
        if !outcome.removed.is_empty() {
            if let Ok(mut selection) = self.selection.lock() {
                for id in &outcome.removed {
                    selection.on_removed(id);
                }
            }
        }
    }

    fn publish_loading(&self, state: LoadingState) {
        if let Ok(slot) = self.on_loading.lock() {
            if let Some(callback) = &*slot {
                callback(state);
            }
        }
    }

    fn publish_error(&self, err: &ScoutError) {
        if let Ok(slot) = self.on_error.lock() {
            if let Some(callback) = &*slot {
                callback(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::GeometryProvider;
    use crate::stream::{StreamSession, SummarySource};
    use crate::surface::RecordingSurface;
    use crate::{Bounds, GeoPoint, Tire, TrackType};
    use futures::future::BoxFuture;

    fn summary(id: &str) -> TrackSummary {
        TrackSummary {
            id: TrackId::from(id),
            name: format!("track {}", id),
            track_type: TrackType::Segment,
            bounds: Bounds {
                north: 45.8,
                south: 45.7,
                east: 4.9,
                west: 4.8,
            },
            barycenter: GeoPoint::new(45.75, 4.85),
            difficulty: 3,
            surface_types: vec![],
            tire_dry: Tire::Slick,
            tire_wet: Tire::Knobby,
            comments: String::new(),
            file_path: format!("tracks/{}.json", id),
        }
    }

    fn geometry_payload() -> Vec<u8> {
        br#"{"points": [
            {"lat": 45.7, "lon": 4.8, "ele": 200.0},
            {"lat": 45.8, "lon": 4.9, "ele": 240.0}
        ]}"#
        .to_vec()
    }

    struct AnyGeometry;

    impl GeometryProvider for AnyGeometry {
        fn fetch(&self, _summary: &TrackSummary) -> BoxFuture<'static, Result<Vec<u8>>> {
            Box::pin(async move { Ok(geometry_payload()) })
        }
    }

    /// Source that replays one scripted batch per open and records every
    /// query it saw.
    struct ScriptedSource {
        batches: std::sync::Mutex<Vec<Vec<TrackSummary>>>,
        queries: std::sync::Mutex<Vec<SearchQuery>>,
    }

    impl ScriptedSource {
        fn new(batches: Vec<Vec<TrackSummary>>) -> Self {
            Self {
                batches: std::sync::Mutex::new(batches),
                queries: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn open_count(&self) -> usize {
            self.queries.lock().unwrap().len()
        }

        fn last_query(&self) -> Option<SearchQuery> {
            self.queries.lock().unwrap().last().cloned()
        }
    }

    impl SummarySource for ScriptedSource {
        fn open(&self, query: &SearchQuery) -> BoxFuture<'static, Result<StreamSession>> {
            self.queries.lock().unwrap().push(query.clone());
            let mut batches = self.batches.lock().unwrap();
            let batch = if batches.is_empty() {
                Vec::new()
            } else {
                batches.remove(0)
            };
            Box::pin(async move {
                let total = batch.len() as u32;
                let mut events: Vec<Result<StreamEvent>> =
                    batch.into_iter().map(|s| Ok(StreamEvent::Item(s))).collect();
                events.push(Ok(StreamEvent::Done { total }));
                Ok(StreamSession::scripted(events))
            })
        }
    }

    fn coordinator_with(
        source: Arc<ScriptedSource>,
    ) -> (SearchCoordinator, Arc<RecordingSurface>) {
        let surface = Arc::new(RecordingSurface::new());
        let registry = Arc::new(Mutex::new(LayerRegistry::new(
            surface.clone(),
            Arc::new(AnyGeometry),
        )));
        let selection = Arc::new(std::sync::Mutex::new(SelectionStateMachine::new()));
        let coordinator = SearchCoordinator::with_config(
            source,
            registry,
            selection,
            SearchConfig {
                debounce: Duration::from_millis(300),
                ..SearchConfig::default()
            },
        );
        (coordinator, surface)
    }

    async fn settle(coordinator: &SearchCoordinator, expected: usize) {
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if coordinator.rendered_ids().await.len() == expected {
                return;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_to_last_viewport() {
        let source = Arc::new(ScriptedSource::new(vec![vec![summary("1")]]));
        let (coordinator, _surface) = coordinator_with(source.clone());

        for step in 0..10 {
            let offset = step as f64 * 0.01;
            coordinator.on_viewport_changed(Viewport::new(
                45.9 + offset,
                45.6 + offset,
                5.0,
                4.7,
                13.0,
            ));
        }
        settle(&coordinator, 1).await;

        assert_eq!(source.open_count(), 1);
        let query = source.last_query().unwrap();
        assert!((query.north - 45.99).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_viewport_rejected_without_request() {
        let source = Arc::new(ScriptedSource::new(vec![vec![summary("1")]]));
        let (coordinator, _surface) = coordinator_with(source.clone());

        let errors: Arc<std::sync::Mutex<Vec<String>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        coordinator.set_error_callback(Arc::new(move |err| {
            sink.lock().unwrap().push(err.to_string());
        }));

        // west > east
        coordinator.on_viewport_changed(Viewport::new(45.9, 45.6, 4.0, 5.0, 13.0));
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(source.open_count(), 0);
        assert_eq!(errors.lock().unwrap().len(), 1);
        assert!(errors.lock().unwrap()[0].contains("query rejected"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zoom_in_skips_fresh_search() {
        let source = Arc::new(ScriptedSource::new(vec![vec![
            summary("1"),
            summary("2"),
        ]]));
        let (coordinator, _surface) = coordinator_with(source.clone());

        coordinator.on_viewport_changed(Viewport::new(46.0, 45.0, 6.0, 4.0, 11.0));
        settle(&coordinator, 2).await;
        assert_eq!(source.open_count(), 1);

        // Zooming in inside the searched frame must not hit the server.
        coordinator.on_viewport_changed(Viewport::new(45.85, 45.6, 5.0, 4.7, 13.0));
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(source.open_count(), 1);
        // Both tracks overlap the tighter viewport, so both stay rendered.
        assert_eq!(coordinator.rendered_ids().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loading_counts_published() {
        let source = Arc::new(ScriptedSource::new(vec![vec![
            summary("1"),
            summary("2"),
        ]]));
        let (coordinator, _surface) = coordinator_with(source.clone());

        let states: Arc<std::sync::Mutex<Vec<LoadingState>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&states);
        coordinator.set_loading_callback(Arc::new(move |state| {
            sink.lock().unwrap().push(state);
        }));

        coordinator.on_viewport_changed(Viewport::new(45.9, 45.6, 5.0, 4.7, 13.0));
        settle(&coordinator, 2).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let states = states.lock().unwrap();
        assert!(states.first().unwrap().loading);
        let last = states.last().unwrap();
        assert!(!last.loading);
        assert_eq!(last.loaded_so_far, 2);
        assert_eq!(last.total_expected, 2);
    }
}
