//! Server-side bounds query engine: executes bounding-box intersection
//! queries against the persisted track index and streams matches back,
//! capped by a result limit.
//!
//! The R-tree narrows candidates; the exact overlap predicate makes the
//! final call, so touching edges behave identically on both sides of the
//! wire.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::Stream;
use log::{debug, info, warn};
use rstar::{RTree, RTreeObject, AABB};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};

use crate::error::{Result, ScoutError};
use crate::geo_utils::bounds_overlap;
use crate::{Bounds, ResultLimit, SearchQuery, TrackId, TrackSummary};

/// Bounds wrapper for R-tree spatial indexing.
#[derive(Debug, Clone, PartialEq)]
struct SummaryBounds {
    id: TrackId,
    /// Insertion order; matches stream back in catalog order.
    seq: u64,
    bounds: Bounds,
}

impl RTreeObject for SummaryBounds {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.bounds.west, self.bounds.south],
            [self.bounds.east, self.bounds.north],
        )
    }
}

/// One raw catalog record: summary plus the opaque geometry payload
/// served to clients on demand.
#[derive(Debug, Deserialize)]
struct CatalogRecord {
    summary: TrackSummary,
    geometry: serde_json::Value,
}

/// In-memory track index: summaries, opaque geometry payloads, and the
/// spatial index over summary bounds.
pub struct TrackStore {
    summaries: HashMap<TrackId, TrackSummary>,
    geometries: HashMap<TrackId, serde_json::Value>,
    index: RTree<SummaryBounds>,
    seq: HashMap<TrackId, u64>,
    next_seq: u64,
}

impl TrackStore {
    pub fn new() -> Self {
        Self {
            summaries: HashMap::new(),
            geometries: HashMap::new(),
            index: RTree::new(),
            seq: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Insert or replace a track.
    pub fn insert(&mut self, summary: TrackSummary, geometry: serde_json::Value) {
        let id = summary.id.clone();
        self.remove(&id);

        let seq = self.next_seq;
        self.next_seq += 1;
        self.index.insert(SummaryBounds {
            id: summary.id.clone(),
            seq,
            bounds: summary.bounds,
        });
        self.seq.insert(summary.id.clone(), seq);
        self.geometries.insert(summary.id.clone(), geometry);
        self.summaries.insert(summary.id.clone(), summary);
    }

    /// Remove a track. Returns whether it existed.
    pub fn remove(&mut self, id: &TrackId) -> bool {
        let Some(summary) = self.summaries.remove(id) else {
            return false;
        };
        self.geometries.remove(id);
        if let Some(seq) = self.seq.remove(id) {
            self.index.remove(&SummaryBounds {
                id: id.clone(),
                seq,
                bounds: summary.bounds,
            });
        }
        true
    }

    /// Load raw catalog records. Malformed individual records are skipped
    /// and do not abort the load; returns the number actually inserted.
    pub fn ingest_records(&mut self, records: Vec<serde_json::Value>) -> usize {
        let mut loaded = 0;
        for (i, record) in records.into_iter().enumerate() {
            match serde_json::from_value::<CatalogRecord>(record) {
                Ok(record) => {
                    self.insert(record.summary, record.geometry);
                    loaded += 1;
                }
                Err(e) => warn!("[TrackStore] skipping malformed record {}: {}", i, e),
            }
        }
        info!("[TrackStore] loaded {} tracks", loaded);
        loaded
    }

    pub fn geometry(&self, id: &TrackId) -> Option<&serde_json::Value> {
        self.geometries.get(id)
    }

    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }
}

impl Default for TrackStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Executes bounding-box overlap queries against a [`TrackStore`].
pub struct BoundsQueryEngine {
    store: Arc<RwLock<TrackStore>>,
}

impl BoundsQueryEngine {
    pub fn new(store: Arc<RwLock<TrackStore>>) -> Self {
        Self { store }
    }

    /// All tracks whose bounding box at least partially overlaps the
    /// queried box, in catalog order, capped at the query's limit.
    pub fn execute(&self, query: &SearchQuery) -> Result<Vec<TrackSummary>> {
        query.validate()?;

        let store = self.store.read().map_err(|_| ScoutError::Internal {
            message: "track store lock poisoned".to_string(),
        })?;

        let query_bounds = query.bounds();
        let envelope = AABB::from_corners(
            [query_bounds.west, query_bounds.south],
            [query_bounds.east, query_bounds.north],
        );

        let mut hits: Vec<&SummaryBounds> = store
            .index
            .locate_in_envelope_intersecting(&envelope)
            .filter(|b| bounds_overlap(&b.bounds, &query_bounds))
            .collect();
        hits.sort_by_key(|b| b.seq);

        let limit = query.limit.as_u32() as usize;
        let matches: Vec<TrackSummary> = hits
            .into_iter()
            .filter_map(|b| store.summaries.get(&b.id))
            .filter(|s| query.track_type.map_or(true, |t| s.track_type == t))
            .take(limit)
            .cloned()
            .collect();

        debug!(
            "[BoundsQueryEngine] {} matches for {:?} (limit {})",
            matches.len(),
            query_bounds,
            limit
        );
        Ok(matches)
    }
}

// ============================================================================
// HTTP surface
// ============================================================================

/// Wire shape of `GET /search` parameters.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchParams {
    north: f64,
    south: f64,
    east: f64,
    west: f64,
    track_type: Option<crate::TrackType>,
    limit: Option<u32>,
}

/// Build the search/geometry router over a shared store.
pub fn router(store: Arc<RwLock<TrackStore>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/search", get(search_handler))
        .route("/tracks/{id}/geometry", get(geometry_handler))
        .layer(cors)
        .with_state(store)
}

/// Serve the router until the process is stopped.
pub async fn serve(store: Arc<RwLock<TrackStore>>, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ScoutError::transport(format!("failed to bind {}: {}", addr, e)))?;
    info!("[BoundsQueryEngine] listening on {}", addr);
    axum::serve(listener, router(store))
        .await
        .map_err(|e| ScoutError::transport(format!("server failed: {}", e)))
}

async fn search_handler(
    State(store): State<Arc<RwLock<TrackStore>>>,
    Query(params): Query<SearchParams>,
) -> std::result::Result<
    Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>,
    (StatusCode, String),
> {
    let query = SearchQuery {
        north: params.north,
        south: params.south,
        east: params.east,
        west: params.west,
        track_type: params.track_type,
        limit: ResultLimit::from(params.limit.unwrap_or(ResultLimit::default().as_u32())),
    };

    let engine = BoundsQueryEngine::new(store);
    let matches = engine.execute(&query).map_err(|err| match err {
        ScoutError::QueryRejected { .. } => (StatusCode::BAD_REQUEST, err.to_string()),
        other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    })?;

    let events = summary_events(&matches);
    Ok(Sse::new(tokio_stream::iter(
        events.into_iter().map(Ok::<_, Infallible>),
    )))
}

/// Encode matches as SSE events, terminated by the `done` sentinel. The
/// sentinel is emitted even for zero matches so the client can clear its
/// loading indicator. A summary that fails to serialize is skipped rather
/// than aborting the stream.
fn summary_events(matches: &[TrackSummary]) -> Vec<Event> {
    let mut events = Vec::with_capacity(matches.len() + 1);
    for summary in matches {
        match serde_json::to_string(summary) {
            Ok(json) => events.push(Event::default().event("summary").data(json)),
            Err(e) => warn!(
                "[BoundsQueryEngine] skipping unserializable summary {}: {}",
                summary.id, e
            ),
        }
    }
    let total = events.len();
    events.push(
        Event::default()
            .event("done")
            .data(format!("{{\"total\":{}}}", total)),
    );
    events
}

async fn geometry_handler(
    State(store): State<Arc<RwLock<TrackStore>>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let store = match store.read() {
        Ok(store) => store,
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "track store lock poisoned".to_string(),
            )
                .into_response()
        }
    };
    match store.geometry(&TrackId::from(id.as_str())) {
        Some(geometry) => Json(geometry.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, format!("unknown track '{}'", id)).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Tire, TrackType};

    fn summary(id: &str, bounds: Bounds, track_type: TrackType) -> TrackSummary {
        TrackSummary {
            id: TrackId::from(id),
            name: format!("track {}", id),
            track_type,
            bounds,
            barycenter: bounds.center(),
            difficulty: 2,
            surface_types: vec!["asphalt".to_string()],
            tire_dry: Tire::Slick,
            tire_wet: Tire::SemiSlick,
            comments: String::new(),
            file_path: format!("tracks/{}.json", id),
        }
    }

    fn geometry_value() -> serde_json::Value {
        serde_json::json!({"points": [{"lat": 45.7, "lon": 4.8, "ele": 250.0}]})
    }

    fn query(north: f64, south: f64, east: f64, west: f64) -> SearchQuery {
        SearchQuery {
            north,
            south,
            east,
            west,
            track_type: None,
            limit: ResultLimit::L100,
        }
    }

    fn store_with(tracks: Vec<TrackSummary>) -> Arc<RwLock<TrackStore>> {
        let mut store = TrackStore::new();
        for track in tracks {
            store.insert(track, geometry_value());
        }
        Arc::new(RwLock::new(store))
    }

    #[test]
    fn test_partial_overlap_included_disjoint_excluded() {
        let partial = summary(
            "partial",
            Bounds {
                north: 45.95,
                south: 45.6,
                east: 5.0,
                west: 4.7,
            },
            TrackType::Segment,
        );
        let outside = summary(
            "outside",
            Bounds {
                north: 46.0,
                south: 45.9,
                east: 5.0,
                west: 4.7,
            },
            TrackType::Segment,
        );
        let engine = BoundsQueryEngine::new(store_with(vec![partial, outside]));

        let matches = engine.execute(&query(45.8, 45.6, 5.0, 4.7)).unwrap();
        let ids: Vec<&str> = matches.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["partial"]);
    }

    #[test]
    fn test_limit_caps_in_catalog_order() {
        let tracks: Vec<TrackSummary> = (0..30)
            .map(|i| {
                summary(
                    &format!("t-{:02}", i),
                    Bounds {
                        north: 45.8,
                        south: 45.7,
                        east: 4.9,
                        west: 4.8,
                    },
                    TrackType::Segment,
                )
            })
            .collect();
        let engine = BoundsQueryEngine::new(store_with(tracks));

        let mut capped = query(46.0, 45.0, 6.0, 4.0);
        capped.limit = ResultLimit::L25;
        let matches = engine.execute(&capped).unwrap();

        assert_eq!(matches.len(), 25);
        assert_eq!(matches[0].id.as_str(), "t-00");
        assert_eq!(matches[24].id.as_str(), "t-24");
    }

    #[test]
    fn test_track_type_filter() {
        let bounds = Bounds {
            north: 45.8,
            south: 45.7,
            east: 4.9,
            west: 4.8,
        };
        let engine = BoundsQueryEngine::new(store_with(vec![
            summary("seg", bounds, TrackType::Segment),
            summary("route", bounds, TrackType::Route),
        ]));

        let mut typed = query(46.0, 45.0, 6.0, 4.0);
        typed.track_type = Some(TrackType::Route);
        let matches = engine.execute(&typed).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id.as_str(), "route");
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let engine = BoundsQueryEngine::new(store_with(vec![]));
        let err = engine.execute(&query(45.0, 46.0, 5.0, 4.0)).unwrap_err();
        assert!(matches!(err, ScoutError::QueryRejected { .. }));
    }

    #[test]
    fn test_zero_matches_still_emit_done() {
        let engine = BoundsQueryEngine::new(store_with(vec![]));
        let matches = engine.execute(&query(46.0, 45.0, 6.0, 4.0)).unwrap();
        assert!(matches.is_empty());

        let events = summary_events(&matches);
        assert_eq!(events.len(), 1); // just the sentinel
    }

    #[test]
    fn test_ingest_skips_malformed_records() {
        let good = serde_json::json!({
            "summary": summary(
                "ok",
                Bounds { north: 45.8, south: 45.7, east: 4.9, west: 4.8 },
                TrackType::Segment,
            ),
            "geometry": geometry_value(),
        });
        let bad = serde_json::json!({"summary": {"id": "broken"}});

        let mut store = TrackStore::new();
        let loaded = store.ingest_records(vec![good, bad]);
        assert_eq!(loaded, 1);
        assert_eq!(store.len(), 1);
        assert!(store.geometry(&TrackId::from("ok")).is_some());
    }

    #[test]
    fn test_remove_drops_from_index() {
        let bounds = Bounds {
            north: 45.8,
            south: 45.7,
            east: 4.9,
            west: 4.8,
        };
        let store = store_with(vec![summary("t-1", bounds, TrackType::Segment)]);
        assert!(store.write().unwrap().remove(&TrackId::from("t-1")));
        assert!(!store.write().unwrap().remove(&TrackId::from("t-1")));

        let engine = BoundsQueryEngine::new(store);
        let matches = engine.execute(&query(46.0, 45.0, 6.0, 4.0)).unwrap();
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn test_geometry_handler_lookup() {
        let bounds = Bounds {
            north: 45.8,
            south: 45.7,
            east: 4.9,
            west: 4.8,
        };
        let store = store_with(vec![summary("t-1", bounds, TrackType::Segment)]);

        let found = geometry_handler(State(store.clone()), Path("t-1".to_string())).await;
        assert_eq!(found.status(), StatusCode::OK);

        let missing = geometry_handler(State(store), Path("nope".to_string())).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
