//! Streaming search client: one cancellable, ordered server-push
//! connection delivering track summaries for a single search.
//!
//! Items arrive in the order the server emitted them. `cancel()` is
//! idempotent and, once called, no further events are delivered - a slow
//! old stream must never overwrite a newer result set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::StreamExt;
use log::{debug, warn};
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::error::{Result, ScoutError};
use crate::layers::GeometryProvider;
use crate::{SearchQuery, TrackSummary, TrackType};

/// Default bound on waiting for the next streamed event.
pub const DEFAULT_ITEM_TIMEOUT: Duration = Duration::from_secs(10);

/// Channel capacity between the wire reader and the consumer.
const SESSION_BUFFER: usize = 32;

/// One event of a summary stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Item(TrackSummary),
    /// Completion marker; emitted even for zero matches so the client can
    /// clear its loading indicator.
    Done { total: u32 },
}

/// Shared cancellation flag for one session.
#[derive(Debug, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Idempotent: the first call wins, later calls are no-ops.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Consumer half of one streaming search session.
pub struct StreamSession {
    rx: mpsc::Receiver<Result<StreamEvent>>,
    token: CancelToken,
    item_timeout: Duration,
}

impl StreamSession {
    /// Create a connected producer/consumer pair. The producer side is
    /// used by wire readers and by scripted test sources.
    pub fn channel() -> (StreamSessionSender, StreamSession) {
        let (tx, rx) = mpsc::channel(SESSION_BUFFER);
        let token = CancelToken::new();
        (
            StreamSessionSender {
                tx,
                token: token.clone(),
            },
            StreamSession {
                rx,
                token,
                item_timeout: DEFAULT_ITEM_TIMEOUT,
            },
        )
    }

    /// A session whose events are all known up front.
    pub fn scripted(events: Vec<Result<StreamEvent>>) -> StreamSession {
        let (sender, session) = Self::channel();
        tokio::spawn(async move {
            for event in events {
                if !sender.send(event).await {
                    break;
                }
            }
        });
        session
    }

    /// Next event, in server order. `None` once the session is cancelled
    /// or exhausted. Waiting longer than the item timeout surfaces a
    /// transport error; items already delivered stay valid.
    pub async fn next_event(&mut self) -> Option<Result<StreamEvent>> {
        if self.token.is_cancelled() {
            return None;
        }
        match tokio::time::timeout(self.item_timeout, self.rx.recv()).await {
            Err(_) => Some(Err(ScoutError::transport(format!(
                "no stream data within {:?}",
                self.item_timeout
            )))),
            Ok(received) => {
                if self.token.is_cancelled() {
                    return None;
                }
                received
            }
        }
    }

    /// Cancel the session. Idempotent; once called, no further events are
    /// delivered.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Handle the coordinator keeps to cancel this session when a newer
    /// search supersedes it.
    pub fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }

    pub fn set_item_timeout(&mut self, timeout: Duration) {
        self.item_timeout = timeout;
    }
}

/// Producer half of a session.
#[derive(Clone)]
pub struct StreamSessionSender {
    tx: mpsc::Sender<Result<StreamEvent>>,
    token: CancelToken,
}

impl StreamSessionSender {
    /// Deliver one event. Returns false once the session is cancelled or
    /// the consumer is gone; producers stop on false.
    pub async fn send(&self, event: Result<StreamEvent>) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.tx.send(event).await.is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Opens summary streams for search queries. The HTTP implementation is
/// the production source; tests inject scripted ones.
pub trait SummarySource: Send + Sync {
    fn open(&self, query: &SearchQuery) -> BoxFuture<'static, Result<StreamSession>>;
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// Shared connection-pooled client. SSE streams are long-lived, so only
/// the connect phase gets a timeout; per-event delays are bounded by the
/// session's item timeout instead.
static SHARED_CLIENT: Lazy<std::result::Result<Client, String>> = Lazy::new(|| {
    Client::builder()
        .pool_max_idle_per_host(4)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| e.to_string())
});

fn shared_client() -> Result<Client> {
    match &*SHARED_CLIENT {
        Ok(client) => Ok(client.clone()),
        Err(e) => Err(ScoutError::transport(format!(
            "failed to create HTTP client: {}",
            e
        ))),
    }
}

/// Summary source speaking the server's SSE wire format.
pub struct HttpSummarySource {
    base_url: String,
    client: Client,
}

impl HttpSummarySource {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: shared_client()?,
        })
    }
}

impl SummarySource for HttpSummarySource {
    fn open(&self, query: &SearchQuery) -> BoxFuture<'static, Result<StreamSession>> {
        let client = self.client.clone();
        let url = format!("{}/search", self.base_url);
        let query = query.clone();

        Box::pin(async move {
            query.validate()?;

            let mut params: Vec<(&str, String)> = vec![
                ("north", query.north.to_string()),
                ("south", query.south.to_string()),
                ("east", query.east.to_string()),
                ("west", query.west.to_string()),
                ("limit", query.limit.as_u32().to_string()),
            ];
            if let Some(track_type) = query.track_type {
                let name = match track_type {
                    TrackType::Segment => "segment",
                    TrackType::Route => "route",
                };
                params.push(("trackType", name.to_string()));
            }

            let response = client
                .get(&url)
                .query(&params)
                .send()
                .await
                .map_err(|e| ScoutError::transport(format!("search request failed: {}", e)))?;

            let status = response.status();
            if !status.is_success() {
                return Err(ScoutError::Http {
                    status: Some(status.as_u16()),
                    message: format!("search returned {}", status),
                });
            }

            let (sender, session) = StreamSession::channel();
            tokio::spawn(read_sse_stream(response, sender));
            Ok(session)
        })
    }
}

/// Payload of the `done` sentinel event.
#[derive(Debug, Deserialize)]
struct DoneData {
    total: u32,
}

/// Pump one SSE response body into a session until `done`, cancellation,
/// or a transport fault.
async fn read_sse_stream(response: reqwest::Response, sender: StreamSessionSender) {
    let mut body = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk) = body.next().await {
        if sender.is_cancelled() {
            debug!("[StreamSession] cancelled, dropping remaining response");
            return;
        }
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                sender
                    .send(Err(ScoutError::transport(format!("stream read failed: {}", e))))
                    .await;
                return;
            }
        };
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(split) = buffer.find("\n\n") {
            let block = buffer[..split].to_string();
            buffer.drain(..split + 2);

            match parse_sse_block(&block) {
                Some(("summary", data)) => match serde_json::from_str::<TrackSummary>(data) {
                    Ok(summary) => {
                        if !sender.send(Ok(StreamEvent::Item(summary))).await {
                            return;
                        }
                    }
                    // A malformed record is skipped, never aborting the
                    // stream.
                    Err(e) => warn!("[StreamSession] skipping malformed summary: {}", e),
                },
                Some(("done", data)) => {
                    let total = serde_json::from_str::<DoneData>(data)
                        .map(|d| d.total)
                        .unwrap_or(0);
                    sender.send(Ok(StreamEvent::Done { total })).await;
                    return;
                }
                _ => {}
            }
        }
    }

    // Connection ended without the completion marker.
    sender
        .send(Err(ScoutError::transport(
            "stream ended without completion marker",
        )))
        .await;
}

/// Split one SSE block into its event name and data line.
fn parse_sse_block(block: &str) -> Option<(&str, &str)> {
    let mut event = "message";
    let mut data = None;
    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("event:") {
            event = rest.trim();
        } else if let Some(rest) = line.strip_prefix("data:") {
            data = Some(rest.trim());
        }
    }
    data.map(|d| (event, d))
}

/// Geometry fetcher against `GET /tracks/{id}/geometry`.
pub struct HttpGeometryProvider {
    base_url: String,
    client: Client,
}

impl HttpGeometryProvider {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: shared_client()?,
        })
    }
}

impl GeometryProvider for HttpGeometryProvider {
    fn fetch(&self, summary: &TrackSummary) -> BoxFuture<'static, Result<Vec<u8>>> {
        let client = self.client.clone();
        let url = format!("{}/tracks/{}/geometry", self.base_url, summary.id);
        let id = summary.id.clone();

        Box::pin(async move {
            let response = client.get(&url).send().await.map_err(|e| {
                ScoutError::transport(format!("geometry fetch for {} failed: {}", id, e))
            })?;

            let status = response.status();
            if !status.is_success() {
                return Err(ScoutError::Http {
                    status: Some(status.as_u16()),
                    message: format!("geometry fetch for {} returned {}", id, status),
                });
            }

            let bytes = response.bytes().await.map_err(|e| {
                ScoutError::transport(format!("geometry body for {} failed: {}", id, e))
            })?;
            Ok(bytes.to_vec())
        })
    }
}
