//! HTTP + WebSocket [`DocumentStore`] for a remote document-database server.
//!
//! One-shot operations go over HTTP; live queries go over a WebSocket per
//! listener, owned by a background reader task that parses tagged JSON
//! server messages and forwards them through the registered channel.
//!
//! # Wire format
//!
//! The server's JSON protocol, relayed as-is (bit-exact compatibility with
//! any particular backend is out of scope):
//!
//! - `GET    /v1/collections/{path}/documents/{id}` → raw document
//! - `POST   /v1/query` (body: structured query) → `{"documents": [...]}`
//! - `PUT    /v1/collections/{path}/documents/{id}` (body: field map)
//! - `POST   /v1/collections/{path}/documents` → `{"id": "..."}`
//! - `PATCH  /v1/collections/{path}/documents/{id}` (merge field map)
//! - `DELETE /v1/collections/{path}/documents/{id}`
//! - `POST   /v1/atomic` (body: `{"writes": {path: field map}}`)
//! - `WS     /v1/listen`: client sends `listen`/`unlisten`, server pushes
//!   `update` (documents + changes) and terminal `error` messages.

use crate::codec::{FieldMap, RawDocument};
use crate::error::{DocLinkError, Result};
use crate::predicate::CollectionPath;
use crate::query::StructuredQuery;
use crate::reconcile::ChangeKind;
use crate::store::{
    AtomicWrites, DocumentChange, DocumentStore, ListenUpdate, ListenerHandle, StoreEvent,
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message},
};

type WebSocketStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ── wire messages ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Listen { listen_id: String, query: StructuredQuery },
    Unlisten { listen_id: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Update {
        #[allow(dead_code)]
        listen_id: String,
        documents: Vec<RawDocument>,
        #[serde(default)]
        changes: Vec<WireChange>,
    },
    Error {
        #[allow(dead_code)]
        listen_id: Option<String>,
        status: Option<u16>,
        message: String,
    },
}

#[derive(Debug, Deserialize)]
struct WireChange {
    kind: ChangeKind,
    document: RawDocument,
}

#[derive(Debug, Deserialize)]
struct QueryResponseBody {
    documents: Vec<RawDocument>,
}

#[derive(Debug, Deserialize)]
struct AddResponseBody {
    id: String,
}

#[derive(Debug, Serialize)]
struct AtomicRequestBody {
    writes: BTreeMap<String, FieldMap>,
}

// ── store ───────────────────────────────────────────────────────────────────

/// Client for a remote document-database server.
///
/// Use [`RemoteStore::builder`] to construct instances.
///
/// # Examples
///
/// ```rust,no_run
/// use doclink::store::remote::RemoteStore;
///
/// # fn example() -> doclink::Result<()> {
/// let store = RemoteStore::builder()
///     .base_url("http://localhost:3000")
///     .request_timeout(std::time::Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RemoteStore {
    base_url: String,
    http: reqwest::Client,
    connect_timeout: Duration,
}

impl RemoteStore {
    /// Create a new builder for configuring the store.
    pub fn builder() -> RemoteStoreBuilder {
        RemoteStoreBuilder::new()
    }

    fn document_url(&self, path: &CollectionPath, id: &str) -> String {
        format!("{}/v1/collections/{}/documents/{}", self.base_url, path, id)
    }

    fn collection_url(&self, path: &CollectionPath) -> String {
        format!("{}/v1/collections/{}/documents", self.base_url, path)
    }

    /// Map a non-success HTTP response to an error, reading the body for the
    /// server's message.
    async fn error_from_response(response: reqwest::Response) -> DocLinkError {
        let status = response.status();
        let message =
            response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        warn!("[HTTP] Server error: status={} message=\"{}\"", status, message);
        if status == reqwest::StatusCode::NOT_FOUND {
            DocLinkError::NotFound(message)
        } else {
            DocLinkError::Server { status: status.as_u16(), message }
        }
    }

    async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::error_from_response(response).await)
        }
    }
}

#[async_trait]
impl DocumentStore for RemoteStore {
    async fn get(&self, path: &CollectionPath, id: &str) -> Result<RawDocument> {
        let url = self.document_url(path, id);
        debug!("[HTTP] GET {}", url);
        let response = Self::expect_success(self.http.get(&url).send().await?).await?;
        Ok(response.json::<RawDocument>().await?)
    }

    async fn run_query(&self, query: &StructuredQuery) -> Result<Vec<RawDocument>> {
        let url = format!("{}/v1/query", self.base_url);
        debug!("[HTTP] POST {} collection={}", url, query.collection);
        let response =
            Self::expect_success(self.http.post(&url).json(query).send().await?).await?;
        Ok(response.json::<QueryResponseBody>().await?.documents)
    }

    async fn set(&self, path: &CollectionPath, id: &str, fields: FieldMap) -> Result<()> {
        let url = self.document_url(path, id);
        debug!("[HTTP] PUT {}", url);
        Self::expect_success(self.http.put(&url).json(&fields).send().await?).await?;
        Ok(())
    }

    async fn add(&self, path: &CollectionPath, fields: FieldMap) -> Result<String> {
        let url = self.collection_url(path);
        debug!("[HTTP] POST {}", url);
        let response =
            Self::expect_success(self.http.post(&url).json(&fields).send().await?).await?;
        Ok(response.json::<AddResponseBody>().await?.id)
    }

    async fn update(&self, path: &CollectionPath, id: &str, fields: FieldMap) -> Result<()> {
        let url = self.document_url(path, id);
        debug!("[HTTP] PATCH {}", url);
        Self::expect_success(self.http.patch(&url).json(&fields).send().await?).await?;
        Ok(())
    }

    async fn delete(&self, path: &CollectionPath, id: &str) -> Result<()> {
        let url = self.document_url(path, id);
        debug!("[HTTP] DELETE {}", url);
        Self::expect_success(self.http.delete(&url).send().await?).await?;
        Ok(())
    }

    async fn listen(
        &self,
        query: StructuredQuery,
        events: mpsc::Sender<StoreEvent>,
    ) -> Result<ListenerHandle> {
        let ws_url = resolve_ws_url(&self.base_url)?;
        let listen_id = generate_listen_id();
        debug!("[LISTEN] Connecting {} for {}", ws_url, listen_id);

        let request = ws_url.as_str().into_client_request().map_err(|e| {
            DocLinkError::WebSocket(format!("Failed to build WebSocket request: {}", e))
        })?;

        let connect_result =
            tokio::time::timeout(self.connect_timeout, connect_async(request)).await;
        let mut ws_stream = match connect_result {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                return Err(DocLinkError::WebSocket(format!("Connection failed: {}", e)))
            },
            Err(_) => {
                return Err(DocLinkError::Timeout(format!(
                    "WebSocket connection timeout ({:?})",
                    self.connect_timeout
                )))
            },
        };

        send_message(
            &mut ws_stream,
            &ClientMessage::Listen { listen_id: listen_id.clone(), query },
        )
        .await?;

        let (close_tx, close_rx) = oneshot::channel();
        tokio::spawn(ws_reader_loop(ws_stream, events, close_rx, listen_id));

        Ok(ListenerHandle::new(move || {
            // Reader task handles Unlisten + Close on its side.
            let _ = close_tx.send(());
        }))
    }
}

#[async_trait]
impl AtomicWrites for RemoteStore {
    async fn write_atomic(&self, writes: BTreeMap<String, FieldMap>) -> Result<()> {
        let url = format!("{}/v1/atomic", self.base_url);
        debug!("[ATOMIC] POST {} paths={}", url, writes.len());
        let body = AtomicRequestBody { writes };
        let response = self.http.post(&url).json(&body).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status().as_u16();
            let message =
                response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            warn!("[ATOMIC] Rejected: status={} message=\"{}\"", status, message);
            Err(atomic_rejection(status, &message))
        }
    }
}

/// Any non-success response to an atomic commit is a write failure,
/// whatever the status code — the batch either applied or it did not.
fn atomic_rejection(status: u16, message: &str) -> DocLinkError {
    DocLinkError::Write(format!("atomic write rejected ({}): {}", status, message))
}

// ── websocket plumbing ──────────────────────────────────────────────────────

fn generate_listen_id() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("listen_{}", nanos)
}

/// Derive the WebSocket endpoint from the configured base URL.
fn resolve_ws_url(base_url: &str) -> Result<Url> {
    let base = Url::parse(base_url.trim()).map_err(|e| {
        DocLinkError::Configuration(format!("Invalid base_url '{}': {}", base_url, e))
    })?;

    if base.host_str().is_none() {
        return Err(DocLinkError::Configuration("base_url must include a host".to_string()));
    }

    let mut ws_url = base.clone();
    let ws_scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(DocLinkError::Configuration(format!(
                "Unsupported base_url scheme '{}'; expected http(s) or ws(s)",
                other
            )));
        },
    };

    ws_url.set_scheme(ws_scheme).map_err(|_| {
        DocLinkError::Configuration("Failed to set WebSocket URL scheme".to_string())
    })?;
    ws_url.set_path("/v1/listen");
    ws_url.set_query(None);
    ws_url.set_fragment(None);
    Ok(ws_url)
}

async fn send_message(ws_stream: &mut WebSocketStream, message: &ClientMessage) -> Result<()> {
    let payload = serde_json::to_string(message).map_err(|e| {
        DocLinkError::WebSocket(format!("Failed to serialize client message: {}", e))
    })?;
    ws_stream
        .send(Message::Text(payload.into()))
        .await
        .map_err(|e| DocLinkError::WebSocket(format!("Failed to send message: {}", e)))
}

fn parse_server_message(text: &str) -> Result<StoreEvent> {
    match serde_json::from_str::<ServerMessage>(text) {
        Ok(ServerMessage::Update { documents, changes, .. }) => {
            let changes = changes
                .into_iter()
                .map(|c| DocumentChange { kind: c.kind, document: c.document })
                .collect();
            Ok(StoreEvent::Update(ListenUpdate { documents, changes }))
        },
        Ok(ServerMessage::Error { status, message, .. }) => match status {
            Some(status) => Ok(StoreEvent::Error(DocLinkError::Server { status, message })),
            None => Ok(StoreEvent::Error(DocLinkError::Transport(message))),
        },
        Err(e) => Err(DocLinkError::WebSocket(format!(
            "Failed to parse server message: {}",
            e
        ))),
    }
}

/// Best-effort Unlisten + Close over a WebSocket stream.
async fn send_unlisten_and_close(ws_stream: &mut WebSocketStream, listen_id: &str) {
    let message = ClientMessage::Unlisten { listen_id: listen_id.to_string() };
    if let Ok(payload) = serde_json::to_string(&message) {
        let _ = ws_stream.send(Message::Text(payload.into())).await;
    }
    let _ = ws_stream.close(None).await;
}

/// Background task that owns the WebSocket stream and forwards parsed events
/// through the listener channel.
///
/// Exits on: close signal from the handle, a terminal server error, a
/// protocol failure, the server closing the stream, or the receiving side of
/// the channel going away.
async fn ws_reader_loop(
    mut ws_stream: WebSocketStream,
    events: mpsc::Sender<StoreEvent>,
    mut close_rx: oneshot::Receiver<()>,
    listen_id: String,
) {
    loop {
        let frame = tokio::select! {
            biased;

            _ = &mut close_rx => {
                send_unlisten_and_close(&mut ws_stream, &listen_id).await;
                debug!("[LISTEN] {} closed by handle", listen_id);
                return;
            }

            msg = ws_stream.next() => msg,
        };

        match frame {
            Some(Ok(Message::Text(text))) => match parse_server_message(&text) {
                Ok(StoreEvent::Update(update)) => {
                    if events.send(StoreEvent::Update(update)).await.is_err() {
                        return;
                    }
                },
                Ok(StoreEvent::Error(e)) => {
                    // Terminal by protocol: forward once and stop reading.
                    let _ = events.send(StoreEvent::Error(e)).await;
                    let _ = ws_stream.close(None).await;
                    return;
                },
                Err(e) => {
                    let _ = events.send(StoreEvent::Error(e)).await;
                    let _ = ws_stream.close(None).await;
                    return;
                },
            },
            Some(Ok(Message::Ping(payload))) => {
                let _ = ws_stream.send(Message::Pong(payload)).await;
            },
            Some(Ok(Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => {},
            Some(Ok(Message::Close(_))) => {
                debug!("[LISTEN] {} server closed connection", listen_id);
                return;
            },
            Some(Err(e)) => {
                let _ = events
                    .send(StoreEvent::Error(DocLinkError::WebSocket(e.to_string())))
                    .await;
                return;
            },
            None => {
                debug!("[LISTEN] {} stream ended", listen_id);
                return;
            },
        }
    }
}

// ── builder ─────────────────────────────────────────────────────────────────

/// Builder for [`RemoteStore`] instances.
pub struct RemoteStoreBuilder {
    base_url: Option<String>,
    request_timeout: Duration,
    connect_timeout: Duration,
}

impl RemoteStoreBuilder {
    fn new() -> Self {
        RemoteStoreBuilder {
            base_url: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the base URL of the server (required).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        let mut url = url.into();
        while url.ends_with('/') {
            url.pop();
        }
        self.base_url = Some(url);
        self
    }

    /// Timeout for each HTTP request.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Timeout for establishing HTTP and WebSocket connections.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Build the store.
    pub fn build(self) -> Result<RemoteStore> {
        let base_url = self
            .base_url
            .ok_or_else(|| DocLinkError::Configuration("base_url is required".into()))?;

        // Keep-alive pooling: live apps issue many small document operations.
        let http = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| DocLinkError::Configuration(e.to_string()))?;

        Ok(RemoteStore { base_url, http, connect_timeout: self.connect_timeout })
    }
}
