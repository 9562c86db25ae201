//! The backend seam: everything doclink needs from a document database.
//!
//! [`DocumentStore`] covers path-addressed one-shot operations and live-query
//! registration. [`AtomicWrites`] extends it with the multi-path atomic
//! update that realtime-database style backends offer.
//!
//! Live queries are push-based: [`DocumentStore::listen`] registers an
//! [`mpsc::Sender`] and returns a [`ListenerHandle`] owning the
//! deregistration. Every notification carries both the full matching result
//! set and the per-document changes since the previous notification, so both
//! snapshot and delta subscriptions can be built on the same listener.

pub mod memory;
pub mod remote;

use crate::codec::{FieldMap, RawDocument};
use crate::error::{DocLinkError, Result};
use crate::predicate::CollectionPath;
use crate::query::StructuredQuery;
use crate::reconcile::ChangeKind;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// Capacity of the bounded channel between a backend listener and its
/// subscription. When the consumer lags, the sender side awaits — the
/// backpressure propagates to whatever drives the notifications.
pub const LISTEN_CHANNEL_CAPACITY: usize = 64;

/// One changed document in a live-query notification.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    /// Whether the document was added to, modified within, or removed from
    /// the result set.
    pub kind: ChangeKind,
    /// The document (last known state for `Removed`).
    pub document: RawDocument,
}

/// One live-query notification: the full current result set plus the
/// itemized changes since the previous notification.
///
/// The first notification after registration lists every matching document
/// as `Added`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListenUpdate {
    /// All currently matching documents, in query order.
    pub documents: Vec<RawDocument>,
    /// Documents that changed since the previous notification.
    pub changes: Vec<DocumentChange>,
}

/// What a backend listener pushes through its channel.
///
/// `Error` is terminal: the backend sends nothing after it.
#[derive(Debug)]
pub enum StoreEvent {
    /// A data notification.
    Update(ListenUpdate),
    /// A query-level failure. No further events follow.
    Error(DocLinkError),
}

/// Owned deregistration of a live backend listener.
///
/// Releasing runs the deregistration exactly once; further calls are no-ops.
/// Dropping an unreleased handle releases it.
pub struct ListenerHandle {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerHandle {
    /// Wrap a deregistration action.
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        ListenerHandle { release: Some(Box::new(release)) }
    }

    /// Deregister the backend listener. Idempotent.
    pub fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }

    /// True once [`release`](Self::release) has run (or `Drop` has).
    pub fn is_released(&self) -> bool {
        self.release.is_none()
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle").field("released", &self.is_released()).finish()
    }
}

/// A path-addressed document database.
///
/// All operations are async and may suspend until the backend responds.
/// In-flight one-shot operations are not cancellable; only listeners
/// registered through [`listen`](Self::listen) are, via their handle.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Fetch one document. Fails with [`DocLinkError::NotFound`] when the
    /// document does not exist.
    async fn get(&self, path: &CollectionPath, id: &str) -> Result<RawDocument>;

    /// Execute a one-shot query and return the matching documents in query
    /// order.
    async fn run_query(&self, query: &StructuredQuery) -> Result<Vec<RawDocument>>;

    /// Create the document at `path`/`id`, or replace it entirely.
    async fn set(&self, path: &CollectionPath, id: &str, fields: FieldMap) -> Result<()>;

    /// Create a document with a store-generated identifier; returns the id.
    async fn add(&self, path: &CollectionPath, fields: FieldMap) -> Result<String>;

    /// Merge `fields` into an existing document. Fails with
    /// [`DocLinkError::NotFound`] when the document does not exist.
    async fn update(&self, path: &CollectionPath, id: &str, fields: FieldMap) -> Result<()>;

    /// Delete a document. Deleting a missing document is not an error.
    async fn delete(&self, path: &CollectionPath, id: &str) -> Result<()>;

    /// Register a live query. Notifications are pushed through `events` in
    /// backend order, starting with an initial snapshot where every matching
    /// document is reported as `Added`. The returned handle owns
    /// deregistration.
    async fn listen(
        &self,
        query: StructuredQuery,
        events: mpsc::Sender<StoreEvent>,
    ) -> Result<ListenerHandle>;
}

/// Atomic multi-path updates, for backends that support them.
#[async_trait]
pub trait AtomicWrites: DocumentStore {
    /// Write every path in `writes` in one atomic backend operation: either
    /// all paths update or none do. Keys are `collection/document` paths.
    async fn write_atomic(&self, writes: BTreeMap<String, FieldMap>) -> Result<()>;
}
