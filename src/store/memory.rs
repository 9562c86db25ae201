//! In-process [`DocumentStore`] with live-query dispatch.
//!
//! `MemoryStore` evaluates structured queries directly against JSON field
//! maps and pushes listener notifications on every mutation, diffing each
//! listener's new result set against its previous one to produce
//! added/modified/removed changes. It backs the test suite and doubles as a
//! fake for consumers that want to develop against doclink without a
//! backend.
//!
//! Notification dispatch is serialized by a single async lock, so every
//! listener observes mutations in the order they were applied.

use crate::codec::{FieldMap, RawDocument};
use crate::error::{DocLinkError, Result};
use crate::predicate::{CollectionPath, FieldValue};
use crate::query::{FieldFilter, FilterOp, OrderBy, ResultLimit, StructuredQuery};
use crate::reconcile::ChangeKind;
use crate::store::{
    AtomicWrites, DocumentChange, DocumentStore, ListenUpdate, ListenerHandle, StoreEvent,
};
use async_trait::async_trait;
use log::debug;
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

/// One registered live query.
struct ListenerEntry {
    id: u64,
    query: StructuredQuery,
    events: mpsc::Sender<StoreEvent>,
    /// Result set at the time of the previous notification, for diffing.
    last_result: Vec<RawDocument>,
}

#[derive(Default)]
struct Shared {
    /// collection path -> document id -> fields. BTreeMap keeps the
    /// store-defined document order deterministic (id order).
    collections: Mutex<HashMap<String, BTreeMap<String, FieldMap>>>,
    listeners: Mutex<Vec<ListenerEntry>>,
}

/// In-memory document store with live-query support.
///
/// Cloning is cheap and clones share the same data and listeners.
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
    /// Serializes mutation+notify sequences so listeners see them in order.
    dispatch: Arc<AsyncMutex<()>>,
    next_listener_id: Arc<AtomicU64>,
    next_doc_id: Arc<AtomicU64>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a terminal error to every registered listener and deregister
    /// them. Models a backend-side query failure mid-subscription.
    pub async fn inject_listener_error(&self, message: impl Into<String>) {
        let message = message.into();
        let _dispatch = self.dispatch.lock().await;
        let entries: Vec<ListenerEntry> =
            self.shared.listeners.lock().expect("listener lock poisoned").drain(..).collect();
        for entry in entries {
            let _ = entry
                .events
                .send(StoreEvent::Error(DocLinkError::Transport(message.clone())))
                .await;
        }
    }

    /// Number of currently registered listeners (test observability).
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.lock().expect("listener lock poisoned").len()
    }

    fn generate_doc_id(&self) -> String {
        let n = self.next_doc_id.fetch_add(1, AtomicOrdering::SeqCst);
        format!("doc-{:08}", n)
    }

    fn read_collection(&self, path: &str) -> BTreeMap<String, FieldMap> {
        self.shared
            .collections
            .lock()
            .expect("collection lock poisoned")
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    fn execute(&self, query: &StructuredQuery) -> Vec<RawDocument> {
        let docs = self.read_collection(query.collection.as_str());
        run_query_on(&docs, query)
    }

    /// Notify every listener whose query targets one of `paths`. Caller must
    /// hold the dispatch lock.
    async fn notify_collections(&self, paths: &[String]) {
        // Compute diffs under the listener lock, then send without it.
        let mut pending: Vec<(mpsc::Sender<StoreEvent>, ListenUpdate)> = Vec::new();
        {
            let mut listeners = self.shared.listeners.lock().expect("listener lock poisoned");
            for entry in listeners.iter_mut() {
                if !paths.iter().any(|p| p == entry.query.collection.as_str()) {
                    continue;
                }
                let new_result = self.execute(&entry.query);
                let changes = diff_results(&entry.last_result, &new_result);
                if changes.is_empty() {
                    continue;
                }
                entry.last_result = new_result.clone();
                pending.push((
                    entry.events.clone(),
                    ListenUpdate { documents: new_result, changes },
                ));
            }
        }

        for (tx, update) in pending {
            // A closed receiver means the subscription is gone; the handle
            // removes the entry when released, nothing to do here.
            let _ = tx.send(StoreEvent::Update(update)).await;
        }
    }

    async fn apply_and_notify<F>(&self, path: &CollectionPath, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, FieldMap>) -> Result<()>,
    {
        let _dispatch = self.dispatch.lock().await;
        {
            let mut collections =
                self.shared.collections.lock().expect("collection lock poisoned");
            mutate(collections.entry(path.as_str().to_string()).or_default())?;
        }
        self.notify_collections(&[path.as_str().to_string()]).await;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &CollectionPath, id: &str) -> Result<RawDocument> {
        self.read_collection(path.as_str())
            .get(id)
            .map(|fields| RawDocument::new(id, fields.clone()))
            .ok_or_else(|| DocLinkError::NotFound(format!("{}/{}", path, id)))
    }

    async fn run_query(&self, query: &StructuredQuery) -> Result<Vec<RawDocument>> {
        Ok(self.execute(query))
    }

    async fn set(&self, path: &CollectionPath, id: &str, fields: FieldMap) -> Result<()> {
        let id = id.to_string();
        self.apply_and_notify(path, move |docs| {
            docs.insert(id, fields);
            Ok(())
        })
        .await
    }

    async fn add(&self, path: &CollectionPath, fields: FieldMap) -> Result<String> {
        let id = self.generate_doc_id();
        let insert_id = id.clone();
        self.apply_and_notify(path, move |docs| {
            docs.insert(insert_id, fields);
            Ok(())
        })
        .await?;
        Ok(id)
    }

    async fn update(&self, path: &CollectionPath, id: &str, fields: FieldMap) -> Result<()> {
        let id = id.to_string();
        let missing = DocLinkError::NotFound(format!("{}/{}", path, id));
        self.apply_and_notify(path, move |docs| match docs.get_mut(&id) {
            Some(existing) => {
                for (key, value) in fields {
                    existing.insert(key, value);
                }
                Ok(())
            },
            None => Err(missing),
        })
        .await
    }

    async fn delete(&self, path: &CollectionPath, id: &str) -> Result<()> {
        let id = id.to_string();
        self.apply_and_notify(path, move |docs| {
            docs.remove(&id);
            Ok(())
        })
        .await
    }

    async fn listen(
        &self,
        query: StructuredQuery,
        events: mpsc::Sender<StoreEvent>,
    ) -> Result<ListenerHandle> {
        let _dispatch = self.dispatch.lock().await;

        let initial = self.execute(&query);
        let changes = initial
            .iter()
            .map(|doc| DocumentChange { kind: ChangeKind::Added, document: doc.clone() })
            .collect();
        let update = ListenUpdate { documents: initial.clone(), changes };
        events.send(StoreEvent::Update(update)).await.map_err(|_| {
            DocLinkError::Transport("listener channel closed during registration".to_string())
        })?;

        let id = self.next_listener_id.fetch_add(1, AtomicOrdering::SeqCst);
        debug!("[LISTEN] Registering listener {} on {}", id, query.collection);
        self.shared.listeners.lock().expect("listener lock poisoned").push(ListenerEntry {
            id,
            query,
            events,
            last_result: initial,
        });

        let shared = Arc::clone(&self.shared);
        Ok(ListenerHandle::new(move || {
            let mut listeners = shared.listeners.lock().expect("listener lock poisoned");
            listeners.retain(|entry| entry.id != id);
            debug!("[LISTEN] Released listener {}", id);
        }))
    }
}

#[async_trait]
impl AtomicWrites for MemoryStore {
    async fn write_atomic(&self, writes: BTreeMap<String, FieldMap>) -> Result<()> {
        // Validate every path before touching anything.
        let mut parsed: Vec<(String, String, FieldMap)> = Vec::with_capacity(writes.len());
        for (path, fields) in writes {
            let (collection, id) = split_document_path(&path)?;
            parsed.push((collection, id, fields));
        }

        let _dispatch = self.dispatch.lock().await;
        let mut touched: Vec<String> = Vec::new();
        {
            let mut collections =
                self.shared.collections.lock().expect("collection lock poisoned");
            for (collection, id, fields) in parsed {
                collections.entry(collection.clone()).or_default().insert(id, fields);
                if !touched.contains(&collection) {
                    touched.push(collection);
                }
            }
        }
        self.notify_collections(&touched).await;
        Ok(())
    }
}

/// Split `collection/…/docId` at the last slash.
fn split_document_path(path: &str) -> Result<(String, String)> {
    match path.rsplit_once('/') {
        Some((collection, id)) if !collection.is_empty() && !id.is_empty() => {
            Ok((collection.to_string(), id.to_string()))
        },
        _ => Err(DocLinkError::Write(format!(
            "atomic write path '{}' must be of the form collection/documentId",
            path
        ))),
    }
}

// ── query evaluation ────────────────────────────────────────────────────────

fn run_query_on(docs: &BTreeMap<String, FieldMap>, query: &StructuredQuery) -> Vec<RawDocument> {
    let mut result: Vec<RawDocument> = docs
        .iter()
        .filter(|(_, fields)| query.filters.iter().all(|f| matches_filter(fields, f)))
        .map(|(id, fields)| RawDocument::new(id.clone(), fields.clone()))
        .collect();

    if !query.order_by.is_empty() {
        result.sort_by(|a, b| compare_documents(a, b, &query.order_by));
    }

    match query.limit {
        Some(ResultLimit::First { count }) => result.truncate(count as usize),
        Some(ResultLimit::Last { count }) => {
            let keep = count as usize;
            if result.len() > keep {
                result.drain(..result.len() - keep);
            }
        },
        None => {},
    }

    result
}

fn matches_filter(fields: &FieldMap, filter: &FieldFilter) -> bool {
    // A document missing the filtered field never matches, for any operator.
    let Some(actual) = fields.get(&filter.field) else {
        return false;
    };
    let operand = filter.value.to_json();

    match filter.op {
        FilterOp::Equals => json_eq(actual, &operand),
        FilterOp::NotEquals => !json_eq(actual, &operand),
        FilterOp::In => operand_list(&filter.value).iter().any(|v| json_eq(actual, v)),
        FilterOp::NotIn => !operand_list(&filter.value).iter().any(|v| json_eq(actual, v)),
        FilterOp::ArrayContains => match actual {
            JsonValue::Array(items) => items.iter().any(|item| json_eq(item, &operand)),
            _ => false,
        },
        FilterOp::ArrayContainsAny => match actual {
            JsonValue::Array(items) => {
                let candidates = operand_list(&filter.value);
                items.iter().any(|item| candidates.iter().any(|c| json_eq(item, c)))
            },
            _ => false,
        },
        FilterOp::LessThan => cmp_json(actual, &operand) == Ordering::Less,
        FilterOp::GreaterThan => cmp_json(actual, &operand) == Ordering::Greater,
        FilterOp::LessThanOrEqual => cmp_json(actual, &operand) != Ordering::Greater,
        FilterOp::GreaterThanOrEqual => cmp_json(actual, &operand) != Ordering::Less,
    }
}

fn operand_list(value: &FieldValue) -> Vec<JsonValue> {
    match value {
        FieldValue::List(items) => items.iter().map(FieldValue::to_json).collect(),
        other => vec![other.to_json()],
    }
}

fn json_eq(a: &JsonValue, b: &JsonValue) -> bool {
    cmp_json(a, b) == Ordering::Equal
}

/// Total order over JSON values: null < bool < number < string < array <
/// object. Numbers compare numerically across int/float representations.
fn cmp_json(a: &JsonValue, b: &JsonValue) -> Ordering {
    match (a, b) {
        (JsonValue::Null, JsonValue::Null) => Ordering::Equal,
        (JsonValue::Bool(x), JsonValue::Bool(y)) => x.cmp(y),
        (JsonValue::Number(x), JsonValue::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        },
        (JsonValue::String(x), JsonValue::String(y)) => x.cmp(y),
        (JsonValue::Array(x), JsonValue::Array(y)) => {
            for (xi, yi) in x.iter().zip(y.iter()) {
                match cmp_json(xi, yi) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            x.len().cmp(&y.len())
        },
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(value: &JsonValue) -> u8 {
    match value {
        JsonValue::Null => 0,
        JsonValue::Bool(_) => 1,
        JsonValue::Number(_) => 2,
        JsonValue::String(_) => 3,
        JsonValue::Array(_) => 4,
        JsonValue::Object(_) => 5,
    }
}

fn compare_documents(a: &RawDocument, b: &RawDocument, order_by: &[OrderBy]) -> Ordering {
    for clause in order_by {
        let av = a.fields.get(&clause.field).unwrap_or(&JsonValue::Null);
        let bv = b.fields.get(&clause.field).unwrap_or(&JsonValue::Null);
        let ord = cmp_json(av, bv);
        let ord = if clause.descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    // Stable tie-break on the document id.
    a.id.cmp(&b.id)
}

/// Diff two result sets by document identity.
fn diff_results(old: &[RawDocument], new: &[RawDocument]) -> Vec<DocumentChange> {
    let old_by_id: HashMap<&str, &RawDocument> =
        old.iter().filter_map(|d| d.id.as_deref().map(|id| (id, d))).collect();
    let new_by_id: HashMap<&str, &RawDocument> =
        new.iter().filter_map(|d| d.id.as_deref().map(|id| (id, d))).collect();

    let mut changes = Vec::new();
    for doc in new {
        let Some(id) = doc.id.as_deref() else { continue };
        match old_by_id.get(id) {
            None => {
                changes.push(DocumentChange { kind: ChangeKind::Added, document: doc.clone() })
            },
            Some(prev) if prev.fields != doc.fields => {
                changes.push(DocumentChange { kind: ChangeKind::Modified, document: doc.clone() })
            },
            Some(_) => {},
        }
    }
    for doc in old {
        let Some(id) = doc.id.as_deref() else { continue };
        if !new_by_id.contains_key(id) {
            changes.push(DocumentChange { kind: ChangeKind::Removed, document: doc.clone() });
        }
    }
    changes
}
