//! The typed client facade.
//!
//! [`DocLinkClient`] wraps any [`DocumentStore`] and exposes the typed
//! operations applications actually call: one-shot reads and writes,
//! predicate queries, live subscriptions and atomic batches. It holds the
//! store behind an `Arc`, so clones are cheap and share the backend
//! connection.
//!
//! All caller input is validated before the backend is touched; a
//! [`DocLinkError::Validation`] never leaves the process.

use crate::codec::{decode_many, decode_one, encode, FieldMap, TypedRecord};
use crate::error::{DocLinkError, Result};
use crate::predicate::{CollectionPath, FieldValue, Predicate};
use crate::query::compile;
use crate::store::remote::RemoteStore;
use crate::store::{AtomicWrites, DocumentStore, LISTEN_CHANNEL_CAPACITY};
use crate::subscription::{ChangesSubscription, SnapshotSubscription};
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Typed client over a document store.
///
/// # Examples
///
/// ```rust,no_run
/// use doclink::{DocLinkClient, Predicate};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Restaurant {
///     name: String,
///     r#type: String,
/// }
///
/// # async fn example() -> doclink::Result<()> {
/// let client = DocLinkClient::remote("http://localhost:8080")?;
///
/// let indian = client
///     .get_many::<Restaurant>(
///         "restaurant",
///         &[
///             Predicate::equals("type", "Indian"),
///             Predicate::order_by("name", false),
///             Predicate::limit(5),
///         ],
///     )
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DocLinkClient<S: DocumentStore> {
    store: Arc<S>,
}

impl<S: DocumentStore> Clone for DocLinkClient<S> {
    fn clone(&self) -> Self {
        DocLinkClient { store: Arc::clone(&self.store) }
    }
}

impl DocLinkClient<RemoteStore> {
    /// Client over the HTTP/WebSocket backend at `base_url`, with default
    /// timeouts. Use [`RemoteStore::builder`] directly for more control.
    pub fn remote(base_url: impl Into<String>) -> Result<Self> {
        let store = RemoteStore::builder().base_url(base_url).build()?;
        Ok(DocLinkClient::new(store))
    }
}

impl<S: DocumentStore> DocLinkClient<S> {
    /// Client over an already-constructed store.
    pub fn new(store: S) -> Self {
        DocLinkClient { store: Arc::new(store) }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Fetch and decode one document.
    pub async fn get_one<T: DeserializeOwned>(
        &self,
        path: impl Into<CollectionPath>,
        id: &str,
    ) -> Result<TypedRecord<T>> {
        let path = validated_path(path)?;
        let id = validated_id(id)?;
        let doc = self.store.get(&path, id).await?;
        decode_one(&doc)
    }

    /// Run a predicate query and decode the results.
    ///
    /// Documents that fail to decode are dropped from the list; a
    /// query-level failure propagates as an error.
    pub async fn get_many<T: DeserializeOwned>(
        &self,
        path: impl Into<CollectionPath>,
        predicates: &[Predicate],
    ) -> Result<Vec<TypedRecord<T>>> {
        let query = self.compile_validated(path, predicates)?;
        let docs = self.store.run_query(&query).await?;
        debug!("[QUERY] {} documents from {}", docs.len(), query.collection);
        Ok(decode_many(&docs))
    }

    /// Encode `model` and write it at `path`/`id`, creating the document or
    /// replacing it entirely.
    pub async fn create_or_replace<T: Serialize>(
        &self,
        model: &T,
        path: impl Into<CollectionPath>,
        id: &str,
    ) -> Result<()> {
        let path = validated_path(path)?;
        let id = validated_id(id)?;
        let fields = encode(model)?;
        self.store.set(&path, id, fields).await
    }

    /// Encode `model` and store it under a backend-generated identifier;
    /// returns that identifier.
    pub async fn add<T: Serialize>(
        &self,
        model: &T,
        path: impl Into<CollectionPath>,
    ) -> Result<String> {
        let path = validated_path(path)?;
        let fields = encode(model)?;
        let id = self.store.add(&path, fields).await?;
        debug!("[WRITE] Added document {} to {}", id, path);
        Ok(id)
    }

    /// Merge individual fields into an existing document.
    ///
    /// Fails with [`DocLinkError::NotFound`] when the document does not
    /// exist; other fields of the document are left untouched.
    pub async fn update(
        &self,
        fields: Vec<(String, FieldValue)>,
        path: impl Into<CollectionPath>,
        id: &str,
    ) -> Result<()> {
        let path = validated_path(path)?;
        let id = validated_id(id)?;
        let mut map = FieldMap::new();
        for (key, value) in fields {
            if key.is_empty() {
                return Err(DocLinkError::Validation("empty field name in update".to_string()));
            }
            map.insert(key, value.into_json());
        }
        if map.is_empty() {
            return Err(DocLinkError::Validation("update with no fields".to_string()));
        }
        self.store.update(&path, id, map).await
    }

    /// Delete a document. Deleting a missing document is not an error.
    pub async fn delete(&self, path: impl Into<CollectionPath>, id: &str) -> Result<()> {
        let path = validated_path(path)?;
        let id = validated_id(id)?;
        self.store.delete(&path, id).await
    }

    /// Subscribe to the full result set of a predicate query.
    ///
    /// The first delivery is the current result set (possibly empty); each
    /// backend change delivers the full updated set.
    pub async fn observe_snapshot<T: DeserializeOwned>(
        &self,
        path: impl Into<CollectionPath>,
        predicates: &[Predicate],
    ) -> Result<SnapshotSubscription<T>> {
        let query = self.compile_validated(path, predicates)?;
        debug!("[LISTEN] Snapshot subscription on {}", query.collection);
        let (tx, rx) = mpsc::channel(LISTEN_CHANNEL_CAPACITY);
        let handle = self.store.listen(query, tx).await?;
        Ok(SnapshotSubscription::new(handle, rx))
    }

    /// Subscribe to the per-document changes of a predicate query.
    ///
    /// The first delivery reports every currently matching document as
    /// added; later deliveries carry only what changed.
    pub async fn observe_changes<T: DeserializeOwned>(
        &self,
        path: impl Into<CollectionPath>,
        predicates: &[Predicate],
    ) -> Result<ChangesSubscription<T>> {
        let query = self.compile_validated(path, predicates)?;
        debug!("[LISTEN] Changes subscription on {}", query.collection);
        let (tx, rx) = mpsc::channel(LISTEN_CHANNEL_CAPACITY);
        let handle = self.store.listen(query, tx).await?;
        Ok(ChangesSubscription::new(handle, rx))
    }

    fn compile_validated(
        &self,
        path: impl Into<CollectionPath>,
        predicates: &[Predicate],
    ) -> Result<crate::query::StructuredQuery> {
        let path = validated_path(path)?;
        for predicate in predicates {
            if let Predicate::Limit { count: 0 } | Predicate::LimitToLast { count: 0 } = predicate
            {
                return Err(DocLinkError::Validation("limit of zero".to_string()));
            }
        }
        Ok(compile(path, predicates))
    }
}

impl<S: AtomicWrites> DocLinkClient<S> {
    /// Commit a [`WriteBatch`] atomically: either every path in the batch is
    /// updated or none are.
    pub async fn write_atomic(&self, batch: WriteBatch) -> Result<()> {
        if batch.writes.is_empty() {
            return Err(DocLinkError::Validation("empty atomic batch".to_string()));
        }
        debug!("[ATOMIC] Committing {} paths", batch.writes.len());
        self.store.write_atomic(batch.writes).await
    }
}

/// Builder for an atomic multi-path write.
///
/// Values are encoded at insertion time, so a model that fails to encode is
/// rejected before anything reaches the backend. Each key is a full
/// `collection/document` path; inserting the same path twice keeps the last
/// value.
///
/// # Examples
///
/// ```rust,no_run
/// use doclink::WriteBatch;
/// # use serde::Serialize;
/// # #[derive(Serialize)]
/// # struct Restaurant { name: String }
/// # #[derive(Serialize)]
/// # struct Review { stars: u8 }
///
/// # fn example() -> doclink::Result<WriteBatch> {
/// let mut batch = WriteBatch::new();
/// batch.set("restaurant/r1", &Restaurant { name: "Taj".to_string() })?;
/// batch.set("review/v9", &Review { stars: 5 })?;
/// # Ok(batch)
/// # }
/// ```
#[derive(Debug, Default)]
pub struct WriteBatch {
    writes: BTreeMap<String, FieldMap>,
}

impl WriteBatch {
    /// An empty batch.
    pub fn new() -> Self {
        WriteBatch::default()
    }

    /// Encode `model` and stage it at `path` (`collection/document`).
    pub fn set<T: Serialize>(&mut self, path: impl Into<String>, model: &T) -> Result<&mut Self> {
        let path = path.into();
        match path.rsplit_once('/') {
            Some((collection, id)) if !collection.is_empty() && !id.is_empty() => {},
            _ => {
                return Err(DocLinkError::Validation(format!(
                    "atomic write path must be collection/document, got {:?}",
                    path
                )))
            },
        }
        let fields = encode(model)?;
        self.writes.insert(path, fields);
        Ok(self)
    }

    /// Number of staged paths.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// True when nothing has been staged.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

fn validated_path(path: impl Into<CollectionPath>) -> Result<CollectionPath> {
    let path = path.into();
    if path.is_empty() {
        return Err(DocLinkError::Validation("empty collection path".to_string()));
    }
    Ok(path)
}

fn validated_id(id: &str) -> Result<&str> {
    if id.is_empty() {
        return Err(DocLinkError::Validation("empty document id".to_string()));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Restaurant {
        name: String,
        r#type: String,
    }

    fn restaurant(name: &str, rtype: &str) -> Restaurant {
        Restaurant { name: name.to_string(), r#type: rtype.to_string() }
    }

    fn client() -> DocLinkClient<MemoryStore> {
        DocLinkClient::new(MemoryStore::new())
    }

    #[test]
    fn test_remote_constructor_builds() {
        assert!(DocLinkClient::remote("http://localhost:3000").is_ok());
    }

    #[tokio::test]
    async fn test_create_then_get_one() {
        let client = client();
        client
            .create_or_replace(&restaurant("Taj", "Indian"), "restaurant", "r1")
            .await
            .unwrap();

        let record: TypedRecord<Restaurant> = client.get_one("restaurant", "r1").await.unwrap();
        assert_eq!(record.id.as_deref(), Some("r1"));
        assert_eq!(record.data, restaurant("Taj", "Indian"));
    }

    #[tokio::test]
    async fn test_get_one_missing_is_not_found() {
        let err = client().get_one::<Restaurant>("restaurant", "nope").await.unwrap_err();
        assert!(matches!(err, DocLinkError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_add_assigns_id() {
        let client = client();
        let id = client.add(&restaurant("Agra", "Indian"), "restaurant").await.unwrap();
        assert!(!id.is_empty());

        let record: TypedRecord<Restaurant> = client.get_one("restaurant", &id).await.unwrap();
        assert_eq!(record.data.name, "Agra");
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let client = client();
        client
            .create_or_replace(&restaurant("Taj", "Indian"), "restaurant", "r1")
            .await
            .unwrap();
        client
            .update(vec![("name".to_string(), "Taj Palace".into())], "restaurant", "r1")
            .await
            .unwrap();

        let record: TypedRecord<Restaurant> = client.get_one("restaurant", "r1").await.unwrap();
        assert_eq!(record.data.name, "Taj Palace");
        assert_eq!(record.data.r#type, "Indian");
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let err = client()
            .update(vec![("name".to_string(), "x".into())], "restaurant", "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, DocLinkError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        client().delete("restaurant", "nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_path_and_id_rejected() {
        let client = client();
        let err = client.get_one::<Restaurant>("", "r1").await.unwrap_err();
        assert!(matches!(err, DocLinkError::Validation(_)));

        let err = client.get_one::<Restaurant>("restaurant", "").await.unwrap_err();
        assert!(matches!(err, DocLinkError::Validation(_)));
    }

    #[tokio::test]
    async fn test_zero_limit_rejected() {
        let err = client()
            .get_many::<Restaurant>("restaurant", &[Predicate::limit(0)])
            .await
            .unwrap_err();
        assert!(matches!(err, DocLinkError::Validation(_)));
    }

    #[tokio::test]
    async fn test_get_many_filters_and_limits() {
        let client = client();
        for i in 0..4 {
            client
                .create_or_replace(
                    &restaurant(&format!("indian-{}", i), "Indian"),
                    "restaurant",
                    &format!("r{}", i),
                )
                .await
                .unwrap();
        }
        client
            .create_or_replace(&restaurant("Sichuan House", "Asian"), "restaurant", "r9")
            .await
            .unwrap();

        let records: Vec<TypedRecord<Restaurant>> = client
            .get_many(
                "restaurant",
                &[
                    Predicate::equals("type", "Indian"),
                    Predicate::order_by("name", false),
                    Predicate::limit(3),
                ],
            )
            .await
            .unwrap();

        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.data.r#type == "Indian"));
        let names: Vec<&str> = records.iter().map(|r| r.data.name.as_str()).collect();
        assert_eq!(names, vec!["indian-0", "indian-1", "indian-2"]);
    }

    #[tokio::test]
    async fn test_write_batch_validates_paths() {
        let mut batch = WriteBatch::new();
        assert!(batch.set("restaurant/r1", &restaurant("Taj", "Indian")).is_ok());
        assert!(batch.set("no-slash", &restaurant("Taj", "Indian")).is_err());
        assert!(batch.set("/r1", &restaurant("Taj", "Indian")).is_err());
        assert!(batch.set("restaurant/", &restaurant("Taj", "Indian")).is_err());
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_write_batch_rejects_non_object_models() {
        let mut batch = WriteBatch::new();
        assert!(matches!(batch.set("c/d", &7i32).unwrap_err(), DocLinkError::Decode(_)));
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_empty_atomic_batch_rejected() {
        let err = client().write_atomic(WriteBatch::new()).await.unwrap_err();
        assert!(matches!(err, DocLinkError::Validation(_)));
    }

    #[tokio::test]
    async fn test_write_atomic_visible_to_reads() {
        let client = client();
        let mut batch = WriteBatch::new();
        batch.set("restaurant/r1", &restaurant("Taj", "Indian")).unwrap();
        batch.set("review/v1", &restaurant("Taj", "Indian")).unwrap();
        client.write_atomic(batch).await.unwrap();

        let record: TypedRecord<Restaurant> = client.get_one("restaurant", "r1").await.unwrap();
        assert_eq!(record.data.name, "Taj");
        let record: TypedRecord<Restaurant> = client.get_one("review", "v1").await.unwrap();
        assert_eq!(record.data.name, "Taj");
    }
}
