//! # doclink
//!
//! Typed, async client layer for document databases with live queries.
//!
//! The crate wraps a path-addressed document backend behind the
//! [`DocumentStore`](store::DocumentStore) trait and gives applications a
//! typed surface on top of it:
//!
//! - **Predicate queries** — describe a query as an ordered list of
//!   [`Predicate`] values (filters, ordering, limits); the list is compiled
//!   deterministically into a [`StructuredQuery`](query::StructuredQuery).
//! - **Tolerant decoding** — list results decode best-effort: one malformed
//!   document is dropped instead of failing the whole list.
//! - **Live subscriptions** — [`observe_snapshot`](DocLinkClient::observe_snapshot)
//!   redelivers the full result set on every backend change;
//!   [`observe_changes`](DocLinkClient::observe_changes) delivers only the
//!   per-document deltas, which [`reconcile`] folds into a local list.
//! - **Atomic batches** — [`WriteBatch`] stages encoded writes across
//!   multiple paths and commits them all-or-nothing.
//!
//! Two stores ship with the crate: [`store::remote::RemoteStore`] speaks
//! HTTP for one-shot operations and WebSocket for live queries, and
//! [`store::memory::MemoryStore`] is a complete in-process implementation
//! useful as a test double.
//!
//! ## Example
//!
//! ```rust,no_run
//! use doclink::{DocLinkClient, Predicate};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Restaurant {
//!     name: String,
//!     r#type: String,
//! }
//!
//! # async fn example() -> doclink::Result<()> {
//! let client = DocLinkClient::remote("http://localhost:8080")?;
//!
//! let mut subscription = client
//!     .observe_snapshot::<Restaurant>(
//!         "restaurant",
//!         &[
//!             Predicate::equals("type", "Indian"),
//!             Predicate::order_by("name", false),
//!             Predicate::limit(5),
//!         ],
//!     )
//!     .await?;
//!
//! while let Some(result) = subscription.next().await {
//!     for record in result? {
//!         println!("{}", record.data.name);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod predicate;
pub mod query;
pub mod reconcile;
pub mod store;
pub mod subscription;

pub use client::{DocLinkClient, WriteBatch};
pub use codec::{FieldMap, RawDocument, TypedRecord};
pub use error::{DocLinkError, Result};
pub use predicate::{CollectionPath, FieldValue, Predicate};
pub use query::StructuredQuery;
pub use reconcile::{apply_change, apply_changes, ChangeEvent, ChangeKind};
pub use subscription::{ChangesSubscription, SnapshotSubscription, SubscriptionState};
