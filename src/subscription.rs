//! Cancellable live-query subscriptions.
//!
//! Both flavors wrap the same machinery: a [`ListenerHandle`] owning the
//! backend registration and a bounded channel the backend pushes
//! [`StoreEvent`]s through. [`SnapshotSubscription`] decodes the full result
//! set of every notification; [`ChangesSubscription`] decodes only the
//! per-document changes, tagged with their
//! [`ChangeKind`](crate::reconcile::ChangeKind).
//!
//! Lifecycle: `Active → {Erred, Cancelled}`. A subscription delivers at most
//! one terminal event — either a single `Err` (then `Erred`) or nothing
//! further after [`cancel`](SnapshotSubscription::cancel). Cancellation
//! releases the backend listener synchronously and is idempotent; dropping a
//! subscription releases it too.
//!
//! The consumer drives delivery by calling `next()`; decoding runs there, in
//! arrival order, one notification at a time. Events sitting in the channel
//! when the subscription is cancelled are discarded, never delivered.

use crate::codec::{decode_many, decode_one, TypedRecord};
use crate::error::Result;
use crate::reconcile::ChangeEvent;
use crate::store::{ListenUpdate, ListenerHandle, StoreEvent};
use log::debug;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use tokio::sync::mpsc;

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Registered and delivering.
    Active,
    /// Terminated by a backend error; nothing more will be delivered.
    Erred,
    /// Cancelled by the consumer (or the backend ended the stream).
    Cancelled,
}

/// Listener handle + event channel + state machine shared by both
/// subscription flavors.
struct SubscriptionCore {
    events: mpsc::Receiver<StoreEvent>,
    handle: ListenerHandle,
    state: SubscriptionState,
}

impl SubscriptionCore {
    fn new(handle: ListenerHandle, events: mpsc::Receiver<StoreEvent>) -> Self {
        SubscriptionCore { events, handle, state: SubscriptionState::Active }
    }

    /// Next raw update. `None` after any terminal transition.
    async fn next_update(&mut self) -> Option<Result<ListenUpdate>> {
        if self.state != SubscriptionState::Active {
            return None;
        }
        match self.events.recv().await {
            Some(StoreEvent::Update(update)) => Some(Ok(update)),
            Some(StoreEvent::Error(e)) => {
                debug!("[SUBSCRIPTION] Terminal error: {}", e);
                self.state = SubscriptionState::Erred;
                self.handle.release();
                self.events.close();
                Some(Err(e))
            },
            None => {
                // Backend ended the stream without an error: implicit
                // completion.
                self.state = SubscriptionState::Cancelled;
                self.handle.release();
                None
            },
        }
    }

    fn cancel(&mut self) {
        if self.state == SubscriptionState::Active {
            self.state = SubscriptionState::Cancelled;
        }
        self.handle.release();
        self.events.close();
    }
}

/// Live query delivering the entire matching result set on every backend
/// notification.
///
/// Result order is whatever the compiled query defines; without an
/// `OrderBy` predicate it is store-defined and should be treated as
/// unspecified.
///
/// # Examples
///
/// ```rust,no_run
/// use doclink::{DocLinkClient, Predicate};
/// use doclink::store::memory::MemoryStore;
/// # use serde::Deserialize;
/// # #[derive(Deserialize)]
/// # struct Restaurant { name: String }
///
/// # async fn example() -> doclink::Result<()> {
/// let client = DocLinkClient::new(MemoryStore::new());
/// let mut subscription = client
///     .observe_snapshot::<Restaurant>("restaurant", &[Predicate::equals("type", "Indian")])
///     .await?;
///
/// while let Some(result) = subscription.next().await {
///     let restaurants = result?;
///     println!("{} matching restaurants", restaurants.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct SnapshotSubscription<T> {
    core: SubscriptionCore,
    _record: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> SnapshotSubscription<T> {
    pub(crate) fn new(handle: ListenerHandle, events: mpsc::Receiver<StoreEvent>) -> Self {
        SnapshotSubscription { core: SubscriptionCore::new(handle, events), _record: PhantomData }
    }

    /// Receive the next full result set.
    ///
    /// Documents that fail to decode are dropped from the list. Returns
    /// `Some(Err(_))` exactly once on a backend failure, then `None`
    /// forever; returns `None` immediately once cancelled.
    pub async fn next(&mut self) -> Option<Result<Vec<TypedRecord<T>>>> {
        let update = self.core.next_update().await?;
        Some(update.map(|u| decode_many(&u.documents)))
    }

    /// Stop deliveries and release the backend listener. Idempotent.
    pub fn cancel(&mut self) {
        self.core.cancel();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SubscriptionState {
        self.core.state
    }

    /// True once the subscription has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.core.state == SubscriptionState::Cancelled
    }
}

/// Live query delivering only the changed documents per notification, each
/// tagged added/modified/removed.
///
/// Changed documents that fail to decode are dropped from the batch. That
/// means a consumer can see a `Removed` event for a record it never saw
/// added — reconciliation treats that as a no-op (see
/// [`reconcile`](crate::reconcile)).
pub struct ChangesSubscription<T> {
    core: SubscriptionCore,
    _record: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> ChangesSubscription<T> {
    pub(crate) fn new(handle: ListenerHandle, events: mpsc::Receiver<StoreEvent>) -> Self {
        ChangesSubscription { core: SubscriptionCore::new(handle, events), _record: PhantomData }
    }

    /// Receive the next batch of change events.
    ///
    /// Terminal behavior matches [`SnapshotSubscription::next`].
    pub async fn next(&mut self) -> Option<Result<Vec<ChangeEvent<T>>>> {
        let update = self.core.next_update().await?;
        Some(update.map(|u| decode_changes(u)))
    }

    /// Stop deliveries and release the backend listener. Idempotent.
    pub fn cancel(&mut self) {
        self.core.cancel();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SubscriptionState {
        self.core.state
    }

    /// True once the subscription has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.core.state == SubscriptionState::Cancelled
    }
}

fn decode_changes<T: DeserializeOwned>(update: ListenUpdate) -> Vec<ChangeEvent<T>> {
    update
        .changes
        .into_iter()
        .filter_map(|change| match decode_one(&change.document) {
            Ok(record) => Some(ChangeEvent::new(change.kind, record)),
            Err(e) => {
                debug!("[SUBSCRIPTION] Dropping undecodable change: {}", e);
                None
            },
        })
        .collect()
}
