//! End-to-end client behavior over the in-process store: predicate queries,
//! snapshot and delta subscriptions, cancellation and atomic batches.

use doclink::store::memory::MemoryStore;
use doclink::{
    apply_changes, ChangeKind, DocLinkClient, DocLinkError, Predicate, SubscriptionState,
    TypedRecord, WriteBatch,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Restaurant {
    name: String,
    r#type: String,
}

fn restaurant(name: &str, rtype: &str) -> Restaurant {
    Restaurant { name: name.to_string(), r#type: rtype.to_string() }
}

/// 12 Indian restaurants (name-sortable) plus 3 others.
async fn seed_restaurants(client: &DocLinkClient<MemoryStore>) {
    for i in 0..12 {
        client
            .create_or_replace(
                &restaurant(&format!("indian-{:02}", i), "Indian"),
                "restaurant",
                &format!("in{:02}", i),
            )
            .await
            .unwrap();
    }
    for (id, name, rtype) in
        [("x1", "Sichuan House", "Asian"), ("x2", "Trattoria", "Italian"), ("x3", "Taqueria", "Mexican")]
    {
        client.create_or_replace(&restaurant(name, rtype), "restaurant", id).await.unwrap();
    }
}

fn indian_top_five() -> Vec<Predicate> {
    vec![
        Predicate::equals("type", "Indian"),
        Predicate::order_by("name", false),
        Predicate::limit(5),
    ]
}

#[tokio::test]
async fn test_filter_order_limit_query() {
    let client = DocLinkClient::new(MemoryStore::new());
    seed_restaurants(&client).await;

    let records: Vec<TypedRecord<Restaurant>> =
        client.get_many("restaurant", &indian_top_five()).await.unwrap();

    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|r| r.data.r#type == "Indian"));
    let names: Vec<&str> = records.iter().map(|r| r.data.name.as_str()).collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
    assert_eq!(names[0], "indian-00");
}

#[tokio::test]
async fn test_snapshot_initial_delivery_matches_query() {
    let client = DocLinkClient::new(MemoryStore::new());
    seed_restaurants(&client).await;

    let mut sub = client
        .observe_snapshot::<Restaurant>("restaurant", &indian_top_five())
        .await
        .unwrap();

    let records = timeout(RECV_TIMEOUT, sub.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|r| r.data.r#type == "Indian"));
}

#[tokio::test]
async fn test_snapshot_on_empty_collection_is_empty_list() {
    let client = DocLinkClient::new(MemoryStore::new());
    let mut sub = client
        .observe_snapshot::<Restaurant>("restaurant", &[])
        .await
        .unwrap();

    let records = timeout(RECV_TIMEOUT, sub.next()).await.unwrap().unwrap().unwrap();
    assert!(records.is_empty());
    assert_eq!(sub.state(), SubscriptionState::Active);
}

#[tokio::test]
async fn test_snapshot_redelivers_on_change() {
    let client = DocLinkClient::new(MemoryStore::new());
    let mut sub = client
        .observe_snapshot::<Restaurant>(
            "restaurant",
            &[Predicate::equals("type", "Indian"), Predicate::order_by("name", false)],
        )
        .await
        .unwrap();

    let initial = timeout(RECV_TIMEOUT, sub.next()).await.unwrap().unwrap().unwrap();
    assert!(initial.is_empty());

    client.create_or_replace(&restaurant("Taj", "Indian"), "restaurant", "r1").await.unwrap();
    let after_add = timeout(RECV_TIMEOUT, sub.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(after_add.len(), 1);
    assert_eq!(after_add[0].data.name, "Taj");

    // A non-matching document does not notify this query.
    client.create_or_replace(&restaurant("Trattoria", "Italian"), "restaurant", "r2").await.unwrap();
    client.create_or_replace(&restaurant("Agra", "Indian"), "restaurant", "r3").await.unwrap();
    let after_second = timeout(RECV_TIMEOUT, sub.next()).await.unwrap().unwrap().unwrap();
    let names: Vec<&str> = after_second.iter().map(|r| r.data.name.as_str()).collect();
    assert_eq!(names, vec!["Agra", "Taj"]);
}

#[tokio::test]
async fn test_changes_reconcile_to_current_state() {
    let client = DocLinkClient::new(MemoryStore::new());
    let mut sub = client
        .observe_changes::<Restaurant>("restaurant", &[Predicate::equals("type", "Indian")])
        .await
        .unwrap();

    // Initial (empty) delivery.
    let initial = timeout(RECV_TIMEOUT, sub.next()).await.unwrap().unwrap().unwrap();
    assert!(initial.is_empty());

    let mut local: Vec<TypedRecord<Restaurant>> = Vec::new();

    client.create_or_replace(&restaurant("Taj", "Indian"), "restaurant", "a").await.unwrap();
    client.create_or_replace(&restaurant("Agra", "Indian"), "restaurant", "b").await.unwrap();
    client.create_or_replace(&restaurant("Taj Palace", "Indian"), "restaurant", "a").await.unwrap();
    client.delete("restaurant", "b").await.unwrap();

    for _ in 0..4 {
        let events = timeout(RECV_TIMEOUT, sub.next()).await.unwrap().unwrap().unwrap();
        apply_changes(&mut local, events);
    }

    assert_eq!(local.len(), 1);
    assert_eq!(local[0].id.as_deref(), Some("a"));
    assert_eq!(local[0].data.name, "Taj Palace");
}

#[tokio::test]
async fn test_changes_first_delivery_is_all_added() {
    let client = DocLinkClient::new(MemoryStore::new());
    client.create_or_replace(&restaurant("Taj", "Indian"), "restaurant", "a").await.unwrap();
    client.create_or_replace(&restaurant("Agra", "Indian"), "restaurant", "b").await.unwrap();

    let mut sub = client
        .observe_changes::<Restaurant>("restaurant", &[])
        .await
        .unwrap();

    let events = timeout(RECV_TIMEOUT, sub.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.kind == ChangeKind::Added));
}

#[tokio::test]
async fn test_backend_error_terminates_subscription_once() {
    let client = DocLinkClient::new(MemoryStore::new());
    let mut sub = client
        .observe_snapshot::<Restaurant>("restaurant", &[])
        .await
        .unwrap();

    let _ = timeout(RECV_TIMEOUT, sub.next()).await.unwrap().unwrap().unwrap();
    client.store().inject_listener_error("connection lost").await;

    let err = timeout(RECV_TIMEOUT, sub.next()).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, DocLinkError::Transport(_)));
    assert_eq!(sub.state(), SubscriptionState::Erred);

    // Exactly one terminal error; nothing after.
    assert!(timeout(RECV_TIMEOUT, sub.next()).await.unwrap().is_none());
    assert_eq!(client.store().listener_count(), 0);
}

#[tokio::test]
async fn test_cancel_is_idempotent_and_stops_delivery() {
    let client = DocLinkClient::new(MemoryStore::new());
    let mut sub = client
        .observe_snapshot::<Restaurant>("restaurant", &[])
        .await
        .unwrap();
    assert_eq!(client.store().listener_count(), 1);

    sub.cancel();
    sub.cancel();
    assert!(sub.is_cancelled());
    assert_eq!(client.store().listener_count(), 0);
    assert!(timeout(RECV_TIMEOUT, sub.next()).await.unwrap().is_none());

    // Mutations after cancel reach nobody.
    client.create_or_replace(&restaurant("Taj", "Indian"), "restaurant", "r1").await.unwrap();
    assert!(timeout(RECV_TIMEOUT, sub.next()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_dropping_subscription_releases_listener() {
    let client = DocLinkClient::new(MemoryStore::new());
    let sub = client
        .observe_snapshot::<Restaurant>("restaurant", &[])
        .await
        .unwrap();
    assert_eq!(client.store().listener_count(), 1);
    drop(sub);
    assert_eq!(client.store().listener_count(), 0);
}

#[tokio::test]
async fn test_subscriptions_are_isolated() {
    let client = DocLinkClient::new(MemoryStore::new());
    let mut indian = client
        .observe_snapshot::<Restaurant>("restaurant", &[Predicate::equals("type", "Indian")])
        .await
        .unwrap();
    let mut italian = client
        .observe_snapshot::<Restaurant>("restaurant", &[Predicate::equals("type", "Italian")])
        .await
        .unwrap();

    assert!(timeout(RECV_TIMEOUT, indian.next()).await.unwrap().unwrap().unwrap().is_empty());
    assert!(timeout(RECV_TIMEOUT, italian.next()).await.unwrap().unwrap().unwrap().is_empty());

    italian.cancel();
    client.create_or_replace(&restaurant("Taj", "Indian"), "restaurant", "r1").await.unwrap();

    let update = timeout(RECV_TIMEOUT, indian.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(update.len(), 1);
    assert!(timeout(RECV_TIMEOUT, italian.next()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_atomic_batch_notifies_live_queries() {
    let client = DocLinkClient::new(MemoryStore::new());
    let mut sub = client
        .observe_snapshot::<Restaurant>("restaurant", &[])
        .await
        .unwrap();
    let _ = timeout(RECV_TIMEOUT, sub.next()).await.unwrap().unwrap().unwrap();

    let mut batch = WriteBatch::new();
    batch.set("restaurant/r1", &restaurant("Taj", "Indian")).unwrap();
    batch.set("restaurant/r2", &restaurant("Agra", "Indian")).unwrap();
    batch.set("review/v1", &restaurant("Taj", "Indian")).unwrap();
    client.write_atomic(batch).await.unwrap();

    // One notification carrying both restaurant writes.
    let update = timeout(RECV_TIMEOUT, sub.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(update.len(), 2);
}

#[tokio::test]
async fn test_decode_tolerance_in_query_results() {
    let client = DocLinkClient::new(MemoryStore::new());
    client.create_or_replace(&restaurant("Taj", "Indian"), "restaurant", "good").await.unwrap();
    // Wrong shape for `Restaurant`: name is numeric, type missing.
    client
        .update(vec![("name".to_string(), 7i64.into())], "restaurant", "good")
        .await
        .unwrap();
    client.create_or_replace(&restaurant("Agra", "Indian"), "restaurant", "ok").await.unwrap();

    let records: Vec<TypedRecord<Restaurant>> =
        client.get_many("restaurant", &[]).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id.as_deref(), Some("ok"));
}
