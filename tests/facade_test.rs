//! Facade behavior: batching, transactions, paging, retry policy, and
//! the dual execution path, against the in-memory store client.

mod common;

use aws_sdk_dynamodb::types::AttributeValue;
use common::{open_store, Note, Profile, TABLE};
use dynastore::{
    AcceleratedStoreClient, FailureCode, Key, KeyCondition, QueryRequest, ReadOptions, Record,
    SortCondition, Store, StoreConfig, StoreError, SuppressionPolicy, Update,
};
use std::sync::Arc;

fn notes(n: usize) -> Vec<Note> {
    (0..n)
        .map(|i| Note::new("APP#SVC#LIST#1", format!("NOTE#{i:03}"), format!("body {i}")))
        .collect()
}

#[tokio::test]
async fn test_operations_after_close_fail_not_connected() {
    let (store, _client) = open_store(0);
    store.close();
    let err = store
        .get("APP#SVC", "X", ReadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotConnected));
}

#[tokio::test]
async fn test_empty_keys_are_rejected_before_any_call() {
    let (store, _client) = open_store(0);
    assert!(matches!(
        store.get("", "SK", ReadOptions::default()).await.unwrap_err(),
        StoreError::Validation(_)
    ));
    assert!(matches!(
        store.get("PK", "", ReadOptions::default()).await.unwrap_err(),
        StoreError::Validation(_)
    ));
    assert!(matches!(
        store.delete("", "SK").await.unwrap_err(),
        StoreError::Validation(_)
    ));
}

#[tokio::test]
async fn test_batch_set_and_batch_get() {
    let (store, client) = open_store(0);
    let notes = notes(3);
    let records: Vec<&dyn Record> = notes.iter().map(|n| n as &dyn Record).collect();

    let report = store.batch_set(&records, &[]).await.unwrap();
    assert_eq!(report.succeeded, 3);
    assert!(report.failed_puts.is_empty());
    assert_eq!(client.table_len(TABLE), 3);

    let keys: Vec<Key> = (0..3)
        .map(|i| Key::new("APP#SVC#LIST#1", format!("NOTE#{i:03}")))
        .collect();
    let outcome = store.batch_get(&keys, ReadOptions::default()).await.unwrap();
    assert_eq!(outcome.items.len(), 3);
    assert!(outcome.unprocessed.is_empty());
}

#[tokio::test]
async fn test_batch_set_rejects_unique_indexed_records() {
    let (store, _client) = open_store(0);
    let profile = Profile::new("APP#SVC#TENANT#1", "a@b.com");
    let records: Vec<&dyn Record> = vec![&profile];
    let err = store.batch_set(&records, &[]).await.unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[tokio::test]
async fn test_batch_set_mixes_puts_and_deletes() {
    let (store, client) = open_store(0);
    let existing = notes(2);
    let records: Vec<&dyn Record> = existing.iter().map(|n| n as &dyn Record).collect();
    store.batch_set(&records, &[]).await.unwrap();

    let fresh = Note::new("APP#SVC#LIST#1", "NOTE#100", "new");
    let report = store
        .batch_set(
            &[&fresh as &dyn Record],
            &[Key::new("APP#SVC#LIST#1", "NOTE#000")],
        )
        .await
        .unwrap();
    assert_eq!(report.succeeded, 2);
    assert_eq!(client.table_len(TABLE), 2);
}

#[tokio::test]
async fn test_batch_get_ceiling_enforced_client_side() {
    let (store, _client) = open_store(0);
    let keys: Vec<Key> = (0..101).map(|i| Key::new(format!("P{i}"), "S")).collect();
    let err = store.batch_get(&keys, ReadOptions::default()).await.unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[tokio::test]
async fn test_transaction_get_ceiling_and_results() {
    let (store, _client) = open_store(0);
    let stored = notes(2);
    let records: Vec<&dyn Record> = stored.iter().map(|n| n as &dyn Record).collect();
    store.batch_set(&records, &[]).await.unwrap();

    let keys = vec![
        Key::new("APP#SVC#LIST#1", "NOTE#000"),
        Key::new("APP#SVC#LIST#1", "NOTE#missing"),
    ];
    let items = store.transaction_get(&keys).await.unwrap();
    assert_eq!(items.len(), 2);
    assert!(items[0].is_some());
    assert!(items[1].is_none());

    let too_many: Vec<Key> = (0..26).map(|i| Key::new(format!("P{i}"), "S")).collect();
    assert!(matches!(
        store.transaction_get(&too_many).await.unwrap_err(),
        StoreError::Validation(_)
    ));
}

#[tokio::test]
async fn test_transaction_set_applies_all_records_with_sentinels() {
    let (store, client) = open_store(0);
    let a = Profile::new("APP#SVC#TENANT#1", "a@b.com");
    let b = Profile::new("APP#SVC#TENANT#2", "b@b.com");
    let count = store
        .transaction_set(&[&a as &dyn Record, &b as &dyn Record], None)
        .await
        .unwrap();
    assert_eq!(count, 2);
    // Two owners plus two sentinels.
    assert_eq!(client.table_len(TABLE), 4);
}

#[tokio::test]
async fn test_transaction_set_collision_applies_nothing() {
    let (store, client) = open_store(0);
    let a = Profile::new("APP#SVC#TENANT#1", "same@b.com");
    let b = Profile::new("APP#SVC#TENANT#2", "same@b.com");
    let err = store
        .transaction_set(&[&a as &dyn Record, &b as &dyn Record], None)
        .await
        .unwrap_err();
    assert!(err.is_duplicate());
    assert_eq!(client.table_len(TABLE), 0);
}

#[tokio::test]
async fn test_transaction_overflow_rejected_before_any_network_call() {
    let (store, client) = open_store(0);
    // 13 records × (1 sentinel + 1 owner) = 26 items.
    let profiles: Vec<Profile> = (0..13)
        .map(|i| Profile::new(format!("APP#SVC#TENANT#{i}"), format!("u{i}@b.com")))
        .collect();
    let records: Vec<&dyn Record> = profiles.iter().map(|p| p as &dyn Record).collect();
    let err = store.transaction_set(&records, None).await.unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
    assert_eq!(client.table_len(TABLE), 0);
}

#[tokio::test]
async fn test_query_drains_every_page() {
    let (store, _client) = open_store(0);
    let stored = notes(5);
    let records: Vec<&dyn Record> = stored.iter().map(|n| n as &dyn Record).collect();
    store.batch_set(&records, &[]).await.unwrap();

    let mut request = QueryRequest::new(KeyCondition::partition("APP#SVC#LIST#1"));
    request.limit = Some(2);
    let items = store.query(request).await.unwrap();
    assert_eq!(items.len(), 5);
}

#[tokio::test]
async fn test_query_sort_comparators() {
    let (store, _client) = open_store(0);
    let stored = notes(5);
    let records: Vec<&dyn Record> = stored.iter().map(|n| n as &dyn Record).collect();
    store.batch_set(&records, &[]).await.unwrap();

    let request = QueryRequest::new(
        KeyCondition::partition("APP#SVC#LIST#1")
            .sort(SortCondition::BeginsWith("NOTE#00".to_string())),
    );
    assert_eq!(store.query(request).await.unwrap().len(), 5);

    let request = QueryRequest::new(
        KeyCondition::partition("APP#SVC#LIST#1").sort(SortCondition::Between(
            AttributeValue::S("NOTE#001".to_string()),
            AttributeValue::S("NOTE#003".to_string()),
        )),
    );
    assert_eq!(store.query(request).await.unwrap().len(), 3);

    let request = QueryRequest::new(
        KeyCondition::partition("APP#SVC#LIST#1")
            .sort(SortCondition::Gt(AttributeValue::S("NOTE#002".to_string()))),
    );
    assert_eq!(store.query(request).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_query_by_page_cursor_walk() {
    let (store, _client) = open_store(0);
    let stored = notes(5);
    let records: Vec<&dyn Record> = stored.iter().map(|n| n as &dyn Record).collect();
    store.batch_set(&records, &[]).await.unwrap();

    let request = QueryRequest::new(KeyCondition::partition("APP#SVC#LIST#1"));

    let (page1, cursor1) = store.query_by_page(request.clone(), 2, "").await.unwrap();
    assert_eq!(page1.len(), 2);
    assert!(!cursor1.is_empty());

    let (page2, cursor2) = store
        .query_by_page(request.clone(), 2, &cursor1)
        .await
        .unwrap();
    assert_eq!(page2.len(), 2);
    assert!(!cursor2.is_empty());

    let (page3, cursor3) = store
        .query_by_page(request.clone(), 2, &cursor2)
        .await
        .unwrap();
    assert_eq!(page3.len(), 1);
    assert!(cursor3.is_empty(), "walk complete");

    // No overlap across pages.
    let mut all: Vec<String> = page1
        .iter()
        .chain(&page2)
        .chain(&page3)
        .map(|item| item.get("SK").unwrap().as_s().unwrap().clone())
        .collect();
    all.dedup();
    assert_eq!(all.len(), 5);
}

#[tokio::test]
async fn test_query_pagination_data_one_cursor_per_page() {
    let (store, _client) = open_store(0);
    let stored = notes(5);
    let records: Vec<&dyn Record> = stored.iter().map(|n| n as &dyn Record).collect();
    store.batch_set(&records, &[]).await.unwrap();

    let request = QueryRequest::new(KeyCondition::partition("APP#SVC#LIST#1"));
    let cursors = store.query_pagination_data(request.clone(), 2).await.unwrap();
    assert_eq!(cursors.len(), 3);
    assert_eq!(cursors[0], "");

    // Each cursor opens the page it marks.
    let (page, _) = store
        .query_by_page(request.clone(), 2, &cursors[2])
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
}

#[tokio::test]
async fn test_invalid_cursor_is_a_validation_error() {
    let (store, _client) = open_store(0);
    let request = QueryRequest::new(KeyCondition::partition("APP#SVC#LIST#1"));
    let err = store
        .query_by_page(request, 2, "@@not-a-cursor@@")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[tokio::test(start_paused = true)]
async fn test_retry_recovers_within_budget() {
    let (store, client) = open_store(3);
    store
        .set(&Note::new("APP#SVC#NOTE#1", "NOTE", "hello"), None)
        .await
        .unwrap();

    client.inject_failures(FailureCode::Throttling, 2);
    let item = store
        .get("APP#SVC#NOTE#1", "NOTE", ReadOptions::default())
        .await
        .unwrap();
    assert!(item.is_some(), "budget of 3 retries absorbs 2 failures");
}

#[tokio::test(start_paused = true)]
async fn test_suppressed_exhaustion_returns_success_with_no_value() {
    let (store, client) = open_store(2);
    store
        .set(&Note::new("APP#SVC#NOTE#1", "NOTE", "hello"), None)
        .await
        .unwrap();

    // More throttles than the budget can absorb.
    client.inject_failures(FailureCode::Throttling, 10);
    let item = store
        .get("APP#SVC#NOTE#1", "NOTE", ReadOptions::default())
        .await
        .unwrap();
    assert!(item.is_none(), "suppressed exhaustion is empty success");
}

#[tokio::test(start_paused = true)]
async fn test_strict_suppression_policy_surfaces_exhaustion() {
    let client = Arc::new(dynastore::MemoryStoreClient::new());
    let store = Store::new();
    let mut config = StoreConfig::new(TABLE);
    config.retries = 1;
    config.suppression = SuppressionPolicy::Never;
    store.open_with_client(client.clone(), config).unwrap();

    client.inject_failures(FailureCode::Throttling, 10);
    let err = store
        .get("APP#SVC#NOTE#1", "NOTE", ReadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Capacity(_)));
}

#[tokio::test(start_paused = true)]
async fn test_reported_capacity_exhaustion_surfaces() {
    let (store, client) = open_store(1);
    client.inject_failures(FailureCode::ProvisionedThroughputExceeded, 10);
    let err = store
        .get("APP#SVC#NOTE#1", "NOTE", ReadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Capacity(_)));
}

#[tokio::test]
async fn test_fatal_failure_consumes_no_retries() {
    let (store, client) = open_store(5);
    client.inject_failures(FailureCode::ResourceNotFound, 1);
    let err = store
        .get("APP#SVC#NOTE#1", "NOTE", ReadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
    // The single injected failure was consumed by the single attempt.
    assert!(store
        .get("APP#SVC#NOTE#1", "NOTE", ReadOptions::default())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_accelerated_path_serves_repeat_reads_from_cache() {
    let inner = Arc::new(dynastore::MemoryStoreClient::new());
    let accelerated = Arc::new(AcceleratedStoreClient::new(inner.clone(), 64));
    let store = Store::new();
    store
        .open_with_client(accelerated.clone(), StoreConfig::new(TABLE))
        .unwrap();

    store
        .set(&Note::new("APP#SVC#NOTE#1", "NOTE", "hello"), None)
        .await
        .unwrap();

    for _ in 0..3 {
        store
            .get("APP#SVC#NOTE#1", "NOTE", ReadOptions::default())
            .await
            .unwrap()
            .unwrap();
    }
    let stats = accelerated.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 2);

    // A write through the facade invalidates, so the next read refetches.
    let update = Update::new().set("body", AttributeValue::S("changed".to_string()));
    store.update("APP#SVC#NOTE#1", "NOTE", update, None).await.unwrap();
    let item = store
        .get("APP#SVC#NOTE#1", "NOTE", ReadOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.get("body").unwrap().as_s().unwrap(), "changed");
}

#[tokio::test]
async fn test_update_without_unique_involvement_upserts() {
    let (store, client) = open_store(0);
    let update = Update::new().set("body", AttributeValue::S("fresh".to_string()));
    store
        .update("APP#SVC#NOTE#9", "NOTE", update, None)
        .await
        .unwrap();
    let item = client.raw_get(TABLE, "APP#SVC#NOTE#9", "NOTE").unwrap();
    assert_eq!(item.get("body").unwrap().as_s().unwrap(), "fresh");
    assert!(item.contains_key("updated_at"));
}

#[tokio::test]
async fn test_empty_update_rejected() {
    let (store, _client) = open_store(0);
    let err = store
        .update("APP#SVC#NOTE#1", "NOTE", Update::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}
