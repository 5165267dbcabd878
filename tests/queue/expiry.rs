//! Expired message collection

use crate::common::client_config;
use partq::queue::{ProducerMessage, QueueClient, QueueConfig};
use partq::store::{MemoryStore, Store};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
#[serial]
async fn test_expired_messages_are_returned_once_when_deleted() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

    // Same queue and namespace, different TTLs: the first client writes a
    // message that expires almost at once, the second a long-lived one.
    let short = QueueClient::with_store(
        client_config(
            "sessions",
            QueueConfig::new()
                .partitions(1)
                .message_ttl(Duration::from_secs(1)),
        ),
        store.clone(),
    )
    .unwrap();
    short
        .send_message("sessions", ProducerMessage::new("stale"))
        .await
        .unwrap();
    short.close().await.unwrap();

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let client = QueueClient::with_store(
        client_config("sessions", QueueConfig::new().partitions(1)),
        store.clone(),
    )
    .unwrap();
    client
        .send_message("sessions", ProducerMessage::new("fresh"))
        .await
        .unwrap();

    let first = client.get_expired_messages("sessions", true).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].value, "stale");

    let second = client.get_expired_messages("sessions", true).await.unwrap();
    assert!(second.is_empty());
    assert_eq!(client.partition_len("sessions", 0).await.unwrap(), 1);

    client.close().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_listing_without_delete_keeps_entries() {
    let client = QueueClient::with_store(
        client_config(
            "sessions",
            QueueConfig::new()
                .partitions(2)
                .message_ttl(Duration::from_secs(1)),
        ),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();
    for key in ["a", "b", "c"] {
        client
            .send_message("sessions", ProducerMessage::new(key).with_key(key))
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(client.get_expired_messages("sessions", false).await.unwrap().len(), 3);
    assert_eq!(client.get_expired_messages("sessions", false).await.unwrap().len(), 3);
    client.close().await.unwrap();
}
