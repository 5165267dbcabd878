//! Tests for offset resets, group/queue deletion and client lifecycle

use super::{client_config, eventually, queue_config, recorder, values, Seen, QUEUE};
use crate::queue::{
    DelayConfig, GroupSelector, ProducerMessage, QueueClient, QueueError, StartPosition,
};
use crate::store::MemoryStore;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(3);

async fn consume_all(client: &QueueClient, expected: usize) -> Vec<String> {
    let seen: Seen = Arc::default();
    let subscription = client
        .subscribe(QUEUE, GroupSelector::Default, recorder(seen.clone()))
        .await
        .unwrap();
    assert!(eventually(WAIT, || seen.lock().unwrap().len() == expected).await);
    subscription.stop().await;
    values(&seen)
}

#[tokio::test]
async fn test_reset_to_earliest_replays_the_queue() {
    let store = Arc::new(MemoryStore::new());
    let client = QueueClient::with_store(client_config(queue_config(2)), store.clone()).unwrap();

    for n in 0..4 {
        client
            .send_message(QUEUE, ProducerMessage::new(n.to_string()).with_key(n.to_string()))
            .await
            .unwrap();
    }
    assert_eq!(consume_all(&client, 4).await.len(), 4);

    client
        .reset_consumer_offset(QUEUE, GroupSelector::Default, StartPosition::Earliest)
        .await
        .unwrap();

    let mut replayed = consume_all(&client, 4).await;
    replayed.sort();
    assert_eq!(replayed, vec!["0", "1", "2", "3"]);
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_reset_single_partition() {
    let store = Arc::new(MemoryStore::new());
    let client = QueueClient::with_store(client_config(queue_config(2)), store.clone()).unwrap();

    // Keyless sends alternate partitions: a -> 0, b -> 1
    for value in ["a", "b"] {
        client
            .send_message(QUEUE, ProducerMessage::new(value))
            .await
            .unwrap();
    }
    assert_eq!(consume_all(&client, 2).await.len(), 2);

    client
        .reset_consumer_offset_by_partition(QUEUE, GroupSelector::Default, 1, StartPosition::Earliest)
        .await
        .unwrap();

    assert_eq!(consume_all(&client, 1).await, vec!["b"]);
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_reset_rejects_bad_arguments() {
    let store = Arc::new(MemoryStore::new());
    let client = QueueClient::with_store(client_config(queue_config(2)), store.clone()).unwrap();
    client.new_consumer(QUEUE).await.unwrap();

    let out_of_range = client
        .reset_consumer_offset_by_partition(QUEUE, GroupSelector::Default, 2, StartPosition::Latest)
        .await;
    assert!(matches!(
        out_of_range,
        Err(QueueError::PartitionOutOfRange {
            partition: 2,
            partitions: 2,
            ..
        })
    ));

    let unknown_group = client
        .reset_consumer_offset(QUEUE, "nobody", StartPosition::Latest)
        .await;
    assert!(matches!(unknown_group, Err(QueueError::UnknownGroup { .. })));
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_del_group_removes_it_from_every_partition() {
    let store = Arc::new(MemoryStore::new());
    let client = QueueClient::with_store(
        client_config(queue_config(3).group("billing")),
        store.clone(),
    )
    .unwrap();
    client.new_consumer(QUEUE).await.unwrap();
    let resolved = client.queue_config(QUEUE).unwrap().clone();

    client.del_group(QUEUE, "billing").await.unwrap();

    for key in &resolved.partition_keys {
        assert!(!store.has_group(key, "billing"));
    }
    // Deleting again is harmless
    client.del_group(QUEUE, "billing").await.unwrap();
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_del_queue_removes_logs_and_staging() {
    let store = Arc::new(MemoryStore::new());
    let queue = queue_config(2).delay(DelayConfig::every(Duration::from_secs(3600)));
    let client = QueueClient::with_store(client_config(queue), store.clone()).unwrap();

    client
        .send_message(QUEUE, ProducerMessage::new("now"))
        .await
        .unwrap();
    client
        .send_message(
            QUEUE,
            ProducerMessage::new("later").with_delay(Duration::from_secs(60)),
        )
        .await
        .unwrap();

    let deleted = client.del_queue(QUEUE).await.unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(client.partition_len(QUEUE, 0).await.unwrap(), 0);
    assert_eq!(client.staged_count(QUEUE).await.unwrap(), 0);
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_operations_after_close_fail() {
    let store = Arc::new(MemoryStore::new());
    let client = QueueClient::with_store(client_config(queue_config(1)), store.clone()).unwrap();

    client.close().await.unwrap();
    client.close().await.unwrap();
    assert!(client.is_closed());

    assert!(matches!(
        client.send_message(QUEUE, ProducerMessage::new("x")).await,
        Err(QueueError::Closed)
    ));
    assert!(matches!(
        client.new_consumer(QUEUE).await,
        Err(QueueError::Closed)
    ));
    assert!(matches!(
        client.get_expired_messages(QUEUE, false).await,
        Err(QueueError::Closed)
    ));
    assert!(matches!(
        client.del_queue(QUEUE).await,
        Err(QueueError::Closed)
    ));
}
