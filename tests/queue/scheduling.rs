//! Delayed delivery through the background scheduler

use crate::common::{client_config, eventually, recorder, values, Seen};
use partq::queue::{DelayConfig, GroupSelector, ProducerMessage, QueueClient, QueueConfig, SendOutcome};
use partq::store::MemoryStore;
use serial_test::serial;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[tokio::test]
#[serial]
async fn test_delayed_message_arrives_after_its_delay() {
    let config = client_config(
        "reminders",
        QueueConfig::new()
            .partitions(2)
            .delay(DelayConfig::every(Duration::from_secs(1))),
    );
    let client = QueueClient::with_store(config, Arc::new(MemoryStore::new())).unwrap();

    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let subscription = client
        .subscribe("reminders", GroupSelector::Default, recorder(seen.clone()))
        .await
        .unwrap();

    let started = Instant::now();
    let outcome = client
        .send_message(
            "reminders",
            ProducerMessage::new("ping").with_delay(Duration::from_secs(2)),
        )
        .await
        .unwrap();
    assert!(matches!(outcome, SendOutcome::Delayed { .. }));
    assert_eq!(client.staged_count("reminders").await.unwrap(), 1);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(values(&seen).is_empty(), "delivered before its delay");

    assert!(eventually(Duration::from_secs(4), || values(&seen) == vec!["ping"]).await);
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(client.staged_count("reminders").await.unwrap(), 0);

    subscription.stop().await;
    client.close().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_stopped_scheduler_leaves_messages_staged() {
    let config = client_config(
        "reminders",
        QueueConfig::new()
            .partitions(1)
            .delay(DelayConfig::every(Duration::from_millis(200))),
    );
    let client = QueueClient::with_store(config, Arc::new(MemoryStore::new())).unwrap();

    assert!(client.stop_delay_scheduler("reminders").await.unwrap());
    assert!(!client.stop_delay_scheduler("reminders").await.unwrap());

    client
        .send_message(
            "reminders",
            ProducerMessage::new("held").with_delay(Duration::from_millis(10)),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(client.staged_count("reminders").await.unwrap(), 1);
    assert_eq!(client.partition_len("reminders", 0).await.unwrap(), 0);
    client.close().await.unwrap();
}
