//! Ordered delivery and group fan-out

use crate::common::{client_config, eventually, recorder, values, Seen};
use partq::queue::{GroupSelector, ProducerMessage, QueueClient, QueueConfig, SendOutcome};
use partq::store::MemoryStore;
use serial_test::serial;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test]
#[serial]
async fn test_single_partition_preserves_send_order() {
    let config = client_config("ledger", QueueConfig::new().partitions(1));
    let client = QueueClient::with_store(config, Arc::new(MemoryStore::new())).unwrap();

    for payload in ["1", "2", "3"] {
        let outcome = client
            .send_message("ledger", ProducerMessage::new(payload).with_key("A"))
            .await
            .unwrap();
        assert_eq!(outcome, SendOutcome::Sent { partition: 0 });
    }

    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let subscription = client
        .subscribe("ledger", GroupSelector::Default, recorder(seen.clone()))
        .await
        .unwrap();

    assert!(eventually(Duration::from_secs(2), || values(&seen).len() == 3).await);
    assert_eq!(values(&seen), vec!["1", "2", "3"]);

    subscription.stop().await;
    client.close().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_every_group_sees_every_message() {
    let config = client_config(
        "events",
        QueueConfig::new()
            .partitions(4)
            .group("audit")
            .group("search")
            .batch_interval(Duration::from_millis(100)),
    );
    let client = QueueClient::with_store(config, Arc::new(MemoryStore::new())).unwrap();

    let audit: Seen = Arc::new(Mutex::new(Vec::new()));
    let search: Seen = Arc::new(Mutex::new(Vec::new()));
    let audit_sub = client
        .batch_subscribe("events", "audit", recorder(audit.clone()))
        .await
        .unwrap();
    let search_sub = client
        .subscribe("events", "search", recorder(search.clone()))
        .await
        .unwrap();

    for i in 0..20 {
        client
            .send_message("events", ProducerMessage::new(i.to_string()).with_key(format!("k{}", i)))
            .await
            .unwrap();
    }

    assert!(eventually(Duration::from_secs(3), || values(&audit).len() == 20).await);
    assert!(eventually(Duration::from_secs(3), || values(&search).len() == 20).await);

    let mut audited = values(&audit);
    audited.sort_by_key(|v| v.parse::<u32>().unwrap());
    assert_eq!(audited, (0..20).map(|i| i.to_string()).collect::<Vec<_>>());

    audit_sub.stop().await;
    search_sub.stop().await;
    client.close().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_closed_client_rejects_sends() {
    let config = client_config("ledger", QueueConfig::new().partitions(1));
    let client = QueueClient::with_store(config, Arc::new(MemoryStore::new())).unwrap();

    client.close().await.unwrap();
    assert!(client.is_closed());
    assert!(client
        .send_message("ledger", ProducerMessage::new("late"))
        .await
        .is_err());
}
