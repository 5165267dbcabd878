//! Scenarios against a live Redis-compatible server

use crate::common::{client_config, eventually, recorder, redis_url, unique_namespace, values, Seen};
use partq::queue::{
    DelayConfig, GroupSelector, ProducerMessage, QueueClient, QueueConfig, StartPosition,
};
use serial_test::serial;
use std::sync::{Arc, Mutex};
use std::time::Duration;

async fn live_client(test: &str, queue: &str, config: QueueConfig) -> Option<QueueClient> {
    let url = redis_url()?;
    let config = client_config(queue, config)
        .store_url(url)
        .namespace(unique_namespace(test));
    Some(QueueClient::connect(config).await.unwrap())
}

#[tokio::test]
#[serial]
#[ignore = "requires PARTQ_REDIS_URL"]
async fn test_live_ordered_delivery() {
    let Some(client) = live_client("order", "ledger", QueueConfig::new().partitions(1)).await
    else {
        return;
    };

    for payload in ["1", "2", "3"] {
        client
            .send_message("ledger", ProducerMessage::new(payload).with_key("A"))
            .await
            .unwrap();
    }
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let subscription = client
        .subscribe("ledger", GroupSelector::Default, recorder(seen.clone()))
        .await
        .unwrap();

    assert!(eventually(Duration::from_secs(5), || values(&seen).len() == 3).await);
    assert_eq!(values(&seen), vec!["1", "2", "3"]);

    subscription.stop().await;
    client.del_queue("ledger").await.unwrap();
    client.close().await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore = "requires PARTQ_REDIS_URL"]
async fn test_live_delayed_delivery() {
    let config = QueueConfig::new()
        .partitions(3)
        .delay(DelayConfig::every(Duration::from_secs(1)));
    let Some(client) = live_client("delay", "reminders", config).await else {
        return;
    };

    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let subscription = client
        .subscribe("reminders", GroupSelector::Default, recorder(seen.clone()))
        .await
        .unwrap();
    client
        .send_message(
            "reminders",
            ProducerMessage::new("ping").with_delay(Duration::from_secs(2)),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(eventually(Duration::from_secs(3), || values(&seen) == vec!["ping"]).await);
    assert_eq!(client.staged_count("reminders").await.unwrap(), 0);

    subscription.stop().await;
    client.del_queue("reminders").await.unwrap();
    client.close().await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore = "requires PARTQ_REDIS_URL"]
async fn test_live_reset_and_group_admin() {
    let config = QueueConfig::new().partitions(2).group("replay");
    let Some(client) = live_client("admin", "events", config).await else {
        return;
    };
    // Bootstraps the configured groups
    client.new_consumer("events").await.unwrap();

    client
        .send_message("events", ProducerMessage::new("x").with_key("k"))
        .await
        .unwrap();
    client
        .reset_consumer_offset("events", "replay", StartPosition::Latest)
        .await
        .unwrap();
    client
        .reset_consumer_offset_by_partition("events", "replay", 1, StartPosition::Earliest)
        .await
        .unwrap();
    client.del_group("events", "replay").await.unwrap();

    assert!(client.del_queue("events").await.unwrap() >= 1);
    client.close().await.unwrap();
}

async fn partition_lengths(client: &QueueClient, queue: &str, partitions: u32) -> Vec<usize> {
    let mut lengths = Vec::new();
    for partition in 0..partitions {
        lengths.push(client.partition_len(queue, partition).await.unwrap());
    }
    lengths
}

#[tokio::test]
#[serial]
#[ignore = "requires PARTQ_REDIS_URL"]
async fn test_live_keyless_sends_fill_the_shortest_partition() {
    let config = QueueConfig::new()
        .partitions(3)
        .delay(DelayConfig::every(Duration::from_secs(1)));
    let Some(client) = live_client("keyless", "jobs", config).await else {
        return;
    };

    for n in 0..9 {
        client
            .send_message("jobs", ProducerMessage::new(n.to_string()))
            .await
            .unwrap();
    }
    assert_eq!(partition_lengths(&client, "jobs", 3).await, vec![3, 3, 3]);

    // Promotion of a keyless delayed message picks the shortest partition too
    client
        .send_message(
            "jobs",
            ProducerMessage::new("later").with_delay(Duration::from_secs(1)),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    for _ in 0..30 {
        if client.staged_count("jobs").await.unwrap() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(client.staged_count("jobs").await.unwrap(), 0);

    let lengths = partition_lengths(&client, "jobs", 3).await;
    assert_eq!(lengths.iter().sum::<usize>(), 10);
    assert_eq!(lengths.iter().max().unwrap() - lengths.iter().min().unwrap(), 1);

    client.del_queue("jobs").await.unwrap();
    client.close().await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore = "requires PARTQ_REDIS_URL"]
async fn test_live_expired_messages_are_paged_and_deleted_once() {
    let short = QueueConfig::new()
        .partitions(1)
        .message_ttl(Duration::from_secs(1));
    let Some(short_lived) = live_client("expired", "audit", short).await else {
        return;
    };
    let long = QueueConfig::new().partitions(1);
    let Some(long_lived) = live_client("expired", "audit", long).await else {
        return;
    };

    // More than one scan page
    for n in 0..150 {
        short_lived
            .send_message("audit", ProducerMessage::new(format!("old-{}", n)))
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    long_lived
        .send_message("audit", ProducerMessage::new("fresh"))
        .await
        .unwrap();

    let listed = long_lived.get_expired_messages("audit", false).await.unwrap();
    assert_eq!(listed.len(), 150);
    assert_eq!(long_lived.partition_len("audit", 0).await.unwrap(), 151);

    let deleted = long_lived.get_expired_messages("audit", true).await.unwrap();
    assert_eq!(deleted.len(), 150);
    assert_eq!(deleted[0].value, "old-0");
    assert_eq!(deleted[149].value, "old-149");

    assert!(long_lived
        .get_expired_messages("audit", true)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(long_lived.partition_len("audit", 0).await.unwrap(), 1);

    long_lived.del_queue("audit").await.unwrap();
    short_lived.close().await.unwrap();
    long_lived.close().await.unwrap();
}
