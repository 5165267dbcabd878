//! Test modules for the partitioned queue
//!
//! Every suite runs against [`MemoryStore`]; [`FlakyStore`] wraps it to
//! inject store failures.

mod admin;

use crate::core::retry::RetryConfig;
use crate::queue::{handler_fn, ClientConfig, HandlerError, Message, MessageHandler, QueueConfig};
use crate::store::{
    ClaimedPage, MemoryStore, PromoteRequest, SendRequest, StartPosition, Store, StoreError,
    StoreResult, StreamEntry,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(super) const QUEUE: &str = "orders";

/// Client config with fast timeouts around one queue named [`QUEUE`]
pub(super) fn client_config(queue: QueueConfig) -> ClientConfig {
    ClientConfig::new()
        .block_timeout(Duration::from_millis(50))
        .producer_retry(RetryConfig::fixed(3, 1))
        .commit_retry(RetryConfig::fixed(3, 1))
        .queue(QUEUE, queue)
}

/// Queue config with a quick handler retry policy
pub(super) fn queue_config(partitions: u32) -> QueueConfig {
    QueueConfig::new()
        .partitions(partitions)
        .retry(RetryConfig::fixed(3, 1))
}

pub(super) type Seen = Arc<Mutex<Vec<Message>>>;

/// Handler that records every delivered message
pub(super) fn recorder(seen: Seen) -> impl MessageHandler {
    handler_fn(move |batch: Vec<Message>| {
        let seen = seen.clone();
        async move {
            seen.lock().unwrap().extend(batch);
            Ok::<(), HandlerError>(())
        }
    })
}

pub(super) fn values(seen: &Seen) -> Vec<String> {
    seen.lock().unwrap().iter().map(|m| m.value.clone()).collect()
}

/// Poll `check` until it holds or `timeout` passes
pub(super) async fn eventually<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// [`MemoryStore`] wrapper whose sends and acks fail a set number of times
///
/// Also records the size of every delete call it forwards.
#[derive(Debug, Default)]
pub(super) struct FlakyStore {
    pub inner: MemoryStore,
    pub failing_sends: AtomicUsize,
    pub failing_acks: AtomicUsize,
    pub send_calls: AtomicUsize,
    pub ack_calls: AtomicUsize,
    pub deleted_batches: Mutex<Vec<usize>>,
}

impl FlakyStore {
    pub fn failing_sends(count: usize) -> Self {
        let store = Self::default();
        store.failing_sends.store(count, Ordering::SeqCst);
        store
    }

    pub fn failing_acks(count: usize) -> Self {
        let store = Self::default();
        store.failing_acks.store(count, Ordering::SeqCst);
        store
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn injected() -> StoreError {
        StoreError::Protocol {
            message: "injected failure".to_string(),
        }
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn bootstrap_groups(
        &self,
        partitions: &[String],
        group: &str,
        start: &StartPosition,
    ) -> StoreResult<()> {
        self.inner.bootstrap_groups(partitions, group, start).await
    }

    async fn scripted_send(&self, request: SendRequest<'_>) -> StoreResult<u32> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_sends) {
            return Err(Self::injected());
        }
        self.inner.scripted_send(request).await
    }

    async fn promote_delayed(&self, request: PromoteRequest<'_>) -> StoreResult<usize> {
        self.inner.promote_delayed(request).await
    }

    async fn stage_delayed(&self, staging: &str, due_at: i64, member: &str) -> StoreResult<()> {
        self.inner.stage_delayed(staging, due_at, member).await
    }

    async fn staged_count(&self, staging: &str) -> StoreResult<usize> {
        self.inner.staged_count(staging).await
    }

    async fn read_group(
        &self,
        partition: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> StoreResult<Vec<StreamEntry>> {
        self.inner
            .read_group(partition, group, consumer, count, block)
            .await
    }

    async fn claim_stale(
        &self,
        partition: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        start: &str,
        count: usize,
    ) -> StoreResult<ClaimedPage> {
        self.inner
            .claim_stale(partition, group, consumer, min_idle, start, count)
            .await
    }

    async fn ack(&self, partition: &str, group: &str, ids: &[String]) -> StoreResult<usize> {
        self.ack_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_acks) {
            return Err(Self::injected());
        }
        self.inner.ack(partition, group, ids).await
    }

    async fn range(
        &self,
        partition: &str,
        after: Option<&str>,
        count: usize,
    ) -> StoreResult<Vec<StreamEntry>> {
        self.inner.range(partition, after, count).await
    }

    async fn delete_entries(&self, batches: &[(String, Vec<String>)]) -> StoreResult<usize> {
        self.deleted_batches
            .lock()
            .unwrap()
            .push(batches.iter().map(|(_, ids)| ids.len()).sum());
        self.inner.delete_entries(batches).await
    }

    async fn partition_len(&self, partition: &str) -> StoreResult<usize> {
        self.inner.partition_len(partition).await
    }

    async fn set_group_cursor(
        &self,
        partitions: &[String],
        group: &str,
        position: &StartPosition,
    ) -> StoreResult<()> {
        self.inner
            .set_group_cursor(partitions, group, position)
            .await
    }

    async fn destroy_group(&self, partitions: &[String], group: &str) -> StoreResult<()> {
        self.inner.destroy_group(partitions, group).await
    }

    async fn delete_keys(&self, keys: &[String]) -> StoreResult<usize> {
        self.inner.delete_keys(keys).await
    }
}
