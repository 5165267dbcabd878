//! Producer
//!
//! Sends go through the atomic send procedure under the client's producer
//! retry policy. Delayed sends are staged instead and promoted later by the
//! queue's delay scheduler.

use super::config::ResolvedQueue;
use super::error::{QueueError, QueueResult};
use super::message::{DelayMessage, ProducerMessage};
use super::router::route;
use crate::core::retry::{retry_async_with, RetryPolicy};
use crate::core::shutdown::ShutdownSignal;
use crate::core::time::{add_millis, format_millis, now_millis};
use crate::store::{LogRecord, SendRequest, Store, StoreResult};
use std::future::Future;
use std::sync::Arc;

/// What a send did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Appended to the given partition
    Sent { partition: u32 },
    /// Staged until `due_at` (unix milliseconds)
    Delayed { id: String, due_at: i64 },
    /// The queue is excluded from sending
    Skipped,
}

/// Send handle for one producer-enabled queue
#[derive(Clone)]
pub struct Producer {
    queue: Arc<ResolvedQueue>,
    store: Arc<dyn Store>,
    retry: RetryPolicy,
    closed: ShutdownSignal,
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("queue", &self.queue.name)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Producer {
    pub(crate) fn new(
        queue: Arc<ResolvedQueue>,
        store: Arc<dyn Store>,
        retry: RetryPolicy,
        closed: ShutdownSignal,
    ) -> Self {
        Self {
            queue,
            store,
            retry,
            closed,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue.name
    }

    /// Send one message
    pub async fn send(&self, message: ProducerMessage) -> QueueResult<SendOutcome> {
        if self.closed.is_triggered() {
            return Err(QueueError::Closed);
        }
        if self.queue.send_excluded {
            log::trace!("Dropping send to excluded queue '{}'", self.queue.name);
            return Ok(SendOutcome::Skipped);
        }

        let now = now_millis();
        if !message.delay.is_zero() {
            if self.queue.delay.is_some() {
                return self.stage(message, now).await;
            }
            log::warn!(
                "Queue '{}' has no delay queue enabled; sending message delayed by {:?} now",
                self.queue.name,
                message.delay
            );
        }

        let partition = route(&message.key, self.queue.partitions).partition();
        let record = LogRecord {
            key: message.key,
            value: message.value,
            timestamp: now,
            expiry: add_millis(now, self.queue.message_ttl),
        };

        let store = &self.store;
        let partitions = self.queue.partition_keys.as_slice();
        let record = &record;
        let used = self
            .with_retry("send", || async move {
                store
                    .scripted_send(SendRequest {
                        partitions,
                        partition,
                        record,
                    })
                    .await
            })
            .await?;

        log::debug!(
            "Sent message to {}[{}] (key={:?})",
            self.queue.name,
            used,
            record.key
        );
        Ok(SendOutcome::Sent { partition: used })
    }

    async fn stage(&self, message: ProducerMessage, now: i64) -> QueueResult<SendOutcome> {
        let partition = route(&message.key, self.queue.partitions).partition();
        let delayed = DelayMessage::new(&self.queue.name, message, partition, now);
        let member = serde_json::to_string(&delayed)?;

        let store = &self.store;
        let staging = self.queue.staging_key.as_str();
        let due_at = delayed.due_at;
        let member = member.as_str();
        self.with_retry("stage_delayed", || async move {
            store.stage_delayed(staging, due_at, member).await
        })
        .await?;

        log::debug!(
            "Staged delayed message {} for '{}' until {}",
            delayed.id,
            self.queue.name,
            format_millis(due_at)
        );
        Ok(SendOutcome::Delayed {
            id: delayed.id,
            due_at,
        })
    }

    /// Run a store call under the producer policy; closing the client ends
    /// an otherwise unlimited retry
    async fn with_retry<T, F, Fut>(&self, operation: &'static str, call: F) -> QueueResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let closed = self.closed.clone();
        let queue = self.queue.name.as_str();
        let mut attempts = 0;

        let result = retry_async_with(operation, &self.retry, call, |attempt, error| {
            attempts = attempt;
            log::warn!(
                "Producer {} to '{}' failed on attempt {}: {}",
                operation,
                queue,
                attempt,
                error
            );
            !closed.is_triggered()
        })
        .await;

        result.map_err(|source| {
            if self.closed.is_triggered() {
                QueueError::Closed
            } else {
                QueueError::Exhausted {
                    operation,
                    attempts,
                    source,
                }
            }
        })
    }
}
