//! Retry/ack pipeline
//!
//! A delivered batch is handed to the user handler under the queue's retry
//! policy and then committed. The commit happens whether the handler
//! eventually succeeded or ran out of attempts, so a batch that keeps
//! failing is logged and skipped rather than redelivered.

use super::config::ResolvedQueue;
use super::message::Message;
use crate::core::retry::{retry_async, retry_async_with, RetryPolicy};
use crate::core::time::format_millis;
use crate::store::Store;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// Error type handlers report failures with
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// User code that processes delivered messages
///
/// `Subscribe` hands batches of one message, `BatchSubscribe` batches of up
/// to the queue's batch size. Returning an error asks for a retry.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, batch: &[Message]) -> Result<(), HandlerError>;
}

/// Adapter turning an async closure into a [`MessageHandler`]
pub struct FnHandler<F>(F);

/// Wrap an async closure taking an owned batch
///
/// ```rust
/// use partq::queue::{handler_fn, HandlerError, Message};
///
/// let handler = handler_fn(|batch: Vec<Message>| async move {
///     for message in &batch {
///         println!("{}: {}", message.key, message.value);
///     }
///     Ok::<(), HandlerError>(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Vec<Message>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Vec<Message>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, batch: &[Message]) -> Result<(), HandlerError> {
        (self.0)(batch.to_vec()).await
    }
}

#[async_trait]
impl<H: MessageHandler + ?Sized> MessageHandler for Arc<H> {
    async fn handle(&self, batch: &[Message]) -> Result<(), HandlerError> {
        (**self).handle(batch).await
    }
}

/// How a batch left the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Handled { attempts: usize },
    Exhausted { attempts: usize },
}

/// Pipeline bound to one (queue, group, partition)
pub(crate) struct Pipeline {
    store: Arc<dyn Store>,
    queue: Arc<ResolvedQueue>,
    group: String,
    partition: u32,
    partition_key: String,
    commit_retry: RetryPolicy,
    handler: Arc<dyn MessageHandler>,
}

impl Pipeline {
    pub(crate) fn new(
        store: Arc<dyn Store>,
        queue: Arc<ResolvedQueue>,
        group: String,
        partition: u32,
        commit_retry: RetryPolicy,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        let partition_key = queue
            .partition_key(partition)
            .unwrap_or_default()
            .to_string();
        Self {
            store,
            queue,
            group,
            partition,
            partition_key,
            commit_retry,
            handler,
        }
    }

    /// `queue[partition]/group`, used in log lines
    pub(crate) fn label(&self) -> String {
        format!("{}[{}]/{}", self.queue.name, self.partition, self.group)
    }

    /// Run the handler under the retry policy, then commit the batch
    pub(crate) async fn process(&self, batch: &[Message]) -> Delivery {
        let handler = self.handler.as_ref();
        let mut attempts = 0;

        let outcome = retry_async_with(
            "handle_batch",
            &self.queue.retry,
            || handler.handle(batch),
            |attempt, error| {
                attempts = attempt;
                log::warn!(
                    "Handler failed for {} on attempt {}: {} [{}]",
                    self.label(),
                    attempt,
                    error,
                    describe(batch)
                );
                true
            },
        )
        .await;

        let delivery = match outcome {
            Ok(()) => Delivery::Handled {
                attempts: attempts + 1,
            },
            Err(error) => {
                log::error!(
                    "Handler gave up on {} after {} attempts, committing anyway: {} [{}]",
                    self.label(),
                    attempts,
                    error,
                    describe(batch)
                );
                Delivery::Exhausted { attempts }
            }
        };

        let ids: Vec<String> = batch.iter().map(|m| m.id.clone()).collect();
        self.commit(&ids).await;
        delivery
    }

    /// Acknowledge ids under the commit policy; failures are only logged
    pub(crate) async fn commit(&self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        let store = &self.store;
        let partition_key = self.partition_key.as_str();
        let group = self.group.as_str();

        let result = retry_async("commit", &self.commit_retry, || async move {
            store.ack(partition_key, group, ids).await
        })
        .await;

        match result {
            Ok(acked) => log::trace!("Committed {} of {} ids on {}", acked, ids.len(), self.label()),
            Err(error) => log::error!(
                "Commit failed for {} (ids {}): {}",
                self.label(),
                ids.join(","),
                error
            ),
        }
    }
}

/// Offsets, keys and send times of a batch for log context
fn describe(batch: &[Message]) -> String {
    batch
        .iter()
        .map(|m| format!("{} key={:?} ts={}", m.id, m.key, format_millis(m.timestamp)))
        .collect::<Vec<_>>()
        .join("; ")
}
