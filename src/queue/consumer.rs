//! Consumer group manager
//!
//! A [`Consumer`] is created per queue after its groups were bootstrapped on
//! every partition. Each subscription spawns one reader task per partition.
//! A reader loops on blocking group reads. At start and then once per claim
//! interval it also takes over entries that some reader of the same group
//! was handed but left unacknowledged for longer than that interval, which
//! is how deliveries of a crashed process get finished. Expired entries are
//! dropped before the handler sees them.

use super::config::ResolvedQueue;
use super::error::{QueueError, QueueResult};
use super::message::Message;
use super::pipeline::{MessageHandler, Pipeline};
use crate::core::retry::RetryPolicy;
use crate::core::shutdown::{ShutdownCoordinator, ShutdownSignal};
use crate::core::time::now_millis;
use crate::store::{Store, StreamEntry, CLAIM_SCAN_DONE};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Pause after a failed read before trying again
const READ_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Which consumer group a subscription reads with
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GroupSelector {
    /// The queue's first configured group
    #[default]
    Default,
    /// A group that must be in the queue's configured list
    Named(String),
}

impl From<&str> for GroupSelector {
    fn from(name: &str) -> Self {
        GroupSelector::Named(name.to_string())
    }
}

impl From<String> for GroupSelector {
    fn from(name: String) -> Self {
        GroupSelector::Named(name)
    }
}

impl<T: Into<GroupSelector>> From<Option<T>> for GroupSelector {
    fn from(name: Option<T>) -> Self {
        name.map(Into::into).unwrap_or_default()
    }
}

impl GroupSelector {
    /// Resolve against a queue's configured groups
    pub fn resolve<'a>(&'a self, queue: &'a ResolvedQueue) -> QueueResult<&'a str> {
        match self {
            GroupSelector::Default => Ok(queue.default_group()),
            GroupSelector::Named(name) if queue.has_group(name) => Ok(name),
            GroupSelector::Named(name) => Err(QueueError::UnknownGroup {
                queue: queue.name.clone(),
                group: name.clone(),
            }),
        }
    }
}

/// Read handle for one consumer-enabled queue
#[derive(Clone)]
pub struct Consumer {
    queue: Arc<ResolvedQueue>,
    store: Arc<dyn Store>,
    consumer_name: String,
    block_timeout: Duration,
    claim_idle: Duration,
    commit_retry: RetryPolicy,
    closed: ShutdownSignal,
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("queue", &self.queue.name)
            .field("consumer_name", &self.consumer_name)
            .finish_non_exhaustive()
    }
}

impl Consumer {
    pub(crate) fn new(
        queue: Arc<ResolvedQueue>,
        store: Arc<dyn Store>,
        consumer_name: String,
        block_timeout: Duration,
        claim_idle: Duration,
        commit_retry: RetryPolicy,
        closed: ShutdownSignal,
    ) -> Self {
        Self {
            queue,
            store,
            consumer_name,
            block_timeout,
            claim_idle,
            commit_retry,
            closed,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue.name
    }

    /// Deliver messages one at a time
    pub fn subscribe<H: MessageHandler>(
        &self,
        group: impl Into<GroupSelector>,
        handler: H,
    ) -> QueueResult<Subscription> {
        self.start(group.into(), Arc::new(handler), 1, self.block_timeout)
    }

    /// Deliver messages in batches of up to the queue's batch size, waiting
    /// at most the batch interval for each batch
    pub fn batch_subscribe<H: MessageHandler>(
        &self,
        group: impl Into<GroupSelector>,
        handler: H,
    ) -> QueueResult<Subscription> {
        self.start(
            group.into(),
            Arc::new(handler),
            self.queue.batch_size,
            self.queue.batch_interval,
        )
    }

    fn start(
        &self,
        group: GroupSelector,
        handler: Arc<dyn MessageHandler>,
        count: usize,
        block: Duration,
    ) -> QueueResult<Subscription> {
        if self.closed.is_triggered() {
            return Err(QueueError::Closed);
        }
        let group = group.resolve(&self.queue)?.to_string();
        let stop = ShutdownCoordinator::new();

        let readers = (0..self.queue.partitions)
            .map(|partition| {
                let pipeline = Pipeline::new(
                    self.store.clone(),
                    self.queue.clone(),
                    group.clone(),
                    partition,
                    self.commit_retry.clone(),
                    handler.clone(),
                );
                let reader = PartitionReader {
                    store: self.store.clone(),
                    queue: self.queue.clone(),
                    partition,
                    group: group.clone(),
                    consumer_name: self.consumer_name.clone(),
                    count,
                    block,
                    claim_idle: self.claim_idle,
                    pipeline,
                    stop: stop.subscribe(),
                    closed: self.closed.clone(),
                };
                reader.spawn()
            })
            .collect();

        log::info!(
            "Subscribed to '{}' as group '{}' on {} partitions (batch {})",
            self.queue.name,
            group,
            self.queue.partitions,
            count
        );

        Ok(Subscription {
            queue: self.queue.name.clone(),
            group,
            stop,
            readers,
        })
    }
}

/// Running reader tasks of one subscription
///
/// Dropping the handle leaves the readers running until the client closes.
#[derive(Debug)]
pub struct Subscription {
    queue: String,
    group: String,
    stop: ShutdownCoordinator,
    readers: Vec<JoinHandle<()>>,
}

impl Subscription {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Number of reader tasks still running
    pub fn active_readers(&self) -> usize {
        self.readers.iter().filter(|h| !h.is_finished()).count()
    }

    /// Signal every reader and wait for them to leave their loops
    ///
    /// A batch already in the handler is allowed to finish.
    pub async fn stop(self) {
        self.stop.trigger_shutdown();
        for result in futures::future::join_all(self.readers).await {
            if let Err(error) = result {
                log::warn!("Reader task of '{}' ended abnormally: {}", self.queue, error);
            }
        }
        log::debug!(
            "Subscription of group '{}' on '{}' stopped",
            self.group,
            self.queue
        );
    }
}

struct PartitionReader {
    store: Arc<dyn Store>,
    queue: Arc<ResolvedQueue>,
    partition: u32,
    group: String,
    consumer_name: String,
    count: usize,
    block: Duration,
    claim_idle: Duration,
    pipeline: Pipeline,
    stop: ShutdownSignal,
    closed: ShutdownSignal,
}

impl PartitionReader {
    fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let label = self.pipeline.label();
            if let Err(panic) = AssertUnwindSafe(self.run()).catch_unwind().await {
                log::error!(
                    "Reader for {} panicked and no longer serves its partition: {}",
                    label,
                    panic_message(panic.as_ref())
                );
            }
        })
    }

    fn stopped(&self) -> bool {
        self.stop.is_triggered() || self.closed.is_triggered()
    }

    fn partition_key(&self) -> &str {
        self.queue.partition_key(self.partition).unwrap_or_default()
    }

    async fn run(self) {
        self.claim_stale().await;
        let mut last_claim = Instant::now();

        while !self.stopped() {
            if last_claim.elapsed() >= self.claim_idle {
                self.claim_stale().await;
                last_claim = Instant::now();
            }

            let read = self
                .store
                .read_group(
                    self.partition_key(),
                    &self.group,
                    &self.consumer_name,
                    self.count,
                    self.block,
                )
                .await;

            match read {
                Ok(entries) if entries.is_empty() => continue,
                Ok(entries) => self.deliver(entries).await,
                Err(error) => {
                    log::warn!(
                        "Read failed for {}: {}; retrying in {:?}",
                        self.pipeline.label(),
                        error,
                        READ_ERROR_BACKOFF
                    );
                    tokio::time::sleep(READ_ERROR_BACKOFF).await;
                }
            }
        }
        log::debug!("Reader for {} stopped", self.pipeline.label());
    }

    /// Take over and redeliver entries left unacknowledged past the claim
    /// interval; deliveries still within it are left to their reader
    async fn claim_stale(&self) {
        let mut start = CLAIM_SCAN_DONE.to_string();
        while !self.stopped() {
            let page = match self
                .store
                .claim_stale(
                    self.partition_key(),
                    &self.group,
                    &self.consumer_name,
                    self.claim_idle,
                    &start,
                    self.count,
                )
                .await
            {
                Ok(page) => page,
                Err(error) => {
                    log::warn!(
                        "Could not claim stale entries for {}: {}",
                        self.pipeline.label(),
                        error
                    );
                    return;
                }
            };

            if !page.entries.is_empty() {
                log::info!(
                    "Redelivering {} stale unacknowledged entries on {}",
                    page.entries.len(),
                    self.pipeline.label()
                );
            }
            let last = page.is_last();
            start = page.next;
            self.deliver(page.entries).await;
            if last {
                return;
            }
        }
    }

    /// Drop expired entries, ack deleted ones, run the rest through the pipeline
    async fn deliver(&self, entries: Vec<StreamEntry>) {
        let now = now_millis();
        let mut deleted = Vec::new();
        let mut batch = Vec::with_capacity(entries.len());

        for entry in entries {
            match entry.record {
                None => deleted.push(entry.id),
                Some(record) => {
                    let message =
                        Message::from_record(&self.queue.name, self.partition, entry.id, record);
                    if message.is_expired_at(now) {
                        log::trace!(
                            "Skipping expired message {} on {}",
                            message.id,
                            self.pipeline.label()
                        );
                    } else {
                        batch.push(message);
                    }
                }
            }
        }

        if !deleted.is_empty() {
            self.pipeline.commit(&deleted).await;
        }
        if !batch.is_empty() {
            self.pipeline.process(&batch).await;
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
