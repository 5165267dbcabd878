//! Queue client
//!
//! The entry point of the library. A client owns its resolved
//! configuration, the shared store handle and its background tasks: one
//! janitor and one delay scheduler per delay-enabled producer queue. Each
//! task has its own stop signal; [`QueueClient::close`] fires all of them.

use super::config::{ClientConfig, ResolvedConfig, ResolvedQueue};
use super::consumer::{Consumer, GroupSelector, Subscription};
use super::delay::DelayScheduler;
use super::error::{QueueError, QueueResult};
use super::janitor::{collect_expired, Janitor};
use super::message::{Message, ProducerMessage};
use super::pipeline::MessageHandler;
use super::producer::{Producer, SendOutcome};
use crate::core::retry::retry_async;
use crate::core::shutdown::ShutdownCoordinator;
use crate::core::time::now_millis;
use crate::store::{RedisStore, StartPosition, Store, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

struct BackgroundTask {
    stop: ShutdownCoordinator,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    async fn shut_down(self, name: &str) {
        self.stop.trigger_shutdown();
        if let Err(error) = self.handle.await {
            log::warn!("{} ended abnormally: {}", name, error);
        }
    }
}

pub struct QueueClient {
    config: ResolvedConfig,
    store: Arc<dyn Store>,
    shutdown: ShutdownCoordinator,
    janitor: Mutex<Option<BackgroundTask>>,
    schedulers: Mutex<HashMap<String, BackgroundTask>>,
}

impl std::fmt::Debug for QueueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueClient")
            .field("store", &self.config.store.url)
            .field("queues", &self.config.queues.keys().collect::<Vec<_>>())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl QueueClient {
    /// Connect to the configured Redis-compatible store and start the
    /// background tasks
    pub async fn connect(config: ClientConfig) -> QueueResult<Self> {
        let resolved = config.resolve()?;
        let store = RedisStore::connect(&resolved.store.url).await?;
        Ok(Self::start(resolved, Arc::new(store)))
    }

    /// Build a client on an existing store engine
    ///
    /// Must be called inside a Tokio runtime; background tasks are spawned
    /// immediately.
    pub fn with_store(config: ClientConfig, store: Arc<dyn Store>) -> QueueResult<Self> {
        Ok(Self::start(config.resolve()?, store))
    }

    fn start(config: ResolvedConfig, store: Arc<dyn Store>) -> Self {
        let mut schedulers = HashMap::new();
        for queue in config.queues.values() {
            if !queue.mode.producer_enabled() {
                continue;
            }
            if let Some(scheduler) = DelayScheduler::new(queue.clone(), store.clone()) {
                let stop = ShutdownCoordinator::new();
                let handle = scheduler.spawn(stop.subscribe());
                schedulers.insert(queue.name.clone(), BackgroundTask { stop, handle });
            }
        }

        let janitor_stop = ShutdownCoordinator::new();
        let janitor = Janitor::new(
            config.queues.values(),
            store.clone(),
            config.janitor_interval,
        )
        .spawn(janitor_stop.subscribe());

        log::info!(
            "Queue client started with {} queues ({} delay schedulers)",
            config.queues.len(),
            schedulers.len()
        );

        Self {
            config,
            store,
            shutdown: ShutdownCoordinator::new(),
            janitor: Mutex::new(Some(BackgroundTask {
                stop: janitor_stop,
                handle: janitor,
            })),
            schedulers: Mutex::new(schedulers),
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_shutdown_requested()
    }

    fn ensure_open(&self) -> QueueResult<()> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    /// Resolved settings of a configured queue
    pub fn queue_config(&self, queue: &str) -> QueueResult<&Arc<ResolvedQueue>> {
        self.config
            .queues
            .get(queue)
            .ok_or_else(|| QueueError::UnknownQueue {
                queue: queue.to_string(),
            })
    }

    pub fn new_producer(&self, queue: &str) -> QueueResult<Producer> {
        self.ensure_open()?;
        let resolved = self.queue_config(queue)?;
        if !resolved.mode.producer_enabled() {
            return Err(QueueError::ModeNotEnabled {
                queue: queue.to_string(),
                mode: "producer",
            });
        }
        Ok(Producer::new(
            resolved.clone(),
            self.store.clone(),
            self.config.producer_retry.clone(),
            self.shutdown.subscribe(),
        ))
    }

    /// Create a consumer, bootstrapping every configured group on every
    /// partition first
    pub async fn new_consumer(&self, queue: &str) -> QueueResult<Consumer> {
        self.ensure_open()?;
        let resolved = self.queue_config(queue)?;
        if !resolved.mode.consumer_enabled() {
            return Err(QueueError::ModeNotEnabled {
                queue: queue.to_string(),
                mode: "consumer",
            });
        }

        let store = &self.store;
        let partitions = resolved.partition_keys.as_slice();
        let start = &resolved.start_from;
        for group in &resolved.groups {
            let group = group.as_str();
            retry_async("bootstrap_groups", &self.config.commit_retry, || async move {
                store.bootstrap_groups(partitions, group, start).await
            })
            .await?;
        }
        log::debug!(
            "Bootstrapped groups {:?} on {} partitions of '{}'",
            resolved.groups,
            resolved.partitions,
            queue
        );

        Ok(Consumer::new(
            resolved.clone(),
            self.store.clone(),
            self.config.consumer_name.clone(),
            self.config.block_timeout,
            self.config.claim_idle,
            self.config.commit_retry.clone(),
            self.shutdown.subscribe(),
        ))
    }

    pub async fn send_message(
        &self,
        queue: &str,
        message: ProducerMessage,
    ) -> QueueResult<SendOutcome> {
        self.new_producer(queue)?.send(message).await
    }

    pub async fn subscribe<H: MessageHandler>(
        &self,
        queue: &str,
        group: impl Into<GroupSelector>,
        handler: H,
    ) -> QueueResult<Subscription> {
        self.new_consumer(queue).await?.subscribe(group, handler)
    }

    pub async fn batch_subscribe<H: MessageHandler>(
        &self,
        queue: &str,
        group: impl Into<GroupSelector>,
        handler: H,
    ) -> QueueResult<Subscription> {
        self.new_consumer(queue).await?.batch_subscribe(group, handler)
    }

    /// Messages of `queue` whose expiry has passed, optionally deleting them
    pub async fn get_expired_messages(&self, queue: &str, delete: bool) -> QueueResult<Vec<Message>> {
        self.ensure_open()?;
        let resolved = self.queue_config(queue)?;
        collect_expired(self.store.as_ref(), resolved, now_millis(), delete).await
    }

    /// Move a group's cursor on every partition of `queue`
    pub async fn reset_consumer_offset(
        &self,
        queue: &str,
        group: impl Into<GroupSelector>,
        position: StartPosition,
    ) -> QueueResult<()> {
        self.ensure_open()?;
        let resolved = self.queue_config(queue)?;
        let selector: GroupSelector = group.into();
        let group = selector.resolve(resolved)?;
        self.store
            .set_group_cursor(&resolved.partition_keys, group, &position)
            .await?;
        log::info!(
            "Reset group '{}' on all partitions of '{}' to {}",
            group,
            queue,
            position
        );
        Ok(())
    }

    /// Move a group's cursor on one partition of `queue`
    pub async fn reset_consumer_offset_by_partition(
        &self,
        queue: &str,
        group: impl Into<GroupSelector>,
        partition: u32,
        position: StartPosition,
    ) -> QueueResult<()> {
        self.ensure_open()?;
        let resolved = self.queue_config(queue)?;
        let selector: GroupSelector = group.into();
        let group = selector.resolve(resolved)?;
        let key = resolved
            .partition_key(partition)
            .ok_or_else(|| QueueError::PartitionOutOfRange {
                queue: queue.to_string(),
                partition,
                partitions: resolved.partitions,
            })?;
        self.store
            .set_group_cursor(&[key.to_string()], group, &position)
            .await?;
        log::info!(
            "Reset group '{}' on {}[{}] to {}",
            group,
            queue,
            partition,
            position
        );
        Ok(())
    }

    /// Remove a consumer group from every partition of `queue`
    ///
    /// Any group name is accepted so groups dropped from the configuration
    /// can still be cleaned up.
    pub async fn del_group(&self, queue: &str, group: &str) -> QueueResult<()> {
        self.ensure_open()?;
        let resolved = self.queue_config(queue)?;
        if group.trim().is_empty() {
            return Err(QueueError::UnknownGroup {
                queue: queue.to_string(),
                group: group.to_string(),
            });
        }
        self.store
            .destroy_group(&resolved.partition_keys, group)
            .await?;
        log::info!("Deleted group '{}' from '{}'", group, queue);
        Ok(())
    }

    /// Delete every partition log and the staging area of `queue`
    pub async fn del_queue(&self, queue: &str) -> QueueResult<usize> {
        self.ensure_open()?;
        let resolved = self.queue_config(queue)?;
        let mut keys = resolved.partition_keys.clone();
        keys.push(resolved.staging_key.clone());
        let deleted = self.store.delete_keys(&keys).await?;
        log::info!("Deleted queue '{}' ({} keys)", queue, deleted);
        Ok(deleted)
    }

    /// Number of delayed messages waiting in `queue`'s staging area
    pub async fn staged_count(&self, queue: &str) -> QueueResult<usize> {
        let resolved = self.queue_config(queue)?;
        Ok(self.store.staged_count(&resolved.staging_key).await?)
    }

    /// Number of entries currently in one partition log
    pub async fn partition_len(&self, queue: &str, partition: u32) -> QueueResult<usize> {
        let resolved = self.queue_config(queue)?;
        let key = resolved
            .partition_key(partition)
            .ok_or_else(|| QueueError::PartitionOutOfRange {
                queue: queue.to_string(),
                partition,
                partitions: resolved.partitions,
            })?;
        Ok(self.store.partition_len(key).await?)
    }

    /// Stop one queue's delay scheduler; returns false if none was running
    pub async fn stop_delay_scheduler(&self, queue: &str) -> QueueResult<bool> {
        let task = lock(&self.schedulers)?.remove(queue);
        match task {
            Some(task) => {
                task.shut_down(&format!("Delay scheduler for '{}'", queue))
                    .await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Stop all background tasks and reject further operations
    ///
    /// Readers observe the close within one block timeout. Calling this more
    /// than once is harmless.
    pub async fn close(&self) -> QueueResult<()> {
        self.shutdown.trigger_shutdown();

        let janitor = lock(&self.janitor)?.take();
        let schedulers: Vec<(String, BackgroundTask)> = lock(&self.schedulers)?.drain().collect();

        if let Some(janitor) = janitor {
            janitor.shut_down("Janitor").await;
        }
        for (queue, task) in schedulers {
            task.shut_down(&format!("Delay scheduler for '{}'", queue))
                .await;
        }
        log::info!("Queue client closed");
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> QueueResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| QueueError::Store(StoreError::Poisoned))
}
