//! Client and per-queue configuration
//!
//! [`ClientConfig`] is what callers write (in TOML or through the builders).
//! [`ClientConfig::resolve`] validates it once and derives every default,
//! producing immutable [`ResolvedQueue`] values shared by the producer,
//! consumers, delay schedulers and the janitor.

use super::error::{ConfigError, ConfigResult};
use crate::core::retry::{RetryConfig, RetryPolicy};
use crate::store::{KeySpace, StartPosition};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on any blocking read so readers re-check their stop signal
pub const MAX_BLOCK_TIMEOUT: Duration = Duration::from_millis(2500);

pub const DEFAULT_PARTITIONS: u32 = 12;
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_MESSAGE_TTL_SECS: u64 = 7 * 24 * 60 * 60;
/// Minimum idle time before another reader may take over a delivery
pub const DEFAULT_CLAIM_IDLE: Duration = Duration::from_secs(5 * 60);

/// Which roles a client takes for a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StartMode {
    None,
    Producer,
    Consumer,
    #[default]
    Both,
}

impl StartMode {
    pub fn producer_enabled(self) -> bool {
        matches!(self, StartMode::Producer | StartMode::Both)
    }

    pub fn consumer_enabled(self) -> bool {
        matches!(self, StartMode::Consumer | StartMode::Both)
    }
}

/// Delayed delivery settings of one queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DelayConfig {
    pub enabled: bool,
    pub check_interval_ms: u64,
    pub batch_size: usize,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval_ms: 10_000,
            batch_size: 100,
        }
    }
}

impl DelayConfig {
    /// Enabled delay queue with the given promotion tick
    pub fn every(check_interval: Duration) -> Self {
        Self {
            enabled: true,
            check_interval_ms: check_interval.as_millis() as u64,
            ..Self::default()
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Settings of one logical queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct QueueConfig {
    pub partitions: u32,
    pub mode: StartMode,
    /// Empty means one group named `<queue>-default-group`
    pub groups: Vec<String>,
    pub batch_size: usize,
    pub batch_interval_ms: u64,
    pub message_ttl_secs: u64,
    pub start_from: StartPosition,
    /// Retry policy for handler failures
    pub retry: RetryConfig,
    pub delay: DelayConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            partitions: DEFAULT_PARTITIONS,
            mode: StartMode::default(),
            groups: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            batch_interval_ms: 1000,
            message_ttl_secs: DEFAULT_MESSAGE_TTL_SECS,
            start_from: StartPosition::default(),
            retry: RetryConfig::default(),
            delay: DelayConfig::default(),
        }
    }
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn partitions(mut self, partitions: u32) -> Self {
        self.partitions = partitions;
        self
    }

    pub fn mode(mut self, mode: StartMode) -> Self {
        self.mode = mode;
        self
    }

    /// Add a consumer group
    pub fn group(mut self, name: impl Into<String>) -> Self {
        self.groups.push(name.into());
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn batch_interval(mut self, interval: Duration) -> Self {
        self.batch_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn message_ttl(mut self, ttl: Duration) -> Self {
        self.message_ttl_secs = ttl.as_secs();
        self
    }

    pub fn start_from(mut self, position: StartPosition) -> Self {
        self.start_from = position;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn delay(mut self, delay: DelayConfig) -> Self {
        self.delay = delay;
        self
    }
}

/// Connection parameters of the backing store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StoreConfig {
    pub url: String,
    /// Prefix of every key the client touches
    pub namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            namespace: "partq".to_string(),
        }
    }
}

/// Everything a [`QueueClient`](super::QueueClient) is constructed from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ClientConfig {
    pub store: StoreConfig,
    pub janitor_interval_secs: u64,
    pub block_timeout_ms: u64,
    pub consumer_name: String,
    /// Unacknowledged entries idle this long are taken over by a reader
    pub claim_idle_ms: u64,
    /// Queues whose sends are silently dropped
    pub exclude_send: Vec<String>,
    pub producer_retry: RetryConfig,
    pub commit_retry: RetryConfig,
    pub queues: BTreeMap<String, QueueConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            janitor_interval_secs: 24 * 60 * 60,
            block_timeout_ms: MAX_BLOCK_TIMEOUT.as_millis() as u64,
            consumer_name: "partq-consumer".to_string(),
            claim_idle_ms: DEFAULT_CLAIM_IDLE.as_millis() as u64,
            exclude_send: Vec::new(),
            producer_retry: RetryConfig::fixed(0, 100),
            commit_retry: RetryConfig::fixed(3, 100),
            queues: BTreeMap::new(),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(contents: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub async fn from_file(path: &Path) -> ConfigResult<Self> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
        Self::from_toml_str(&contents)
    }

    pub fn store_url(mut self, url: impl Into<String>) -> Self {
        self.store.url = url.into();
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.store.namespace = namespace.into();
        self
    }

    pub fn queue(mut self, name: impl Into<String>, config: QueueConfig) -> Self {
        self.queues.insert(name.into(), config);
        self
    }

    pub fn janitor_interval(mut self, interval: Duration) -> Self {
        self.janitor_interval_secs = interval.as_secs();
        self
    }

    pub fn block_timeout(mut self, timeout: Duration) -> Self {
        self.block_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_name = name.into();
        self
    }

    pub fn claim_idle(mut self, idle: Duration) -> Self {
        self.claim_idle_ms = idle.as_millis() as u64;
        self
    }

    pub fn exclude_send(mut self, queue: impl Into<String>) -> Self {
        self.exclude_send.push(queue.into());
        self
    }

    pub fn producer_retry(mut self, retry: RetryConfig) -> Self {
        self.producer_retry = retry;
        self
    }

    pub fn commit_retry(mut self, retry: RetryConfig) -> Self {
        self.commit_retry = retry;
        self
    }

    /// Validate and derive defaults once
    pub fn resolve(&self) -> ConfigResult<ResolvedConfig> {
        if self.janitor_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval {
                field: "janitor-interval-secs".to_string(),
            });
        }
        if self.block_timeout_ms == 0 {
            return Err(ConfigError::ZeroInterval {
                field: "block-timeout-ms".to_string(),
            });
        }
        if self.consumer_name.trim().is_empty() {
            return Err(ConfigError::EmptyConsumerName);
        }
        if self.claim_idle_ms == 0 {
            return Err(ConfigError::ZeroInterval {
                field: "claim-idle-ms".to_string(),
            });
        }

        let keys = KeySpace::new(self.store.namespace.clone());
        let block_timeout = Duration::from_millis(self.block_timeout_ms).min(MAX_BLOCK_TIMEOUT);
        let excluded: HashSet<String> = self.exclude_send.iter().cloned().collect();

        let mut queues = BTreeMap::new();
        for (name, config) in &self.queues {
            let resolved = ResolvedQueue::resolve(name, config, &keys, block_timeout, &excluded)?;
            queues.insert(name.clone(), Arc::new(resolved));
        }

        Ok(ResolvedConfig {
            store: self.store.clone(),
            keys,
            janitor_interval: Duration::from_secs(self.janitor_interval_secs),
            block_timeout,
            consumer_name: self.consumer_name.clone(),
            claim_idle: Duration::from_millis(self.claim_idle_ms),
            producer_retry: self.producer_retry.to_policy(),
            commit_retry: self.commit_retry.to_policy(),
            queues,
        })
    }
}

/// Validated client configuration
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub store: StoreConfig,
    pub keys: KeySpace,
    pub janitor_interval: Duration,
    pub block_timeout: Duration,
    pub consumer_name: String,
    pub claim_idle: Duration,
    pub producer_retry: RetryPolicy,
    pub commit_retry: RetryPolicy,
    pub queues: BTreeMap<String, Arc<ResolvedQueue>>,
}

/// Promotion settings of a delay-enabled queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDelay {
    pub check_interval: Duration,
    pub batch_size: usize,
}

/// Validated settings of one queue, with its store keys precomputed
#[derive(Debug, Clone)]
pub struct ResolvedQueue {
    pub name: String,
    pub partitions: u32,
    pub mode: StartMode,
    /// Never empty; the first entry is the default group
    pub groups: Vec<String>,
    pub batch_size: usize,
    /// Block time of a batched read, never above the client block timeout
    pub batch_interval: Duration,
    pub message_ttl: Duration,
    pub start_from: StartPosition,
    pub retry: RetryPolicy,
    pub delay: Option<ResolvedDelay>,
    pub send_excluded: bool,
    pub partition_keys: Vec<String>,
    pub staging_key: String,
}

impl ResolvedQueue {
    fn resolve(
        name: &str,
        config: &QueueConfig,
        keys: &KeySpace,
        block_timeout: Duration,
        excluded: &HashSet<String>,
    ) -> ConfigResult<Self> {
        let queue = || name.to_string();
        if name.is_empty() {
            return Err(ConfigError::EmptyQueueName);
        }
        if config.partitions == 0 {
            return Err(ConfigError::ZeroPartitions { queue: queue() });
        }
        if config.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize { queue: queue() });
        }
        if config.message_ttl_secs == 0 {
            return Err(ConfigError::ZeroTtl { queue: queue() });
        }

        let mut groups = Vec::with_capacity(config.groups.len().max(1));
        for group in &config.groups {
            if group.trim().is_empty() {
                return Err(ConfigError::EmptyGroupName { queue: queue() });
            }
            if groups.contains(group) {
                return Err(ConfigError::DuplicateGroup {
                    queue: queue(),
                    group: group.clone(),
                });
            }
            groups.push(group.clone());
        }
        if groups.is_empty() {
            groups.push(default_group_name(name));
        }

        let delay = if config.delay.enabled {
            if config.delay.batch_size == 0 {
                return Err(ConfigError::ZeroDelayBatch { queue: queue() });
            }
            if config.delay.check_interval_ms == 0 {
                return Err(ConfigError::ZeroInterval {
                    field: format!("queues.{}.delay.check-interval-ms", name),
                });
            }
            Some(ResolvedDelay {
                check_interval: Duration::from_millis(config.delay.check_interval_ms),
                batch_size: config.delay.batch_size,
            })
        } else {
            None
        };

        let batch_interval = match config.batch_interval_ms {
            0 => block_timeout,
            ms => Duration::from_millis(ms).min(block_timeout),
        };

        Ok(Self {
            name: queue(),
            partitions: config.partitions,
            mode: config.mode,
            groups,
            batch_size: config.batch_size,
            batch_interval,
            message_ttl: Duration::from_secs(config.message_ttl_secs),
            start_from: config.start_from.clone(),
            retry: config.retry.to_policy(),
            delay,
            send_excluded: excluded.contains(name),
            partition_keys: keys.partitions(name, config.partitions),
            staging_key: keys.staging(name),
        })
    }

    pub fn default_group(&self) -> &str {
        // resolve() guarantees at least one group
        self.groups.first().map(String::as_str).unwrap_or_default()
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// Store key of one partition, if the index is in range
    pub fn partition_key(&self, partition: u32) -> Option<&str> {
        self.partition_keys
            .get(partition as usize)
            .map(String::as_str)
    }
}

/// Group used when a queue configures none
pub fn default_group_name(queue: &str) -> String {
    format!("{}-default-group", queue)
}
