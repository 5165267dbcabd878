//! Queue Error Types

use crate::store::StoreError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue '{queue}' is not configured")]
    UnknownQueue { queue: String },

    #[error("Queue '{queue}' is not started in {mode} mode")]
    ModeNotEnabled { queue: String, mode: &'static str },

    #[error("Group '{group}' is not configured for queue '{queue}'")]
    UnknownGroup { queue: String, group: String },

    #[error("Partition {partition} is out of range for queue '{queue}' ({partitions} partitions)")]
    PartitionOutOfRange {
        queue: String,
        partition: u32,
        partitions: u32,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Queue client is closed")]
    Closed,

    #[error("Gave up on '{operation}' after {attempts} attempts: {source}")]
    Exhausted {
        operation: &'static str,
        attempts: usize,
        #[source]
        source: StoreError,
    },
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Problems found while loading or resolving a client configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Queue '{queue}' must have at least one partition")]
    ZeroPartitions { queue: String },

    #[error("Queue '{queue}' has an empty consumer group name")]
    EmptyGroupName { queue: String },

    #[error("Queue '{queue}' lists group '{group}' more than once")]
    DuplicateGroup { queue: String, group: String },

    #[error("Queue '{queue}' must have a batch size greater than zero")]
    ZeroBatchSize { queue: String },

    #[error("Queue '{queue}' must have a message TTL greater than zero")]
    ZeroTtl { queue: String },

    #[error("Queue '{queue}' must promote at least one delayed message per tick")]
    ZeroDelayBatch { queue: String },

    #[error("'{field}' must be greater than zero")]
    ZeroInterval { field: String },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Queue name cannot be empty")]
    EmptyQueueName,

    #[error("Consumer name cannot be empty")]
    EmptyConsumerName,

    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
