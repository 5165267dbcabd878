//! Backing Store Boundary
//!
//! Everything the queue core needs from its key-value/stream engine is
//! expressed by the [`Store`] trait. Three of the operations are atomic
//! procedures executed by the engine as one indivisible step:
//!
//! - [`Store::bootstrap_groups`]: create missing partition logs and consumer
//!   groups without ever moving an existing group's cursor
//! - [`Store::scripted_send`]: optionally pick the shortest partition, then append
//! - [`Store::promote_delayed`]: move due staged messages into partitions,
//!   removing each from staging only after its append succeeded
//!
//! The remaining operations are plain log / sorted-set primitives; the
//! multi-key ones are pipelined by engines that support it.
//!
//! Two engines are provided: [`RedisStore`] for any Redis-compatible server
//! and [`MemoryStore`], an in-process engine with identical semantics.

mod error;
pub mod keys;
mod memory;
mod redis_store;
mod scripts;

pub use error::{StoreError, StoreResult};
pub use keys::KeySpace;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Field names of a partition log record
pub(crate) const FIELD_KEY: &str = "key";
pub(crate) const FIELD_VALUE: &str = "value";
pub(crate) const FIELD_TIMESTAMP: &str = "ts";
pub(crate) const FIELD_EXPIRY: &str = "expire";

/// Where a consumer group's cursor starts (or is reset to)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StartPosition {
    /// Deliver everything already in the log
    #[default]
    Earliest,
    /// Deliver only entries appended from now on
    Latest,
    /// Deliver entries after the given log id
    At(String),
}

impl StartPosition {
    /// Engine-level id understood by stream group commands
    pub fn as_stream_id(&self) -> &str {
        match self {
            StartPosition::Earliest => "0",
            StartPosition::Latest => "$",
            StartPosition::At(id) => id,
        }
    }
}

impl std::str::FromStr for StartPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "earliest" | "0" => Ok(StartPosition::Earliest),
            "latest" | "$" => Ok(StartPosition::Latest),
            "" => Err("Start position cannot be empty".to_string()),
            id => Ok(StartPosition::At(id.to_string())),
        }
    }
}

impl std::fmt::Display for StartPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartPosition::Earliest => write!(f, "earliest"),
            StartPosition::Latest => write!(f, "latest"),
            StartPosition::At(id) => write!(f, "{}", id),
        }
    }
}

/// One record of a partition log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub key: String,
    pub value: String,
    /// Send time, unix milliseconds
    pub timestamp: i64,
    /// Absolute expiry, unix milliseconds
    pub expiry: i64,
}

/// A log entry as returned by reads; `record` is `None` when the entry was
/// deleted while still pending for a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub record: Option<LogRecord>,
}

/// Result of one step of a stale-entry claim scan
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClaimedPage {
    /// Where the next step starts; `CLAIM_SCAN_DONE` once the scan wrapped
    pub next: String,
    /// Entries now owned by the claiming consumer. Entries deleted from the
    /// log come back with `record: None` and are already gone from the
    /// group's pending list.
    pub entries: Vec<StreamEntry>,
}

impl ClaimedPage {
    pub fn is_last(&self) -> bool {
        self.next == CLAIM_SCAN_DONE
    }
}

/// Start and end cursor of a claim scan
pub const CLAIM_SCAN_DONE: &str = "0-0";

/// Arguments of the atomic send procedure
#[derive(Debug, Clone, Copy)]
pub struct SendRequest<'a> {
    /// All partition logs of the queue in index order
    pub partitions: &'a [String],
    /// Partition chosen client-side; `None` appends to the shortest log
    pub partition: Option<u32>,
    pub record: &'a LogRecord,
}

/// Arguments of the atomic promotion procedure
#[derive(Debug, Clone, Copy)]
pub struct PromoteRequest<'a> {
    pub staging: &'a str,
    pub partitions: &'a [String],
    /// Entries with due-score <= `now` are promoted
    pub now: i64,
    pub batch_size: usize,
    /// Expiry stamped on every promoted record
    pub expiry: i64,
}

/// Wire shape of a staged member: a JSON object with at least these fields
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StagedEnvelope {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub partition: Option<u32>,
}

/// Primitives the queue core consumes from its backing engine
///
/// Implementations must be safe for concurrent use by many tasks; the core
/// adds no locking of its own on top.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Create each partition log and the named group on it when absent
    async fn bootstrap_groups(
        &self,
        partitions: &[String],
        group: &str,
        start: &StartPosition,
    ) -> StoreResult<()>;

    /// Append a record, choosing the shortest partition when none is given;
    /// returns the partition index used
    async fn scripted_send(&self, request: SendRequest<'_>) -> StoreResult<u32>;

    /// Move due staged messages into partitions; returns how many moved
    async fn promote_delayed(&self, request: PromoteRequest<'_>) -> StoreResult<usize>;

    /// Insert a member into a staging set with the given due-score
    async fn stage_delayed(&self, staging: &str, due_at: i64, member: &str) -> StoreResult<()>;

    /// Number of members currently staged
    async fn staged_count(&self, staging: &str) -> StoreResult<usize>;

    /// Read up to `count` entries never delivered to `group`, waiting up to
    /// `block` for data; they become pending for `consumer`
    async fn read_group(
        &self,
        partition: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> StoreResult<Vec<StreamEntry>>;

    /// Take over up to `count` entries pending in `group` for any consumer
    /// and unacknowledged for at least `min_idle`, scanning from `start`.
    /// Claimed entries belong to `consumer` and their idle time restarts.
    async fn claim_stale(
        &self,
        partition: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        start: &str,
        count: usize,
    ) -> StoreResult<ClaimedPage>;

    /// Acknowledge processed entries; returns how many were pending
    async fn ack(&self, partition: &str, group: &str, ids: &[String]) -> StoreResult<usize>;

    /// Entries with id strictly greater than `after` (from the start when `None`)
    async fn range(
        &self,
        partition: &str,
        after: Option<&str>,
        count: usize,
    ) -> StoreResult<Vec<StreamEntry>>;

    /// Delete specific entries from several logs in one round trip
    async fn delete_entries(&self, batches: &[(String, Vec<String>)]) -> StoreResult<usize>;

    /// Current number of entries in a log (0 when absent)
    async fn partition_len(&self, partition: &str) -> StoreResult<usize>;

    /// Move a group's cursor on each log in one round trip
    async fn set_group_cursor(
        &self,
        partitions: &[String],
        group: &str,
        position: &StartPosition,
    ) -> StoreResult<()>;

    /// Remove a group from every existing log; missing logs are skipped
    async fn destroy_group(&self, partitions: &[String], group: &str) -> StoreResult<()>;

    /// Delete whole keys (logs or staging sets); returns how many existed
    async fn delete_keys(&self, keys: &[String]) -> StoreResult<usize>;
}
