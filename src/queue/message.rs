//! Message types
//!
//! [`ProducerMessage`] is what callers send, [`DelayMessage`] is how a
//! delayed send is staged, and [`Message`] is what handlers receive.

use crate::core::time::add_millis;
use crate::store::LogRecord;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// An outbound message
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProducerMessage {
    /// Routing key; empty routes to the shortest partition
    pub key: String,
    pub value: String,
    /// Zero sends immediately
    pub delay: Duration,
}

impl ProducerMessage {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    /// Message serialized as JSON
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::to_string(value)?))
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A delayed message as staged until its due time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayMessage {
    pub id: String,
    pub queue: String,
    pub key: String,
    pub value: String,
    /// Target partition for keyed messages; `None` promotes to the shortest
    pub partition: Option<u32>,
    pub enqueued_at: i64,
    pub due_at: i64,
}

impl DelayMessage {
    pub(crate) fn new(
        queue: &str,
        message: ProducerMessage,
        partition: Option<u32>,
        now: i64,
    ) -> Self {
        let due_at = add_millis(now, message.delay);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            queue: queue.to_string(),
            key: message.key,
            value: message.value,
            partition,
            enqueued_at: now,
            due_at,
        }
    }
}

/// A message delivered to a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub queue: String,
    pub partition: u32,
    /// Log id within the partition
    pub id: String,
    pub key: String,
    pub value: String,
    /// Send time, unix milliseconds
    pub timestamp: i64,
    /// Absolute expiry, unix milliseconds
    pub expiry: i64,
}

impl Message {
    pub(crate) fn from_record(queue: &str, partition: u32, id: String, record: LogRecord) -> Self {
        Self {
            queue: queue.to_string(),
            partition,
            id,
            key: record.key,
            value: record.value,
            timestamp: record.timestamp,
            expiry: record.expiry,
        }
    }

    /// Expired messages are invisible to consumers
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.expiry
    }

    /// Deserialize a JSON payload
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.value)
    }
}
