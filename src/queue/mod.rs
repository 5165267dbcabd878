//! Partitioned Message Queue
//!
//! An at-least-once message queue over a Redis-compatible store. Each
//! logical queue is split into a fixed number of partitions, each backed by
//! one append-only log. Messages sharing a key always land in the same
//! partition, so per-key order is preserved; keyless messages go to the
//! shortest partition.
//!
//! # Overview
//!
//! - **Producer**: routes and appends through an atomic store procedure,
//!   retrying transient store errors
//! - **Delay scheduler**: stages delayed messages and promotes them into
//!   partitions once due, exactly once per staged entry
//! - **Consumer groups**: independent cursors; one reader task per
//!   (queue, group, partition)
//! - **Retry/ack pipeline**: retries the handler, then commits the batch
//! - **Janitor**: hard-deletes expired entries regardless of delivery
//!
//! # Architecture
//!
//! ```text
//!  send ──► router ──► [send script] ──┐
//!                                      ▼
//!  send(delay) ──► staging ──► [promote script] ──► p:0  p:1 ... p:N-1
//!                                                    │    │        │
//!                                            reader per partition per group
//!                                                    ▼
//!                                   expiry filter ──► handler ──► commit
//! ```
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use partq::queue::{handler_fn, ClientConfig, HandlerError, Message, ProducerMessage,
//!                    QueueClient, QueueConfig, GroupSelector};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::new().queue("orders", QueueConfig::new().partitions(4));
//! let client = QueueClient::connect(config).await?;
//!
//! client
//!     .send_message("orders", ProducerMessage::new("{\"id\":1}").with_key("customer-7"))
//!     .await?;
//!
//! let subscription = client
//!     .subscribe(
//!         "orders",
//!         GroupSelector::Default,
//!         handler_fn(|batch: Vec<Message>| async move {
//!             println!("received {}", batch[0].value);
//!             Ok::<(), HandlerError>(())
//!         }),
//!     )
//!     .await?;
//!
//! subscription.stop().await;
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod consumer;
mod delay;
mod error;
mod janitor;
mod message;
mod pipeline;
mod producer;
mod router;

pub use client::QueueClient;
pub use config::{
    default_group_name, ClientConfig, DelayConfig, QueueConfig, ResolvedConfig, ResolvedDelay,
    ResolvedQueue, StartMode, StoreConfig, DEFAULT_CLAIM_IDLE, MAX_BLOCK_TIMEOUT,
};
pub use consumer::{Consumer, GroupSelector, Subscription};
pub use delay::DelayScheduler;
pub use error::{ConfigError, ConfigResult, QueueError, QueueResult};
pub use janitor::{collect_expired, Janitor, SCAN_PAGE_SIZE};
pub use message::{DelayMessage, Message, ProducerMessage};
pub use pipeline::{handler_fn, FnHandler, HandlerError, MessageHandler};
pub use producer::{Producer, SendOutcome};
pub use router::{fnv1a32, route, Route};

pub use crate::core::retry::{Backoff, BackoffKind, RetryConfig, RetryPolicy};
pub use crate::store::StartPosition;

#[cfg(test)]
mod tests;
