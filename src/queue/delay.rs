//! Delay scheduler
//!
//! One loop per delay-enabled queue. Every tick runs the atomic promotion
//! procedure once; store errors are logged and the next tick tries again.

use super::config::{ResolvedDelay, ResolvedQueue};
use crate::core::shutdown::ShutdownSignal;
use crate::core::time::{add_millis, now_millis};
use crate::store::{PromoteRequest, Store, StoreResult};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub struct DelayScheduler {
    queue: Arc<ResolvedQueue>,
    settings: ResolvedDelay,
    store: Arc<dyn Store>,
}

impl DelayScheduler {
    /// `None` when the queue has no delay queue enabled
    pub fn new(queue: Arc<ResolvedQueue>, store: Arc<dyn Store>) -> Option<Self> {
        let settings = queue.delay.clone()?;
        Some(Self {
            queue,
            settings,
            store,
        })
    }

    /// Promote every staged message that is due, up to one batch
    pub async fn promote_once(&self) -> StoreResult<usize> {
        let now = now_millis();
        self.store
            .promote_delayed(PromoteRequest {
                staging: &self.queue.staging_key,
                partitions: &self.queue.partition_keys,
                now,
                batch_size: self.settings.batch_size,
                expiry: add_millis(now, self.queue.message_ttl),
            })
            .await
    }

    /// Run the tick loop until `stop` fires
    pub fn spawn(self, mut stop: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.settings.check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            log::debug!(
                "Delay scheduler for '{}' started, checking every {:?}",
                self.queue.name,
                self.settings.check_interval
            );

            loop {
                tokio::select! {
                    _ = stop.wait() => break,
                    _ = ticker.tick() => {
                        match self.promote_once().await {
                            Ok(0) => {}
                            Ok(moved) => log::info!(
                                "Transferred {} delayed messages into '{}'",
                                moved,
                                self.queue.name
                            ),
                            Err(error) => log::error!(
                                "Delay promotion for '{}' failed: {}",
                                self.queue.name,
                                error
                            ),
                        }
                    }
                }
            }

            log::debug!("Delay scheduler for '{}' stopped", self.queue.name);
        })
    }
}
