//! Janitor
//!
//! Periodically hard-deletes expired entries from every partition of the
//! producer-enabled queues. Consumer progress is not consulted.

use super::config::ResolvedQueue;
use super::error::QueueResult;
use super::message::Message;
use crate::core::shutdown::ShutdownSignal;
use crate::core::time::now_millis;
use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Entries fetched per range call
pub const SCAN_PAGE_SIZE: usize = 100;

/// Find entries of `queue` expired at `now`, deleting them when asked
pub async fn collect_expired(
    store: &dyn Store,
    queue: &ResolvedQueue,
    now: i64,
    delete: bool,
) -> QueueResult<Vec<Message>> {
    let mut expired = Vec::new();
    let mut deleted = 0;

    for (partition, key) in (0u32..).zip(queue.partition_keys.iter()) {
        let mut after: Option<String> = None;

        loop {
            let page = store.range(key, after.as_deref(), SCAN_PAGE_SIZE).await?;
            let full_page = page.len() == SCAN_PAGE_SIZE;
            after = page.last().map(|entry| entry.id.clone());

            let mut ids = Vec::new();
            for entry in page {
                let Some(record) = entry.record else { continue };
                if now >= record.expiry {
                    ids.push(entry.id.clone());
                    expired.push(Message::from_record(
                        &queue.name,
                        partition,
                        entry.id,
                        record,
                    ));
                }
            }

            // The range cursor is exclusive, so deleting behind it is safe
            if delete && !ids.is_empty() {
                deleted += store.delete_entries(&[(key.clone(), ids)]).await?;
            }
            if !full_page {
                break;
            }
        }
    }

    if delete && deleted > 0 {
        log::info!(
            "Deleted {} expired messages from '{}'",
            deleted,
            queue.name
        );
    }
    Ok(expired)
}

pub struct Janitor {
    queues: Vec<Arc<ResolvedQueue>>,
    store: Arc<dyn Store>,
    interval: Duration,
}

impl Janitor {
    /// Only producer-enabled queues are swept
    pub fn new<'a>(
        queues: impl IntoIterator<Item = &'a Arc<ResolvedQueue>>,
        store: Arc<dyn Store>,
        interval: Duration,
    ) -> Self {
        Self {
            queues: queues
                .into_iter()
                .filter(|q| q.mode.producer_enabled())
                .cloned()
                .collect(),
            store,
            interval,
        }
    }

    /// One pass over every queue; a failing queue does not stop the others
    pub async fn sweep_once(&self) -> usize {
        let now = now_millis();
        let mut removed = 0;
        for queue in &self.queues {
            match collect_expired(self.store.as_ref(), queue, now, true).await {
                Ok(expired) => removed += expired.len(),
                Err(error) => log::error!("Janitor sweep of '{}' failed: {}", queue.name, error),
            }
        }
        removed
    }

    pub fn spawn(self, mut stop: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stop.wait() => break,
                    _ = ticker.tick() => {
                        let removed = self.sweep_once().await;
                        log::debug!("Janitor pass removed {} expired messages", removed);
                    }
                }
            }
            log::debug!("Janitor stopped");
        })
    }
}
