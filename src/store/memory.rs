//! In-process store engine
//!
//! Implements the full [`Store`] contract on in-memory structures. Every
//! operation runs under one lock, which makes each of the scripted
//! procedures atomic exactly as a scripting engine would. Blocking group
//! reads park on a [`Notify`] that every append wakes.

use super::{
    ClaimedPage, LogRecord, PromoteRequest, SendRequest, StagedEnvelope, StartPosition, Store,
    StoreError, StoreResult, StreamEntry, CLAIM_SCAN_DONE,
};
use crate::core::time::now_millis;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Log entry id, ordered like stream ids: `<millis>-<sequence>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
struct EntryId {
    ms: u64,
    seq: u64,
}

impl EntryId {
    const ZERO: EntryId = EntryId { ms: 0, seq: 0 };

    fn parse(raw: &str) -> StoreResult<Self> {
        let invalid = || StoreError::InvalidId { id: raw.to_string() };
        let (ms, seq) = match raw.split_once('-') {
            Some((ms, seq)) => (ms, seq),
            None => (raw, "0"),
        };
        Ok(EntryId {
            ms: ms.parse().map_err(|_| invalid())?,
            seq: seq.parse().map_err(|_| invalid())?,
        })
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// Owner of a delivered, unacknowledged entry
#[derive(Debug, Clone)]
struct PendingEntry {
    consumer: String,
    delivered_at: Instant,
}

impl PendingEntry {
    fn new(consumer: &str) -> Self {
        Self {
            consumer: consumer.to_string(),
            delivered_at: Instant::now(),
        }
    }
}

#[derive(Debug, Default)]
struct GroupState {
    last_delivered: EntryId,
    pending: BTreeMap<EntryId, PendingEntry>,
}

#[derive(Debug, Default)]
struct Log {
    entries: BTreeMap<EntryId, LogRecord>,
    last_id: EntryId,
    groups: HashMap<String, GroupState>,
}

impl Log {
    fn append(&mut self, record: LogRecord) -> EntryId {
        let now = now_millis().max(0) as u64;
        let id = if now > self.last_id.ms {
            EntryId { ms: now, seq: 0 }
        } else {
            EntryId {
                ms: self.last_id.ms,
                seq: self.last_id.seq + 1,
            }
        };
        self.last_id = id;
        self.entries.insert(id, record);
        id
    }

    fn resolve(&self, position: &StartPosition) -> StoreResult<EntryId> {
        match position {
            StartPosition::Earliest => Ok(EntryId::ZERO),
            StartPosition::Latest => Ok(self.last_id),
            StartPosition::At(id) => EntryId::parse(id),
        }
    }

    fn entry(&self, id: EntryId) -> StreamEntry {
        StreamEntry {
            id: id.to_string(),
            record: self.entries.get(&id).cloned(),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    logs: HashMap<String, Log>,
    /// staging key -> (member -> due score)
    staging: HashMap<String, HashMap<String, i64>>,
}

impl State {
    fn shortest(&self, partitions: &[String]) -> u32 {
        let mut best = 0u32;
        let mut best_len = usize::MAX;
        for (idx, key) in partitions.iter().enumerate() {
            let len = self.logs.get(key).map_or(0, |log| log.entries.len());
            if len < best_len {
                best_len = len;
                best = idx as u32;
            }
        }
        best
    }

    fn group_mut(&mut self, key: &str, group: &str) -> StoreResult<&mut GroupState> {
        self.logs
            .get_mut(key)
            .and_then(|log| log.groups.get_mut(group))
            .ok_or_else(|| StoreError::NoGroup {
                key: key.to_string(),
                group: group.to_string(),
            })
    }
}

/// In-memory engine with the same semantics as [`super::RedisStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    appended: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Entries delivered to `group` on `partition` but not yet acknowledged
    pub fn pending_count(&self, partition: &str, group: &str) -> usize {
        self.lock()
            .ok()
            .and_then(|state| {
                state
                    .logs
                    .get(partition)
                    .and_then(|log| log.groups.get(group))
                    .map(|g| g.pending.len())
            })
            .unwrap_or(0)
    }

    /// Whether `group` exists on `partition`
    pub fn has_group(&self, partition: &str, group: &str) -> bool {
        self.lock()
            .map(|state| {
                state
                    .logs
                    .get(partition)
                    .is_some_and(|log| log.groups.contains_key(group))
            })
            .unwrap_or(false)
    }

    fn deliver_new(
        &self,
        partition: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> StoreResult<Vec<StreamEntry>> {
        let mut state = self.lock()?;
        let log = state
            .logs
            .get_mut(partition)
            .ok_or_else(|| StoreError::NoGroup {
                key: partition.to_string(),
                group: group.to_string(),
            })?;
        let Log {
            entries, groups, ..
        } = log;
        let group_state = groups.get_mut(group).ok_or_else(|| StoreError::NoGroup {
            key: partition.to_string(),
            group: group.to_string(),
        })?;

        let ids: Vec<EntryId> = entries
            .range((Bound::Excluded(group_state.last_delivered), Bound::Unbounded))
            .take(count)
            .map(|(id, _)| *id)
            .collect();

        let mut delivered = Vec::with_capacity(ids.len());
        for id in ids {
            group_state.last_delivered = id;
            group_state.pending.insert(id, PendingEntry::new(consumer));
            delivered.push(StreamEntry {
                id: id.to_string(),
                record: entries.get(&id).cloned(),
            });
        }
        Ok(delivered)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn bootstrap_groups(
        &self,
        partitions: &[String],
        group: &str,
        start: &StartPosition,
    ) -> StoreResult<()> {
        let mut state = self.lock()?;
        for key in partitions {
            let log = state.logs.entry(key.clone()).or_default();
            if !log.groups.contains_key(group) {
                let last_delivered = log.resolve(start)?;
                log.groups.insert(
                    group.to_string(),
                    GroupState {
                        last_delivered,
                        pending: BTreeMap::new(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn scripted_send(&self, request: SendRequest<'_>) -> StoreResult<u32> {
        let partition_count = request.partitions.len();
        if partition_count == 0 {
            return Err(StoreError::Protocol {
                message: "send requires at least one partition".to_string(),
            });
        }

        let index = {
            let mut state = self.lock()?;
            let index = match request.partition {
                Some(idx) if (idx as usize) < partition_count => idx,
                Some(idx) => {
                    return Err(StoreError::Protocol {
                        message: format!(
                            "partition {} out of range for {} partitions",
                            idx, partition_count
                        ),
                    })
                }
                None => state.shortest(request.partitions),
            };
            state
                .logs
                .entry(request.partitions[index as usize].clone())
                .or_default()
                .append(request.record.clone());
            index
        };

        self.appended.notify_waiters();
        Ok(index)
    }

    async fn promote_delayed(&self, request: PromoteRequest<'_>) -> StoreResult<usize> {
        let partition_count = request.partitions.len();
        if partition_count == 0 || request.batch_size == 0 {
            return Ok(0);
        }

        let moved = {
            let mut state = self.lock()?;
            let mut due: Vec<(i64, String)> = match state.staging.get(request.staging) {
                Some(set) => set
                    .iter()
                    .filter(|(_, score)| **score <= request.now)
                    .map(|(member, score)| (*score, member.clone()))
                    .collect(),
                None => Vec::new(),
            };
            due.sort();
            due.truncate(request.batch_size);

            let mut moved = 0usize;
            for (_, member) in due {
                let envelope: StagedEnvelope = match serde_json::from_str(&member) {
                    Ok(envelope) => envelope,
                    Err(_) => continue,
                };
                let index = match envelope.partition {
                    Some(idx) if (idx as usize) < partition_count => idx,
                    _ => state.shortest(request.partitions),
                };
                state
                    .logs
                    .entry(request.partitions[index as usize].clone())
                    .or_default()
                    .append(LogRecord {
                        key: envelope.key,
                        value: envelope.value,
                        timestamp: request.now,
                        expiry: request.expiry,
                    });
                if let Some(set) = state.staging.get_mut(request.staging) {
                    set.remove(&member);
                }
                moved += 1;
            }
            moved
        };

        if moved > 0 {
            self.appended.notify_waiters();
        }
        Ok(moved)
    }

    async fn stage_delayed(&self, staging: &str, due_at: i64, member: &str) -> StoreResult<()> {
        let mut state = self.lock()?;
        state
            .staging
            .entry(staging.to_string())
            .or_default()
            .insert(member.to_string(), due_at);
        Ok(())
    }

    async fn staged_count(&self, staging: &str) -> StoreResult<usize> {
        let state = self.lock()?;
        Ok(state.staging.get(staging).map_or(0, |set| set.len()))
    }

    async fn read_group(
        &self,
        partition: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> StoreResult<Vec<StreamEntry>> {
        let deadline = tokio::time::Instant::now() + block;
        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let delivered = self.deliver_new(partition, group, consumer, count)?;
            if !delivered.is_empty() {
                return Ok(delivered);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
    }

    async fn claim_stale(
        &self,
        partition: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        start: &str,
        count: usize,
    ) -> StoreResult<ClaimedPage> {
        let start = EntryId::parse(start)?;
        let now = Instant::now();
        let mut state = self.lock()?;
        let log = state
            .logs
            .get_mut(partition)
            .ok_or_else(|| StoreError::NoGroup {
                key: partition.to_string(),
                group: group.to_string(),
            })?;
        let Log {
            entries, groups, ..
        } = log;
        let group_state = groups.get_mut(group).ok_or_else(|| StoreError::NoGroup {
            key: partition.to_string(),
            group: group.to_string(),
        })?;

        let mut claimed = Vec::new();
        let mut next = None;
        for (id, owner) in group_state.pending.range_mut(start..) {
            if claimed.len() == count {
                next = Some(*id);
                break;
            }
            if now.duration_since(owner.delivered_at) < min_idle {
                continue;
            }
            *owner = PendingEntry {
                consumer: consumer.to_string(),
                delivered_at: now,
            };
            claimed.push(*id);
        }

        let mut page = ClaimedPage {
            next: next.map_or_else(|| CLAIM_SCAN_DONE.to_string(), |id| id.to_string()),
            entries: Vec::with_capacity(claimed.len()),
        };
        for id in claimed {
            let record = entries.get(&id).cloned();
            if record.is_none() {
                group_state.pending.remove(&id);
            }
            page.entries.push(StreamEntry {
                id: id.to_string(),
                record,
            });
        }
        Ok(page)
    }

    async fn ack(&self, partition: &str, group: &str, ids: &[String]) -> StoreResult<usize> {
        let mut state = self.lock()?;
        let group_state = match state
            .logs
            .get_mut(partition)
            .and_then(|log| log.groups.get_mut(group))
        {
            Some(group_state) => group_state,
            None => return Ok(0),
        };
        let mut acked = 0;
        for id in ids {
            if group_state.pending.remove(&EntryId::parse(id)?).is_some() {
                acked += 1;
            }
        }
        Ok(acked)
    }

    async fn range(
        &self,
        partition: &str,
        after: Option<&str>,
        count: usize,
    ) -> StoreResult<Vec<StreamEntry>> {
        let lower = match after {
            Some(id) => Bound::Excluded(EntryId::parse(id)?),
            None => Bound::Unbounded,
        };
        let state = self.lock()?;
        Ok(match state.logs.get(partition) {
            Some(log) => log
                .entries
                .range((lower, Bound::Unbounded))
                .take(count)
                .map(|(id, record)| StreamEntry {
                    id: id.to_string(),
                    record: Some(record.clone()),
                })
                .collect(),
            None => Vec::new(),
        })
    }

    async fn delete_entries(&self, batches: &[(String, Vec<String>)]) -> StoreResult<usize> {
        let mut state = self.lock()?;
        let mut deleted = 0;
        for (key, ids) in batches {
            if let Some(log) = state.logs.get_mut(key) {
                for id in ids {
                    if log.entries.remove(&EntryId::parse(id)?).is_some() {
                        deleted += 1;
                    }
                }
            }
        }
        Ok(deleted)
    }

    async fn partition_len(&self, partition: &str) -> StoreResult<usize> {
        let state = self.lock()?;
        Ok(state.logs.get(partition).map_or(0, |log| log.entries.len()))
    }

    async fn set_group_cursor(
        &self,
        partitions: &[String],
        group: &str,
        position: &StartPosition,
    ) -> StoreResult<()> {
        let mut state = self.lock()?;
        for key in partitions {
            let target = match state.logs.get(key) {
                Some(log) => log.resolve(position)?,
                None => EntryId::ZERO,
            };
            state.group_mut(key, group)?.last_delivered = target;
        }
        Ok(())
    }

    async fn destroy_group(&self, partitions: &[String], group: &str) -> StoreResult<()> {
        let mut state = self.lock()?;
        for key in partitions {
            if let Some(log) = state.logs.get_mut(key) {
                log.groups.remove(group);
            }
        }
        Ok(())
    }

    async fn delete_keys(&self, keys: &[String]) -> StoreResult<usize> {
        let mut state = self.lock()?;
        let mut existed = 0;
        for key in keys {
            if state.logs.remove(key).is_some() {
                existed += 1;
            }
            if state.staging.remove(key).is_some() {
                existed += 1;
            }
        }
        Ok(existed)
    }
}
