//! Redis-compatible store engine
//!
//! Partition logs are streams, the staging area is a sorted set, and the
//! three atomic procedures are Lua scripts (see `scripts.rs`). Short
//! commands share one auto-reconnecting multiplexed connection; blocking
//! group reads check out a dedicated connection from a small idle pool so
//! a parked `XREADGROUP ... BLOCK` never stalls other traffic.

use super::scripts;
use super::{
    ClaimedPage, LogRecord, PromoteRequest, SendRequest, StartPosition, Store, StoreError,
    StoreResult, StreamEntry, FIELD_EXPIRY, FIELD_KEY, FIELD_TIMESTAMP, FIELD_VALUE,
};
use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{StreamId, StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Script};
use std::time::Duration;
use tokio::sync::Mutex;

/// Idle blocking-read connections kept around for reuse
const MAX_IDLE_READERS: usize = 64;

pub struct RedisStore {
    client: redis::Client,
    shared: ConnectionManager,
    idle_readers: Mutex<Vec<MultiplexedConnection>>,
    bootstrap: Script,
    send: Script,
    promote: Script,
    destroy_group: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("connection", self.client.get_connection_info())
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to the server at `url` (e.g. `redis://127.0.0.1:6379/0`)
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let shared = ConnectionManager::new(client.clone()).await?;
        log::debug!("Connected to store at {}", client.get_connection_info().addr);

        Ok(Self {
            client,
            shared,
            idle_readers: Mutex::new(Vec::new()),
            bootstrap: Script::new(scripts::BOOTSTRAP),
            send: Script::new(scripts::SEND),
            promote: Script::new(scripts::PROMOTE),
            destroy_group: Script::new(scripts::DESTROY_GROUP),
        })
    }

    fn connection(&self) -> ConnectionManager {
        self.shared.clone()
    }

    async fn checkout_reader(&self) -> StoreResult<MultiplexedConnection> {
        if let Some(con) = self.idle_readers.lock().await.pop() {
            return Ok(con);
        }
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn checkin_reader(&self, con: MultiplexedConnection) {
        let mut idle = self.idle_readers.lock().await;
        if idle.len() < MAX_IDLE_READERS {
            idle.push(con);
        }
    }
}

/// `[next, [[id, fields]...], [deleted ids]]`; servers before 7.0 omit the
/// deleted list
fn claimed_from_reply(reply: &[redis::Value]) -> StoreResult<ClaimedPage> {
    let protocol = |message: &str| StoreError::Protocol {
        message: format!("XAUTOCLAIM: {}", message),
    };
    let (next, claimed) = match reply {
        [next, claimed, ..] => (next, claimed),
        _ => return Err(protocol("short reply")),
    };
    let next: String = redis::from_redis_value(next)?;
    let claimed: StreamRangeReply = redis::from_redis_value(claimed)?;
    let deleted: Vec<String> = match reply.get(2) {
        Some(value) => redis::from_redis_value(value)?,
        None => Vec::new(),
    };

    let mut entries: Vec<StreamEntry> = claimed.ids.iter().map(entry_from).collect();
    entries.extend(deleted.into_iter().map(|id| StreamEntry { id, record: None }));
    Ok(ClaimedPage { next, entries })
}

fn entry_from(stream_id: &StreamId) -> StreamEntry {
    let record = match (
        stream_id.get::<String>(FIELD_KEY),
        stream_id.get::<String>(FIELD_VALUE),
        stream_id.get::<i64>(FIELD_TIMESTAMP),
        stream_id.get::<i64>(FIELD_EXPIRY),
    ) {
        (Some(key), Some(value), Some(timestamp), Some(expiry)) => Some(LogRecord {
            key,
            value,
            timestamp,
            expiry,
        }),
        _ => None,
    };
    StreamEntry {
        id: stream_id.id.clone(),
        record,
    }
}

fn index_from_reply(raw: i64, partition_count: usize) -> StoreResult<u32> {
    if raw < 0 || raw as usize >= partition_count {
        return Err(StoreError::Protocol {
            message: format!(
                "send script returned partition {} for {} partitions",
                raw, partition_count
            ),
        });
    }
    Ok(raw as u32)
}

#[async_trait]
impl Store for RedisStore {
    async fn bootstrap_groups(
        &self,
        partitions: &[String],
        group: &str,
        start: &StartPosition,
    ) -> StoreResult<()> {
        if partitions.is_empty() {
            return Ok(());
        }
        let mut invocation = self.bootstrap.prepare_invoke();
        for key in partitions {
            invocation.key(key);
        }
        invocation.arg(group).arg(start.as_stream_id());

        let mut con = self.connection();
        let created: i64 = invocation.invoke_async(&mut con).await?;
        if created > 0 {
            log::debug!(
                "Created group '{}' on {} of {} partition logs",
                group,
                created,
                partitions.len()
            );
        }
        Ok(())
    }

    async fn scripted_send(&self, request: SendRequest<'_>) -> StoreResult<u32> {
        if request.partitions.is_empty() {
            return Err(StoreError::Protocol {
                message: "send requires at least one partition".to_string(),
            });
        }
        let mut invocation = self.send.prepare_invoke();
        for key in request.partitions {
            invocation.key(key);
        }
        let explicit = request.partition.map_or(-1i64, i64::from);
        invocation
            .arg(explicit)
            .arg(&request.record.key)
            .arg(&request.record.value)
            .arg(request.record.timestamp)
            .arg(request.record.expiry);

        let mut con = self.connection();
        let raw: i64 = invocation.invoke_async(&mut con).await?;
        index_from_reply(raw, request.partitions.len())
    }

    async fn promote_delayed(&self, request: PromoteRequest<'_>) -> StoreResult<usize> {
        if request.partitions.is_empty() || request.batch_size == 0 {
            return Ok(0);
        }
        let mut invocation = self.promote.prepare_invoke();
        invocation.key(request.staging);
        for key in request.partitions {
            invocation.key(key);
        }
        invocation
            .arg(request.now)
            .arg(request.batch_size)
            .arg(request.expiry);

        let mut con = self.connection();
        let moved: usize = invocation.invoke_async(&mut con).await?;
        Ok(moved)
    }

    async fn stage_delayed(&self, staging: &str, due_at: i64, member: &str) -> StoreResult<()> {
        let mut con = self.connection();
        let _: usize = con.zadd(staging, member, due_at).await?;
        Ok(())
    }

    async fn staged_count(&self, staging: &str) -> StoreResult<usize> {
        let mut con = self.connection();
        Ok(con.zcard(staging).await?)
    }

    async fn read_group(
        &self,
        partition: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> StoreResult<Vec<StreamEntry>> {
        let mut options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count);
        if !block.is_zero() {
            options = options.block(block.as_millis().max(1) as usize);
        }

        let mut con = self.checkout_reader().await?;
        let reply: Option<StreamReadReply> =
            con.xread_options(&[partition], &[">"], &options).await?;
        self.checkin_reader(con).await;

        Ok(reply
            .map(|reply| {
                reply
                    .keys
                    .iter()
                    .flat_map(|stream| stream.ids.iter().map(entry_from))
                    .collect()
            })
            .unwrap_or_default())
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
        let mut con = self.connection();
        let reply: Vec<redis::Value> = redis::cmd("XAUTOCLAIM")
            .arg(partition)
            .arg(group)
            .arg(consumer)
            .arg(min_idle.as_millis() as u64)
            .arg(start)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut con)
            .await?;
        claimed_from_reply(&reply)
    }

    async fn ack(&self, partition: &str, group: &str, ids: &[String]) -> StoreResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut con = self.connection();
        Ok(con.xack(partition, group, ids).await?)
    }

    async fn range(
        &self,
        partition: &str,
        after: Option<&str>,
        count: usize,
    ) -> StoreResult<Vec<StreamEntry>> {
        let start = match after {
            Some(id) => format!("({}", id),
            None => "-".to_string(),
        };
        let mut con = self.connection();
        let reply: StreamRangeReply = con.xrange_count(partition, start, "+", count).await?;
        Ok(reply.ids.iter().map(entry_from).collect())
    }

    async fn delete_entries(&self, batches: &[(String, Vec<String>)]) -> StoreResult<usize> {
        let mut pipe = redis::pipe();
        let mut commands = 0;
        for (key, ids) in batches.iter().filter(|(_, ids)| !ids.is_empty()) {
            pipe.cmd("XDEL").arg(key).arg(ids);
            commands += 1;
        }
        if commands == 0 {
            return Ok(0);
        }
        let mut con = self.connection();
        let deleted: Vec<usize> = pipe.query_async(&mut con).await?;
        Ok(deleted.into_iter().sum())
    }

    async fn partition_len(&self, partition: &str) -> StoreResult<usize> {
        let mut con = self.connection();
        Ok(con.xlen(partition).await?)
    }

    async fn set_group_cursor(
        &self,
        partitions: &[String],
        group: &str,
        position: &StartPosition,
    ) -> StoreResult<()> {
        if partitions.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for key in partitions {
            pipe.cmd("XGROUP")
                .arg("SETID")
                .arg(key)
                .arg(group)
                .arg(position.as_stream_id())
                .ignore();
        }
        let mut con = self.connection();
        let () = pipe.query_async(&mut con).await?;
        Ok(())
    }

    async fn destroy_group(&self, partitions: &[String], group: &str) -> StoreResult<()> {
        if partitions.is_empty() {
            return Ok(());
        }
        let mut invocation = self.destroy_group.prepare_invoke();
        for key in partitions {
            invocation.key(key);
        }
        invocation.arg(group);
        let mut con = self.connection();
        let destroyed: i64 = invocation.invoke_async(&mut con).await?;
        log::debug!("Destroyed group '{}' on {} partition logs", group, destroyed);
        Ok(())
    }

    async fn delete_keys(&self, keys: &[String]) -> StoreResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut con = self.connection();
        Ok(con.del(keys).await?)
    }
}
