// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared-store backend over Redis.
//!
//! Multi-step decisions (identity-checked insert, ceiling-checked
//! claim, stall release, retention pruning) run as server-side scripts
//! so every process sharing the store observes one atomic outcome.
//! Key names come from [`crate::keys`]; job records are stored as JSON
//! strings, queue membership as sorted sets scored by the timestamp
//! that orders each queue.
//!
//! Expiring records (rate ledger, breaker window, trial token,
//! heartbeats, cache slots) lean on server-side TTLs, so the `now_ms`
//! arguments of the store traits are ignored here; they exist for the
//! in-process backend, which has no server clock.

use crate::connection::Connect;
use crate::error::StoreError;
use crate::keys;
use crate::traits::{
    CacheStore, CoordinationStore, JobStore, PutOutcome, QueueDepths, RetentionPolicy,
};
use async_trait::async_trait;
use conveyor_core::{CacheEntry, Heartbeat, Identity, Job, JobId, JobState, WorkerId};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use std::sync::Arc;

/// Insert a job unless its identity mark is held, taking the mark
/// unconditionally when overwriting.
const PUT_JOB: &str = r#"
local holder = redis.call('GET', KEYS[1])
if holder and ARGV[4] == '0' then
  return holder
end
redis.call('SET', KEYS[1], ARGV[1])
redis.call('SET', KEYS[2], ARGV[2])
redis.call('ZADD', KEYS[3], tonumber(ARGV[3]), ARGV[1])
return false
"#;

/// Promote due delayed jobs (patching their records back to waiting),
/// then pop the best waiting job unless the active set is at the
/// ceiling. Returns the claimed job id or nil.
const CLAIM_NEXT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', ARGV[1])
for _, m in ipairs(due) do
  redis.call('ZREM', KEYS[3], m)
  local rank, enq, id = string.match(m, '^(%d+):(%d+):(.+)$')
  if id then
    local jkey = ARGV[3] .. id
    local raw = redis.call('GET', jkey)
    if raw then
      local job = cjson.decode(raw)
      job['state'] = 'waiting'
      job['not_before_ms'] = nil
      redis.call('SET', jkey, cjson.encode(job))
    end
    local target = KEYS[2]
    if rank == '0' then target = KEYS[1] end
    redis.call('ZADD', target, tonumber(enq), id)
  end
end
if redis.call('ZCARD', KEYS[4]) >= tonumber(ARGV[2]) then
  return false
end
local popped = redis.call('ZPOPMIN', KEYS[1])
if #popped == 0 then
  popped = redis.call('ZPOPMIN', KEYS[2])
end
if #popped == 0 then
  return false
end
redis.call('ZADD', KEYS[4], tonumber(ARGV[1]), popped[1])
return popped[1]
"#;

/// Rewrite a job record and move it between queue sets, releasing the
/// identity mark when the new state is terminal and the mark still
/// points at this job.
const UPDATE_JOB: &str = r#"
redis.call('SET', KEYS[1], ARGV[2])
redis.call('ZREM', KEYS[3], ARGV[3])
redis.call('ZADD', KEYS[4], tonumber(ARGV[5]), ARGV[4])
if ARGV[6] == '1' then
  local holder = redis.call('GET', KEYS[2])
  if holder == ARGV[1] then
    redis.call('DEL', KEYS[2])
  end
end
return 1
"#;

/// Return overdue claims to the waiting queues, patching the stored
/// record in place. The spent attempt stays counted.
const REQUEUE_STALLED: &str = r#"
local released = {}
local stalled = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, id in ipairs(stalled) do
  redis.call('ZREM', KEYS[1], id)
  local jkey = ARGV[2] .. id
  local raw = redis.call('GET', jkey)
  if raw then
    local job = cjson.decode(raw)
    job['state'] = 'waiting'
    job['claimed_at_ms'] = nil
    job['claimed_by'] = nil
    job['last_error'] = 'claim stalled past timeout'
    redis.call('SET', jkey, cjson.encode(job))
    local target = KEYS[3]
    if job['priority'] == 'high' then target = KEYS[2] end
    redis.call('ZADD', target, tonumber(job['enqueued_at_ms']) or 0, id)
    table.insert(released, id)
  end
end
return released
"#;

/// Drop one terminal bucket's jobs past the age cutoff, then trim the
/// bucket to its keep count, oldest first. Returns how many went.
const PRUNE_BUCKET: &str = r#"
local removed = 0
local aged = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, id in ipairs(aged) do
  redis.call('DEL', ARGV[3] .. id)
  redis.call('ZREM', KEYS[1], id)
  removed = removed + 1
end
local size = redis.call('ZCARD', KEYS[1])
local keep = tonumber(ARGV[2])
if size > keep then
  local excess = redis.call('ZRANGE', KEYS[1], 0, size - keep - 1)
  for _, id in ipairs(excess) do
    redis.call('DEL', ARGV[3] .. id)
    redis.call('ZREM', KEYS[1], id)
    removed = removed + 1
  end
end
return removed
"#;

/// Discard every waiting and delayed job along with the identity marks
/// they hold. Active jobs are untouched.
const DRAIN_PENDING: &str = r#"
local dropped = 0
local function drop(id)
  local jkey = ARGV[1] .. id
  local raw = redis.call('GET', jkey)
  if raw then
    local job = cjson.decode(raw)
    local ikey = ARGV[2] .. job['identity']
    if redis.call('GET', ikey) == id then
      redis.call('DEL', ikey)
    end
    redis.call('DEL', jkey)
  end
  dropped = dropped + 1
end
for _, id in ipairs(redis.call('ZRANGE', KEYS[1], 0, -1)) do drop(id) end
for _, id in ipairs(redis.call('ZRANGE', KEYS[2], 0, -1)) do drop(id) end
for _, m in ipairs(redis.call('ZRANGE', KEYS[3], 0, -1)) do
  local id = string.match(m, '^%d+:%d+:(.+)$')
  if id then drop(id) end
end
redis.call('DEL', KEYS[1], KEYS[2], KEYS[3])
return dropped
"#;

/// Windowed counter: the first increment opens the window, later
/// increments do not extend it.
const INCR_WINDOW: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Count a cache hit only while the slot exists, so the counter never
/// resurrects a dropped entry.
const RECORD_HIT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return redis.call('HINCRBY', KEYS[1], 'hits', 1)
end
return 0
"#;

struct Scripts {
    put_job: Script,
    claim_next: Script,
    update_job: Script,
    requeue_stalled: Script,
    prune_bucket: Script,
    drain_pending: Script,
    incr_window: Script,
    record_hit: Script,
}

impl Scripts {
    fn new() -> Self {
        Self {
            put_job: Script::new(PUT_JOB),
            claim_next: Script::new(CLAIM_NEXT),
            update_job: Script::new(UPDATE_JOB),
            requeue_stalled: Script::new(REQUEUE_STALLED),
            prune_bucket: Script::new(PRUNE_BUCKET),
            drain_pending: Script::new(DRAIN_PENDING),
            incr_window: Script::new(INCR_WINDOW),
            record_hit: Script::new(RECORD_HIT),
        }
    }
}

#[derive(Clone)]
pub struct RedisBackend {
    conn: MultiplexedConnection,
    scripts: Arc<Scripts>,
}

/// Queue member string for a job in `state`. Delayed members carry the
/// priority rank and enqueue time so a promotion can restore the job's
/// original queue position without reading the record.
fn member_for(job: &Job, state: JobState) -> String {
    match state {
        JobState::Delayed => format!("{}:{}:{}", job.priority.rank(), job.enqueued_at_ms, job.id),
        _ => job.id.to_string(),
    }
}

/// Queue score for a job in `state`: the timestamp that orders that
/// queue.
fn score_for(job: &Job, state: JobState) -> u64 {
    match state {
        JobState::Waiting => job.enqueued_at_ms,
        JobState::Delayed => job.not_before_ms.unwrap_or(job.enqueued_at_ms),
        JobState::Active => job.claimed_at_ms.unwrap_or(job.enqueued_at_ms),
        JobState::Completed | JobState::Failed => job.finished_at_ms.unwrap_or(job.enqueued_at_ms),
    }
}

fn queue_for(job: &Job, state: JobState) -> &'static str {
    match state {
        JobState::Waiting => keys::waiting_for(job.priority),
        JobState::Delayed => keys::DELAYED,
        JobState::Active => keys::ACTIVE,
        JobState::Completed => keys::COMPLETED,
        JobState::Failed => keys::FAILED,
    }
}

fn decode_job(raw: &str) -> Result<Job, StoreError> {
    Ok(serde_json::from_str(raw)?)
}

impl RedisBackend {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            scripts: Arc::new(Scripts::new()),
        }
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for RedisBackend {
    async fn put_job(&self, job: &Job, overwrite_identity: bool) -> Result<PutOutcome, StoreError> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(job)?;
        let holder: Option<String> = self
            .scripts
            .put_job
            .key(keys::identity(&job.identity))
            .key(keys::job(&job.id))
            .key(keys::waiting_for(job.priority))
            .arg(job.id.as_str())
            .arg(json)
            .arg(job.enqueued_at_ms)
            .arg(if overwrite_identity { "1" } else { "0" })
            .invoke_async(&mut conn)
            .await?;
        Ok(match holder {
            Some(id) => PutOutcome::DuplicateOf(JobId::from_string(id)),
            None => PutOutcome::Inserted,
        })
    }

    async fn claim_next(
        &self,
        worker: &WorkerId,
        max_active: usize,
        now_ms: u64,
    ) -> Result<Option<Job>, StoreError> {
        let mut conn = self.conn.clone();
        let claimed: Option<String> = self
            .scripts
            .claim_next
            .key(keys::WAITING_HIGH)
            .key(keys::WAITING_NORMAL)
            .key(keys::DELAYED)
            .key(keys::ACTIVE)
            .arg(now_ms)
            .arg(max_active)
            .arg(keys::JOB_PREFIX)
            .invoke_async(&mut conn)
            .await?;
        let Some(id) = claimed else {
            return Ok(None);
        };

        // The claim itself is committed in the script; the record
        // rewrite below trails it. A crash in between leaves an active
        // set entry with a waiting record, which the stall sweep
        // returns to the queue.
        let job_key = format!("{}{id}", keys::JOB_PREFIX);
        let raw: Option<String> = conn.get(&job_key).await?;
        let Some(raw) = raw else {
            return Err(StoreError::backend(format!(
                "claimed job {id} has no record"
            )));
        };
        let mut job = decode_job(&raw)?;
        job.claim(worker.clone(), now_ms)
            .map_err(|err| StoreError::backend(err.to_string()))?;
        let _: () = conn.set(&job_key, serde_json::to_string(&job)?).await?;
        Ok(Some(job))
    }

    async fn update_job(&self, job: &Job, prev: JobState, _now_ms: u64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(job)?;
        let _: i64 = self
            .scripts
            .update_job
            .key(keys::job(&job.id))
            .key(keys::identity(&job.identity))
            .key(queue_for(job, prev))
            .key(queue_for(job, job.state))
            .arg(job.id.as_str())
            .arg(json)
            .arg(member_for(job, prev))
            .arg(member_for(job, job.state))
            .arg(score_for(job, job.state))
            .arg(if job.state.is_terminal() { "1" } else { "0" })
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(keys::job(id)).await?;
        raw.as_deref().map(decode_job).transpose()
    }

    async fn find_in_flight(&self, identity: &Identity) -> Result<Option<Job>, StoreError> {
        let mut conn = self.conn.clone();
        let id: Option<String> = conn.get(keys::identity(identity)).await?;
        let Some(id) = id else {
            return Ok(None);
        };
        let raw: Option<String> = conn.get(format!("{}{id}", keys::JOB_PREFIX)).await?;
        let job = raw.as_deref().map(decode_job).transpose()?;
        Ok(job.filter(|j| j.is_in_flight()))
    }

    async fn queue_depths(&self) -> Result<QueueDepths, StoreError> {
        let mut conn = self.conn.clone();
        let (high, normal, delayed, active, completed, failed): (
            usize,
            usize,
            usize,
            usize,
            usize,
            usize,
        ) = redis::pipe()
            .zcard(keys::WAITING_HIGH)
            .zcard(keys::WAITING_NORMAL)
            .zcard(keys::DELAYED)
            .zcard(keys::ACTIVE)
            .zcard(keys::COMPLETED)
            .zcard(keys::FAILED)
            .query_async(&mut conn)
            .await?;
        Ok(QueueDepths {
            waiting: high + normal,
            active,
            delayed,
            completed,
            failed,
        })
    }

    async fn requeue_stalled(
        &self,
        stall_timeout_ms: u64,
        now_ms: u64,
    ) -> Result<Vec<JobId>, StoreError> {
        let mut conn = self.conn.clone();
        let cutoff = now_ms.saturating_sub(stall_timeout_ms);
        let released: Vec<String> = self
            .scripts
            .requeue_stalled
            .key(keys::ACTIVE)
            .key(keys::WAITING_HIGH)
            .key(keys::WAITING_NORMAL)
            .arg(cutoff)
            .arg(keys::JOB_PREFIX)
            .invoke_async(&mut conn)
            .await?;
        Ok(released.into_iter().map(JobId::from_string).collect())
    }

    async fn prune_terminal(
        &self,
        policy: &RetentionPolicy,
        now_ms: u64,
    ) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let mut removed = 0u64;
        for (bucket, retention_ms, keep_count) in [
            (
                keys::COMPLETED,
                policy.completed_retention_ms,
                policy.completed_keep_count,
            ),
            (
                keys::FAILED,
                policy.failed_retention_ms,
                policy.failed_keep_count,
            ),
        ] {
            let count: u64 = self
                .scripts
                .prune_bucket
                .key(bucket)
                .arg(now_ms.saturating_sub(retention_ms))
                .arg(keep_count)
                .arg(keys::JOB_PREFIX)
                .invoke_async(&mut conn)
                .await?;
            removed += count;
        }
        Ok(removed)
    }

    async fn drain_pending(&self) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let dropped: u64 = self
            .scripts
            .drain_pending
            .key(keys::WAITING_HIGH)
            .key(keys::WAITING_NORMAL)
            .key(keys::DELAYED)
            .arg(keys::JOB_PREFIX)
            .arg(keys::IDENT_PREFIX)
            .invoke_async(&mut conn)
            .await?;
        Ok(dropped)
    }
}

#[async_trait]
impl CoordinationStore for RedisBackend {
    async fn kv_put_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_ms: u64,
        _now_ms: u64,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let set: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(set.is_some())
    }

    async fn kv_put(
        &self,
        key: &str,
        value: &str,
        ttl_ms: Option<u64>,
        _now_ms: u64,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl_ms {
            cmd.arg("PX").arg(ttl);
        }
        let _: String = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn kv_get(&self, key: &str, _now_ms: u64) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn kv_delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn kv_incr_window(
        &self,
        key: &str,
        window_ms: u64,
        _now_ms: u64,
    ) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let count: u64 = self
            .scripts
            .incr_window
            .key(key)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn put_heartbeat(
        &self,
        heartbeat: &Heartbeat,
        ttl_ms: u64,
        _now_ms: u64,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(heartbeat)?;
        let _: ((), i64) = redis::pipe()
            .cmd("SET")
            .arg(keys::heartbeat(&heartbeat.worker_id))
            .arg(json)
            .arg("PX")
            .arg(ttl_ms)
            .cmd("SADD")
            .arg(keys::HEARTBEAT_INDEX)
            .arg(heartbeat.worker_id.as_str())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn list_heartbeats(&self, _now_ms: u64) -> Result<Vec<Heartbeat>, StoreError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(keys::HEARTBEAT_INDEX).await?;
        let mut beats = Vec::with_capacity(ids.len());
        for id in ids {
            let worker = WorkerId::from_string(id);
            let raw: Option<String> = conn.get(keys::heartbeat(&worker)).await?;
            match raw {
                Some(raw) => beats.push(serde_json::from_str::<Heartbeat>(&raw)?),
                // Beat expired; drop the index entry lazily.
                None => {
                    let _: () = conn
                        .srem(keys::HEARTBEAT_INDEX, worker.as_str())
                        .await?;
                }
            }
        }
        beats.sort_by(|a, b| a.worker_id.as_str().cmp(b.worker_id.as_str()));
        Ok(beats)
    }
}

#[async_trait]
impl CacheStore for RedisBackend {
    async fn cache_get(
        &self,
        keys_in: &[String],
        _now_ms: u64,
    ) -> Result<Vec<Option<CacheEntry>>, StoreError> {
        if keys_in.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for key in keys_in {
            pipe.cmd("HMGET").arg(keys::cache(key)).arg("entry").arg("hits");
        }
        let rows: Vec<(Option<String>, Option<u64>)> = pipe.query_async(&mut conn).await?;
        let mut out = Vec::with_capacity(rows.len());
        for (raw, hits) in rows {
            match raw {
                Some(raw) => {
                    let mut entry: CacheEntry = serde_json::from_str(&raw)?;
                    // The live counter is authoritative over the
                    // snapshot embedded at write time.
                    entry.hit_count = hits.unwrap_or(0).min(u64::from(u32::MAX)) as u32;
                    out.push(Some(entry));
                }
                None => out.push(None),
            }
        }
        Ok(out)
    }

    async fn cache_put(
        &self,
        entries: &[CacheEntry],
        keep_extra_ms: u64,
        _now_ms: u64,
    ) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for entry in entries {
            let key = keys::cache(&entry.key.canonical());
            let json = serde_json::to_string(entry)?;
            pipe.cmd("HSET")
                .arg(&key)
                .arg("entry")
                .arg(json)
                .arg("hits")
                .arg(entry.hit_count)
                .ignore();
            pipe.cmd("PEXPIREAT")
                .arg(&key)
                .arg(entry.expires_at_ms.saturating_add(keep_extra_ms))
                .ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn cache_record_hit(&self, key: &str, _now_ms: u64) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let count: u64 = self
            .scripts
            .record_hit
            .key(keys::cache(key))
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }
}

/// Dialer producing [`RedisBackend`] handles for the connection
/// manager.
pub struct RedisConnect {
    client: redis::Client,
}

impl RedisConnect {
    pub fn new(url: &str) -> Result<Self, StoreError> {
        Ok(Self {
            client: redis::Client::open(url)?,
        })
    }
}

#[async_trait]
impl Connect for RedisConnect {
    type Backend = RedisBackend;

    async fn connect(&self) -> Result<RedisBackend, StoreError> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(RedisBackend::new(conn))
    }

    async fn ping(&self, backend: &RedisBackend) -> Result<(), StoreError> {
        backend.ping().await
    }
}

#[cfg(test)]
#[path = "redis_backend_tests.rs"]
mod tests;
