use std::time::Duration;

use anyhow::Context as _;
use deadpool_redis::redis::{self, AsyncConnectionConfig, RedisError, Script};
use deadpool_redis::{Connection, Manager, Pool, PoolError, Runtime};

use crate::domain::repository::DispatchQueue;
use crate::domain::types::DispatchEntry;
use crate::error::SchedulerServiceError;

/// Moves the lowest-scored due member of KEYS[1] to the tail of KEYS[2].
const PROMOTE_DUE_SCRIPT: &str = r"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #due == 0 then
  return false
end
redis.call('ZREM', KEYS[1], due[1])
redis.call('RPUSH', KEYS[2], due[1])
return due[1]
";

/// Connection pool whose connections wait up to `response_timeout` for a
/// reply. Blocking pops issued through it must be shorter.
pub fn redis_pool(url: &str, max_size: usize, response_timeout: Duration) -> anyhow::Result<Pool> {
    let connection = AsyncConnectionConfig::new().set_response_timeout(Some(response_timeout));
    let manager = Manager::new_with_config(url, connection).context("invalid redis url")?;
    let pool = Pool::builder(manager)
        .max_size(max_size)
        .runtime(Runtime::Tokio1)
        .build()
        .context("build redis pool")?;
    Ok(pool)
}

/// Dispatch structure in Redis: a sorted set scored by due epoch millis and
/// a list of hashes ready for workers.
#[derive(Clone)]
pub struct RedisDispatchQueue {
    pub pool: Pool,
    pub ordered_set: String,
    pub ready_queue: String,
    promote: Script,
}

impl RedisDispatchQueue {
    pub fn new(pool: Pool, ordered_set: impl Into<String>, ready_queue: impl Into<String>) -> Self {
        Self {
            pool,
            ordered_set: ordered_set.into(),
            ready_queue: ready_queue.into(),
            promote: Script::new(PROMOTE_DUE_SCRIPT),
        }
    }

    async fn conn(&self) -> Result<Connection, SchedulerServiceError> {
        self.pool.get().await.map_err(pool_error)
    }
}

fn pool_error(e: PoolError) -> SchedulerServiceError {
    SchedulerServiceError::StructureUnavailable(format!("redis pool: {e}"))
}

/// Connection-class failures become `StructureUnavailable`; everything else
/// is internal.
fn redis_error(context: &'static str, e: RedisError) -> SchedulerServiceError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
        SchedulerServiceError::StructureUnavailable(format!("{context}: {e}"))
    } else {
        SchedulerServiceError::Internal(anyhow::Error::new(e).context(context))
    }
}

impl DispatchQueue for RedisDispatchQueue {
    async fn schedule(&self, entries: &[DispatchEntry]) -> Result<(), SchedulerServiceError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("ZREM").arg(&self.ordered_set);
        for entry in entries {
            pipe.arg(&entry.hash);
        }
        pipe.ignore();
        pipe.cmd("ZADD").arg(&self.ordered_set);
        for entry in entries {
            pipe.arg(entry.score).arg(&entry.hash);
        }
        pipe.ignore();

        let (): () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("schedule events", e))?;
        Ok(())
    }

    async fn unschedule(&self, hashes: &[String]) -> Result<(), SchedulerServiceError> {
        if hashes.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let _removed: i64 = redis::cmd("ZREM")
            .arg(&self.ordered_set)
            .arg(hashes)
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("unschedule events", e))?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), SchedulerServiceError> {
        let mut conn = self.conn().await?;
        let _removed: i64 = redis::cmd("DEL")
            .arg(&self.ordered_set)
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("clear ordered set", e))?;
        Ok(())
    }

    async fn promote_due(&self, now_ms: i64) -> Result<Option<String>, SchedulerServiceError> {
        let mut conn = self.conn().await?;
        let hash: Option<String> = self
            .promote
            .key(&self.ordered_set)
            .key(&self.ready_queue)
            .arg(now_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| redis_error("promote due event", e))?;
        Ok(hash)
    }

    async fn pop_ready(&self, timeout: Duration) -> Result<Option<String>, SchedulerServiceError> {
        let mut conn = self.conn().await?;
        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(&self.ready_queue)
            .arg(timeout.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("pop ready event", e))?;
        Ok(popped.map(|(_, hash)| hash))
    }

    async fn ping(&self) -> Result<(), SchedulerServiceError> {
        let mut conn = self.conn().await?;
        let _pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("ping", e))?;
        Ok(())
    }
}
