//! Redis-backed job queue (durable, shared between worker processes).
//!
//! ## Key layout (`{prefix}` is the queue name)
//!
//! - `{prefix}:id`: id counter (`INCR`)
//! - `{prefix}:job:{id}`: job JSON
//! - `{prefix}:wait`: ready list (`LPUSH` in, `RPOPLPUSH` out)
//! - `{prefix}:active`: jobs handed to a worker and not yet settled
//! - `{prefix}:delayed`: redelivery schedule, scored by due time (epoch ms)
//! - `{prefix}:done`: ids of terminal jobs
//!
//! Due delayed jobs are promoted to the ready list by a Lua script before
//! every dequeue, so promotion is atomic across workers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{RedisError, Script};
use tracing::{debug, instrument, warn};

use jobflow_core::{Job, JobId, JobState, NewJob};

use super::{BrokerError, BrokerResult, QueueBroker};

const PROMOTE_DUE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, id in ipairs(due) do
    redis.call('ZREM', KEYS[1], id)
    redis.call('LPUSH', KEYS[2], id)
end
return #due
"#;

impl From<RedisError> for BrokerError {
    fn from(err: RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            BrokerError::Connectivity(err.to_string())
        } else {
            BrokerError::Command(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Keys {
    prefix: String,
}

impl Keys {
    fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn id(&self) -> String {
        format!("{}:id", self.prefix)
    }

    fn job(&self, id: JobId) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    fn wait(&self) -> String {
        format!("{}:wait", self.prefix)
    }

    fn active(&self) -> String {
        format!("{}:active", self.prefix)
    }

    fn delayed(&self) -> String {
        format!("{}:delayed", self.prefix)
    }

    fn done(&self) -> String {
        format!("{}:done", self.prefix)
    }
}

pub struct RedisBroker {
    conn: ConnectionManager,
    keys: Keys,
    promote: Script,
    closed: AtomicBool,
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker")
            .field("prefix", &self.keys.prefix)
            .finish_non_exhaustive()
    }
}

impl RedisBroker {
    /// Connect to `redis_url`; keys are namespaced under `queue_name`.
    ///
    /// The connection manager reconnects on its own after a drop; calls made
    /// while Redis is unreachable fail with [`BrokerError::Connectivity`].
    pub async fn connect(redis_url: &str, queue_name: &str) -> BrokerResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| BrokerError::Connectivity(e.to_string()))?;
        let conn = ConnectionManager::new(client).await?;

        debug!(queue = queue_name, "connected to redis");

        Ok(Self {
            conn,
            keys: Keys::new(queue_name),
            promote: Script::new(PROMOTE_DUE_SCRIPT),
            closed: AtomicBool::new(false),
        })
    }

    fn conn(&self) -> BrokerResult<ConnectionManager> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        Ok(self.conn.clone())
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[async_trait]
impl QueueBroker for RedisBroker {
    #[instrument(skip(self, job), fields(queue = %self.keys.prefix, correlation_id = %job.correlation_id))]
    async fn enqueue(&self, job: NewJob) -> BrokerResult<JobId> {
        let mut conn = self.conn()?;

        let id: u64 = redis::cmd("INCR")
            .arg(self.keys.id())
            .query_async(&mut conn)
            .await?;
        let id = JobId::new(id);
        let body = serde_json::to_string(&Job::from_new(id, job))?;

        let _: () = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(self.keys.job(id))
            .arg(body)
            .ignore()
            .cmd("LPUSH")
            .arg(self.keys.wait())
            .arg(id.value())
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(id)
    }

    #[instrument(skip(self, job), fields(queue = %self.keys.prefix, job_id = %job.id))]
    async fn requeue(&self, job: Job, delay: Duration) -> BrokerResult<()> {
        let mut conn = self.conn()?;
        let id = job.id;
        let body = serde_json::to_string(&job)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SET")
            .arg(self.keys.job(id))
            .arg(body)
            .ignore()
            .cmd("LREM")
            .arg(self.keys.active())
            .arg(0)
            .arg(id.value())
            .ignore();

        if delay.is_zero() {
            pipe.cmd("LPUSH").arg(self.keys.wait()).arg(id.value()).ignore();
        } else {
            let due = Self::now_ms().saturating_add(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX));
            pipe.cmd("ZADD")
                .arg(self.keys.delayed())
                .arg(due)
                .arg(id.value())
                .ignore();
        }

        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn dequeue(&self) -> BrokerResult<Option<Job>> {
        let mut conn = self.conn()?;

        let promoted: u64 = self
            .promote
            .key(self.keys.delayed())
            .key(self.keys.wait())
            .arg(Self::now_ms())
            .invoke_async(&mut conn)
            .await?;
        if promoted > 0 {
            debug!(queue = %self.keys.prefix, promoted, "promoted delayed jobs");
        }

        let id: Option<u64> = redis::cmd("RPOPLPUSH")
            .arg(self.keys.wait())
            .arg(self.keys.active())
            .query_async(&mut conn)
            .await?;
        let Some(id) = id.map(JobId::new) else {
            return Ok(None);
        };

        let body: Option<String> = redis::cmd("GET")
            .arg(self.keys.job(id))
            .query_async(&mut conn)
            .await?;
        match body {
            Some(body) => {
                let delivered: Job = serde_json::from_str(&body)?;
                let mut claimed = delivered.clone();
                claimed.state = JobState::Active;
                claimed.updated_at = Utc::now();
                let _: () = redis::cmd("SET")
                    .arg(self.keys.job(id))
                    .arg(serde_json::to_string(&claimed)?)
                    .query_async(&mut conn)
                    .await?;
                Ok(Some(delivered))
            }
            None => {
                warn!(queue = %self.keys.prefix, job_id = %id, "queued id has no job record; dropping");
                let _: () = redis::cmd("LREM")
                    .arg(self.keys.active())
                    .arg(0)
                    .arg(id.value())
                    .query_async(&mut conn)
                    .await?;
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, job), fields(queue = %self.keys.prefix, job_id = %job.id))]
    async fn discard(&self, job: &Job) -> BrokerResult<()> {
        let mut conn = self.conn()?;
        let _: () = redis::cmd("LREM")
            .arg(self.keys.active())
            .arg(1)
            .arg(job.id.value())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, job), fields(queue = %self.keys.prefix, job_id = %job.id))]
    async fn finalize(&self, job: &Job) -> BrokerResult<()> {
        let mut conn = self.conn()?;
        let body = serde_json::to_string(job)?;

        let _: () = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(self.keys.job(job.id))
            .arg(body)
            .ignore()
            .cmd("LREM")
            .arg(self.keys.active())
            .arg(0)
            .arg(job.id.value())
            .ignore()
            .cmd("SADD")
            .arg(self.keys.done())
            .arg(job.id.value())
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn get(&self, id: JobId) -> BrokerResult<Option<Job>> {
        let mut conn = self.conn()?;
        let body: Option<String> = redis::cmd("GET")
            .arg(self.keys.job(id))
            .query_async(&mut conn)
            .await?;
        Ok(body.map(|b| serde_json::from_str(&b)).transpose()?)
    }

    async fn queue_depth(&self) -> BrokerResult<u64> {
        let mut conn = self.conn()?;
        let (waiting, delayed): (u64, u64) = redis::pipe()
            .cmd("LLEN")
            .arg(self.keys.wait())
            .cmd("ZCARD")
            .arg(self.keys.delayed())
            .query_async(&mut conn)
            .await?;
        Ok(waiting + delayed)
    }

    async fn close(&self) -> BrokerResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
