//! Redis-backed job store.
//!
//! Layout, with `{prefix}` defaulting to `vmod`:
//! - `{prefix}:job:{id}`: JSON job document
//! - `{prefix}:owner:{owner}`: sorted set of job ids scored by creation time (ms)
//! - `{prefix}:state:{state}`: set of job ids currently in that state

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use vmod_models::{Job, JobId, JobState, MediaRef};

use crate::error::{StoreError, StoreResult};
use crate::store::{apply_transition, sort_newest_first, JobStore, Mutator};

/// Replace the job document only if it is unchanged since it was read, and
/// move the id between state sets.
const CAS_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    return -1
end
if current ~= ARGV[1] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[2])
redis.call('SREM', KEYS[2], ARGV[3])
redis.call('SADD', KEYS[3], ARGV[3])
return 1
"#;

/// Store a new job document and index it, unless the id is taken.
const CREATE_SCRIPT: &str = r#"
if redis.call('SET', KEYS[1], ARGV[1], 'NX') then
    redis.call('ZADD', KEYS[2], ARGV[2], ARGV[3])
    redis.call('SADD', KEYS[3], ARGV[3])
    return 1
end
return 0
"#;

/// How often a transition re-reads after a concurrent non-state update.
const MAX_CAS_RETRIES: u32 = 8;

/// Redis store configuration.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis URL
    pub redis_url: String,
    /// Key prefix
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "vmod".to_string(),
        }
    }
}

impl RedisStoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("STORE_KEY_PREFIX").unwrap_or_else(|_| "vmod".to_string()),
        }
    }
}

/// Job store persisted in Redis.
pub struct RedisJobStore {
    client: redis::Client,
    config: RedisStoreConfig,
    cas: redis::Script,
    insert: redis::Script,
}

impl RedisJobStore {
    /// Create a new store. Does not connect until first use.
    pub fn new(config: RedisStoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            cas: redis::Script::new(CAS_SCRIPT),
            insert: redis::Script::new(CREATE_SCRIPT),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Self::new(RedisStoreConfig::from_env())
    }

    fn job_key(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.config.key_prefix, id)
    }

    fn owner_key(&self, owner: &str) -> String {
        format!("{}:owner:{}", self.config.key_prefix, owner)
    }

    fn state_key(&self, state: JobState) -> String {
        format!("{}:state:{}", self.config.key_prefix, state.as_str())
    }

    async fn insert_job(&self, job: &Job) -> StoreResult<()> {
        job.check_invariants()?;

        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(job)?;

        let created: i32 = self
            .insert
            .key(self.job_key(&job.id))
            .key(self.owner_key(&job.owner))
            .key(self.state_key(JobState::Queued))
            .arg(&payload)
            .arg(job.created_at.timestamp_millis())
            .arg(job.id.as_str())
            .invoke_async(&mut conn)
            .await?;

        if created == 1 {
            Ok(())
        } else {
            Err(StoreError::unavailable(format!("duplicate job id {}", job.id)))
        }
    }

    async fn connection(&self) -> StoreResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::unavailable(e.to_string()))
    }

    /// Check Redis connectivity.
    pub async fn health_check(&self) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    async fn read_raw(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        id: &JobId,
    ) -> StoreResult<String> {
        let raw: Option<String> = conn.get(self.job_key(id)).await?;
        raw.ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn load_many(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        ids: &[String],
    ) -> StoreResult<Vec<Job>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids
            .iter()
            .map(|id| self.job_key(&JobId::from_string(id.as_str())))
            .collect();
        let docs: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(conn).await?;

        let mut jobs = Vec::with_capacity(docs.len());
        for (id, doc) in ids.iter().zip(docs) {
            match doc {
                Some(doc) => jobs.push(serde_json::from_str::<Job>(&doc)?),
                // Index entry outlived its document (external retention).
                None => debug!(job_id = %id, "Skipping index entry without document"),
            }
        }
        Ok(jobs)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn create(
        &self,
        media_ref: MediaRef,
        owner: &str,
        max_attempts: u32,
    ) -> StoreResult<JobId> {
        let job = Job::new(media_ref, owner, max_attempts);
        self.insert_job(&job).await?;
        info!(job_id = %job.id, owner = owner, "Created job");
        Ok(job.id)
    }

    async fn get(&self, id: &JobId) -> StoreResult<Job> {
        let mut conn = self.connection().await?;
        let raw = self.read_raw(&mut conn, id).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn transition(
        &self,
        id: &JobId,
        expected: JobState,
        new: JobState,
        mutator: Mutator<'_>,
    ) -> StoreResult<Job> {
        let mut conn = self.connection().await?;

        for attempt in 0..MAX_CAS_RETRIES {
            let raw = self.read_raw(&mut conn, id).await?;
            let current: Job = serde_json::from_str(&raw)?;
            let next = apply_transition(&current, expected, new, mutator)?;
            let payload = serde_json::to_string(&next)?;

            let outcome: i32 = self
                .cas
                .key(self.job_key(id))
                .key(self.state_key(expected))
                .key(self.state_key(new))
                .arg(&raw)
                .arg(&payload)
                .arg(id.as_str())
                .invoke_async(&mut conn)
                .await?;

            match outcome {
                1 => {
                    debug!(job_id = %id, from = %expected, to = %new, "Transitioned job");
                    return Ok(next);
                }
                -1 => return Err(StoreError::NotFound(id.clone())),
                _ => {
                    // Someone else wrote between our read and the script; the
                    // next read decides whether this is a real conflict.
                    debug!(job_id = %id, attempt = attempt, "Job changed during transition, re-reading");
                }
            }
        }

        warn!(job_id = %id, "Transition kept racing, giving up");
        let actual = self.get(id).await.map(|j| j.state).unwrap_or(expected);
        Err(StoreError::conflict(id, expected, actual))
    }

    async fn list_by_owner(&self, owner: &str) -> StoreResult<Vec<Job>> {
        let mut conn = self.connection().await?;
        let ids: Vec<String> = conn.zrevrange(self.owner_key(owner), 0, -1).await?;

        let mut jobs = self.load_many(&mut conn, &ids).await?;
        sort_newest_first(&mut jobs);
        Ok(jobs)
    }

    async fn list_by_state(&self, state: JobState) -> StoreResult<Vec<Job>> {
        let mut conn = self.connection().await?;
        let ids: Vec<String> = conn.smembers(self.state_key(state)).await?;

        let mut jobs: Vec<Job> = self
            .load_many(&mut conn, &ids)
            .await?
            .into_iter()
            .filter(|job| job.state == state)
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }
}
