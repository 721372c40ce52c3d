//! Redis-backed queue broker.
//!
//! The broker keeps one Redis list per priority partition:
//!
//! - `submissions:priority:{p}`: FIFO partition for priority `p` (0–9)
//! - `submissions:all`: advisory index of enqueued job ids, for
//!   observability only; it is not updated atomically with the partition
//! - `workers:status`: hash of worker heartbeats
//! - `events`: pub/sub channel for best-effort notifications
//!
//! Dequeue scans partitions from the highest priority down, checking the
//! baseline partition 0 last. Within a partition FIFO is exact (LPUSH +
//! RPOP); across partitions a perpetually-non-empty higher partition
//! starves lower ones. That starvation is intended behavior, not a
//! defect.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::job::JobEnvelope;

/// Number of priority partitions. Priorities are 0..PRIORITY_LEVELS,
/// with 0 the baseline catch-all.
pub const PRIORITY_LEVELS: u8 = 10;

const INDEX_KEY: &str = "submissions:all";
const WORKERS_KEY: &str = "workers:status";
const EVENTS_CHANNEL: &str = "events";

fn partition_key(priority: u8) -> String {
    format!("submissions:priority:{priority}")
}

/// Errors surfaced by broker operations. All are retryable to the caller;
/// the dispatcher treats them as transient and backs off.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to the broker.
    #[error("Broker connection failed: {0}")]
    ConnectionFailed(String),

    /// Broker operation failed.
    #[error("Broker operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// Failed to serialize or parse queue payloads.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Priority outside the configured partition range.
    #[error("Priority {0} outside the 0..{PRIORITY_LEVELS} partition range")]
    InvalidPriority(u8),
}

/// Phase of a worker as reported through its heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerPhase {
    Idle,
    Running,
    Stopped,
}

/// A worker's registry entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    pub worker_id: String,
    pub phase: WorkerPhase,
    /// Stamped by the broker at upsert time.
    pub last_seen: DateTime<Utc>,
    /// Submission currently being handled, if any.
    #[serde(default)]
    pub current_submission: Option<i64>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Expiry policy for worker heartbeats.
///
/// `active_window` is stricter than `ttl`: a stalled worker stops counting
/// toward capacity before its registry entry is physically purged.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatPolicy {
    /// After this, the registry entry is purged.
    pub ttl: Duration,
    /// After this, the worker no longer counts as live.
    pub active_window: Duration,
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            active_window: Duration::from_secs(120),
        }
    }
}

impl HeartbeatPolicy {
    fn is_active(&self, beat: &WorkerHeartbeat, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(beat.last_seen);
        age.to_std().is_ok_and(|age| age <= self.active_window)
    }

    fn is_expired(&self, beat: &WorkerHeartbeat, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(beat.last_seen);
        age.to_std().is_ok_and(|age| age > self.ttl)
    }
}

/// A queue event, published best-effort for monitoring. Non-durable and
/// unordered across subscribers; never correctness-critical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl QueueEvent {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Priority-partitioned FIFO queues plus the worker liveness registry and
/// the best-effort event channel.
///
/// Implementations must make `dequeue` an atomic pop: when N callers race
/// a single queued job, exactly one receives it.
#[async_trait]
pub trait QueueBroker: Send + Sync {
    /// Appends a job for `submission_id` to the tail of the partition for
    /// `priority` and returns the new job id. Non-blocking.
    async fn enqueue(&self, submission_id: i64, priority: u8) -> Result<Uuid, QueueError>;

    /// Pops the head of the first non-empty partition, scanning highest
    /// priority first and the baseline partition last.
    async fn dequeue(&self) -> Result<Option<JobEnvelope>, QueueError>;

    /// Depth of a single partition.
    async fn queue_depth(&self, priority: u8) -> Result<usize, QueueError>;

    /// Sum of all partition depths.
    async fn total_depth(&self) -> Result<usize, QueueError>;

    /// Administrative wipe of all partitions; returns the number of
    /// dropped jobs. Used by operational tooling only.
    async fn clear_all(&self) -> Result<usize, QueueError>;

    /// Upserts a worker heartbeat, stamped with the current time.
    async fn register_heartbeat(
        &self,
        worker_id: &str,
        phase: WorkerPhase,
        current_submission: Option<i64>,
        metadata: serde_json::Value,
    ) -> Result<(), QueueError>;

    /// Removes a worker from the registry.
    async fn deregister_worker(&self, worker_id: &str) -> Result<(), QueueError>;

    /// Number of workers seen within the active window. Stricter than the
    /// raw TTL, so stalled workers drop out of capacity accounting early.
    async fn live_worker_count(&self) -> Result<usize, QueueError>;

    /// All registry entries that have not passed the raw TTL; expired
    /// entries are purged as a side effect.
    async fn worker_snapshot(&self) -> Result<Vec<WorkerHeartbeat>, QueueError>;

    /// Publishes a monitoring event. Best-effort only.
    async fn publish_event(&self, event: QueueEvent) -> Result<(), QueueError>;
}

/// Redis-backed broker.
pub struct RedisBroker {
    redis: ConnectionManager,
    /// Kept for dedicated pub/sub connections.
    client: redis::Client,
    policy: HeartbeatPolicy,
}

impl RedisBroker {
    /// Connects to Redis with the default heartbeat policy.
    pub async fn connect(redis_url: &str) -> Result<Self, QueueError> {
        Self::connect_with_policy(redis_url, HeartbeatPolicy::default()).await
    }

    /// Connects to Redis with an explicit heartbeat policy.
    pub async fn connect_with_policy(
        redis_url: &str,
        policy: HeartbeatPolicy,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            redis,
            client,
            policy,
        })
    }

    /// Subscribes to the broker's event channel on a dedicated connection.
    ///
    /// Malformed messages are dropped silently; delivery stops when the
    /// returned receiver is dropped.
    pub async fn subscribe_events(
        &self,
    ) -> Result<tokio::sync::mpsc::Receiver<QueueEvent>, QueueError> {
        let conn = self.client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(EVENTS_CHANNEL).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let Ok(payload) = msg.get_payload::<String>() else {
                    continue;
                };
                if let Ok(event) = serde_json::from_str::<QueueEvent>(&payload) {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }

    /// Reads and parses all registry entries. Malformed entries are skipped.
    async fn read_heartbeats(&self) -> Result<Vec<WorkerHeartbeat>, QueueError> {
        let mut conn = self.redis.clone();
        let raw: std::collections::HashMap<String, String> = conn.hgetall(WORKERS_KEY).await?;

        Ok(raw
            .values()
            .filter_map(|data| serde_json::from_str::<WorkerHeartbeat>(data).ok())
            .collect())
    }
}

#[async_trait]
impl QueueBroker for RedisBroker {
    async fn enqueue(&self, submission_id: i64, priority: u8) -> Result<Uuid, QueueError> {
        if priority >= PRIORITY_LEVELS {
            return Err(QueueError::InvalidPriority(priority));
        }

        let envelope = JobEnvelope::new(submission_id, priority);
        let serialized = serde_json::to_string(&envelope)?;

        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(partition_key(priority), serialized)
            .await?;

        // Advisory observability index; not atomic with the enqueue above.
        if let Err(e) = conn
            .lpush::<_, _, ()>(INDEX_KEY, envelope.job_id.to_string())
            .await
        {
            warn!(error = %e, job_id = %envelope.job_id, "Failed to update queue index");
        }

        debug!(submission_id, priority, job_id = %envelope.job_id, "Enqueued submission");
        Ok(envelope.job_id)
    }

    async fn dequeue(&self) -> Result<Option<JobEnvelope>, QueueError> {
        let mut conn = self.redis.clone();

        // Highest priority first; the baseline partition 0 is always last.
        for priority in (1..PRIORITY_LEVELS).rev().chain(std::iter::once(0)) {
            let popped: Option<String> = conn.rpop(partition_key(priority), None).await?;
            if let Some(data) = popped {
                let envelope: JobEnvelope = serde_json::from_str(&data)?;
                debug!(
                    submission_id = envelope.submission_id,
                    priority, "Dequeued submission"
                );
                return Ok(Some(envelope));
            }
        }

        Ok(None)
    }

    async fn queue_depth(&self, priority: u8) -> Result<usize, QueueError> {
        if priority >= PRIORITY_LEVELS {
            return Err(QueueError::InvalidPriority(priority));
        }
        let mut conn = self.redis.clone();
        let depth: usize = conn.llen(partition_key(priority)).await?;
        Ok(depth)
    }

    async fn total_depth(&self) -> Result<usize, QueueError> {
        let mut total = 0;
        for priority in 0..PRIORITY_LEVELS {
            total += self.queue_depth(priority).await?;
        }
        Ok(total)
    }

    async fn clear_all(&self) -> Result<usize, QueueError> {
        let dropped = self.total_depth().await?;

        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        for priority in 0..PRIORITY_LEVELS {
            pipe.del(partition_key(priority));
        }
        pipe.del(INDEX_KEY);
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(dropped)
    }

    async fn register_heartbeat(
        &self,
        worker_id: &str,
        phase: WorkerPhase,
        current_submission: Option<i64>,
        metadata: serde_json::Value,
    ) -> Result<(), QueueError> {
        let beat = WorkerHeartbeat {
            worker_id: worker_id.to_string(),
            phase,
            last_seen: Utc::now(),
            current_submission,
            metadata,
        };
        let serialized = serde_json::to_string(&beat)?;

        let mut conn = self.redis.clone();
        conn.hset::<_, _, _, ()>(WORKERS_KEY, worker_id, serialized)
            .await?;
        // Coarse physical expiry of the whole registry; per-entry expiry
        // is enforced logically against the policy on read.
        redis::cmd("EXPIRE")
            .arg(WORKERS_KEY)
            .arg(self.policy.ttl.as_secs())
            .query_async::<_, ()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn deregister_worker(&self, worker_id: &str) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        conn.hdel::<_, _, ()>(WORKERS_KEY, worker_id).await?;
        Ok(())
    }

    async fn live_worker_count(&self) -> Result<usize, QueueError> {
        let now = Utc::now();
        let beats = self.read_heartbeats().await?;
        Ok(beats
            .iter()
            .filter(|beat| beat.phase != WorkerPhase::Stopped && self.policy.is_active(beat, now))
            .count())
    }

    async fn worker_snapshot(&self) -> Result<Vec<WorkerHeartbeat>, QueueError> {
        let now = Utc::now();
        let beats = self.read_heartbeats().await?;

        let mut conn = self.redis.clone();
        let mut kept = Vec::with_capacity(beats.len());
        for beat in beats {
            if self.policy.is_expired(&beat, now) {
                conn.hdel::<_, _, ()>(WORKERS_KEY, &beat.worker_id).await?;
            } else {
                kept.push(beat);
            }
        }

        Ok(kept)
    }

    async fn publish_event(&self, event: QueueEvent) -> Result<(), QueueError> {
        let serialized = serde_json::to_string(&event)?;
        let mut conn = self.redis.clone();
        conn.publish::<_, _, ()>(EVENTS_CHANNEL, serialized).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_keys() {
        assert_eq!(partition_key(0), "submissions:priority:0");
        assert_eq!(partition_key(9), "submissions:priority:9");
    }

    #[test]
    fn test_heartbeat_policy_windows() {
        let policy = HeartbeatPolicy::default();
        let now = Utc::now();

        let fresh = WorkerHeartbeat {
            worker_id: "w".to_string(),
            phase: WorkerPhase::Idle,
            last_seen: now,
            current_submission: None,
            metadata: serde_json::Value::Null,
        };
        assert!(policy.is_active(&fresh, now));
        assert!(!policy.is_expired(&fresh, now));

        // Past the active window but within the raw TTL: not live, not purged.
        let stalled = WorkerHeartbeat {
            last_seen: now - chrono::Duration::seconds(180),
            ..fresh.clone()
        };
        assert!(!policy.is_active(&stalled, now));
        assert!(!policy.is_expired(&stalled, now));

        let dead = WorkerHeartbeat {
            last_seen: now - chrono::Duration::seconds(600),
            ..fresh
        };
        assert!(!policy.is_active(&dead, now));
        assert!(policy.is_expired(&dead, now));
    }

    #[test]
    fn test_queue_event_serialization() {
        let event = QueueEvent::new("submission_created", serde_json::json!({"id": 7}));
        let serialized = serde_json::to_string(&event).expect("serializes");
        let parsed: serde_json::Value = serde_json::from_str(&serialized).expect("parses");

        assert_eq!(parsed["type"], "submission_created");
        assert_eq!(parsed["payload"]["id"], 7);
        assert!(parsed.get("timestamp").is_some());
    }

    #[test]
    fn test_queue_error_display() {
        let err = QueueError::ConnectionFailed("refused".to_string());
        assert!(err.to_string().contains("refused"));

        let err = QueueError::InvalidPriority(12);
        assert!(err.to_string().contains("12"));
    }
}
