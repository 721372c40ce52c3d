//! In-process queue broker.
//!
//! Implements the same partition, registry and event semantics as
//! [`super::RedisBroker`] over in-memory structures. Used by tests and by
//! single-process deployments that have no Redis.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::job::JobEnvelope;
use super::queue::{
    HeartbeatPolicy, QueueBroker, QueueError, QueueEvent, WorkerHeartbeat, WorkerPhase,
    PRIORITY_LEVELS,
};

/// Memory-backed broker with the same ordering and liveness semantics as
/// the Redis implementation.
pub struct MemoryBroker {
    partitions: Mutex<Vec<VecDeque<JobEnvelope>>>,
    index: Mutex<Vec<Uuid>>,
    workers: Mutex<HashMap<String, WorkerHeartbeat>>,
    events: broadcast::Sender<QueueEvent>,
    policy: HeartbeatPolicy,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_policy(HeartbeatPolicy::default())
    }

    pub fn with_policy(policy: HeartbeatPolicy) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            partitions: Mutex::new((0..PRIORITY_LEVELS).map(|_| VecDeque::new()).collect()),
            index: Mutex::new(Vec::new()),
            workers: Mutex::new(HashMap::new()),
            events,
            policy,
        }
    }

    /// Subscribes to the broker's event channel.
    pub fn subscribe_events(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    fn lock_partitions(&self) -> std::sync::MutexGuard<'_, Vec<VecDeque<JobEnvelope>>> {
        // Lock poisoning only happens after a panic in this module; treat
        // the inner state as still usable.
        self.partitions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, HashMap<String, WorkerHeartbeat>> {
        self.workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueBroker for MemoryBroker {
    async fn enqueue(&self, submission_id: i64, priority: u8) -> Result<Uuid, QueueError> {
        if priority >= PRIORITY_LEVELS {
            return Err(QueueError::InvalidPriority(priority));
        }

        let envelope = JobEnvelope::new(submission_id, priority);
        let job_id = envelope.job_id;

        self.lock_partitions()[priority as usize].push_back(envelope);
        self.index
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(job_id);

        Ok(job_id)
    }

    async fn dequeue(&self) -> Result<Option<JobEnvelope>, QueueError> {
        let mut partitions = self.lock_partitions();
        for priority in (1..PRIORITY_LEVELS).rev().chain(std::iter::once(0)) {
            if let Some(envelope) = partitions[priority as usize].pop_front() {
                return Ok(Some(envelope));
            }
        }
        Ok(None)
    }

    async fn queue_depth(&self, priority: u8) -> Result<usize, QueueError> {
        if priority >= PRIORITY_LEVELS {
            return Err(QueueError::InvalidPriority(priority));
        }
        Ok(self.lock_partitions()[priority as usize].len())
    }

    async fn total_depth(&self) -> Result<usize, QueueError> {
        Ok(self.lock_partitions().iter().map(VecDeque::len).sum())
    }

    async fn clear_all(&self) -> Result<usize, QueueError> {
        let mut partitions = self.lock_partitions();
        let dropped = partitions.iter().map(VecDeque::len).sum();
        for partition in partitions.iter_mut() {
            partition.clear();
        }
        self.index
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        Ok(dropped)
    }

    async fn register_heartbeat(
        &self,
        worker_id: &str,
        phase: WorkerPhase,
        current_submission: Option<i64>,
        metadata: serde_json::Value,
    ) -> Result<(), QueueError> {
        self.lock_workers().insert(
            worker_id.to_string(),
            WorkerHeartbeat {
                worker_id: worker_id.to_string(),
                phase,
                last_seen: Utc::now(),
                current_submission,
                metadata,
            },
        );
        Ok(())
    }

    async fn deregister_worker(&self, worker_id: &str) -> Result<(), QueueError> {
        self.lock_workers().remove(worker_id);
        Ok(())
    }

    async fn live_worker_count(&self) -> Result<usize, QueueError> {
        let now = Utc::now();
        Ok(self
            .lock_workers()
            .values()
            .filter(|beat| {
                beat.phase != WorkerPhase::Stopped
                    && now
                        .signed_duration_since(beat.last_seen)
                        .to_std()
                        .is_ok_and(|age| age <= self.policy.active_window)
            })
            .count())
    }

    async fn worker_snapshot(&self) -> Result<Vec<WorkerHeartbeat>, QueueError> {
        let now = Utc::now();
        let mut workers = self.lock_workers();
        workers.retain(|_, beat| {
            now.signed_duration_since(beat.last_seen)
                .to_std()
                .is_ok_and(|age| age <= self.policy.ttl)
        });
        Ok(workers.values().cloned().collect())
    }

    async fn publish_event(&self, event: QueueEvent) -> Result<(), QueueError> {
        // No subscribers is fine; events are best-effort.
        let _ = self.events.send(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_higher_priority_dequeued_first() {
        let broker = MemoryBroker::new();
        broker.enqueue(1, 5).await.expect("enqueue");
        broker.enqueue(2, 1).await.expect("enqueue");

        let first = broker.dequeue().await.expect("dequeue").expect("non-empty");
        assert_eq!(first.submission_id, 1);

        let second = broker.dequeue().await.expect("dequeue").expect("non-empty");
        assert_eq!(second.submission_id, 2);
    }

    #[tokio::test]
    async fn test_all_higher_partition_jobs_drain_before_lower() {
        let broker = MemoryBroker::new();
        // Three at priority 7, two at priority 3, one at baseline.
        for id in [10, 11, 12] {
            broker.enqueue(id, 7).await.expect("enqueue");
        }
        for id in [20, 21] {
            broker.enqueue(id, 3).await.expect("enqueue");
        }
        broker.enqueue(30, 0).await.expect("enqueue");

        let mut order = Vec::new();
        while let Some(envelope) = broker.dequeue().await.expect("dequeue") {
            order.push(envelope.submission_id);
        }

        // FIFO within each partition, strict priority across partitions.
        assert_eq!(order, vec![10, 11, 12, 20, 21, 30]);
    }

    #[tokio::test]
    async fn test_fifo_is_exact_within_a_partition() {
        let broker = MemoryBroker::new();
        for id in 0..50 {
            broker.enqueue(id, 4).await.expect("enqueue");
        }
        for expected in 0..50 {
            let envelope = broker.dequeue().await.expect("dequeue").expect("non-empty");
            assert_eq!(envelope.submission_id, expected);
        }
    }

    #[tokio::test]
    async fn test_racing_dequeuers_claim_at_most_once() {
        let broker = Arc::new(MemoryBroker::new());
        broker.enqueue(99, 0).await.expect("enqueue");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let broker = Arc::clone(&broker);
            handles.push(tokio::spawn(async move {
                broker.dequeue().await.expect("dequeue")
            }));
        }

        let mut claimed = 0;
        for handle in handles {
            if handle.await.expect("join").is_some() {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
    }

    #[tokio::test]
    async fn test_depths_and_clear_all() {
        let broker = MemoryBroker::new();
        assert_eq!(broker.clear_all().await.expect("clear"), 0);

        broker.enqueue(1, 2).await.expect("enqueue");
        broker.enqueue(2, 2).await.expect("enqueue");
        broker.enqueue(3, 0).await.expect("enqueue");

        assert_eq!(broker.queue_depth(2).await.expect("depth"), 2);
        assert_eq!(broker.queue_depth(0).await.expect("depth"), 1);
        assert_eq!(broker.total_depth().await.expect("total"), 3);

        assert_eq!(broker.clear_all().await.expect("clear"), 3);
        assert_eq!(broker.total_depth().await.expect("total"), 0);
        // Idempotent on an already-empty broker.
        assert_eq!(broker.clear_all().await.expect("clear"), 0);
    }

    #[tokio::test]
    async fn test_invalid_priority_rejected() {
        let broker = MemoryBroker::new();
        assert!(matches!(
            broker.enqueue(1, PRIORITY_LEVELS).await,
            Err(QueueError::InvalidPriority(_))
        ));
        assert!(matches!(
            broker.queue_depth(200).await,
            Err(QueueError::InvalidPriority(200))
        ));
    }

    #[tokio::test]
    async fn test_stalled_worker_drops_out_of_live_count_before_purge() {
        let broker = MemoryBroker::new();
        broker
            .register_heartbeat("w-1", WorkerPhase::Idle, None, serde_json::Value::Null)
            .await
            .expect("register");

        // Age the heartbeat past the active window but not past the TTL.
        broker.lock_workers().get_mut("w-1").expect("present").last_seen =
            Utc::now() - chrono::Duration::seconds(180);

        assert_eq!(broker.live_worker_count().await.expect("count"), 0);
        // Still present in the snapshot: not yet physically purged.
        assert_eq!(broker.worker_snapshot().await.expect("snapshot").len(), 1);
    }

    #[tokio::test]
    async fn test_expired_worker_purged_from_snapshot() {
        let broker = MemoryBroker::new();
        broker
            .register_heartbeat("w-1", WorkerPhase::Running, Some(5), serde_json::Value::Null)
            .await
            .expect("register");

        broker.lock_workers().get_mut("w-1").expect("present").last_seen =
            Utc::now() - chrono::Duration::seconds(600);

        assert!(broker.worker_snapshot().await.expect("snapshot").is_empty());
    }

    #[tokio::test]
    async fn test_stopped_worker_not_live() {
        let broker = MemoryBroker::new();
        broker
            .register_heartbeat("w-1", WorkerPhase::Stopped, None, serde_json::Value::Null)
            .await
            .expect("register");

        assert_eq!(broker.live_worker_count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn test_events_reach_subscribers() {
        let broker = MemoryBroker::new();
        let mut rx = broker.subscribe_events();

        broker
            .publish_event(QueueEvent::new(
                "submission_created",
                serde_json::json!({"id": 1}),
            ))
            .await
            .expect("publish");

        let event = rx.recv().await.expect("event delivered");
        assert_eq!(event.event_type, "submission_created");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let broker = MemoryBroker::new();
        broker
            .publish_event(QueueEvent::new("noop", serde_json::Value::Null))
            .await
            .expect("publish should not fail");
    }
}
