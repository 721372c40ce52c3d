//! Job envelopes for the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A transient queue record linking a submission to a priority.
///
/// Envelopes are created on enqueue, serialized into the broker, and
/// destroyed on dequeue; they are never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    /// Unique identifier for this job.
    pub job_id: Uuid,
    /// The durable submission this job executes.
    pub submission_id: i64,
    /// Priority partition; 0 is the baseline, higher values are more urgent.
    pub priority: u8,
    /// When this envelope was created.
    pub created_at: DateTime<Utc>,
}

impl JobEnvelope {
    /// Creates a new envelope with a fresh job id.
    pub fn new(submission_id: i64, priority: u8) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            submission_id,
            priority,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_serialization_roundtrip() {
        let envelope = JobEnvelope::new(42, 5);
        let serialized = serde_json::to_string(&envelope).expect("serializes");
        let parsed: JobEnvelope = serde_json::from_str(&serialized).expect("parses");

        assert_eq!(parsed, envelope);
    }

    #[test]
    fn test_envelopes_get_distinct_job_ids() {
        let a = JobEnvelope::new(1, 0);
        let b = JobEnvelope::new(1, 0);
        assert_ne!(a.job_id, b.job_id);
    }
}
