//! Jobs the pipeline knows how to run, and their queue encoding.
//!
//! A job is stored as a `kind` string plus a JSON `payload`. Recovery walks
//! carry an empty object.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{EnqueueError, JobDecodeError};

pub const PROCESS_FEEDBACK: &str = "processor:process-feedback";
pub const SCHEDULE_PROCESS_FEEDBACK: &str = "processor:schedule-process-feedback";
pub const AGGREGATE_ISSUE: &str = "aggregator:aggregate-issue";
pub const SCHEDULE_AGGREGATE_ISSUE: &str = "aggregator:schedule-aggregate-issue";
pub const AGGREGATE_SUGGESTION: &str = "aggregator:aggregate-suggestion";
pub const SCHEDULE_AGGREGATE_SUGGESTION: &str = "aggregator:schedule-aggregate-suggestion";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    ProcessFeedback { feedback_id: Uuid },
    ScheduleProcessFeedback,
    AggregateIssue { partial_id: Uuid },
    ScheduleAggregateIssue,
    AggregateSuggestion { partial_id: Uuid },
    ScheduleAggregateSuggestion,
}

#[derive(Debug, Serialize, Deserialize)]
struct FeedbackPayload {
    feedback_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
struct PartialPayload {
    partial_id: Uuid,
}

impl Job {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Job::ProcessFeedback { .. } => PROCESS_FEEDBACK,
            Job::ScheduleProcessFeedback => SCHEDULE_PROCESS_FEEDBACK,
            Job::AggregateIssue { .. } => AGGREGATE_ISSUE,
            Job::ScheduleAggregateIssue => SCHEDULE_AGGREGATE_ISSUE,
            Job::AggregateSuggestion { .. } => AGGREGATE_SUGGESTION,
            Job::ScheduleAggregateSuggestion => SCHEDULE_AGGREGATE_SUGGESTION,
        }
    }

    /// JSON payload stored alongside the kind.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Encode`] if serialization fails.
    pub fn payload(&self) -> Result<Value, EnqueueError> {
        let encoded = match *self {
            Job::ProcessFeedback { feedback_id } => {
                serde_json::to_value(FeedbackPayload { feedback_id })
            }
            Job::AggregateIssue { partial_id } | Job::AggregateSuggestion { partial_id } => {
                serde_json::to_value(PartialPayload { partial_id })
            }
            Job::ScheduleProcessFeedback
            | Job::ScheduleAggregateIssue
            | Job::ScheduleAggregateSuggestion => Ok(Value::Object(serde_json::Map::new())),
        };

        encoded.map_err(|source| EnqueueError::Encode {
            kind: self.kind(),
            source,
        })
    }

    /// Rebuilds a job from its stored kind and payload.
    ///
    /// Schedule walks ignore their payload.
    ///
    /// # Errors
    ///
    /// Returns [`JobDecodeError::UnknownKind`] for a kind this build does not
    /// know, or [`JobDecodeError::Payload`] if the payload does not fit it.
    pub fn decode(kind: &str, payload: &Value) -> Result<Self, JobDecodeError> {
        match kind {
            PROCESS_FEEDBACK => {
                let p: FeedbackPayload = decode_payload(kind, payload)?;
                Ok(Job::ProcessFeedback {
                    feedback_id: p.feedback_id,
                })
            }
            AGGREGATE_ISSUE => {
                let p: PartialPayload = decode_payload(kind, payload)?;
                Ok(Job::AggregateIssue {
                    partial_id: p.partial_id,
                })
            }
            AGGREGATE_SUGGESTION => {
                let p: PartialPayload = decode_payload(kind, payload)?;
                Ok(Job::AggregateSuggestion {
                    partial_id: p.partial_id,
                })
            }
            SCHEDULE_PROCESS_FEEDBACK => Ok(Job::ScheduleProcessFeedback),
            SCHEDULE_AGGREGATE_ISSUE => Ok(Job::ScheduleAggregateIssue),
            SCHEDULE_AGGREGATE_SUGGESTION => Ok(Job::ScheduleAggregateSuggestion),
            other => Err(JobDecodeError::UnknownKind(other.to_owned())),
        }
    }

    /// Deduplication key: hex SHA-256 of the kind and the canonical payload.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Encode`] if the payload cannot be serialized.
    pub fn unique_key(&self) -> Result<String, EnqueueError> {
        let payload = self.payload()?;

        let mut hasher = Sha256::new();
        hasher.update(self.kind().as_bytes());
        hasher.update([0u8]);
        hasher.update(payload.to_string().as_bytes());

        Ok(hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect())
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Job::ProcessFeedback { feedback_id } => write!(f, "{} {feedback_id}", self.kind()),
            Job::AggregateIssue { partial_id } | Job::AggregateSuggestion { partial_id } => {
                write!(f, "{} {partial_id}", self.kind())
            }
            _ => f.write_str(self.kind()),
        }
    }
}

fn decode_payload<T: DeserializeOwned>(kind: &str, payload: &Value) -> Result<T, JobDecodeError> {
    T::deserialize(payload).map_err(|source| JobDecodeError::Payload {
        kind: kind.to_owned(),
        source,
    })
}
