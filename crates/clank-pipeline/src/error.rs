use clank_db::DbError;
use clank_engine::EngineError;
use thiserror::Error;
use uuid::Uuid;

/// Errors that fail a pipeline job and make it eligible for retry.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Db(#[from] DbError),

    /// Engine failure. Timeouts have already opened the breaker by the time
    /// this is returned.
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Enqueue(#[from] EnqueueError),

    /// The cluster picked by similarity search was deleted before it could
    /// be locked for the merge.
    #[error("{kind} {id} vanished before it could be merged into")]
    ClusterVanished { kind: &'static str, id: Uuid },
}

impl PipelineError {
    /// True when the merge lost a `NOWAIT` lock race to another worker.
    #[must_use]
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, PipelineError::Db(e) if e.is_lock_not_available())
    }
}

/// Failure of the breaker's shared counter store.
#[derive(Debug, Error)]
pub enum BreakerError {
    #[error("breaker store error: {0}")]
    Store(#[from] DbError),
}

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("failed to encode {kind} payload: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Db(#[from] DbError),
}

/// A queued job that can never be run, whatever the number of retries.
#[derive(Debug, Error)]
pub enum JobDecodeError {
    #[error("unknown job kind '{0}'")]
    UnknownKind(String),

    #[error("malformed payload for {kind}: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}
