//! Shared circuit breaker guarding calls to the AI engine.
//!
//! Every worker increments one failure counter whenever an engine call times
//! out. While the counter is at or above [`BREAKER_THRESHOLD`] every worker
//! skips engine work. The counter expires [`BREAKER_TTL`] after its last
//! increment, which closes the breaker again.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clank_engine::EngineError;
use sqlx::PgPool;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::BreakerError;

pub const BREAKER_KEY: &str = "engine:breaker";
pub const BREAKER_THRESHOLD: i32 = 25;
pub const BREAKER_TTL: Duration = Duration::from_secs(30);

/// Storage for expiring integer counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current value, or `None` if the counter is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<i32>, BreakerError>;

    /// Atomically adds one (starting from zero if absent or expired), resets
    /// the expiry to `ttl` from now, and returns the new value.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<i32, BreakerError>;

    async fn set(&self, key: &str, value: i32, ttl: Duration) -> Result<(), BreakerError>;

    async fn delete(&self, key: &str) -> Result<(), BreakerError>;
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// Counters in the `breaker_counters` table, shared by every worker process.
#[derive(Debug, Clone)]
pub struct PgCounterStore {
    pool: PgPool,
}

impl PgCounterStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CounterStore for PgCounterStore {
    async fn get(&self, key: &str) -> Result<Option<i32>, BreakerError> {
        Ok(clank_db::get_breaker_failures(&self.pool, key).await?)
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<i32, BreakerError> {
        Ok(clank_db::increment_breaker_failures(&self.pool, key, ttl.as_secs_f64()).await?)
    }

    async fn set(&self, key: &str, value: i32, ttl: Duration) -> Result<(), BreakerError> {
        Ok(clank_db::set_breaker_failures(&self.pool, key, value, ttl.as_secs_f64()).await?)
    }

    async fn delete(&self, key: &str) -> Result<(), BreakerError> {
        Ok(clank_db::delete_breaker_counter(&self.pool, key).await?)
    }
}

/// Process-local counters on the tokio clock.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, (i32, Instant)>>,
}

impl MemoryCounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<i32>, BreakerError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(value, _)| *value))
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<i32, BreakerError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let current = entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map_or(0, |(value, _)| *value);
        let next = current + 1;
        entries.insert(key.to_owned(), (next, now + ttl));
        Ok(next)
    }

    async fn set(&self, key: &str, value: i32, ttl: Duration) -> Result<(), BreakerError> {
        self.entries
            .lock()
            .await
            .insert(key.to_owned(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BreakerError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Breaker
// ---------------------------------------------------------------------------

/// Circuit breaker around the engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Breaker {
    store: Arc<dyn CounterStore>,
    /// Serialises this process's own counter writes.
    local: Arc<Mutex<()>>,
}

impl std::fmt::Debug for Breaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Breaker").field("key", &BREAKER_KEY).finish()
    }
}

impl Breaker {
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            local: Arc::new(Mutex::new(())),
        }
    }

    /// True while engine calls should be skipped.
    ///
    /// A store that cannot be read counts as open; the error is logged.
    pub async fn is_open(&self) -> bool {
        match self.store.get(BREAKER_KEY).await {
            Ok(Some(failures)) => failures >= BREAKER_THRESHOLD,
            Ok(None) => false,
            Err(e) => {
                tracing::error!(error = %e, "could not read engine breaker, treating it as open");
                true
            }
        }
    }

    /// Current failure count, `None` when the counter is absent or expired.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError`] if the store cannot be read.
    pub async fn failures(&self) -> Result<Option<i32>, BreakerError> {
        self.store.get(BREAKER_KEY).await
    }

    /// Records one engine failure.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError`] if the store write fails.
    pub async fn open(&self) -> Result<(), BreakerError> {
        let _guard = self.local.lock().await;

        let failures = self.store.increment(BREAKER_KEY, BREAKER_TTL).await?;
        if failures == BREAKER_THRESHOLD {
            tracing::error!(
                ttl_secs = BREAKER_TTL.as_secs(),
                "engine breaker opened"
            );
        }

        Ok(())
    }

    /// Opens the breaker for `timeout`, whatever the current count.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError`] if the store write fails.
    pub async fn force(&self, timeout: Duration) -> Result<(), BreakerError> {
        let _guard = self.local.lock().await;

        self.store
            .set(BREAKER_KEY, BREAKER_THRESHOLD, timeout)
            .await?;
        tracing::warn!(ttl_secs = timeout.as_secs(), "engine breaker forced open");

        Ok(())
    }

    /// Closes the breaker for every worker at once.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError`] if the store delete fails.
    pub async fn close(&self) -> Result<(), BreakerError> {
        let _guard = self.local.lock().await;

        self.store.delete(BREAKER_KEY).await?;
        tracing::info!("engine breaker closed");

        Ok(())
    }

    /// Awaits an engine call, opening the breaker if it timed out.
    ///
    /// The call's own result is returned untouched. A failure to open the
    /// breaker is logged and otherwise ignored.
    pub async fn guard<T, F>(&self, call: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, EngineError>>,
    {
        let result = call.await;

        if let Err(e) = &result {
            if e.is_timed_out() {
                tracing::error!(error = %e, "engine call timed out");
                if let Err(open_err) = self.open().await {
                    tracing::error!(error = %open_err, "failed to open engine breaker");
                }
            }
        }

        result
    }
}
