#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Where the engine circuit breaker keeps its failure counter.
///
/// `Postgres` is shared by every worker process; `Memory` only protects the
/// current process and is meant for local development.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerBackend {
    Postgres,
    Memory,
}

impl std::fmt::Display for BreakerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerBackend::Postgres => write!(f, "postgres"),
            BreakerBackend::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub log_level: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub engine_base_url: String,
    pub engine_timeout_secs: u64,
    pub breaker_backend: BreakerBackend,
    pub worker_concurrency: usize,
    pub worker_poll_interval_ms: u64,
    pub job_stale_after_secs: u64,
    pub process_schedule_cron: String,
    pub issue_schedule_cron: String,
    pub suggestion_schedule_cron: String,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("log_level", &self.log_level)
            .field("database_url", &"[redacted]")
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("engine_base_url", &self.engine_base_url)
            .field("engine_timeout_secs", &self.engine_timeout_secs)
            .field("breaker_backend", &self.breaker_backend)
            .field("worker_concurrency", &self.worker_concurrency)
            .field("worker_poll_interval_ms", &self.worker_poll_interval_ms)
            .field("job_stale_after_secs", &self.job_stale_after_secs)
            .field("process_schedule_cron", &self.process_schedule_cron)
            .field("issue_schedule_cron", &self.issue_schedule_cron)
            .field("suggestion_schedule_cron", &self.suggestion_schedule_cron)
            .finish()
    }
}
