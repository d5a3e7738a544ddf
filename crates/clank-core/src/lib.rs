//! Shared domain types, configuration, and pure helpers for the clank
//! feedback pipeline.

pub mod app_config;
pub mod config;
pub mod feedback;
pub mod quota;
pub mod stats;

use thiserror::Error;

pub use app_config::{AppConfig, BreakerBackend, Environment};
pub use config::{load_app_config, load_app_config_from_env};
pub use feedback::{processable_content, FeedbackCustomer, FeedbackMetadata};
pub use quota::usage_left;
pub use stats::{
    compute_priority, label_weight, majority_label, ClusterStats, Contribution, Tally,
    DEFAULT_CATEGORY, DEFAULT_LABEL,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}
