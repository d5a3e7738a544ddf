use thiserror::Error;

/// Errors returned by the engine client.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The request did not complete within the client timeout.
    #[error("engine timed out calling {endpoint}: {source}")]
    TimedOut {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// Network, TLS, or non-2xx failure from the underlying HTTP client.
    #[error("engine HTTP error calling {endpoint}: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// The response body could not be deserialized into the expected type.
    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid engine base URL '{0}'")]
    InvalidBaseUrl(String),
}

impl EngineError {
    pub(crate) fn from_reqwest(endpoint: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            EngineError::TimedOut {
                endpoint: endpoint.to_owned(),
                source,
            }
        } else {
            EngineError::Http {
                endpoint: endpoint.to_owned(),
                source,
            }
        }
    }

    /// True for the failure that trips the circuit breaker.
    #[must_use]
    pub fn is_timed_out(&self) -> bool {
        matches!(self, EngineError::TimedOut { .. })
    }
}
