//! HTTP client for the AI engine.
//!
//! Every endpoint is a JSON `POST`. Non-2xx responses are errors, and a
//! request that exceeds the client timeout surfaces as
//! [`EngineError::TimedOut`] so callers can trip their circuit breaker.

use std::time::Duration;

use reqwest::{Client, Url};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::EngineError;
use crate::types::{
    Embedding, EmbeddingRequest, ExtractionInput, IssueDraft, IssueExtraction, MergeIssuesRequest,
    MergeSuggestionsRequest, MergedIssue, MergedSuggestion, ReviewExtraction, SimilarIssueRequest,
    SimilarSuggestionRequest, Similarity, SimilarityResponse, SuggestionDraft,
    SuggestionExtraction,
};

/// Per-call timeout used in production.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(59);

/// Client for the engine HTTP API.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct EngineClient {
    client: Client,
    base_url: Url,
}

impl EngineClient {
    /// Creates a client for the engine at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidBaseUrl`] if `base_url` does not parse,
    /// or [`EngineError::Http`] if the underlying `reqwest::Client` cannot be
    /// constructed.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::none())
            .user_agent("clank/0.1 (feedback-pipeline)")
            .build()
            .map_err(|e| EngineError::from_reqwest("client builder", e))?;

        // Exactly one trailing slash so `join` appends instead of replacing
        // the last path segment.
        let normalised = format!("{}/", base_url.trim_end_matches('/'));
        let base_url =
            Url::parse(&normalised).map_err(|_| EngineError::InvalidBaseUrl(base_url.to_owned()))?;

        Ok(Self { client, base_url })
    }

    /// Embeds `text` for similarity search.
    ///
    /// # Errors
    ///
    /// - [`EngineError::TimedOut`] if the call exceeds the client timeout.
    /// - [`EngineError::Http`] on network failure or non-2xx HTTP status.
    /// - [`EngineError::Deserialize`] if the response does not match the
    ///   expected shape.
    pub async fn compute_embedding(&self, text: &str) -> Result<Embedding, EngineError> {
        self.post("aggregator/compute-embedding", &EmbeddingRequest { text })
            .await
    }

    /// Extracts zero or more issues from a piece of feedback.
    ///
    /// # Errors
    ///
    /// Same as [`EngineClient::compute_embedding`].
    pub async fn extract_issues(
        &self,
        input: &ExtractionInput<'_>,
    ) -> Result<IssueExtraction, EngineError> {
        self.post("processor/extract-issues", input).await
    }

    /// Extracts zero or more suggestions from a piece of feedback.
    ///
    /// # Errors
    ///
    /// Same as [`EngineClient::compute_embedding`].
    pub async fn extract_suggestions(
        &self,
        input: &ExtractionInput<'_>,
    ) -> Result<SuggestionExtraction, EngineError> {
        self.post("processor/extract-suggestions", input).await
    }

    /// Summarises a piece of feedback as one review.
    ///
    /// # Errors
    ///
    /// Same as [`EngineClient::compute_embedding`].
    pub async fn extract_review(
        &self,
        input: &ExtractionInput<'_>,
    ) -> Result<ReviewExtraction, EngineError> {
        self.post("processor/extract-review", input).await
    }

    /// Asks which of `options` (issue descriptions) describes the same
    /// problem as `description`.
    ///
    /// # Errors
    ///
    /// Same as [`EngineClient::compute_embedding`].
    pub async fn similar_issue(
        &self,
        description: &str,
        options: &[&str],
    ) -> Result<Similarity, EngineError> {
        let request = SimilarIssueRequest {
            issue: description,
            options: options.to_vec(),
        };
        let response: SimilarityResponse = self.post("aggregator/similar-issue", &request).await?;
        Ok(response.into())
    }

    /// Suggestion counterpart of [`EngineClient::similar_issue`].
    ///
    /// # Errors
    ///
    /// Same as [`EngineClient::compute_embedding`].
    pub async fn similar_suggestion(
        &self,
        description: &str,
        options: &[&str],
    ) -> Result<Similarity, EngineError> {
        let request = SimilarSuggestionRequest {
            suggestion: description,
            options: options.to_vec(),
        };
        let response: SimilarityResponse =
            self.post("aggregator/similar-suggestion", &request).await?;
        Ok(response.into())
    }

    /// Synthesises one issue out of `a` (the new fragment) and `b` (the
    /// existing cluster).
    ///
    /// # Errors
    ///
    /// Same as [`EngineClient::compute_embedding`].
    pub async fn merge_issues(
        &self,
        a: &IssueDraft,
        b: &IssueDraft,
    ) -> Result<MergedIssue, EngineError> {
        self.post(
            "aggregator/merge-issues",
            &MergeIssuesRequest {
                issue_a: a,
                issue_b: b,
            },
        )
        .await
    }

    /// # Errors
    ///
    /// Same as [`EngineClient::compute_embedding`].
    pub async fn merge_suggestions(
        &self,
        a: &SuggestionDraft,
        b: &SuggestionDraft,
    ) -> Result<MergedSuggestion, EngineError> {
        self.post(
            "aggregator/merge-suggestions",
            &MergeSuggestionsRequest {
                suggestion_a: a,
                suggestion_b: b,
            },
        )
        .await
    }

    async fn post<B, T>(&self, endpoint: &str, body: &B) -> Result<T, EngineError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self
            .base_url
            .join(endpoint)
            .map_err(|_| EngineError::InvalidBaseUrl(self.base_url.to_string()))?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| EngineError::from_reqwest(endpoint, e))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| EngineError::from_reqwest(endpoint, e))?;

        tracing::trace!(endpoint, bytes = bytes.len(), "engine response received");

        serde_json::from_slice(&bytes).map_err(|e| EngineError::Deserialize {
            context: endpoint.to_owned(),
            source: e,
        })
    }
}
