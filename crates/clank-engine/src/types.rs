//! Request and response types of the engine HTTP API.
//!
//! Every response carries the token usage of the call.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Usage {
    pub input: i64,
    pub output: i64,
}

impl Usage {
    #[must_use]
    pub fn total(self) -> i64 {
        self.input + self.output
    }
}

/// Shared input of the three extraction endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionInput<'a> {
    /// Product description.
    pub context: &'a str,
    /// Categories the engine may assign.
    pub categories: &'a [String],
    /// Feedback text in the product's language.
    pub feedback: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExtractedIssue {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub steps: Vec<String>,
    pub severity: String,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExtractedSuggestion {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub reason: String,
    pub importance: String,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExtractedReview {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub sentiment: String,
    #[serde(default)]
    pub emotions: Vec<String>,
    pub intention: String,
    pub category: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueExtraction {
    #[serde(default)]
    pub issues: Vec<ExtractedIssue>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuggestionExtraction {
    #[serde(default)]
    pub suggestions: Vec<ExtractedSuggestion>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewExtraction {
    pub review: ExtractedReview,
    pub usage: Usage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Embedding {
    pub embedding: Vec<f32>,
    pub usage: Usage,
}

/// Outcome of a similarity ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Similarity {
    /// Zero-based index into the options, `None` when nothing matched.
    pub option: Option<usize>,
    pub usage: Usage,
}

/// Mergeable content of an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueDraft {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub steps: Vec<String>,
}

/// Mergeable content of a suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestionDraft {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergedIssue {
    pub issue: IssueDraft,
    pub usage: Usage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergedSuggestion {
    pub suggestion: SuggestionDraft,
    pub usage: Usage,
}

// Wire shapes that differ from what callers want to see.

#[derive(Debug, Serialize)]
pub(crate) struct EmbeddingRequest<'a> {
    pub text: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct SimilarIssueRequest<'a> {
    pub issue: &'a str,
    pub options: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SimilarSuggestionRequest<'a> {
    pub suggestion: &'a str,
    pub options: Vec<&'a str>,
}

/// The engine answers with a one-based option, `0` meaning no match.
#[derive(Debug, Deserialize)]
pub(crate) struct SimilarityResponse {
    pub option: i64,
    pub usage: Usage,
}

impl From<SimilarityResponse> for Similarity {
    fn from(response: SimilarityResponse) -> Self {
        let option = usize::try_from(response.option)
            .ok()
            .and_then(|n| n.checked_sub(1));
        Similarity {
            option,
            usage: response.usage,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct MergeIssuesRequest<'a> {
    pub issue_a: &'a IssueDraft,
    pub issue_b: &'a IssueDraft,
}

#[derive(Debug, Serialize)]
pub(crate) struct MergeSuggestionsRequest<'a> {
    pub suggestion_a: &'a SuggestionDraft,
    pub suggestion_b: &'a SuggestionDraft,
}
