//! Client for the external AI engine that extracts, embeds, ranks and merges
//! feedback signal.

pub mod client;
pub mod error;
pub mod types;

pub use client::{EngineClient, DEFAULT_TIMEOUT};
pub use error::EngineError;
pub use types::{
    Embedding, ExtractedIssue, ExtractedReview, ExtractedSuggestion, ExtractionInput,
    IssueDraft, IssueExtraction, MergedIssue, MergedSuggestion, ReviewExtraction, Similarity,
    SuggestionDraft, SuggestionExtraction, Usage,
};
