//! Feedback value types shared by the storage and pipeline crates.

use serde::{Deserialize, Serialize};

/// Who wrote a piece of feedback. Stored as JSONB.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackCustomer {
    pub email: Option<String>,
    pub name: String,
    pub picture: String,
    pub location: Option<String>,
    pub verified: Option<bool>,
    pub reviews: Option<i32>,
    pub link: Option<String>,
}

/// Source-specific extras attached to a piece of feedback. Stored as JSONB.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackMetadata {
    pub rating: Option<f64>,
    pub media: Option<Vec<String>>,
    pub verified: Option<bool>,
    pub votes: Option<i32>,
    pub link: Option<String>,
}

/// Text the extraction engine should see for a piece of feedback.
///
/// Feedback already written in the product's language is used as-is;
/// anything else goes through its translation. Returns `None` when the
/// selected text is empty.
#[must_use]
pub fn processable_content<'a>(
    content: &'a str,
    language: &str,
    translation: &'a str,
    product_language: &str,
) -> Option<&'a str> {
    let text = if language == product_language {
        content
    } else {
        translation
    };

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
