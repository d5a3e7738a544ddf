//! Keyset pagination over `(timestamp, id)` ordered scans.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Position after the last row of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub at: DateTime<Utc>,
    pub id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// `None` once the scan is exhausted.
    pub next: Option<Cursor>,
}

/// Builds a page from rows fetched with `LIMIT limit + 1`.
///
/// The extra row only signals that another page exists; it is dropped.
pub(crate) fn page_from_keyed_rows(mut rows: Vec<(DateTime<Utc>, Uuid)>, limit: i64) -> Page<Uuid> {
    let limit = usize::try_from(limit).unwrap_or(0);
    let has_more = rows.len() > limit;
    rows.truncate(limit);

    let next = if has_more {
        rows.last().map(|&(at, id)| Cursor { at, id })
    } else {
        None
    };

    Page {
        items: rows.into_iter().map(|(_, id)| id).collect(),
        next,
    }
}
