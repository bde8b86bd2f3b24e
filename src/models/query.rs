//! Query types and filters.

use super::RecordKind;
use serde::{Deserialize, Serialize};

/// Filter criteria for a memory retrieval request.
///
/// An absent `session_id` targets the ambient session of the middleware
/// issuing the query. An absent `limit` is costed at
/// [`crate::cost::DEFAULT_RESULT_LIMIT`] so that omission cannot bypass
/// limit-based admission control.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryQuery {
    /// Target session. `None` means the current session.
    pub session_id: Option<String>,
    /// Filter by record kind.
    pub kind: Option<RecordKind>,
    /// Free-text content search term.
    pub content_search: Option<String>,
    /// Filter by tags (AND logic).
    pub tags: Vec<String>,
    /// Filter by source-code path.
    pub file_path: Option<String>,
    /// Minimum creation timestamp.
    pub created_after: Option<u64>,
    /// Maximum creation timestamp.
    pub created_before: Option<u64>,
    /// Maximum number of results to return.
    pub limit: Option<usize>,
}

impl MemoryQuery {
    /// Creates an empty query (matches everything in the current session).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            session_id: None,
            kind: None,
            content_search: None,
            tags: Vec::new(),
            file_path: None,
            created_after: None,
            created_before: None,
            limit: None,
        }
    }

    /// Targets an explicit session.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Adds a kind filter.
    #[must_use]
    pub const fn with_kind(mut self, kind: RecordKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Adds a content search term.
    #[must_use]
    pub fn with_content_search(mut self, term: impl Into<String>) -> Self {
        self.content_search = Some(term.into());
        self
    }

    /// Adds a tag filter.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Adds a source-code path filter.
    #[must_use]
    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Sets the result limit.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Resolves the target session against the ambient session.
    #[must_use]
    pub fn target_session<'a>(&'a self, current: &'a str) -> &'a str {
        self.session_id.as_deref().unwrap_or(current)
    }

    /// Number of active filter predicates, used for cost estimation.
    ///
    /// Content and tag search are costed separately as complexity, not
    /// counted here.
    #[must_use]
    pub const fn active_filter_count(&self) -> usize {
        let mut count = 0;
        if self.kind.is_some() {
            count += 1;
        }
        if self.session_id.is_some() {
            count += 1;
        }
        if self.file_path.is_some() {
            count += 1;
        }
        if self.created_after.is_some() {
            count += 1;
        }
        if self.created_before.is_some() {
            count += 1;
        }
        count
    }

    /// Returns true if the query has no filters at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active_filter_count() == 0
            && self.content_search.is_none()
            && self.tags.is_empty()
            && self.limit.is_none()
    }
}
