//! Memory record types and identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a memory record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Creates a new record ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random record ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Memory record categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// Events and interactions from a session.
    #[default]
    Episodic,
    /// Facts and distilled knowledge.
    Semantic,
    /// How-to knowledge and learned procedures.
    Procedural,
    /// Future intentions and reminders.
    Prospective,
    /// Short-lived scratch state for the current task.
    Working,
}

impl RecordKind {
    /// Returns all record kind variants.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Episodic,
            Self::Semantic,
            Self::Procedural,
            Self::Prospective,
            Self::Working,
        ]
    }

    /// Returns the kind as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
            Self::Prospective => "prospective",
            Self::Working => "working",
        }
    }

    /// Parses a kind from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "episodic" => Some(Self::Episodic),
            "semantic" => Some(Self::Semantic),
            "procedural" => Some(Self::Procedural),
            "prospective" => Some(Self::Prospective),
            "working" => Some(Self::Working),
            _ => None,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sensitivity level of stored content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    /// No scrub pattern fired on the content.
    #[default]
    Low,
    /// At least one scrub pattern fired; retrieval requires the
    /// read-redacted grant.
    High,
}

impl Sensitivity {
    /// Returns the level as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A memory record as seen by the middleware and its backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique identifier.
    pub id: RecordId,
    /// Session the record belongs to.
    pub session_id: String,
    /// Memory category.
    pub kind: RecordKind,
    /// The record content. Scrubbed before it reaches a backend.
    pub content: String,
    /// Optional tags for categorization.
    pub tags: Vec<String>,
    /// Optional source-code path this record refers to.
    pub file_path: Option<String>,
    /// Sensitivity tag assigned at store time.
    pub sensitivity: Sensitivity,
    /// Names of scrub patterns that fired on the original content.
    pub scrubbed_patterns: Vec<String>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
    /// Last update timestamp (Unix epoch seconds).
    pub updated_at: u64,
    /// Expiration timestamp (Unix epoch seconds). `None` means the record
    /// lives until deleted.
    pub expires_at: Option<u64>,
}

impl MemoryRecord {
    /// Creates a new record with a generated ID and current timestamps.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        kind: RecordKind,
        content: impl Into<String>,
    ) -> Self {
        let now = crate::current_timestamp();
        Self {
            id: RecordId::generate(),
            session_id: session_id.into(),
            kind,
            content: content.into(),
            tags: Vec::new(),
            file_path: None,
            sensitivity: Sensitivity::Low,
            scrubbed_patterns: Vec::new(),
            created_at: now,
            updated_at: now,
            expires_at: None,
        }
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Sets the source-code path.
    #[must_use]
    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Sets the expiration timestamp.
    #[must_use]
    pub const fn with_expiry(mut self, expires_at: u64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Returns true if the record has expired as of `now`.
    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Summary information about a session known to a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session identifier.
    pub session_id: String,
    /// Parent session, if any.
    pub parent_id: Option<String>,
    /// Number of records stored for the session.
    pub record_count: usize,
    /// Timestamp the session was first seen (Unix epoch seconds).
    pub created_at: u64,
}
