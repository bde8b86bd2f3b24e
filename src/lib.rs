//! # Memsentry
//!
//! Capability-based security middleware for agent memory backends.
//!
//! Memsentry sits between an agent-memory consumer and a pluggable storage
//! backend and enforces, on every operation: capability-based authorization,
//! pattern-based secret redaction, session isolation with lineage,
//! cost-based query admission control, and tamper-evident audit logging.
//! The middleware exposes the same [`MemoryBackend`] interface as the
//! backend it wraps, so callers cannot tell a guarded backend from an
//! unguarded one.
//!
//! ## Example
//!
//! ```rust,ignore
//! use memsentry::{CapabilitySet, InMemoryBackend, RecordKind, SecurityConfig, SecurityMiddleware};
//! use memsentry::session::SessionIsolationManager;
//! use std::sync::Arc;
//!
//! let capability = CapabilitySet::builder("agent-7")
//!     .with_kinds([RecordKind::Episodic, RecordKind::Working])
//!     .build()?;
//! let sessions = Arc::new(SessionIsolationManager::new());
//! let guarded = SecurityMiddleware::new(
//!     InMemoryBackend::new(),
//!     capability,
//!     "session-1",
//!     sessions,
//!     SecurityConfig::default(),
//! );
//! guarded.initialize().await?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
// multiple_crate_versions is inherently crate-level (detects duplicate transitive dependencies).
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod audit;
pub mod backend;
pub mod capability;
pub mod config;
pub mod cost;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod scrub;
pub mod session;

// Re-exports for convenience
pub use audit::{AuditConfig, AuditRecorder};
pub use backend::{InMemoryBackend, MemoryBackend};
pub use capability::{AccessDecision, CapabilityBuilder, CapabilitySet, Scope};
pub use config::SecurityConfig;
pub use cost::CostDescriptor;
pub use middleware::SecurityMiddleware;
pub use models::{
    MemoryQuery, MemoryRecord, RecordId, RecordKind, SecurityEvent, SecurityEventKind,
    Sensitivity, SessionInfo, Severity,
};
pub use scrub::{ScrubOutcome, SecretScrubber, SensitivityReport};
pub use session::SessionIsolationManager;

/// Error type for memsentry operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `SecurityViolation` | Any authorization, isolation, cost, rate, or anomaly denial |
/// | `InvalidInput` | Capability construction fails, malformed configuration |
/// | `OperationFailed` | Backend storage errors; passed through unmodified |
#[derive(Debug, ThisError)]
pub enum Error {
    /// A security policy denied the operation.
    ///
    /// Raised when:
    /// - A capability check denies a store, query, delete, or clear
    /// - Session isolation denies cross-session access
    /// - Query cost exceeds the capability ceiling
    /// - A graph-query keyword is found in a search term
    /// - The per-agent rate or failure ceiling is exceeded
    ///
    /// The reason describes the violated rule and identifiers only; it
    /// never contains the offending content.
    #[error("security violation: {reason}")]
    SecurityViolation {
        /// The rule that was violated.
        reason: String,
    },

    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - A capability set is constructed with an empty agent id or kind set
    /// - A numeric limit is non-positive or outside its sane range
    /// - A configuration file cannot be parsed
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    ///
    /// Raised by backends for storage-level failures. The middleware never
    /// masks or reinterprets this variant; it reaches the caller unchanged.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Shorthand constructor for [`Error::SecurityViolation`].
    #[must_use]
    pub fn violation(reason: impl Into<String>) -> Self {
        Self::SecurityViolation {
            reason: reason.into(),
        }
    }

    /// Returns true if this error is a security denial rather than a
    /// backend failure.
    #[must_use]
    pub const fn is_security_violation(&self) -> bool {
        matches!(self, Self::SecurityViolation { .. })
    }
}

/// Result type alias for memsentry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Centralized to avoid duplicate implementations across the codebase.
/// Falls back to 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
