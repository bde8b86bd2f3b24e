//! Security event types for audit logging.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed enumeration of auditable security decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    /// An operation was allowed and delegated to the backend.
    AccessGranted,
    /// A capability check denied an operation.
    AccessDenied,
    /// A scrub pattern fired on stored or retrieved content.
    CredentialScrubbed,
    /// A query was denied by a capability rule.
    QueryBlocked,
    /// A query exceeded its cost ceiling.
    ComplexityExceeded,
    /// A graph-query keyword was found in a search term.
    InjectionAttempt,
    /// A session was registered for the first time.
    SessionCreated,
    /// A session's records were cleared.
    SessionCleared,
    /// Cross-session access was denied by isolation rules.
    CrossSessionAccess,
    /// The consecutive-failure ceiling was exceeded.
    UnusualPattern,
    /// The per-agent request rate ceiling was exceeded.
    RateLimitExceeded,
}

impl SecurityEventKind {
    /// Returns the kind as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AccessGranted => "access_granted",
            Self::AccessDenied => "access_denied",
            Self::CredentialScrubbed => "credential_scrubbed",
            Self::QueryBlocked => "query_blocked",
            Self::ComplexityExceeded => "complexity_exceeded",
            Self::InjectionAttempt => "injection_attempt",
            Self::SessionCreated => "session_created",
            Self::SessionCleared => "session_cleared",
            Self::CrossSessionAccess => "cross_session_access",
            Self::UnusualPattern => "unusual_pattern",
            Self::RateLimitExceeded => "rate_limit_exceeded",
        }
    }
}

impl fmt::Display for SecurityEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Event severity, 1 (informational) through 5 (critical).
///
/// Denials are always recorded at [`Severity::Alert`] or above.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Severity {
    /// Routine allow decisions.
    Info = 1,
    /// Scrub actions and session lifecycle.
    Notice = 2,
    /// Degraded but non-denying conditions.
    Warning = 3,
    /// Denials.
    Alert = 4,
    /// Injection attempts and anomaly escalations.
    Critical = 5,
}

impl Severity {
    /// Returns the numeric level (1..=5).
    #[must_use]
    pub const fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// An immutable audit record of one allow/deny/scrub decision.
///
/// Events are write-once; no update or delete operation exists. The
/// optional HMAC fields chain each event to its predecessor when the
/// recorder is configured with a signing key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Unique event ID.
    pub id: String,
    /// Decision category.
    pub kind: SecurityEventKind,
    /// Timestamp of the decision.
    pub timestamp: DateTime<Utc>,
    /// Agent the decision applied to.
    pub agent_id: String,
    /// Ambient session of the request.
    pub session_id: String,
    /// Severity level.
    pub severity: Severity,
    /// Free-form detail mapping. Never contains scrubbed content.
    pub detail: serde_json::Value,
    /// HMAC signature of this event (hex-encoded), when signing is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac_signature: Option<String>,
    /// HMAC of the previous event in the chain (hex-encoded).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_hmac: Option<String>,
}

impl SecurityEvent {
    /// Creates a new event for the current time.
    #[must_use]
    pub fn new(
        kind: SecurityEventKind,
        severity: Severity,
        agent_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            timestamp: Utc::now(),
            agent_id: agent_id.into(),
            session_id: session_id.into(),
            severity,
            detail: serde_json::Value::Null,
            hmac_signature: None,
            previous_hmac: None,
        }
    }

    /// Attaches detail to the event.
    #[must_use]
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }

    /// Computes the canonical string for HMAC signing.
    ///
    /// Format: `id|timestamp|kind|agent|session|previous_hmac`
    #[must_use]
    pub fn canonical_string(&self, previous_hmac: &str) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.id,
            self.timestamp.to_rfc3339(),
            self.kind,
            self.agent_id,
            self.session_id,
            previous_hmac
        )
    }
}
