//! Security middleware composition root.
//!
//! [`SecurityMiddleware`] wraps a [`MemoryBackend`] and implements the same
//! trait, running every request through a fixed pipeline:
//!
//! rate check → scrub (store input) → capability authorization → isolation
//! check → cost validation (retrieve only) → delegate → audit → return.
//!
//! No step is skipped and the wrapped backend is never invoked before all
//! checks pass. Any failing step records an audit event at severity ≥ 4,
//! bumps the agent's failure counter, and raises
//! [`Error::SecurityViolation`](crate::Error::SecurityViolation); the
//! middleware never silently downgrades a denial to a no-op. Backend
//! failures pass through unmodified. Exactly one audit event is recorded
//! per request outcome, so an abandoned request leaves no partial audit
//! state.

use crate::audit::AuditRecorder;
use crate::backend::MemoryBackend;
use crate::capability::{AccessDecision, CapabilitySet};
use crate::config::SecurityConfig;
use crate::cost::{self, Admission};
use crate::models::{
    MemoryQuery, MemoryRecord, RecordId, SecurityEvent, SecurityEventKind, Sensitivity,
    SessionInfo, Severity,
};
use crate::scrub::SecretScrubber;
use crate::session::SessionIsolationManager;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// Policy-enforcing wrapper around a memory backend.
///
/// Holds the backend by composition and is itself a [`MemoryBackend`], so
/// it can be dropped in wherever the unguarded backend was used. The
/// session isolation manager is passed in explicitly and shared across the
/// middleware instances of a process; the scrubber and audit recorder are
/// constructed from the [`SecurityConfig`].
pub struct SecurityMiddleware<B: MemoryBackend> {
    backend: B,
    capability: CapabilitySet,
    session_id: String,
    parent_session_id: Option<String>,
    sessions: Arc<SessionIsolationManager>,
    scrubber: SecretScrubber,
    recorder: AuditRecorder,
    anomaly_detection: bool,
}

impl<B: MemoryBackend> SecurityMiddleware<B> {
    /// Creates a middleware guarding `backend` on behalf of the agent
    /// described by `capability`, with `session_id` as the ambient session.
    #[must_use]
    pub fn new(
        backend: B,
        capability: CapabilitySet,
        session_id: impl Into<String>,
        sessions: Arc<SessionIsolationManager>,
        config: SecurityConfig,
    ) -> Self {
        let recorder = AuditRecorder::with_config(config.audit_config());
        Self {
            backend,
            capability,
            session_id: session_id.into(),
            parent_session_id: config.parent_session_id,
            sessions,
            scrubber: SecretScrubber::new(),
            recorder,
            anomaly_detection: config.enable_anomaly_detection,
        }
    }

    /// Returns the capability set this middleware enforces.
    #[must_use]
    pub const fn capability(&self) -> &CapabilitySet {
        &self.capability
    }

    /// Returns the ambient session identifier.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Returns the audit recorder for event queries and chain checks.
    #[must_use]
    pub const fn recorder(&self) -> &AuditRecorder {
        &self.recorder
    }

    /// True if `target` is reachable from the ambient session: lineage is
    /// bypassed only by global scope.
    fn isolation_allows(&self, target: &str) -> bool {
        self.capability.scope().bypasses_lineage()
            || self.sessions.can_access(&self.session_id, target)
    }

    /// Builds an event stamped with this middleware's agent and session.
    fn event(&self, kind: SecurityEventKind, severity: Severity) -> SecurityEvent {
        SecurityEvent::new(kind, severity, self.capability.agent_id(), &self.session_id)
    }

    /// Records a denial event (severity ≥ 4), bumps the failure counter,
    /// and returns the error to raise. An exceeded failure ceiling records
    /// an additional escalation event.
    async fn deny(
        &self,
        kind: SecurityEventKind,
        severity: Severity,
        mut detail: serde_json::Value,
        reason: String,
    ) -> Error {
        tracing::warn!(kind = %kind, reason = %reason, "request denied");
        if let Some(map) = detail.as_object_mut() {
            map.insert("reason".to_string(), json!(reason.as_str()));
        }
        self.recorder.record(self.event(kind, severity).with_detail(detail)).await;

        if self.anomaly_detection && !self.recorder.record_failure(self.capability.agent_id()) {
            self.recorder
                .record(
                    self.event(SecurityEventKind::UnusualPattern, Severity::Critical)
                        .with_detail(json!({
                            "consecutive_failure_ceiling":
                                self.recorder.config().max_consecutive_failures,
                        })),
                )
                .await;
        }

        Error::SecurityViolation { reason }
    }

    /// Rate admission for one request. Denies once the agent exceeds its
    /// per-window ceiling; a no-op when anomaly detection is disabled.
    async fn enforce_rate(&self, operation: &str) -> Result<()> {
        if !self.anomaly_detection || self.recorder.check_rate(self.capability.agent_id()) {
            return Ok(());
        }
        let reason = format!(
            "request rate for agent '{}' exceeds {} per window",
            self.capability.agent_id(),
            self.recorder.config().rate_limit_per_minute
        );
        Err(self
            .deny(
                SecurityEventKind::RateLimitExceeded,
                Severity::Alert,
                json!({ "operation": operation }),
                reason,
            )
            .await)
    }

    /// Records a grant event and resets the agent's failure counter.
    async fn grant(&self, detail: serde_json::Value) {
        self.recorder
            .record(
                self.event(SecurityEventKind::AccessGranted, Severity::Info)
                    .with_detail(detail),
            )
            .await;
        self.recorder.reset_failures(self.capability.agent_id());
    }

    /// Applies the capability decision, translating a denial into an
    /// audited error of the given event kind.
    async fn apply_decision(
        &self,
        decision: AccessDecision,
        kind: SecurityEventKind,
        detail: serde_json::Value,
    ) -> Result<()> {
        match decision {
            AccessDecision::Granted => Ok(()),
            AccessDecision::Denied(reason) => {
                Err(self.deny(kind, Severity::Alert, detail, reason).await)
            }
        }
    }

    /// Isolation gate shared by every session-targeting operation.
    async fn enforce_isolation(&self, target: &str, operation: &str) -> Result<()> {
        if self.isolation_allows(target) {
            return Ok(());
        }
        let reason = format!(
            "session access: no lineage between '{}' and '{target}'",
            self.session_id
        );
        Err(self
            .deny(
                SecurityEventKind::CrossSessionAccess,
                Severity::Alert,
                json!({ "operation": operation, "target_session": target }),
                reason,
            )
            .await)
    }

    /// Scrubs one outbound record and applies the partial-result policy.
    ///
    /// Returns `None` for records the caller may not see. Not an auditable
    /// denial: suppression is a result filter, not a request rejection.
    fn filter_outbound(&self, mut record: MemoryRecord) -> (Option<MemoryRecord>, bool) {
        if record.sensitivity == Sensitivity::High && !self.capability.may_read_redacted() {
            return (None, false);
        }
        let outcome = self.scrubber.scrub(&record.content);
        let rescrubbed = outcome.was_redacted();
        if rescrubbed {
            // Backend held unscrubbed content (stored before this layer
            // was in place); tag it on the way out.
            record.sensitivity = Sensitivity::High;
            for name in &outcome.fired {
                if !record.scrubbed_patterns.iter().any(|p| p == name) {
                    record.scrubbed_patterns.push((*name).to_string());
                }
            }
        }
        record.content = outcome.text;
        (Some(record), rescrubbed)
    }
}

#[async_trait]
impl<B: MemoryBackend> MemoryBackend for SecurityMiddleware<B> {
    /// Registers the ambient session and initializes the backend.
    async fn initialize(&self) -> Result<()> {
        let (_, created) = self
            .sessions
            .register(&self.session_id, self.parent_session_id.as_deref());
        if created {
            self.recorder
                .record(
                    self.event(SecurityEventKind::SessionCreated, Severity::Notice)
                        .with_detail(json!({ "parent": self.parent_session_id.as_deref() })),
                )
                .await;
        }
        self.backend.initialize().await
    }

    async fn store(&self, record: MemoryRecord) -> Result<bool> {
        self.enforce_rate("store").await?;

        // Scrub before anything else so content never crosses a later
        // stage unredacted.
        let mut record = record;
        let outcome = self.scrubber.scrub(&record.content);
        if outcome.was_redacted() {
            record.sensitivity = Sensitivity::High;
            record.scrubbed_patterns =
                outcome.fired.iter().map(|name| (*name).to_string()).collect();
            self.recorder
                .record(
                    self.event(SecurityEventKind::CredentialScrubbed, Severity::Notice)
                        .with_detail(json!({
                            "operation": "store",
                            "record_id": record.id.as_str(),
                            "patterns": outcome.fired,
                        })),
                )
                .await;
        }
        record.content = outcome.text;

        let target = record.session_id.clone();
        self.apply_decision(
            self.capability
                .authorize_store(record.kind, &target, &self.session_id),
            SecurityEventKind::AccessDenied,
            json!({ "operation": "store", "target_session": target.as_str() }),
        )
        .await?;
        self.enforce_isolation(&target, "store").await?;

        let record_id = record.id.clone();
        let stored = self.backend.store(record).await?;
        tracing::debug!(record_id = %record_id, "record stored");
        self.grant(json!({
            "operation": "store",
            "record_id": record_id.as_str(),
            "target_session": target,
        }))
        .await;
        Ok(stored)
    }

    async fn retrieve(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>> {
        self.enforce_rate("retrieve").await?;

        let cost = cost::estimate(query);
        self.apply_decision(
            self.capability.authorize_query(query, &self.session_id, &cost),
            SecurityEventKind::QueryBlocked,
            json!({ "operation": "retrieve", "cost": cost.total() }),
        )
        .await?;

        let target = query.target_session(&self.session_id).to_string();
        self.enforce_isolation(&target, "retrieve").await?;

        // Admission control: cost ceiling first, then the injection scan.
        match cost::validate(query, self.capability.max_query_cost()) {
            Admission::Granted(_) => {}
            admission @ Admission::CostExceeded { .. } => {
                let reason = admission.denial_reason().unwrap_or_default();
                return Err(self
                    .deny(
                        SecurityEventKind::ComplexityExceeded,
                        Severity::Alert,
                        json!({
                            "operation": "retrieve",
                            "cost": cost.total(),
                            "max_cost": self.capability.max_query_cost(),
                        }),
                        reason,
                    )
                    .await);
            }
            admission @ Admission::InjectionDetected(_) => {
                let reason = admission.denial_reason().unwrap_or_default();
                return Err(self
                    .deny(
                        SecurityEventKind::InjectionAttempt,
                        Severity::Critical,
                        json!({ "operation": "retrieve", "denylist": "graph-query" }),
                        reason,
                    )
                    .await);
            }
        }

        // Materialize the resolved target so the backend filters on it.
        let mut effective = query.clone();
        effective.session_id = Some(target.clone());
        let records = self.backend.retrieve(&effective).await?;
        let fetched = records.len();

        let mut results = Vec::with_capacity(fetched);
        let mut rescrubbed = false;
        for record in records {
            let (kept, hit) = self.filter_outbound(record);
            rescrubbed |= hit;
            if let Some(record) = kept {
                results.push(record);
            }
        }
        if rescrubbed {
            self.recorder
                .record(
                    self.event(SecurityEventKind::CredentialScrubbed, Severity::Notice)
                        .with_detail(json!({ "operation": "retrieve" })),
                )
                .await;
        }

        tracing::debug!(
            fetched,
            returned = results.len(),
            target_session = %target,
            "retrieve completed"
        );
        self.grant(json!({
            "operation": "retrieve",
            "target_session": target,
            "cost": cost.total(),
            "result_count": results.len(),
        }))
        .await;
        Ok(results)
    }

    async fn get_by_id(&self, id: &RecordId) -> Result<Option<MemoryRecord>> {
        self.enforce_rate("get_by_id").await?;

        let Some(record) = self.backend.get_by_id(id).await? else {
            self.grant(json!({ "operation": "get_by_id", "found": false }))
                .await;
            return Ok(None);
        };

        // The target session is only known after the fetch; the isolation
        // rule is applied to the fetched record before anything is
        // disclosed.
        if !self.capability.allowed_kinds().contains(&record.kind) {
            let reason = format!(
                "record kind '{}' is not permitted for agent '{}'",
                record.kind,
                self.capability.agent_id()
            );
            return Err(self
                .deny(
                    SecurityEventKind::AccessDenied,
                    Severity::Alert,
                    json!({ "operation": "get_by_id" }),
                    reason,
                )
                .await);
        }
        let target = record.session_id.clone();
        if target != self.session_id && !self.capability.scope().allows_cross_session_read() {
            let reason = format!(
                "session access: record belongs to '{target}' but agent '{}' is scoped {}",
                self.capability.agent_id(),
                self.capability.scope()
            );
            return Err(self
                .deny(
                    SecurityEventKind::AccessDenied,
                    Severity::Alert,
                    json!({ "operation": "get_by_id", "target_session": target }),
                    reason,
                )
                .await);
        }
        self.enforce_isolation(&target, "get_by_id").await?;

        let (kept, _) = self.filter_outbound(record);
        self.grant(json!({
            "operation": "get_by_id",
            "found": kept.is_some(),
        }))
        .await;
        Ok(kept)
    }

    async fn delete(&self, id: &RecordId) -> Result<bool> {
        self.enforce_rate("delete").await?;
        self.apply_decision(
            self.capability.authorize_delete(),
            SecurityEventKind::AccessDenied,
            json!({ "operation": "delete" }),
        )
        .await?;

        let deleted = self.backend.delete(id).await?;
        self.grant(json!({
            "operation": "delete",
            "record_id": id.as_str(),
            "deleted": deleted,
        }))
        .await;
        Ok(deleted)
    }

    async fn clear_session(&self, session_id: &str) -> Result<usize> {
        self.enforce_rate("clear_session").await?;
        self.apply_decision(
            self.capability.authorize_clear(session_id, &self.session_id),
            SecurityEventKind::AccessDenied,
            json!({ "operation": "clear_session", "target_session": session_id }),
        )
        .await?;
        self.enforce_isolation(session_id, "clear_session").await?;

        let cleared = self.backend.clear_session(session_id).await?;
        self.recorder
            .record(
                self.event(SecurityEventKind::SessionCleared, Severity::Notice)
                    .with_detail(json!({
                        "target_session": session_id,
                        "cleared": cleared,
                    })),
            )
            .await;
        self.recorder.reset_failures(self.capability.agent_id());
        Ok(cleared)
    }

    async fn cleanup_expired(&self) -> Result<usize> {
        self.enforce_rate("cleanup_expired").await?;
        self.apply_decision(
            self.capability.authorize_delete(),
            SecurityEventKind::AccessDenied,
            json!({ "operation": "cleanup_expired" }),
        )
        .await?;

        let purged = self.backend.cleanup_expired().await?;
        self.grant(json!({ "operation": "cleanup_expired", "purged": purged }))
            .await;
        Ok(purged)
    }

    async fn get_session_info(&self, session_id: &str) -> Result<Option<SessionInfo>> {
        self.enforce_rate("get_session_info").await?;

        if session_id != self.session_id
            && !self.capability.scope().allows_cross_session_read()
        {
            let reason = format!(
                "session access: info for '{session_id}' requires cross_session_read scope \
                 (agent '{}' has {})",
                self.capability.agent_id(),
                self.capability.scope()
            );
            return Err(self
                .deny(
                    SecurityEventKind::AccessDenied,
                    Severity::Alert,
                    json!({ "operation": "get_session_info", "target_session": session_id }),
                    reason,
                )
                .await);
        }
        self.enforce_isolation(session_id, "get_session_info").await?;

        let mut info = self.backend.get_session_info(session_id).await?;
        if let Some(ref mut info) = info {
            // Backends don't track lineage; overlay the registered parent.
            if let Some(lineage) = self.sessions.get(session_id) {
                info.parent_id = lineage.parent_id;
            }
        }
        self.grant(json!({
            "operation": "get_session_info",
            "found": info.is_some(),
        }))
        .await;
        Ok(info)
    }

    async fn list_sessions(&self, limit: Option<usize>) -> Result<Vec<SessionInfo>> {
        self.enforce_rate("list_sessions").await?;

        let sessions = self.backend.list_sessions(limit).await?;
        let visible: Vec<SessionInfo> = sessions
            .into_iter()
            .filter(|info| {
                info.session_id == self.session_id
                    || (self.capability.scope().allows_cross_session_read()
                        && self.isolation_allows(&info.session_id))
            })
            .collect();

        self.grant(json!({
            "operation": "list_sessions",
            "result_count": visible.len(),
        }))
        .await;
        Ok(visible)
    }

    async fn close(&self) -> Result<()> {
        self.backend.close().await
    }
}
