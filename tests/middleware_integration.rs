//! Integration tests for the security middleware.
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::doc_markdown
)]

use memsentry::session::SessionIsolationManager;
use memsentry::{
    CapabilitySet, InMemoryBackend, MemoryBackend, MemoryQuery, MemoryRecord, RecordId,
    RecordKind, Scope, SecurityConfig, SecurityEvent, SecurityEventKind, SecurityMiddleware,
    Sensitivity, SessionInfo, Severity,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Backend wrapper that counts delegated calls, used to prove denials
/// happen before the backend is ever reached.
struct CountingBackend {
    inner: InMemoryBackend,
    calls: AtomicUsize,
}

impl CountingBackend {
    fn new() -> Self {
        Self {
            inner: InMemoryBackend::new(),
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl MemoryBackend for CountingBackend {
    async fn initialize(&self) -> memsentry::Result<()> {
        self.inner.initialize().await
    }

    async fn store(&self, record: MemoryRecord) -> memsentry::Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.store(record).await
    }

    async fn retrieve(&self, query: &MemoryQuery) -> memsentry::Result<Vec<MemoryRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.retrieve(query).await
    }

    async fn get_by_id(&self, id: &RecordId) -> memsentry::Result<Option<MemoryRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_by_id(id).await
    }

    async fn delete(&self, id: &RecordId) -> memsentry::Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(id).await
    }

    async fn clear_session(&self, session_id: &str) -> memsentry::Result<usize> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.clear_session(session_id).await
    }

    async fn cleanup_expired(&self) -> memsentry::Result<usize> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.cleanup_expired().await
    }

    async fn get_session_info(
        &self,
        session_id: &str,
    ) -> memsentry::Result<Option<SessionInfo>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_session_info(session_id).await
    }

    async fn list_sessions(&self, limit: Option<usize>) -> memsentry::Result<Vec<SessionInfo>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.list_sessions(limit).await
    }

    async fn close(&self) -> memsentry::Result<()> {
        self.inner.close().await
    }
}

/// Backend whose store always fails, for error pass-through tests.
struct FailingBackend;

#[async_trait::async_trait]
impl MemoryBackend for FailingBackend {
    async fn initialize(&self) -> memsentry::Result<()> {
        Ok(())
    }

    async fn store(&self, _record: MemoryRecord) -> memsentry::Result<bool> {
        Err(memsentry::Error::OperationFailed {
            operation: "store".to_string(),
            cause: "disk full".to_string(),
        })
    }

    async fn retrieve(&self, _query: &MemoryQuery) -> memsentry::Result<Vec<MemoryRecord>> {
        Ok(Vec::new())
    }

    async fn get_by_id(&self, _id: &RecordId) -> memsentry::Result<Option<MemoryRecord>> {
        Ok(None)
    }

    async fn delete(&self, _id: &RecordId) -> memsentry::Result<bool> {
        Ok(false)
    }

    async fn clear_session(&self, _session_id: &str) -> memsentry::Result<usize> {
        Ok(0)
    }

    async fn cleanup_expired(&self) -> memsentry::Result<usize> {
        Ok(0)
    }

    async fn get_session_info(
        &self,
        _session_id: &str,
    ) -> memsentry::Result<Option<SessionInfo>> {
        Ok(None)
    }

    async fn list_sessions(
        &self,
        _limit: Option<usize>,
    ) -> memsentry::Result<Vec<SessionInfo>> {
        Ok(Vec::new())
    }

    async fn close(&self) -> memsentry::Result<()> {
        Ok(())
    }
}

fn episodic_capability() -> CapabilitySet {
    CapabilitySet::builder("agent-1")
        .with_kinds([RecordKind::Episodic, RecordKind::Working])
        .build()
        .unwrap()
}

#[tokio::test]
async fn stored_github_token_is_redacted_and_tagged() {
    // Scenario: session-only capability over {episodic, working}; "s1"
    // stores an episodic record containing ghp_ + 36 alphanumerics.
    let capability = CapabilitySet::builder("agent-1")
        .with_kinds([RecordKind::Episodic, RecordKind::Working])
        .with_read_redacted()
        .build()
        .unwrap();
    let mw = SecurityMiddleware::new(
        InMemoryBackend::new(),
        capability,
        "s1",
        Arc::new(SessionIsolationManager::new()),
        SecurityConfig::default(),
    );
    mw.initialize().await.unwrap();

    let token = format!("ghp_{}", "Ab1Cd2Ef3Gh4Ij5Kl6Mn7Op8Qr9St0Uv1Wx2");
    let record = MemoryRecord::new("s1", RecordKind::Episodic, format!("pushed with {token}"));
    let id = record.id.clone();
    mw.store(record).await.unwrap();

    let stored = mw.get_by_id(&id).await.unwrap().unwrap();
    assert!(!stored.content.contains("ghp_"));
    assert!(stored.content.contains("[REDACTED:GITHUB_TOKEN]"));
    assert_eq!(stored.sensitivity, Sensitivity::High);
}

#[tokio::test]
async fn cross_session_retrieve_denied_before_backend_is_called() {
    // Scenario: the same capability retrieving with session_id="s2" raises
    // a security violation referencing session access, and the backend is
    // never invoked.
    let backend = Arc::new(CountingBackend::new());
    let mw = SecurityMiddleware::new(
        Arc::clone(&backend),
        episodic_capability(),
        "s1",
        Arc::new(SessionIsolationManager::new()),
        SecurityConfig::default(),
    );
    mw.initialize().await.unwrap();

    let err = mw
        .retrieve(&MemoryQuery::new().with_session("s2"))
        .await
        .unwrap_err();
    assert!(err.is_security_violation());
    assert!(err.to_string().contains("session access"));
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn oversized_search_is_denied_on_cost_not_injection() {
    // Scenario: no explicit limit, 4000-char content search term. The
    // term even contains a denylisted keyword; cost must win.
    let backend = Arc::new(CountingBackend::new());
    let mw = SecurityMiddleware::new(
        Arc::clone(&backend),
        episodic_capability(),
        "s1",
        Arc::new(SessionIsolationManager::new()),
        SecurityConfig::default(),
    );
    mw.initialize().await.unwrap();

    let term = format!("MATCH {}", "x".repeat(4000));
    let err = mw
        .retrieve(&MemoryQuery::new().with_content_search(term))
        .await
        .unwrap_err();
    assert!(err.is_security_violation());
    assert!(err.to_string().contains("cost"));
    assert_eq!(backend.call_count(), 0);

    // Audited as a query-cost denial, not as an injection attempt. The
    // capability ceiling check fires first in the pipeline, so the event
    // is a QueryBlocked at severity >= 4 and no injection event exists.
    let injection = mw
        .recorder()
        .query(Some(SecurityEventKind::InjectionAttempt), Severity::Info);
    assert!(injection.is_empty());
    let denials: Vec<SecurityEvent> = mw.recorder().query(None, Severity::Alert);
    assert_eq!(denials.len(), 1);
}

#[tokio::test]
async fn lineage_access_is_symmetric_and_bounded() {
    // Scenario: "child" registers under "root"; both directions work,
    // an unregistered "sibling" does not.
    let sessions = SessionIsolationManager::new();
    sessions.register("root", None);
    sessions.register("child", Some("root"));

    assert!(sessions.can_access("child", "root"));
    assert!(sessions.can_access("root", "child"));
    assert!(!sessions.can_access("child", "sibling"));
}

#[tokio::test]
async fn backend_failure_passes_through_unmodified() {
    let mw = SecurityMiddleware::new(
        FailingBackend,
        episodic_capability(),
        "s1",
        Arc::new(SessionIsolationManager::new()),
        SecurityConfig::default(),
    );
    mw.initialize().await.unwrap();

    let err = mw
        .store(MemoryRecord::new("s1", RecordKind::Episodic, "note"))
        .await
        .unwrap_err();
    assert!(!err.is_security_violation());
    assert_eq!(err.to_string(), "operation 'store' failed: disk full");
}

#[tokio::test]
async fn store_and_retrieve_roundtrip_within_session() {
    let mw = SecurityMiddleware::new(
        InMemoryBackend::new(),
        episodic_capability(),
        "s1",
        Arc::new(SessionIsolationManager::new()),
        SecurityConfig::default(),
    );
    mw.initialize().await.unwrap();

    mw.store(
        MemoryRecord::new("s1", RecordKind::Episodic, "chose tokio for the runtime")
            .with_tag("decisions"),
    )
    .await
    .unwrap();
    mw.store(MemoryRecord::new("s1", RecordKind::Working, "scratch"))
        .await
        .unwrap();

    let all = mw.retrieve(&MemoryQuery::new()).await.unwrap();
    assert_eq!(all.len(), 2);

    let tagged = mw
        .retrieve(&MemoryQuery::new().with_tag("decisions"))
        .await
        .unwrap();
    assert_eq!(tagged.len(), 1);
    assert!(tagged[0].content.contains("tokio"));
}

#[tokio::test]
async fn child_session_reaches_parent_records_with_scope_and_lineage() {
    let sessions = Arc::new(SessionIsolationManager::new());
    let backend = InMemoryBackend::new();
    backend
        .store(MemoryRecord::new("root", RecordKind::Episodic, "parent note"))
        .await
        .unwrap();

    let capability = CapabilitySet::builder("agent-1")
        .with_all_kinds()
        .with_scope(Scope::CrossSessionRead)
        .build()
        .unwrap();
    let config = SecurityConfig::new().with_parent_session("root");
    let mw = SecurityMiddleware::new(backend, capability, "child", sessions.clone(), config);

    // initialize registers "child" under "root".
    sessions.register("root", None);
    mw.initialize().await.unwrap();

    let results = mw
        .retrieve(&MemoryQuery::new().with_session("root"))
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content, "parent note");
}

#[tokio::test]
async fn audit_log_file_is_append_only_ndjson() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.ndjson");
    let config = SecurityConfig::new().with_audit_log_path(&path);

    let mw = SecurityMiddleware::new(
        InMemoryBackend::new(),
        episodic_capability(),
        "s1",
        Arc::new(SessionIsolationManager::new()),
        config,
    );
    mw.initialize().await.unwrap();

    mw.store(MemoryRecord::new("s1", RecordKind::Episodic, "one"))
        .await
        .unwrap();
    let _ = mw.retrieve(&MemoryQuery::new().with_session("s2")).await;

    let contents = std::fs::read_to_string(&path).unwrap();
    let events: Vec<SecurityEvent> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    // session_created, access_granted (store), query_blocked (denial)
    assert!(events.len() >= 3);
    assert!(
        events
            .iter()
            .any(|e| e.kind == SecurityEventKind::SessionCreated)
    );
    assert!(
        events
            .iter()
            .any(|e| e.kind == SecurityEventKind::AccessGranted)
    );
    assert!(
        events
            .iter()
            .any(|e| e.severity >= Severity::Alert)
    );
}

#[tokio::test]
async fn audit_chain_verifies_after_mixed_outcomes() {
    let config = SecurityConfig::new().with_audit_hmac_key(vec![42u8; 32]);
    let mw = SecurityMiddleware::new(
        InMemoryBackend::new(),
        episodic_capability(),
        "s1",
        Arc::new(SessionIsolationManager::new()),
        config,
    );
    mw.initialize().await.unwrap();

    mw.store(MemoryRecord::new("s1", RecordKind::Episodic, "ok"))
        .await
        .unwrap();
    let _ = mw.retrieve(&MemoryQuery::new().with_session("s2")).await;
    let _ = mw.delete(&RecordId::new("nope")).await;

    mw.recorder().verify_chain().unwrap();
}

#[tokio::test]
async fn denial_is_always_surfaced_never_downgraded() {
    let mw = SecurityMiddleware::new(
        InMemoryBackend::new(),
        episodic_capability(),
        "s1",
        Arc::new(SessionIsolationManager::new()),
        SecurityConfig::default(),
    );
    mw.initialize().await.unwrap();

    // A store into a foreign session errors; it is not silently dropped.
    let err = mw
        .store(MemoryRecord::new("s2", RecordKind::Episodic, "note"))
        .await
        .unwrap_err();
    assert!(err.is_security_violation());

    // And every denial left an audit event at severity >= 4.
    let denials = mw.recorder().query(None, Severity::Alert);
    assert_eq!(denials.len(), 1);
}

#[tokio::test]
async fn transparent_wrapper_is_usable_as_dyn_backend() {
    // The middleware satisfies the same trait object as the raw backend.
    let mw: Arc<dyn MemoryBackend> = Arc::new(SecurityMiddleware::new(
        InMemoryBackend::new(),
        episodic_capability(),
        "s1",
        Arc::new(SessionIsolationManager::new()),
        SecurityConfig::default(),
    ));
    mw.initialize().await.unwrap();
    mw.store(MemoryRecord::new("s1", RecordKind::Episodic, "via dyn"))
        .await
        .unwrap();
    assert_eq!(mw.retrieve(&MemoryQuery::new()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_requests_share_lineage_and_counters() {
    let sessions = Arc::new(SessionIsolationManager::new());
    let capability = CapabilitySet::builder("agent-1")
        .with_all_kinds()
        .with_max_results(1000)
        .build()
        .unwrap();
    let mw = Arc::new(SecurityMiddleware::new(
        InMemoryBackend::new(),
        capability,
        "s1",
        sessions,
        SecurityConfig::new().with_rate_limit(1000),
    ));
    mw.initialize().await.unwrap();

    let mut handles = Vec::new();
    for i in 0..16 {
        let mw = Arc::clone(&mw);
        handles.push(tokio::spawn(async move {
            mw.store(MemoryRecord::new(
                "s1",
                RecordKind::Episodic,
                format!("note {i}"),
            ))
            .await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    let all = mw
        .retrieve(&MemoryQuery::new().with_limit(100))
        .await
        .unwrap();
    assert_eq!(all.len(), 16);
}
