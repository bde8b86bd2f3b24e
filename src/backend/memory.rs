//! In-memory backend.
//!
//! Complete reference implementation of [`MemoryBackend`] used by tests
//! and demos. Not durable; state lives for the process lifetime.

use super::MemoryBackend;
use crate::models::{MemoryQuery, MemoryRecord, RecordId, SessionInfo};
use crate::{Error, Result, current_timestamp};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// First-seen metadata per session.
#[derive(Debug, Clone)]
struct SessionMeta {
    created_at: u64,
}

/// In-memory [`MemoryBackend`] implementation.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    records: RwLock<HashMap<RecordId, MemoryRecord>>,
    sessions: RwLock<HashMap<String, SessionMeta>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().map_or(0, |records| records.len())
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock_error(operation: &str) -> Error {
    Error::OperationFailed {
        operation: operation.to_string(),
        cause: "lock poisoned".to_string(),
    }
}

fn matches(record: &MemoryRecord, query: &MemoryQuery) -> bool {
    if let Some(session) = query.session_id.as_deref() {
        if record.session_id != session {
            return false;
        }
    }
    if let Some(kind) = query.kind {
        if record.kind != kind {
            return false;
        }
    }
    if !query.tags.iter().all(|tag| record.tags.contains(tag)) {
        return false;
    }
    if let Some(term) = query.content_search.as_deref() {
        if !record
            .content
            .to_lowercase()
            .contains(&term.to_lowercase())
        {
            return false;
        }
    }
    if let Some(path) = query.file_path.as_deref() {
        if record.file_path.as_deref() != Some(path) {
            return false;
        }
    }
    if let Some(after) = query.created_after {
        if record.created_at < after {
            return false;
        }
    }
    if let Some(before) = query.created_before {
        if record.created_at > before {
            return false;
        }
    }
    true
}

#[async_trait]
impl MemoryBackend for InMemoryBackend {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn store(&self, record: MemoryRecord) -> Result<bool> {
        {
            let mut sessions = self.sessions.write().map_err(|_| lock_error("store"))?;
            sessions
                .entry(record.session_id.clone())
                .or_insert_with(|| SessionMeta {
                    created_at: current_timestamp(),
                });
        }
        let mut records = self.records.write().map_err(|_| lock_error("store"))?;
        records.insert(record.id.clone(), record);
        Ok(true)
    }

    async fn retrieve(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>> {
        let records = self.records.read().map_err(|_| lock_error("retrieve"))?;
        let mut hits: Vec<MemoryRecord> = records
            .values()
            .filter(|record| matches(record, query))
            .cloned()
            .collect();

        // Newest first; id as tiebreaker for deterministic ordering.
        hits.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        if let Some(limit) = query.limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }

    async fn get_by_id(&self, id: &RecordId) -> Result<Option<MemoryRecord>> {
        let records = self.records.read().map_err(|_| lock_error("get_by_id"))?;
        Ok(records.get(id).cloned())
    }

    async fn delete(&self, id: &RecordId) -> Result<bool> {
        let mut records = self.records.write().map_err(|_| lock_error("delete"))?;
        Ok(records.remove(id).is_some())
    }

    async fn clear_session(&self, session_id: &str) -> Result<usize> {
        let mut records = self
            .records
            .write()
            .map_err(|_| lock_error("clear_session"))?;
        let before = records.len();
        records.retain(|_, record| record.session_id != session_id);
        Ok(before - records.len())
    }

    async fn cleanup_expired(&self) -> Result<usize> {
        let now = current_timestamp();
        let mut records = self
            .records
            .write()
            .map_err(|_| lock_error("cleanup_expired"))?;
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now));
        Ok(before - records.len())
    }

    async fn get_session_info(&self, session_id: &str) -> Result<Option<SessionInfo>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| lock_error("get_session_info"))?;
        let Some(meta) = sessions.get(session_id) else {
            return Ok(None);
        };
        let records = self
            .records
            .read()
            .map_err(|_| lock_error("get_session_info"))?;
        let record_count = records
            .values()
            .filter(|record| record.session_id == session_id)
            .count();
        Ok(Some(SessionInfo {
            session_id: session_id.to_string(),
            parent_id: None,
            record_count,
            created_at: meta.created_at,
        }))
    }

    async fn list_sessions(&self, limit: Option<usize>) -> Result<Vec<SessionInfo>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| lock_error("list_sessions"))?;
        let records = self.records.read().map_err(|_| lock_error("list_sessions"))?;

        let mut infos: Vec<SessionInfo> = sessions
            .iter()
            .map(|(session_id, meta)| SessionInfo {
                session_id: session_id.clone(),
                parent_id: None,
                record_count: records
                    .values()
                    .filter(|record| &record.session_id == session_id)
                    .count(),
                created_at: meta.created_at,
            })
            .collect();

        infos.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        if let Some(limit) = limit {
            infos.truncate(limit);
        }
        Ok(infos)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordKind;

    fn record(session: &str, kind: RecordKind, content: &str) -> MemoryRecord {
        MemoryRecord::new(session, kind, content)
    }

    #[tokio::test]
    async fn test_store_and_get() {
        let backend = InMemoryBackend::new();
        let rec = record("s1", RecordKind::Episodic, "hello");
        let id = rec.id.clone();

        assert!(backend.store(rec).await.unwrap());
        let fetched = backend.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(fetched.content, "hello");
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_retrieve_filters() {
        let backend = InMemoryBackend::new();
        backend
            .store(record("s1", RecordKind::Episodic, "alpha build failed"))
            .await
            .unwrap();
        backend
            .store(record("s1", RecordKind::Working, "beta notes"))
            .await
            .unwrap();
        backend
            .store(record("s2", RecordKind::Episodic, "gamma"))
            .await
            .unwrap();

        let by_session = backend
            .retrieve(&MemoryQuery::new().with_session("s1"))
            .await
            .unwrap();
        assert_eq!(by_session.len(), 2);

        let by_kind = backend
            .retrieve(
                &MemoryQuery::new()
                    .with_session("s1")
                    .with_kind(RecordKind::Working),
            )
            .await
            .unwrap();
        assert_eq!(by_kind.len(), 1);

        let by_content = backend
            .retrieve(&MemoryQuery::new().with_content_search("BUILD"))
            .await
            .unwrap();
        assert_eq!(by_content.len(), 1);
    }

    #[tokio::test]
    async fn test_retrieve_respects_limit() {
        let backend = InMemoryBackend::new();
        for i in 0..5 {
            backend
                .store(record("s1", RecordKind::Episodic, &format!("note {i}")))
                .await
                .unwrap();
        }
        let limited = backend
            .retrieve(&MemoryQuery::new().with_limit(2))
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_tag_filter_is_and() {
        let backend = InMemoryBackend::new();
        backend
            .store(
                record("s1", RecordKind::Episodic, "tagged")
                    .with_tag("a")
                    .with_tag("b"),
            )
            .await
            .unwrap();
        backend
            .store(record("s1", RecordKind::Episodic, "half").with_tag("a"))
            .await
            .unwrap();

        let both = backend
            .retrieve(&MemoryQuery::new().with_tag("a").with_tag("b"))
            .await
            .unwrap();
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].content, "tagged");
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let backend = InMemoryBackend::new();
        let rec = record("s1", RecordKind::Episodic, "one");
        let id = rec.id.clone();
        backend.store(rec).await.unwrap();
        backend
            .store(record("s1", RecordKind::Episodic, "two"))
            .await
            .unwrap();

        assert!(backend.delete(&id).await.unwrap());
        assert!(!backend.delete(&id).await.unwrap());
        assert_eq!(backend.clear_session("s1").await.unwrap(), 1);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let backend = InMemoryBackend::new();
        backend
            .store(record("s1", RecordKind::Working, "stale").with_expiry(1))
            .await
            .unwrap();
        backend
            .store(record("s1", RecordKind::Working, "fresh"))
            .await
            .unwrap();

        assert_eq!(backend.cleanup_expired().await.unwrap(), 1);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_session_info_and_listing() {
        let backend = InMemoryBackend::new();
        backend
            .store(record("s1", RecordKind::Episodic, "a"))
            .await
            .unwrap();
        backend
            .store(record("s1", RecordKind::Episodic, "b"))
            .await
            .unwrap();
        backend
            .store(record("s2", RecordKind::Episodic, "c"))
            .await
            .unwrap();

        let info = backend.get_session_info("s1").await.unwrap().unwrap();
        assert_eq!(info.record_count, 2);
        assert!(backend.get_session_info("missing").await.unwrap().is_none());

        let sessions = backend.list_sessions(None).await.unwrap();
        assert_eq!(sessions.len(), 2);
        let limited = backend.list_sessions(Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
    }
}
