//! Storage backend abstraction.
//!
//! The middleware exposes exactly this interface and holds the wrapped
//! backend by composition, so a guarded backend is indistinguishable from
//! an unguarded one at the call site.

mod memory;

pub use memory::InMemoryBackend;

use crate::Result;
use crate::models::{MemoryQuery, MemoryRecord, RecordId, SessionInfo};
use async_trait::async_trait;
use std::sync::Arc;

/// Trait for memory storage backends.
///
/// Backends are the authoritative store for memory records. They perform
/// no security checks of their own; every guarantee in this crate is
/// enforced by the middleware before delegation. Backend errors propagate
/// to callers unmodified.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// Prepares the backend for use.
    async fn initialize(&self) -> Result<()>;

    /// Stores a record. Returns true if the record was persisted.
    async fn store(&self, record: MemoryRecord) -> Result<bool>;

    /// Retrieves records matching a query.
    async fn retrieve(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>>;

    /// Fetches a record by ID.
    async fn get_by_id(&self, id: &RecordId) -> Result<Option<MemoryRecord>>;

    /// Deletes a record by ID. Returns true if a record was removed.
    async fn delete(&self, id: &RecordId) -> Result<bool>;

    /// Removes every record belonging to a session. Returns the count
    /// removed.
    async fn clear_session(&self, session_id: &str) -> Result<usize>;

    /// Removes expired records. Returns the count removed.
    async fn cleanup_expired(&self) -> Result<usize>;

    /// Returns summary information for a session, if known.
    async fn get_session_info(&self, session_id: &str) -> Result<Option<SessionInfo>>;

    /// Lists known sessions, oldest first, up to `limit`.
    async fn list_sessions(&self, limit: Option<usize>) -> Result<Vec<SessionInfo>>;

    /// Releases backend resources.
    async fn close(&self) -> Result<()>;
}

/// Shared backends delegate transparently, so an `Arc<B>` is usable
/// anywhere a `MemoryBackend` is expected.
#[async_trait]
impl<T: MemoryBackend + ?Sized> MemoryBackend for Arc<T> {
    async fn initialize(&self) -> Result<()> {
        (**self).initialize().await
    }

    async fn store(&self, record: MemoryRecord) -> Result<bool> {
        (**self).store(record).await
    }

    async fn retrieve(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>> {
        (**self).retrieve(query).await
    }

    async fn get_by_id(&self, id: &RecordId) -> Result<Option<MemoryRecord>> {
        (**self).get_by_id(id).await
    }

    async fn delete(&self, id: &RecordId) -> Result<bool> {
        (**self).delete(id).await
    }

    async fn clear_session(&self, session_id: &str) -> Result<usize> {
        (**self).clear_session(session_id).await
    }

    async fn cleanup_expired(&self) -> Result<usize> {
        (**self).cleanup_expired().await
    }

    async fn get_session_info(&self, session_id: &str) -> Result<Option<SessionInfo>> {
        (**self).get_session_info(session_id).await
    }

    async fn list_sessions(&self, limit: Option<usize>) -> Result<Vec<SessionInfo>> {
        (**self).list_sessions(limit).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}
