//! Session isolation and lineage tracking.
//!
//! Sessions form a parent/child forest. Isolation is intentionally
//! narrower than the capability scope rule: both must independently permit
//! an operation, unless the scope is global, in which case lineage is
//! bypassed entirely by design.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Lineage record for one session.
///
/// Created the first time a session is seen; children are append-only and
/// records are never deleted during the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLineage {
    /// Session identifier.
    pub session_id: String,
    /// Registered parent, if any.
    pub parent_id: Option<String>,
    /// Sessions registered with this session as their parent.
    pub children: HashSet<String>,
}

impl SessionLineage {
    fn new(session_id: impl Into<String>, parent_id: Option<String>) -> Self {
        Self {
            session_id: session_id.into(),
            parent_id,
            children: HashSet::new(),
        }
    }
}

/// Tracks session parent/child relationships and access eligibility.
///
/// Shared across all middleware instances of a process; interior locking
/// is scoped to the lineage table and never spans an await point.
#[derive(Debug, Default)]
pub struct SessionIsolationManager {
    sessions: RwLock<HashMap<String, SessionLineage>>,
}

impl SessionIsolationManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent create-or-fetch of a session's lineage record.
    ///
    /// If `parent_id` is supplied and already registered, `session_id` is
    /// added to the parent's child set (duplicates are ignored). Returns
    /// the lineage record and whether it was newly created.
    pub fn register(
        &self,
        session_id: &str,
        parent_id: Option<&str>,
    ) -> (SessionLineage, bool) {
        let Ok(mut sessions) = self.sessions.write() else {
            // Poisoned lock: fall back to a detached record; the table is
            // only ever mutated under this lock, so this cannot happen in
            // practice without a prior panic.
            return (SessionLineage::new(session_id, None), false);
        };

        if let Some(existing) = sessions.get(session_id) {
            return (existing.clone(), false);
        }

        let record = SessionLineage::new(
            session_id,
            parent_id.map(std::string::ToString::to_string),
        );
        sessions.insert(session_id.to_string(), record.clone());

        if let Some(parent) = parent_id {
            if let Some(parent_record) = sessions.get_mut(parent) {
                parent_record.children.insert(session_id.to_string());
            }
        }

        (record, true)
    }

    /// Returns true iff `current` may reach `target`: identity, registered
    /// parent, or registered child. Unregistered sessions reach only
    /// themselves.
    #[must_use]
    pub fn can_access(&self, current: &str, target: &str) -> bool {
        if current == target {
            return true;
        }
        let Ok(sessions) = self.sessions.read() else {
            return false;
        };
        sessions.get(current).is_some_and(|record| {
            record.parent_id.as_deref() == Some(target) || record.children.contains(target)
        })
    }

    /// Returns the lineage record for a session, if registered.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<SessionLineage> {
        self.sessions
            .read()
            .ok()
            .and_then(|sessions| sessions.get(session_id).cloned())
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().map_or(0, |sessions| sessions.len())
    }

    /// Returns true if no session has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
