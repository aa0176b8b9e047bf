//! Registry of live sessions keyed by identifier.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use devterm_core::{Error, Result, SessionId};

use crate::session::Session;

/// Concurrency-safe map from session id to session handle.
///
/// The registry also owns identifier allocation: ids start at 1, increase
/// monotonically and are never handed out twice, even after the session they
/// named is gone. The map lock is held only for the map operation itself.
#[derive(Debug)]
pub struct SessionRegistry {
    next_id: AtomicU64,
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Hand out a fresh identifier.
    pub fn allocate(&self) -> SessionId {
        SessionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a session under its own id.
    ///
    /// Fails if a session is already registered under that id.
    pub fn put(&self, session: Arc<Session>) -> Result<()> {
        let id = session.id();
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if sessions.contains_key(&id) {
            return Err(Error::InvalidInput(format!(
                "Session {id} is already registered"
            )));
        }
        sessions.insert(id, session);
        debug!("Registered session {} ({} live)", id, sessions.len());
        Ok(())
    }

    /// Look up a live session.
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Deregister a session, returning it if it was present.
    pub fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if removed.is_some() {
            debug!("Deregistered session {}", id);
        }
        removed
    }

    /// Whether a session is registered under `id`.
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    /// Call `f` for every registered session.
    ///
    /// Operates on a snapshot, so `f` may call back into the registry.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Session>),
    {
        for session in self.snapshot() {
            f(&session);
        }
    }

    /// Remove and return every registered session, ordered by id.
    pub fn drain(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<_> = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, session)| session)
            .collect();
        sessions.sort_by_key(|s| s.id());
        sessions
    }

    /// Remove every registered session.
    pub fn clear(&self) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no session is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort();
        ids
    }

    /// Registered sessions ordered by id.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<_> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.id());
        sessions
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use proptest::prelude::*;

    fn detached(registry: &SessionRegistry) -> Arc<Session> {
        Arc::new(Session::detached(registry.allocate(), "/bin/sh"))
    }

    #[test]
    fn test_allocate_starts_at_one() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.allocate(), SessionId::new(1));
        assert_eq!(registry.allocate(), SessionId::new(2));
    }

    #[test]
    fn test_put_get_remove() {
        let registry = SessionRegistry::new();
        let session = detached(&registry);
        let id = session.id();

        registry.put(Arc::clone(&session)).unwrap();
        assert!(registry.contains(id));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(id).unwrap().id(), id);

        assert!(registry.remove(id).is_some());
        assert!(registry.get(id).is_none());
        assert!(registry.remove(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_put_refuses_duplicate() {
        let registry = SessionRegistry::new();
        let session = detached(&registry);

        registry.put(Arc::clone(&session)).unwrap();
        let result = registry.put(session);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ids_never_reused_after_remove() {
        let registry = SessionRegistry::new();
        let first = detached(&registry);
        let first_id = first.id();
        registry.put(first).unwrap();
        registry.remove(first_id);

        let second = detached(&registry);
        assert!(second.id() > first_id);
    }

    #[test]
    fn test_for_each_and_drain() {
        let registry = SessionRegistry::new();
        for _ in 0..3 {
            registry.put(detached(&registry)).unwrap();
        }

        let mut seen = Vec::new();
        registry.for_each(|s| seen.push(s.id()));
        assert_eq!(seen, registry.ids());

        let drained = registry.drain();
        assert_eq!(drained.len(), 3);
        assert!(registry.is_empty());
        assert!(drained.windows(2).all(|w| w[0].id() < w[1].id()));
    }

    #[test]
    fn test_for_each_may_reenter_registry() {
        let registry = SessionRegistry::new();
        registry.put(detached(&registry)).unwrap();
        registry.put(detached(&registry)).unwrap();

        registry.for_each(|s| {
            registry.remove(s.id());
        });
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clear() {
        let registry = SessionRegistry::new();
        registry.put(detached(&registry)).unwrap();
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let registry = Arc::new(SessionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || (0..250).map(|_| registry.allocate()).collect::<Vec<_>>())
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(all.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(all.len(), 2000);
    }

    proptest! {
        #[test]
        fn prop_ids_pairwise_distinct(ops in proptest::collection::vec(any::<bool>(), 1..64)) {
            // true registers a new session, false closes the oldest live one
            let registry = SessionRegistry::new();
            let mut issued = HashSet::new();

            for register in ops {
                if register || registry.is_empty() {
                    let session = detached(&registry);
                    prop_assert!(issued.insert(session.id()));
                    registry.put(session).unwrap();
                } else {
                    let oldest = registry.ids()[0];
                    prop_assert!(registry.remove(oldest).is_some());
                }
            }
        }
    }
}
