//! Stable indirection from a caller-visible `session_id` to the current
//! engine handle backing it.
//!
//! Modeled on the teacher's `OpenSessions` (`Arc<Mutex<HashSet<Uuid>>>` plus
//! a `Drop`-based guard), generalized from a presence set to a map so a
//! [`crate::supervisor::Supervisor`] can swap in a freshly rebuilt engine
//! after a reconnection without the caller's `session_id` ever changing.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::engine::EngineHandle;

#[derive(Default)]
struct Inner {
    sessions: Mutex<HashMap<Uuid, EngineHandle>>,
}

/// Shared, cloneable handle to the process-wide session registry.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

/// Deregisters a session when dropped, mirroring the teacher's
/// `SessionDropGuard` so cleanup happens on every exit path (normal close,
/// panic unwind, or early return) without repeating the call at each site.
pub struct RegistrationGuard {
    registry: SessionRegistry,
    session_id: Uuid,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.deregister(self.session_id);
    }
}

impl SessionRegistry {
    /// Builds an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session, returning a guard that deregisters it on drop.
    pub fn register(&self, session_id: Uuid, handle: EngineHandle) -> RegistrationGuard {
        self.inner.sessions.lock().insert(session_id, handle);
        RegistrationGuard {
            registry: self.clone(),
            session_id,
        }
    }

    /// Swaps in a rebuilt engine handle after a supervised reconnection.
    /// No-op (returns `false`) if the session was deregistered concurrently.
    pub fn update(&self, session_id: Uuid, handle: EngineHandle) -> bool {
        let mut sessions = self.inner.sessions.lock();
        match sessions.get_mut(&session_id) {
            Some(slot) => {
                *slot = handle;
                true
            }
            None => false,
        }
    }

    /// Looks up the current engine handle for a session.
    pub fn lookup(&self, session_id: Uuid) -> Option<EngineHandle> {
        self.inner.sessions.lock().get(&session_id).cloned()
    }

    /// Removes a session unconditionally. Called by [`RegistrationGuard`]
    /// and directly by an explicit caller-initiated close.
    pub fn deregister(&self, session_id: Uuid) {
        self.inner.sessions.lock().remove(&session_id);
    }

    /// Number of currently registered sessions.
    pub fn len(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// `true` when no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::dummy_handle;

    #[test]
    fn register_then_lookup_finds_handle() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        let _guard = registry.register(id, dummy_handle());
        assert!(registry.lookup(id).is_some());
    }

    #[test]
    fn dropping_guard_deregisters() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        {
            let _guard = registry.register(id, dummy_handle());
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn update_replaces_handle_for_live_session() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        let _guard = registry.register(id, dummy_handle());
        assert!(registry.update(id, dummy_handle()));
    }

    #[test]
    fn update_on_unknown_session_returns_false() {
        let registry = SessionRegistry::new();
        assert!(!registry.update(Uuid::new_v4(), dummy_handle()));
    }
}
