//! Process-wide handle -> session map
//!
//! Lock order is store first, session second. The store lock is a plain
//! `parking_lot` lock that only ever guards map operations: it is always
//! released before a session lock is awaited, so slow pipeline teardown in
//! one session never blocks lookups for the others.

use super::Session;
use crate::error::{RelayError, Result};
use crate::types::SessionHandle;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionHandle, Arc<Session>>>,
    initialized: AtomicBool,
    stopping: AtomicBool,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept sessions from now on.
    pub fn open(&self) {
        self.stopping.store(false, Ordering::SeqCst);
        self.initialized.store(true, Ordering::SeqCst);
    }

    /// Refuse new sessions. Existing ones stay until [`drain`](Self::drain).
    pub fn begin_shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.initialized.load(Ordering::SeqCst) && !self.stopping.load(Ordering::SeqCst)
    }

    pub fn ensure_ready(&self) -> Result<()> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(RelayError::NotReady("Plugin not initialized".to_string()));
        }
        if self.stopping.load(Ordering::SeqCst) {
            return Err(RelayError::NotReady("Shutting down".to_string()));
        }
        Ok(())
    }

    /// Register a new idle session for `handle`.
    ///
    /// A handle that is already registered keeps its existing session.
    pub fn create(&self, handle: SessionHandle) -> Result<Arc<Session>> {
        self.ensure_ready()?;

        let mut sessions = self.sessions.write();
        if let Some(existing) = sessions.get(&handle) {
            warn!(session = %handle, "Session already exists, keeping it");
            return Ok(Arc::clone(existing));
        }

        let session = Arc::new(Session::new(handle.clone()));
        sessions.insert(handle.clone(), Arc::clone(&session));
        info!(session = %handle, total_sessions = sessions.len(), "Session created");
        Ok(session)
    }

    pub fn lookup(&self, handle: &SessionHandle) -> Option<Arc<Session>> {
        self.sessions.read().get(handle).cloned()
    }

    /// Tear down the session's relay, then forget the session.
    ///
    /// When destroys of one handle race, only the caller that removes the
    /// entry gets `Ok`; the others see `NoSession`.
    pub async fn destroy(&self, handle: &SessionHandle) -> Result<()> {
        let session = self.lookup(handle).ok_or(RelayError::NoSession)?;

        session.close().await;

        let mut sessions = self.sessions.write();
        // The handle may have been removed or re-created while we were tearing down
        if !sessions
            .get(handle)
            .is_some_and(|current| Arc::ptr_eq(current, &session))
        {
            debug!(session = %handle, "Session already removed by another caller");
            return Err(RelayError::NoSession);
        }
        sessions.remove(handle);
        info!(session = %handle, total_sessions = sessions.len(), "Session destroyed");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn handles(&self) -> Vec<SessionHandle> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Remove every session, tearing each relay down. Returns how many
    /// sessions were removed.
    pub async fn drain(&self) -> usize {
        let drained: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write();
            sessions.drain().map(|(_, session)| session).collect()
        };

        for session in &drained {
            debug!(session = %session.handle(), "Closing session");
            session.close().await;
        }
        drained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_store() -> SessionStore {
        let store = SessionStore::new();
        store.open();
        store
    }

    #[test]
    fn test_not_ready_before_open_and_after_shutdown() {
        let store = SessionStore::new();
        assert!(matches!(
            store.create(SessionHandle::from("h1")),
            Err(RelayError::NotReady(_))
        ));

        store.open();
        assert!(store.create(SessionHandle::from("h1")).is_ok());

        store.begin_shutdown();
        assert!(!store.is_ready());
        assert!(matches!(
            store.create(SessionHandle::from("h2")),
            Err(RelayError::NotReady(_))
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_duplicate_create_returns_existing() {
        let store = ready_store();
        let first = store.create(SessionHandle::from("h1")).unwrap();
        let second = store.create(SessionHandle::from("h1")).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_destroy_unknown_handle() {
        let store = ready_store();
        assert!(matches!(
            store.destroy(&SessionHandle::from("missing")).await,
            Err(RelayError::NoSession)
        ));
    }

    #[tokio::test]
    async fn test_destroy_idle_session() {
        let store = ready_store();
        let handle = SessionHandle::from("h1");
        store.create(handle.clone()).unwrap();

        store.destroy(&handle).await.unwrap();
        assert!(store.lookup(&handle).is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_racing_destroys_succeed_once() {
        let store = Arc::new(ready_store());
        for round in 0..20 {
            let handle = SessionHandle::new(format!("h{round}"));
            store.create(handle.clone()).unwrap();

            let (first, second) = tokio::join!(store.destroy(&handle), store.destroy(&handle));
            let outcomes = [first, second];
            assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(outcomes
                .iter()
                .any(|r| matches!(r, Err(RelayError::NoSession))));
        }
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_destroys_across_tasks() {
        let store = Arc::new(ready_store());
        let handle = SessionHandle::from("shared");
        store.create(handle.clone()).unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let handle = handle.clone();
                tokio::spawn(async move { store.destroy(&handle).await })
            })
            .collect();

        let mut succeeded = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(()) => succeeded += 1,
                Err(e) => assert!(matches!(e, RelayError::NoSession)),
            }
        }
        assert_eq!(succeeded, 1);
    }

    #[tokio::test]
    async fn test_drain_empties_store() {
        let store = ready_store();
        for id in ["a", "b", "c"] {
            store.create(SessionHandle::from(id)).unwrap();
        }
        let mut handles = store.handles();
        handles.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        assert_eq!(handles.len(), 3);
        assert_eq!(handles[0].as_str(), "a");

        assert_eq!(store.drain().await, 3);
        assert!(store.is_empty());
    }
}
