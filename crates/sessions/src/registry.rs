//! Session Registry — unique-name lookup of session workers by session id.
//!
//! Distinct from [`crate::store::SessionStore`] (which persists session
//! metadata to disk): this registry tracks which session ids currently have
//! a live worker task, so a second concurrent ingress for the same id can be
//! rejected rather than racing two workers over one transcript.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use sa_domain::error::{Error, Result};

/// Capability reference to a running session worker. The registry stores
/// only a [`Weak`] pointer; the worker task holds the strong `Arc` for its
/// own lifetime and the entry is pruned once that strong count drops to
/// zero (checked lazily on `lookup`/`list`).
pub struct SessionRegistry {
    workers: RwLock<HashMap<String, Weak<SessionWorkerHandle>>>,
}

/// Opaque handle identifying a registered worker. Holds nothing but the
/// session id; real implementations attach the worker's task/channel here.
pub struct SessionWorkerHandle {
    pub session_id: String,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a worker for `session_id`. Fails with `already_registered`
    /// if a live worker is already registered for that id.
    pub fn register_unique(&self, session_id: &str) -> Result<Arc<SessionWorkerHandle>> {
        let mut workers = self.workers.write();
        if let Some(existing) = workers.get(session_id) {
            if existing.strong_count() > 0 {
                return Err(Error::Other(format!(
                    "already_registered: session {session_id} has a live worker"
                )));
            }
        }
        let handle = Arc::new(SessionWorkerHandle {
            session_id: session_id.to_string(),
        });
        workers.insert(session_id.to_string(), Arc::downgrade(&handle));
        Ok(handle)
    }

    /// Explicit deregistration, called by a worker on clean shutdown.
    pub fn deregister(&self, session_id: &str) {
        self.workers.write().remove(session_id);
    }

    pub fn lookup(&self, session_id: &str) -> Option<Arc<SessionWorkerHandle>> {
        let workers = self.workers.read();
        workers.get(session_id).and_then(Weak::upgrade)
    }

    /// List session ids with a live worker, pruning dead entries as a
    /// side effect.
    pub fn list(&self) -> Vec<String> {
        let mut workers = self.workers.write();
        workers.retain(|_, w| w.strong_count() > 0);
        workers.keys().cloned().collect()
    }

    pub fn is_registered(&self, session_id: &str) -> bool {
        self.workers
            .read()
            .get(session_id)
            .map(|w| w.strong_count() > 0)
            .unwrap_or(false)
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

    #[test]
    fn register_then_lookup() {
        let reg = SessionRegistry::new();
        let handle = reg.register_unique("s1").unwrap();
        let found = reg.lookup("s1").unwrap();
        assert_eq!(found.session_id, "s1");
        drop(handle);
    }

    #[test]
    fn double_register_fails_while_live() {
        let reg = SessionRegistry::new();
        let _handle = reg.register_unique("s1").unwrap();
        let err = reg.register_unique("s1").unwrap_err();
        assert!(err.to_string().contains("already_registered"));
    }

    #[test]
    fn register_after_drop_succeeds() {
        let reg = SessionRegistry::new();
        let handle = reg.register_unique("s1").unwrap();
        drop(handle);
        assert!(reg.register_unique("s1").is_ok());
    }

    #[test]
    fn lookup_after_drop_is_none() {
        let reg = SessionRegistry::new();
        let handle = reg.register_unique("s1").unwrap();
        drop(handle);
        assert!(reg.lookup("s1").is_none());
    }

    #[test]
    fn deregister_removes_entry() {
        let reg = SessionRegistry::new();
        let _handle = reg.register_unique("s1").unwrap();
        reg.deregister("s1");
        assert!(!reg.is_registered("s1"));
    }

    #[test]
    fn list_prunes_dead_entries() {
        let reg = SessionRegistry::new();
        let h1 = reg.register_unique("s1").unwrap();
        let _h2 = reg.register_unique("s2").unwrap();
        drop(h1);
        let ids = reg.list();
        assert_eq!(ids, vec!["s2".to_string()]);
    }
}
