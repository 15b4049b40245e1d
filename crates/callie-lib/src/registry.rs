//! Open relay sockets, keyed by a per-connection id.
//!
//! The registry is owned by the server state. Entries are inserted when a
//! socket connects and removed when it closes; the sessions themselves live
//! in their socket tasks and never read each other's state.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: Uuid,
    pub remote: Option<SocketAddr>,
    pub started_at: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<Uuid, SessionInfo>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, remote: Option<SocketAddr>) -> Uuid {
        let info = SessionInfo {
            id: Uuid::new_v4(),
            remote,
            started_at: Utc::now(),
        };
        let id = info.id;
        self.lock().insert(id, info);
        id
    }

    /// Returns the removed entry, or `None` if it was already gone.
    pub fn remove(&self, id: &Uuid) -> Option<SessionInfo> {
        self.lock().remove(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current sessions, oldest first.
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let mut all: Vec<SessionInfo> = self.lock().values().cloned().collect();
        all.sort_by_key(|s| s.started_at);
        all
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, SessionInfo>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_remove() {
        let reg = SessionRegistry::new();
        assert!(reg.is_empty());

        let a = reg.register(Some("127.0.0.1:4000".parse().unwrap()));
        let b = reg.register(None);
        assert_ne!(a, b);
        assert_eq!(reg.len(), 2);

        let removed = reg.remove(&a).unwrap();
        assert_eq!(removed.id, a);
        assert_eq!(reg.len(), 1);
        assert!(reg.remove(&a).is_none());

        reg.remove(&b);
        assert!(reg.is_empty());
    }

    #[test]
    fn clones_share_state() {
        let reg = SessionRegistry::new();
        let other = reg.clone();
        let id = reg.register(None);
        assert_eq!(other.len(), 1);
        assert_eq!(other.snapshot()[0].id, id);
    }
}
