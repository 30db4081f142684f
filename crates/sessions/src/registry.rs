//! Exclusive owner of all [`Session`]s, keyed by connection id (*sid*).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::session::Session;

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn connect(&self, sid: &str) -> Arc<Session> {
        let session = Arc::new(Session::new());
        self.sessions.write().insert(sid.to_string(), session.clone());
        session
    }

    pub fn get(&self, sid: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(sid).cloned()
    }

    /// Removes the session and best-effort awaits its in-flight run.
    pub async fn disconnect(&self, sid: &str) {
        let session = self.sessions.write().remove(sid);
        if let Some(session) = session {
            session.disconnect().await;
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
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

    #[tokio::test]
    async fn disconnect_removes_session() {
        let registry = SessionRegistry::new();
        registry.connect("s1");
        assert_eq!(registry.len(), 1);
        registry.disconnect("s1").await;
        assert!(registry.get("s1").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn disconnect_unknown_sid_is_a_no_op() {
        let registry = SessionRegistry::new();
        registry.disconnect("ghost").await;
    }
}
