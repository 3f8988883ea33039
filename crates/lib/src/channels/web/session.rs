//! Web widget sessions, keyed by the `parley.sid` cookie.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::subscriber::Subscriber;

pub const SESSION_COOKIE: &str = "parley.sid";

/// Unique session identifier (opaque string).
pub type SessionId = String;

/// One browser session: the subscriber it belongs to and how it receives messages.
#[derive(Debug, Clone, Default)]
pub struct WebSession {
    pub profile: Option<Subscriber>,
    pub is_socket: bool,
    pub polling: bool,
}

/// In-memory session store. Each session has its own lock so concurrent requests from
/// different browsers do not contend.
pub struct WebSessionStore {
    inner: Arc<RwLock<HashMap<SessionId, Arc<Mutex<WebSession>>>>>,
}

impl Default for WebSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSessionStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Mutex<WebSession>>> {
        self.inner.read().await.get(id).cloned()
    }

    pub async fn get_or_insert(&self, id: &str) -> Arc<Mutex<WebSession>> {
        if let Some(s) = self.get(id).await {
            return s;
        }
        let mut g = self.inner.write().await;
        g.entry(id.to_string()).or_default().clone()
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<Mutex<WebSession>>> {
        self.inner.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

pub fn new_session_id() -> SessionId {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Extracts the session id from a `Cookie` header value.
pub fn session_id_from_cookie(cookie_header: &str) -> Option<SessionId> {
    cookie_header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE && !value.is_empty()).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_session_cookie() {
        assert_eq!(
            session_id_from_cookie("theme=dark; parley.sid=abc123"),
            Some("abc123".to_string())
        );
        assert_eq!(session_id_from_cookie("parley.sid="), None);
        assert_eq!(session_id_from_cookie("other=1"), None);
    }

    #[tokio::test]
    async fn get_or_insert_returns_same_session() {
        let store = WebSessionStore::new();
        let a = store.get_or_insert("s1").await;
        a.lock().await.polling = true;
        let b = store.get_or_insert("s1").await;
        assert!(b.lock().await.polling);
        assert_eq!(store.len().await, 1);
        store.remove("s1").await;
        assert!(store.get("s1").await.is_none());
    }
}
