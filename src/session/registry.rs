use std::collections::HashMap;
use std::sync::Arc;

use log::{ info, warn };
use tokio::sync::Mutex;
use uuid::Uuid;

use super::ConversationState;

pub type SharedState = Arc<Mutex<ConversationState>>;

pub const DEFAULT_MAX_SESSIONS: usize = 1000;

/// Independent conversation states for HTTP sessions, keyed by a random id.
///
/// Each state has its own lock, held for a whole submission, so one session
/// handles one message at a time while other sessions proceed. At most
/// `max_sessions` live at once; ending a session frees its slot.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SharedState>>,
    max_sessions: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_SESSIONS)
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_sessions,
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Opens a new session, or returns `None` when the registry is full.
    pub async fn create(&self) -> Option<String> {
        let mut sessions = self.sessions.lock().await;
        if sessions.len() >= self.max_sessions {
            warn!("Session limit of {} reached; refusing a new session", self.max_sessions);
            return None;
        }
        let id = Uuid::new_v4().to_string();
        sessions.insert(id.clone(), Arc::new(Mutex::new(ConversationState::new())));
        info!("Created session {}", id);
        Some(id)
    }

    pub async fn get(&self, id: &str) -> Option<SharedState> {
        self.sessions.lock().await.get(id).cloned()
    }

    /// Ends a session. Returns false when the id was unknown.
    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.lock().await.remove(id).is_some();
        if removed {
            info!("Ended session {}", id);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ ScriptedClient, reply };

    #[tokio::test]
    async fn sessions_do_not_share_state() {
        let registry = SessionRegistry::new();
        let a = registry.create().await.unwrap();
        let b = registry.create().await.unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.len().await, 2);

        let client = ScriptedClient::new(vec![Ok(reply("Hallo", "c-a"))]);
        let state_a = registry.get(&a).await.unwrap();
        state_a.lock().await.submit(&client, "Hi", None).await.unwrap();

        let state_b = registry.get(&b).await.unwrap();
        let state_b = state_b.lock().await;
        assert!(state_b.is_empty());
        assert_eq!(state_b.conversation_id(), None);
        assert_eq!(state_a.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn removed_sessions_are_gone() {
        let registry = SessionRegistry::new();
        let id = registry.create().await.unwrap();

        assert!(registry.remove(&id).await);
        assert!(!registry.remove(&id).await);
        assert!(registry.get(&id).await.is_none());
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn full_registry_refuses_new_sessions() {
        let registry = SessionRegistry::with_limit(3);
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(registry.create().await.expect("below the limit"));
        }

        assert!(registry.create().await.is_none());
        assert_eq!(registry.len().await, 3);

        assert!(registry.remove(&ids[0]).await);
        assert!(registry.create().await.is_some());
        assert!(registry.create().await.is_none());
    }
}
