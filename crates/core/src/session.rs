use crate::llm::ChatMessage;
use crate::models::ConversationTurn;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Session used by the REPL and by HTTP callers that send no session id.
pub const DEFAULT_SESSION: &str = "default";

#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    fn last_active(&self) -> Option<DateTime<Utc>> {
        self.turns.last().map(|turn| turn.asked_at)
    }

    /// Prior turns as alternating user/assistant messages.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        self.turns
            .iter()
            .flat_map(|turn| {
                [
                    ChatMessage::user(turn.question.clone()),
                    ChatMessage::assistant(turn.answer.clone()),
                ]
            })
            .collect()
    }
}

/// Sessions kept before the least recently active one is dropped.
pub const DEFAULT_MAX_SESSIONS: usize = 1024;

/// In-memory conversation histories keyed by session id. Nothing is
/// persisted across restarts. At most `max_sessions` histories are held.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, ConversationHistory>>>,
    max_sessions: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_SESSIONS)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(max_sessions: usize) -> Self {
        Self {
            sessions: Arc::default(),
            max_sessions: max_sessions.max(1),
        }
    }

    pub async fn history(&self, session_id: &str) -> ConversationHistory {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn append(&self, session_id: &str, turn: ConversationTurn) {
        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(session_id) && sessions.len() >= self.max_sessions {
            let idle = sessions
                .iter()
                .min_by_key(|(_, history)| history.last_active())
                .map(|(id, _)| id.clone());
            if let Some(idle) = idle {
                debug!(session = %idle, "evicting least recently active session");
                sessions.remove(&idle);
            }
        }
        sessions.entry(session_id.to_string()).or_default().push(turn);
    }

    /// Drops the session's history. Clearing an unknown session is a no-op.
    pub async fn clear(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
