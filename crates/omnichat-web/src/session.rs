use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{header, HeaderMap};
use omnichat_core::{ApiKey, Conversation, GenerationConfig, Result};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "omnichat_session";

/// What a fresh session starts with.
#[derive(Clone, Default)]
pub struct SessionDefaults {
    /// Usually `OPENAI_API_KEY`; empty when unset.
    pub api_key: String,
    pub generation: GenerationConfig,
}

/// Per-browser-session context handed to every handler.
#[derive(Clone)]
pub struct ChatSession {
    pub conversation: Conversation,
    /// Raw key as typed or inherited. Checked on use, never stored elsewhere.
    pub api_key: String,
    pub generation: GenerationConfig,
}

impl ChatSession {
    pub fn new(defaults: &SessionDefaults) -> Self {
        Self {
            conversation: Conversation::new(),
            api_key: defaults.api_key.clone(),
            generation: defaults.generation,
        }
    }

    pub fn credential(&self) -> Result<ApiKey> {
        ApiKey::parse(&self.api_key)
    }
}

fn masked(key: &str) -> &'static str {
    if key.is_empty() {
        "<unset>"
    } else {
        "***"
    }
}

impl fmt::Debug for SessionDefaults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDefaults")
            .field("api_key", &masked(&self.api_key))
            .field("generation", &self.generation)
            .finish()
    }
}

impl fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatSession")
            .field("conversation", &self.conversation.len())
            .field("api_key", &masked(&self.api_key))
            .field("generation", &self.generation)
            .finish()
    }
}

/// Locking the handle serializes all handlers of one session.
pub type SessionHandle = Arc<Mutex<ChatSession>>;

struct SessionEntry {
    session: SessionHandle,
    last_seen: Instant,
}

#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
    defaults: SessionDefaults,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(defaults: SessionDefaults, ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            defaults,
            ttl,
        }
    }

    /// Find the session named by the request cookie, or start a new one.
    pub async fn resolve(&self, headers: &HeaderMap) -> (String, SessionHandle) {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;

        if let Some(id) = session_id_from_headers(headers) {
            if let Some(entry) = sessions.get_mut(&id) {
                entry.last_seen = now;
                return (id, entry.session.clone());
            }
            debug!(session = %id, "unknown or expired session cookie");
        }

        let before = sessions.len();
        sessions.retain(|_, entry| now.duration_since(entry.last_seen) < self.ttl);
        if sessions.len() < before {
            info!(pruned = before - sessions.len(), "dropped idle sessions");
        }

        let id = Uuid::new_v4().to_string();
        let session = Arc::new(Mutex::new(ChatSession::new(&self.defaults)));
        sessions.insert(
            id.clone(),
            SessionEntry {
                session: session.clone(),
                last_seen: now,
            },
        );
        info!(session = %id, active = sessions.len(), "new chat session");
        (id, session)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

fn session_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

pub fn session_cookie(id: &str) -> String {
    format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, id)
}
