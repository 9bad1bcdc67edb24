//! Client sessions on the public endpoint.
//!
//! `initialize` creates a session; `notifications/initialized` marks it
//! ready. Sessions hold no routing state.

use std::time::Instant;

use dashmap::DashMap;
use uuid::Uuid;

struct Session {
    initialized: bool,
    created_at: Instant,
}

/// Known sessions by id
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<String, Session>,
}

impl SessionStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session; returns its id
    pub fn create(&self) -> String {
        let id = format!("gw-{}", Uuid::new_v4());
        self.sessions.insert(
            id.clone(),
            Session {
                initialized: false,
                created_at: Instant::now(),
            },
        );
        id
    }

    /// Whether `id` is a known session
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Mark `id` ready; returns `false` for unknown sessions
    pub fn mark_initialized(&self, id: &str) -> bool {
        match self.sessions.get_mut(id) {
            Some(mut session) => {
                session.initialized = true;
                true
            }
            None => false,
        }
    }

    /// Whether `id` completed the handshake
    #[must_use]
    pub fn is_initialized(&self, id: &str) -> bool {
        self.sessions.get(id).is_some_and(|s| s.initialized)
    }

    /// End a session; returns `false` when it did not exist
    pub fn remove(&self, id: &str) -> bool {
        self.sessions
            .remove(id)
            .inspect(|(_, s)| tracing::debug!(session_id = %id, age = ?s.created_at.elapsed(), "Session ended"))
            .is_some()
    }

    /// Number of open sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is open
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
