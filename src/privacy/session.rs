//! Session-scoped token maps.
//!
//! The store is the only mutable structure shared between concurrent runs.
//! Writes are serialized per session id; unrelated sessions do not block each
//! other. The trait keeps the pipeline independent of where maps live, so an
//! external backing store can replace [`InMemorySessionStore`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::SessionNotFoundError;

/// Reversible token map owned by one session
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,

    /// token -> original value
    pub token_map: HashMap<String, String>,

    /// Per-session secret mixed into token derivation
    pub salt: String,

    pub created_at: DateTime<Utc>,

    pub last_access: Instant,

    /// Runs currently using this session; pinned sessions are never idle
    pub pins: usize,
}

impl Session {
    pub fn new(id: String) -> Self {
        Self {
            id,
            token_map: HashMap::new(),
            salt: Uuid::new_v4().simple().to_string(),
            created_at: Utc::now(),
            last_access: Instant::now(),
            pins: 0,
        }
    }

    fn touch(&mut self) {
        self.last_access = Instant::now();
    }
}

/// Storage contract for session token maps
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Allocate a fresh, globally unique session with an empty map
    async fn create(&self) -> String;

    /// Make sure a session with this id exists. Returns true if it was created.
    async fn ensure(&self, session_id: &str) -> bool;

    /// Whether the session is currently held
    async fn contains(&self, session_id: &str) -> bool;

    /// Per-session secret used to derive tokens
    async fn salt(&self, session_id: &str) -> Result<String, SessionNotFoundError>;

    /// Insert or overwrite one mapping
    async fn put(
        &self,
        session_id: &str,
        token: &str,
        value: &str,
    ) -> Result<(), SessionNotFoundError>;

    /// Insert a batch atomically.
    ///
    /// Entries whose token is already mapped to a different value are
    /// conflicts; if any exist nothing is written and the conflicting tokens
    /// are returned.
    async fn put_all(
        &self,
        session_id: &str,
        entries: &[(String, String)],
    ) -> Result<Vec<String>, SessionNotFoundError>;

    /// Look up a token
    async fn get(&self, session_id: &str, token: &str)
        -> Result<Option<String>, SessionNotFoundError>;

    /// Mark a run as using the session, creating it if needed.
    /// Returns true if it was created.
    async fn pin(&self, session_id: &str) -> bool;

    /// Undo one [`SessionStore::pin`]. Unknown ids are ignored.
    async fn unpin(&self, session_id: &str);

    /// Release a session. Idempotent; returns true if something was removed.
    async fn evict(&self, session_id: &str) -> bool;

    /// Evict unpinned sessions idle for at least `max_idle`. Returns how many were removed.
    async fn evict_idle(&self, max_idle: Duration) -> usize;

    /// Number of live sessions
    async fn len(&self) -> usize;
}

/// In-process store backed by a sharded concurrent map
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Session>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Number of mappings held by one session
    pub fn token_count(&self, session_id: &str) -> Option<usize> {
        self.sessions.get(session_id).map(|s| s.token_map.len())
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self) -> String {
        loop {
            let id = Uuid::new_v4().to_string();
            if let dashmap::mapref::entry::Entry::Vacant(entry) = self.sessions.entry(id.clone()) {
                entry.insert(Session::new(id.clone()));
                return id;
            }
        }
    }

    async fn ensure(&self, session_id: &str) -> bool {
        match self.sessions.entry(session_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                entry.get_mut().touch();
                false
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Session::new(session_id.to_string()));
                true
            }
        }
    }

    async fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    async fn salt(&self, session_id: &str) -> Result<String, SessionNotFoundError> {
        self.sessions
            .get(session_id)
            .map(|s| s.salt.clone())
            .ok_or_else(|| SessionNotFoundError::new(session_id))
    }

    async fn put(
        &self,
        session_id: &str,
        token: &str,
        value: &str,
    ) -> Result<(), SessionNotFoundError> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionNotFoundError::new(session_id))?;
        session
            .token_map
            .insert(token.to_string(), value.to_string());
        session.touch();
        Ok(())
    }

    async fn put_all(
        &self,
        session_id: &str,
        entries: &[(String, String)],
    ) -> Result<Vec<String>, SessionNotFoundError> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionNotFoundError::new(session_id))?;

        let conflicts: Vec<String> = entries
            .iter()
            .filter(|(token, value)| {
                session
                    .token_map
                    .get(token)
                    .is_some_and(|existing| existing != value)
            })
            .map(|(token, _)| token.clone())
            .collect();

        if conflicts.is_empty() {
            for (token, value) in entries {
                session.token_map.insert(token.clone(), value.clone());
            }
        }
        session.touch();
        Ok(conflicts)
    }

    async fn get(
        &self,
        session_id: &str,
        token: &str,
    ) -> Result<Option<String>, SessionNotFoundError> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionNotFoundError::new(session_id))?;
        session.touch();
        Ok(session.token_map.get(token).cloned())
    }

    async fn pin(&self, session_id: &str) -> bool {
        let mut created = false;
        let mut session = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                created = true;
                Session::new(session_id.to_string())
            });
        session.pins += 1;
        session.touch();
        created
    }

    async fn unpin(&self, session_id: &str) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.pins = session.pins.saturating_sub(1);
            session.touch();
        }
    }

    async fn evict(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    async fn evict_idle(&self, max_idle: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| session.pins > 0 || session.last_access.elapsed() < max_idle);
        before.saturating_sub(self.sessions.len())
    }

    async fn len(&self) -> usize {
        self.sessions.len()
    }
}

/// Periodically evict idle sessions until the returned task is aborted
pub fn spawn_session_sweeper(
    store: Arc<dyn SessionStore>,
    max_idle: Duration,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = store.evict_idle(max_idle).await;
            if evicted > 0 {
                tracing::debug!(evicted, "Evicted idle sessions");
            }
        }
    })
}
