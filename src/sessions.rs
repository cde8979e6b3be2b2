//! In-memory chat sessions.
//!
//! Each session id maps to its own async mutex around an ordered list of
//! turns. A chat request holds that mutex for the whole answer-and-append
//! step, so requests on the same session are serialized while different
//! sessions proceed in parallel.
//!
//! Growth is bounded two ways: each session keeps at most `max_turns`
//! turns (oldest dropped first), and [`SessionStore::evict_idle`] drops
//! sessions untouched for `idle_ttl_secs`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use docqa_core::models::{Role, Turn};

use crate::config::SessionsConfig;

pub const DEFAULT_SESSION_ID: &str = "default";

pub struct Session {
    turns: VecDeque<Turn>,
    max_turns: usize,
    last_used: Instant,
}

impl Session {
    fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_turns,
            last_used: Instant::now(),
        }
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push_back(Turn {
            role,
            content: content.into(),
        });
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
        self.last_used = Instant::now();
    }

    pub fn history(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.last_used = Instant::now();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    max_turns: usize,
    idle_ttl: Option<Duration>,
}

impl SessionStore {
    pub fn new(config: &SessionsConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_turns: config.max_turns.max(1),
            idle_ttl: (config.idle_ttl_secs > 0).then(|| Duration::from_secs(config.idle_ttl_secs)),
        }
    }

    async fn handle(&self, session_id: &str) -> Arc<Mutex<Session>> {
        if let Some(s) = self.sessions.read().await.get(session_id) {
            return s.clone();
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Session::new(self.max_turns))))
            .clone()
    }

    /// Lock a session for exclusive use, creating it if needed.
    pub async fn lock(&self, session_id: &str) -> OwnedMutexGuard<Session> {
        let mut guard = self.handle(session_id).await.lock_owned().await;
        guard.last_used = Instant::now();
        guard
    }

    pub async fn append_turn(&self, session_id: &str, role: Role, content: impl Into<String>) {
        self.lock(session_id).await.push(role, content);
    }

    /// Turns of a session in order. Unknown sessions have an empty history.
    pub async fn get_history(&self, session_id: &str) -> Vec<Turn> {
        let handle = self.sessions.read().await.get(session_id).cloned();
        match handle {
            Some(s) => s.lock().await.history(),
            None => Vec::new(),
        }
    }

    /// Empty a session's history. The session itself is kept.
    pub async fn clear(&self, session_id: &str) {
        self.lock(session_id).await.clear();
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drop sessions idle for longer than the configured TTL.
    pub async fn evict_idle(&self) -> usize {
        match self.idle_ttl {
            Some(ttl) => self.evict_idle_older_than(ttl).await,
            None => 0,
        }
    }

    /// Drop sessions idle for at least `max_idle`. Sessions currently
    /// locked by a request are kept.
    pub async fn evict_idle_older_than(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| match s.try_lock() {
            Ok(session) => session.last_used.elapsed() < max_idle,
            Err(_) => true,
        });
        before - sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(max_turns: usize) -> SessionStore {
        SessionStore::new(&SessionsConfig {
            max_turns,
            idle_ttl_secs: 0,
        })
    }

    #[tokio::test]
    async fn test_append_and_get() {
        let s = store(10);
        s.append_turn("a", Role::User, "hi").await;
        s.append_turn("a", Role::Assistant, "hello").await;
        assert_eq!(
            s.get_history("a").await,
            vec![Turn::user("hi"), Turn::assistant("hello")]
        );
        assert!(s.get_history("b").await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_unseen_is_noop() {
        let s = store(10);
        s.clear("never-used").await;
        assert!(s.get_history("never-used").await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_keeps_other_sessions() {
        let s = store(10);
        s.append_turn("a", Role::User, "x").await;
        s.append_turn("b", Role::User, "y").await;
        s.clear("a").await;
        assert!(s.get_history("a").await.is_empty());
        assert_eq!(s.get_history("b").await.len(), 1);
        assert_eq!(s.len().await, 2);
    }

    #[tokio::test]
    async fn test_max_turns_drops_oldest() {
        let s = store(3);
        for i in 0..5 {
            s.append_turn("a", Role::User, i.to_string()).await;
        }
        let contents: Vec<String> = s.get_history("a").await.into_iter().map(|t| t.content).collect();
        assert_eq!(contents, vec!["2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_evict_idle() {
        let s = store(10);
        s.append_turn("a", Role::User, "x").await;
        assert_eq!(s.evict_idle().await, 0);
        assert_eq!(s.evict_idle_older_than(Duration::from_secs(3600)).await, 0);
        assert_eq!(s.evict_idle_older_than(Duration::ZERO).await, 1);
        assert!(s.is_empty().await);
    }

    #[tokio::test]
    async fn test_locked_session_not_evicted() {
        let s = store(10);
        let guard = s.lock("busy").await;
        assert_eq!(s.evict_idle_older_than(Duration::ZERO).await, 0);
        drop(guard);
        assert_eq!(s.evict_idle_older_than(Duration::ZERO).await, 1);
    }
}
