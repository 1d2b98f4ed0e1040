use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};

use cleanq_core::domain::dialogue::DialogueTurn;

pub const RESET_ACKNOWLEDGEMENT: &str = ":warning: I am ready to work on a new request";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ThreadId(pub String);

impl From<&str> for ThreadId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backend reply held for commit. Parsed only when committed, so a reply
/// that turns out malformed stays available for another attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingExtraction {
    pub reply: String,
    pub extracted_at: DateTime<Utc>,
}

impl PendingExtraction {
    pub fn new(reply: impl Into<String>) -> Self {
        Self { reply: reply.into(), extracted_at: Utc::now() }
    }
}

#[derive(Debug, Default)]
pub struct SessionState {
    history: Vec<DialogueTurn>,
    candidate: Option<PendingExtraction>,
    epoch: u64,
}

impl SessionState {
    pub fn history(&self) -> &[DialogueTurn] {
        &self.history
    }

    pub fn candidate(&self) -> Option<&PendingExtraction> {
        self.candidate.as_ref()
    }

    /// Bumped on every clear. A backend reply computed against an older
    /// epoch belongs to a conversation that no longer exists.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn set_candidate(&mut self, candidate: Option<PendingExtraction>) {
        self.candidate = candidate;
    }

    pub fn push_exchange(&mut self, message: &str, reply: &str) {
        self.history.push(DialogueTurn::user(message));
        self.history.push(DialogueTurn::assistant(reply));
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.candidate = None;
        self.epoch += 1;
    }
}

pub type SharedSession = Arc<tokio::sync::Mutex<SessionState>>;

/// Conversation state keyed by thread. The outer map lock is held only long
/// enough to find or insert a slot; each thread's state has its own async
/// lock so one slow thread never blocks another.
#[derive(Default)]
pub struct SessionManager {
    sessions: Mutex<HashMap<ThreadId, SharedSession>>,
}

impl SessionManager {
    pub fn get_or_create(&self, thread: &ThreadId) -> SharedSession {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(sessions.entry(thread.clone()).or_default())
    }

    pub async fn set_candidate(&self, thread: &ThreadId, candidate: PendingExtraction) {
        let session = self.get_or_create(thread);
        session.lock().await.set_candidate(Some(candidate));
    }

    /// Clears history and candidate. Safe to call on a fresh or already
    /// cleared thread.
    pub async fn reset(&self, thread: &ThreadId) -> &'static str {
        let session = self.get_or_create(thread);
        session.lock().await.clear();
        RESET_ACKNOWLEDGEMENT
    }

    pub fn thread_count(&self) -> usize {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::{PendingExtraction, SessionManager, ThreadId, RESET_ACKNOWLEDGEMENT};

    #[tokio::test]
    async fn get_or_create_returns_the_same_slot_per_thread() {
        let manager = SessionManager::default();
        let thread = ThreadId::from("C1:1700000000.000100");

        let first = manager.get_or_create(&thread);
        first.lock().await.push_exchange("hi", "Retail name: Depot");
        let second = manager.get_or_create(&thread);

        assert_eq!(second.lock().await.history().len(), 2);
        assert_eq!(manager.thread_count(), 1);
    }

    #[tokio::test]
    async fn candidates_are_isolated_between_threads() {
        let manager = SessionManager::default();
        let thread_a = ThreadId::from("A");
        let thread_b = ThreadId::from("B");

        manager.set_candidate(&thread_a, PendingExtraction::new("reply for A")).await;

        let b = manager.get_or_create(&thread_b);
        assert!(b.lock().await.candidate().is_none());
        let a = manager.get_or_create(&thread_a);
        assert_eq!(a.lock().await.candidate().map(|c| c.reply.as_str()), Some("reply for A"));
    }

    #[tokio::test]
    async fn reset_clears_state_bumps_epoch_and_is_idempotent() {
        let manager = SessionManager::default();
        let thread = ThreadId::from("T");
        let session = manager.get_or_create(&thread);
        {
            let mut state = session.lock().await;
            state.push_exchange("clean the depot", "Retail name: Depot");
            state.set_candidate(Some(PendingExtraction::new("Retail name: Depot")));
        }

        assert_eq!(manager.reset(&thread).await, RESET_ACKNOWLEDGEMENT);
        assert_eq!(manager.reset(&thread).await, RESET_ACKNOWLEDGEMENT);

        let state = session.lock().await;
        assert!(state.history().is_empty());
        assert!(state.candidate().is_none());
        assert_eq!(state.epoch(), 2);
    }
}
