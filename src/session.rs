//! In-memory conversation sessions, keyed by chat id.
//!
//! A session exists only while the bot is waiting for the user's email;
//! every terminal transition removes it. Nothing survives a restart, so
//! an interrupted conversation starts over with /start.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// One awaiting-email conversation.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: i64,
    pub started_at: DateTime<Utc>,
}

/// Keyed store for active conversations, plus the set of user ids with an
/// admission currently in flight. The in-flight set is what keeps two
/// near-simultaneous submissions from the same user from both passing the
/// dedup read before either has appended.
#[derive(Debug, Default)]
pub struct SessionStore {
    awaiting: Mutex<HashMap<i64, Session>>,
    in_flight: Mutex<HashSet<i64>>,
}

impl SessionStore {
    /// Start (or restart) a conversation for a chat.
    pub fn begin(&self, chat_id: i64, user_id: i64) {
        let mut awaiting = self.awaiting.lock().unwrap();
        awaiting.insert(
            chat_id,
            Session {
                user_id,
                started_at: Utc::now(),
            },
        );
    }

    /// The session for a chat, if it is awaiting an email.
    pub fn awaiting(&self, chat_id: i64) -> Option<Session> {
        self.awaiting.lock().unwrap().get(&chat_id).cloned()
    }

    /// Terminal transition: drop the session for a chat.
    pub fn end(&self, chat_id: i64) -> Option<Session> {
        self.awaiting.lock().unwrap().remove(&chat_id)
    }

    /// Reserve the admission slot for a user. Returns `None` while a
    /// previous admission for the same user is still running.
    pub fn try_begin_admission(&self, user_id: i64) -> Option<AdmissionGuard<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap();
        if in_flight.insert(user_id) {
            Some(AdmissionGuard {
                store: self,
                user_id,
            })
        } else {
            None
        }
    }
}

/// Releases the admission slot when dropped, on every exit path.
#[derive(Debug)]
pub struct AdmissionGuard<'a> {
    store: &'a SessionStore,
    user_id: i64,
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        self.store.in_flight.lock().unwrap().remove(&self.user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_lifecycle() {
        let store = SessionStore::default();
        assert!(store.awaiting(7).is_none());

        store.begin(7, 42);
        assert_eq!(store.awaiting(7).unwrap().user_id, 42);

        let ended = store.end(7).unwrap();
        assert_eq!(ended.user_id, 42);
        assert!(store.awaiting(7).is_none());
        assert!(store.end(7).is_none());
    }

    #[test]
    fn chats_do_not_interfere() {
        let store = SessionStore::default();
        store.begin(1, 100);
        store.begin(2, 200);

        store.end(1);
        assert!(store.awaiting(1).is_none());
        assert_eq!(store.awaiting(2).unwrap().user_id, 200);
    }

    #[test]
    fn restart_replaces_existing_session() {
        let store = SessionStore::default();
        store.begin(1, 100);
        store.begin(1, 100);
        assert_eq!(store.awaiting(1).unwrap().user_id, 100);
    }

    #[test]
    fn admission_slot_is_exclusive_per_user() {
        let store = SessionStore::default();
        let guard = store.try_begin_admission(42).unwrap();
        assert!(store.try_begin_admission(42).is_none());
        // A different user is unaffected
        assert!(store.try_begin_admission(43).is_some());

        drop(guard);
        assert!(store.try_begin_admission(42).is_some());
    }
}
