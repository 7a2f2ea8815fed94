//! Per-session message history

use crate::protocol::Message;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const DEFAULT_MAX_MESSAGES: usize = 50;

/// Bounded, in-memory history keyed by session id
///
/// The oldest message is dropped once a session reaches its cap. Message
/// content is stored as given.
#[derive(Debug)]
pub struct ConversationStore {
    max_messages: usize,
    sessions: Mutex<HashMap<String, VecDeque<Message>>>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}

impl ConversationStore {
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages: max_messages.max(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Message>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    pub fn append(&self, session: &str, message: Message) {
        let mut sessions = self.lock();
        let history = sessions.entry(session.to_string()).or_default();
        while history.len() >= self.max_messages {
            history.pop_front();
        }
        history.push_back(message);
    }

    /// Append several messages in order under one lock
    pub fn extend(&self, session: &str, messages: impl IntoIterator<Item = Message>) {
        let mut sessions = self.lock();
        let history = sessions.entry(session.to_string()).or_default();
        for message in messages {
            while history.len() >= self.max_messages {
                history.pop_front();
            }
            history.push_back(message);
        }
    }

    /// History oldest first; empty for an unknown session
    pub fn get(&self, session: &str) -> Vec<Message> {
        self.lock()
            .get(session)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self, session: &str) {
        self.lock().remove(session);
    }

    pub fn len(&self, session: &str) -> usize {
        self.lock().get(session).map_or(0, VecDeque::len)
    }

    pub fn session_count(&self) -> usize {
        self.lock().len()
    }
}
