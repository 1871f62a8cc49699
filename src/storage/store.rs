use std::collections::{HashMap, HashSet};

use crate::common::ChatMessage;

#[derive(Debug, Default)]
struct Sequence {
    messages: Vec<ChatMessage>,
    ids: HashSet<i64>,
}

impl Sequence {
    fn from_messages(messages: Vec<ChatMessage>) -> Self {
        let mut sequence = Self::default();
        for message in messages {
            sequence.push(message);
        }
        sequence
    }

    fn push(&mut self, message: ChatMessage) -> bool {
        if !self.ids.insert(message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }
}

/// In-memory message sequences keyed by session id, oldest first.
///
/// Ids are unique within a sequence; every mutation preserves that.
#[derive(Debug, Default)]
pub struct SessionMessageStore {
    sessions: HashMap<i64, Sequence>,
}

impl SessionMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `message` at the end. Returns `false` when the id is already
    /// present (duplicate delivery or echo).
    pub fn append(&mut self, session_id: i64, message: ChatMessage) -> bool {
        self.sessions.entry(session_id).or_default().push(message)
    }

    /// Replaces the whole sequence. `messages` must already be oldest first;
    /// a repeated id keeps its first occurrence.
    pub fn replace(&mut self, session_id: i64, messages: Vec<ChatMessage>) {
        self.sessions
            .insert(session_id, Sequence::from_messages(messages));
    }

    /// Puts an older page in front of the sequence, skipping ids already
    /// known. Returns how many messages were added.
    pub fn prepend(&mut self, session_id: i64, older: Vec<ChatMessage>) -> usize {
        let sequence = self.sessions.entry(session_id).or_default();
        let mut front = Vec::with_capacity(older.len() + sequence.messages.len());
        for message in older {
            if sequence.ids.insert(message.id) {
                front.push(message);
            }
        }
        let added = front.len();
        if added > 0 {
            front.append(&mut sequence.messages);
            sequence.messages = front;
        }
        added
    }

    /// Drops the session's sequence. Returns whether it existed.
    pub fn clear(&mut self, session_id: i64) -> bool {
        self.sessions.remove(&session_id).is_some()
    }

    pub fn get(&self, session_id: i64) -> &[ChatMessage] {
        self.sessions
            .get(&session_id)
            .map(|sequence| sequence.messages.as_slice())
            .unwrap_or(&[])
    }
}
