use std::collections::HashSet;

use crate::protocol::Message;

/// Ordered, id-deduplicated messages for the joined room.
///
/// Order is arrival order; the feed is the only ordering authority, so messages
/// are never re-sorted by timestamp. Messages without an id are always kept.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    seen_ids: HashSet<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything and load a history snapshot.
    /// Duplicate ids inside the snapshot keep their first occurrence.
    pub fn replace(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.clear();
        self.seen_ids.clear();
        for message in messages {
            self.append(message);
        }
    }

    /// Append one message. Returns `false` without mutating anything when the
    /// message carries an id that is already present.
    pub fn append(&mut self, message: Message) -> bool {
        if let Some(id) = message.dedup_key() {
            if !self.seen_ids.insert(id.to_string()) {
                return false;
            }
        }
        self.messages.push(message);
        true
    }

    pub fn snapshot(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
