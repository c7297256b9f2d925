//! Cached conversation lists.
//!
//! The cache only ever holds results of
//! [`Database::conversation_summaries`](crate::Database::conversation_summaries).
//! Writers invalidate the affected users instead of patching entries, so a
//! cached list is either a full recompute or absent.

use std::collections::HashMap;

use parley_shared::models::ConversationSummary;
use parley_shared::types::UserId;

#[derive(Debug, Default)]
pub struct ConversationIndex {
    lists: HashMap<UserId, Vec<ConversationSummary>>,
}

impl ConversationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user: &UserId) -> Option<&[ConversationSummary]> {
        self.lists.get(user).map(Vec::as_slice)
    }

    pub fn store(&mut self, user: UserId, summaries: Vec<ConversationSummary>) {
        self.lists.insert(user, summaries);
    }

    pub fn invalidate(&mut self, user: &UserId) {
        if self.lists.remove(user).is_some() {
            tracing::trace!(user = %user.short(), "conversation list invalidated");
        }
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}
