//! Client-side conversation list.
//!
//! Realtime traffic upserts entries optimistically; a periodic
//! `list_for_user` refresh replaces the whole list and repairs any drift.

use chrono::{DateTime, Utc};

use parley_shared::constants::PREVIEW_MAX_CHARS;
use parley_shared::models::ConversationSummary;
use parley_shared::types::{MessageId, UserId};
use parley_shared::validation::preview;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationEntry {
    pub counterpart_id: UserId,
    /// `None` until the server has confirmed the latest message.
    pub last_message_id: Option<MessageId>,
    pub last_sender_id: UserId,
    pub last_message: String,
    pub last_message_at: DateTime<Utc>,
    pub unread_count: u32,
}

impl From<ConversationSummary> for ConversationEntry {
    fn from(summary: ConversationSummary) -> Self {
        Self {
            counterpart_id: summary.counterpart_id,
            last_message_id: Some(summary.last_message_id),
            last_sender_id: summary.last_sender_id,
            last_message: summary.last_message,
            last_message_at: summary.last_message_at,
            unread_count: summary.unread_count,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversationList {
    me: UserId,
    entries: Vec<ConversationEntry>,
}

impl ConversationList {
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            entries: Vec::new(),
        }
    }

    /// Most recent first.
    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub fn get(&self, counterpart: &UserId) -> Option<&ConversationEntry> {
        self.entries.iter().find(|e| &e.counterpart_id == counterpart)
    }

    pub fn unread_total(&self) -> u32 {
        self.entries.iter().map(|e| e.unread_count).sum()
    }

    pub fn replace(&mut self, summaries: Vec<ConversationSummary>) {
        self.entries = summaries.into_iter().map(Into::into).collect();
    }

    /// Move `counterpart` to the top with a new latest message. Unread grows
    /// only for messages from the counterpart while their thread is not open.
    pub fn upsert(
        &mut self,
        counterpart: &UserId,
        sender: &UserId,
        text: &str,
        at: DateTime<Utc>,
        viewing: bool,
    ) {
        let mut entry = match self.entries.iter().position(|e| &e.counterpart_id == counterpart) {
            Some(idx) => self.entries.remove(idx),
            None => ConversationEntry {
                counterpart_id: counterpart.clone(),
                last_message_id: None,
                last_sender_id: sender.clone(),
                last_message: String::new(),
                last_message_at: at,
                unread_count: 0,
            },
        };

        entry.last_message_id = None;
        entry.last_sender_id = sender.clone();
        entry.last_message = preview(text, PREVIEW_MAX_CHARS);
        entry.last_message_at = at;
        if sender != &self.me && !viewing {
            entry.unread_count = entry.unread_count.saturating_add(1);
        }
        self.entries.insert(0, entry);
    }

    /// Record the server id for the latest message, if it is still latest.
    pub fn confirm_latest(&mut self, counterpart: &UserId, id: MessageId, at: DateTime<Utc>) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| &e.counterpart_id == counterpart && e.last_message_id.is_none())
        {
            entry.last_message_id = Some(id);
            entry.last_message_at = at;
        }
    }

    pub fn clear_unread(&mut self, counterpart: &UserId) {
        if let Some(entry) = self.entries.iter_mut().find(|e| &e.counterpart_id == counterpart) {
            entry.unread_count = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    fn summary(counterpart: &str, unread: u32) -> ConversationSummary {
        ConversationSummary {
            counterpart_id: user(counterpart),
            last_message_id: MessageId::new(),
            last_sender_id: user(counterpart),
            last_message: "earlier".into(),
            last_message_at: Utc::now(),
            unread_count: unread,
        }
    }

    #[test]
    fn incoming_moves_to_top_and_counts_unread() {
        let mut list = ConversationList::new(user("alice"));
        list.replace(vec![summary("carol", 0), summary("bob", 2)]);

        list.upsert(&user("bob"), &user("bob"), "new question", Utc::now(), false);

        assert_eq!(list.entries()[0].counterpart_id, user("bob"));
        assert_eq!(list.entries()[0].unread_count, 3);
        assert_eq!(list.entries()[0].last_message, "new question");
        assert_eq!(list.unread_total(), 3);
    }

    #[test]
    fn own_and_viewed_messages_do_not_count() {
        let mut list = ConversationList::new(user("alice"));
        list.upsert(&user("bob"), &user("alice"), "outgoing", Utc::now(), false);
        list.upsert(&user("bob"), &user("bob"), "seen live", Utc::now(), true);
        assert_eq!(list.get(&user("bob")).unwrap().unread_count, 0);
    }

    #[test]
    fn preview_is_truncated() {
        let mut list = ConversationList::new(user("alice"));
        let long = "x".repeat(200);
        list.upsert(&user("bob"), &user("bob"), &long, Utc::now(), false);
        assert!(list.entries()[0].last_message.chars().count() <= PREVIEW_MAX_CHARS + 1);
    }

    #[test]
    fn confirm_and_clear() {
        let mut list = ConversationList::new(user("alice"));
        list.upsert(&user("bob"), &user("bob"), "hi", Utc::now(), false);
        let id = MessageId::new();
        list.confirm_latest(&user("bob"), id, Utc::now());
        list.clear_unread(&user("bob"));

        let entry = list.get(&user("bob")).unwrap();
        assert_eq!(entry.last_message_id, Some(id));
        assert_eq!(entry.unread_count, 0);
    }
}
