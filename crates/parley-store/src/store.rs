//! The durable message store: validation, persistence and the derived
//! conversation index behind one handle.

use chrono::{SubsecRound, Utc};

use parley_shared::constants::MAX_MESSAGE_CHARS;
use parley_shared::models::{ConversationSummary, Message, MessagePage, PageRequest};
use parley_shared::types::{DeliveryStatus, MessageId, UserId};
use parley_shared::validation::{ensure_distinct, normalize_body};

use crate::database::Database;
use crate::error::Result;
use crate::index::ConversationIndex;

pub struct MessageStore {
    db: Database,
    index: ConversationIndex,
    max_chars: usize,
}

impl MessageStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            index: ConversationIndex::new(),
            max_chars: MAX_MESSAGE_CHARS,
        }
    }

    /// Override the maximum accepted body length (in characters).
    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars.max(1);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Validate and persist a new message.
    ///
    /// The body is stored trimmed; id and timestamp are assigned here.
    pub fn append(&mut self, sender: &UserId, receiver: &UserId, text: &str) -> Result<Message> {
        ensure_distinct(sender, receiver)?;
        let body = normalize_body(text, self.max_chars)?;

        let mut message = Message {
            id: MessageId::new(),
            seq: 0,
            sender_id: sender.clone(),
            receiver_id: receiver.clone(),
            text: body,
            timestamp: Utc::now().trunc_subsecs(6),
            status: DeliveryStatus::Sent,
            read: false,
        };
        message.seq = self.db.insert_message(&message)?;

        self.index.invalidate(sender);
        self.index.invalidate(receiver);

        tracing::debug!(
            id = %message.id,
            seq = message.seq,
            sender = %sender.short(),
            receiver = %receiver.short(),
            "message appended"
        );
        Ok(message)
    }

    /// History between the unordered pair `{a, b}`, oldest first.
    pub fn list_conversation(
        &self,
        a: &UserId,
        b: &UserId,
        page: PageRequest,
    ) -> Result<MessagePage> {
        self.db.get_conversation(a, b, page)
    }

    /// Mark everything `counterpart` sent to `reader` as read.
    ///
    /// Returns how many rows changed, so a repeated call reports `0`.
    pub fn mark_read(&mut self, reader: &UserId, counterpart: &UserId) -> Result<usize> {
        let updated = self.db.mark_messages_read(reader, counterpart)?;
        if updated > 0 {
            self.index.invalidate(reader);
            self.index.invalidate(counterpart);
            tracing::debug!(
                reader = %reader.short(),
                counterpart = %counterpart.short(),
                updated,
                "messages marked read"
            );
        }
        Ok(updated)
    }

    /// Conversation list for `user`, most recent first.
    pub fn list_for_user(&mut self, user: &UserId) -> Result<Vec<ConversationSummary>> {
        if let Some(cached) = self.index.get(user) {
            return Ok(cached.to_vec());
        }
        let summaries = self.db.conversation_summaries(user)?;
        self.index.store(user.clone(), summaries.clone());
        Ok(summaries)
    }

    pub fn unread_count(&self, reader: &UserId, counterpart: &UserId) -> Result<u32> {
        self.db.count_unread(reader, counterpart)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use parley_shared::ValidationError;

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    fn store() -> MessageStore {
        MessageStore::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn append_rejects_self_messaging() {
        let mut store = store();
        let err = store.append(&user("alice"), &user("alice"), "hi").unwrap_err();
        assert!(matches!(
            err,
            StoreError::Validation(ValidationError::SelfMessage)
        ));
    }

    #[test]
    fn append_rejects_blank_body() {
        let mut store = store();
        let err = store.append(&user("alice"), &user("bob"), "   \n").unwrap_err();
        assert!(matches!(err, StoreError::Validation(ValidationError::EmptyBody)));
    }

    #[test]
    fn append_enforces_configured_length() {
        let mut store = store().with_max_chars(5);
        let err = store.append(&user("alice"), &user("bob"), "too long").unwrap_err();
        assert!(matches!(
            err,
            StoreError::Validation(ValidationError::TooLong { len: 8, max: 5 })
        ));
    }

    #[test]
    fn history_round_trip_ends_with_latest() {
        let mut store = store();
        let (a, b) = (user("alice"), user("bob"));
        store.append(&b, &a, "earlier").unwrap();
        let sent = store.append(&a, &b, "  hello ").unwrap();

        let page = store.list_conversation(&a, &b, PageRequest::all()).unwrap();
        let last = page.messages.last().unwrap();
        assert_eq!(last.text, "hello");
        assert_eq!(last.sender_id, a);
        assert_eq!(last.receiver_id, b);
        assert_eq!(last, &sent);
        assert_eq!(page.messages.len(), 2);
    }

    #[test]
    fn mark_read_is_idempotent() {
        let mut store = store();
        let (a, b) = (user("alice"), user("bob"));
        store.append(&b, &a, "one").unwrap();
        store.append(&b, &a, "two").unwrap();

        assert_eq!(store.mark_read(&a, &b).unwrap(), 2);
        assert_eq!(store.mark_read(&a, &b).unwrap(), 0);
    }

    #[test]
    fn mark_read_leaves_own_messages_alone() {
        let mut store = store();
        let (alice, bob) = (user("alice"), user("bob"));
        let m1 = store.append(&alice, &bob, "m1").unwrap();
        let m2 = store.append(&bob, &alice, "m2").unwrap();

        store.mark_read(&alice, &bob).unwrap();

        let db = store.database();
        assert!(!db.get_message_by_id(m1.id).unwrap().read);
        assert!(db.get_message_by_id(m2.id).unwrap().read);
    }

    #[test]
    fn conversation_list_orders_by_recency() {
        let mut store = store();
        let (alice, bob, carol) = (user("alice"), user("bob"), user("carol"));
        store.append(&bob, &alice, "from bob").unwrap();
        store.append(&carol, &alice, "from carol").unwrap();

        let list = store.list_for_user(&alice).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].counterpart_id, carol);
        assert_eq!(list[1].counterpart_id, bob);

        store.append(&alice, &bob, "reply to bob").unwrap();
        let list = store.list_for_user(&alice).unwrap();
        assert_eq!(list[0].counterpart_id, bob);
        assert_eq!(list[0].last_message, "reply to bob");
        assert_eq!(list[0].last_sender_id, alice);
        assert_eq!(list[0].unread_count, 1);
    }

    #[test]
    fn conversation_preview_is_truncated() {
        let mut store = store();
        let long = "x".repeat(200);
        store.append(&user("bob"), &user("alice"), &long).unwrap();

        let list = store.list_for_user(&user("alice")).unwrap();
        assert!(list[0].last_message.chars().count() < long.len());
        assert!(list[0].last_message.ends_with('…'));
    }

    #[test]
    fn unread_counts_track_direct_recount() {
        let mut store = store();
        let (alice, bob, carol) = (user("alice"), user("bob"), user("carol"));

        // Interleave appends, list reads (which populate the cache) and
        // mark-reads, checking the list against a direct count each step.
        let steps: &[(&str, &str, &str)] = &[
            ("send", "bob", "alice"),
            ("send", "carol", "alice"),
            ("list", "alice", ""),
            ("send", "bob", "alice"),
            ("read", "alice", "bob"),
            ("list", "alice", ""),
            ("send", "alice", "bob"),
            ("send", "bob", "alice"),
            ("list", "bob", ""),
            ("read", "alice", "carol"),
            ("send", "carol", "alice"),
        ];

        for (op, x, y) in steps {
            match *op {
                "send" => {
                    store.append(&user(x), &user(y), "msg").unwrap();
                }
                "read" => {
                    store.mark_read(&user(x), &user(y)).unwrap();
                }
                _ => {
                    store.list_for_user(&user(x)).unwrap();
                }
            }

            for viewer in [&alice, &bob, &carol] {
                for summary in store.list_for_user(viewer).unwrap() {
                    let direct = store
                        .unread_count(viewer, &summary.counterpart_id)
                        .unwrap();
                    assert_eq!(summary.unread_count, direct);
                }
            }
        }

        let final_list = store.list_for_user(&alice).unwrap();
        let carol_row = final_list
            .iter()
            .find(|s| s.counterpart_id == carol)
            .unwrap();
        assert_eq!(carol_row.unread_count, 1);
        assert_eq!(final_list[0].counterpart_id, carol);
    }

    #[test]
    fn offline_message_is_recoverable_from_history() {
        let mut store = store();
        let (alice, bob) = (user("alice"), user("bob"));
        let m1 = store
            .append(&alice, &bob, "Need help with a lease")
            .unwrap();

        let page = store
            .list_conversation(&bob, &alice, PageRequest::all())
            .unwrap();
        assert_eq!(page.messages, vec![m1]);
    }
}
