//! Local view of one conversation.
//!
//! Own messages are shown immediately as [`DisplayState::Provisional`] and
//! move to `Confirmed` once the durable write succeeds, or to `Failed` (and
//! out of the view) when it does not.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use parley_shared::models::Message;
use parley_shared::protocol::ChatPayload;
use parley_shared::types::{MessageId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayState {
    Provisional,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMessage {
    pub local_id: Uuid,
    pub server_id: Option<MessageId>,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub state: DisplayState,
}

impl LocalMessage {
    fn from_server(message: Message) -> Self {
        Self {
            local_id: Uuid::new_v4(),
            server_id: Some(message.id),
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            text: message.text,
            timestamp: message.timestamp,
            state: DisplayState::Confirmed,
        }
    }

    fn matches_payload(&self, payload: &ChatPayload) -> bool {
        self.sender_id == payload.sender_id
            && self.timestamp == payload.timestamp
            && self.text == payload.message
    }
}

#[derive(Debug, Clone)]
pub struct Timeline {
    items: Vec<LocalMessage>,
    max_items: usize,
}

impl Timeline {
    pub fn new(max_items: usize) -> Self {
        Self {
            items: Vec::new(),
            max_items: max_items.max(1),
        }
    }

    pub fn items(&self) -> &[LocalMessage] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push_provisional(
        &mut self,
        sender: UserId,
        receiver: UserId,
        text: String,
        timestamp: DateTime<Utc>,
    ) -> LocalMessage {
        let message = LocalMessage {
            local_id: Uuid::new_v4(),
            server_id: None,
            sender_id: sender,
            receiver_id: receiver,
            text,
            timestamp,
            state: DisplayState::Provisional,
        };
        self.items.push(message.clone());
        self.trim_to_max();
        message
    }

    /// Attach the durable record to a provisional echo. If a refresh already
    /// brought the same record in, the echo is dropped instead.
    pub fn confirm(&mut self, local_id: Uuid, message: &Message) -> Option<LocalMessage> {
        let idx = self.position(local_id)?;
        if self
            .items
            .iter()
            .any(|m| m.server_id.as_ref() == Some(&message.id))
        {
            self.items.remove(idx);
            return self
                .items
                .iter()
                .find(|m| m.server_id.as_ref() == Some(&message.id))
                .cloned();
        }

        let item = &mut self.items[idx];
        item.server_id = Some(message.id);
        item.text = message.text.clone();
        item.state = DisplayState::Confirmed;
        Some(item.clone())
    }

    /// Roll a provisional echo back out of the view.
    pub fn fail(&mut self, local_id: Uuid) -> Option<LocalMessage> {
        let idx = self.position(local_id)?;
        let mut item = self.items.remove(idx);
        item.state = DisplayState::Failed;
        Some(item)
    }

    /// Append a realtime message unless it is already shown.
    pub fn apply_remote(&mut self, payload: &ChatPayload) -> bool {
        if self.items.iter().any(|m| m.matches_payload(payload)) {
            return false;
        }
        self.items.push(LocalMessage {
            local_id: Uuid::new_v4(),
            server_id: None,
            sender_id: payload.sender_id.clone(),
            receiver_id: payload.receiver_id.clone(),
            text: payload.message.clone(),
            timestamp: payload.timestamp,
            state: DisplayState::Confirmed,
        });
        self.trim_to_max();
        true
    }

    /// Replace the view with durable history, keeping echoes whose write is
    /// still in flight.
    pub fn replace_with_history(&mut self, history: Vec<Message>) {
        let pending: Vec<LocalMessage> = self
            .items
            .drain(..)
            .filter(|m| m.state == DisplayState::Provisional)
            .collect();
        self.items = history.into_iter().map(LocalMessage::from_server).collect();
        self.items.extend(pending);
        self.trim_to_max();
    }

    fn position(&self, local_id: Uuid) -> Option<usize> {
        self.items.iter().position(|m| m.local_id == local_id)
    }

    fn trim_to_max(&mut self) {
        if self.items.len() <= self.max_items {
            return;
        }
        let excess = self.items.len() - self.max_items;
        self.items.drain(0..excess);
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new(1_000)
    }
}

#[cfg(test)]
mod tests {
    use parley_shared::types::DeliveryStatus;

    use super::*;

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    fn stored(seq: i64, from: &str, to: &str, text: &str) -> Message {
        Message {
            id: MessageId::new(),
            seq,
            sender_id: user(from),
            receiver_id: user(to),
            text: text.into(),
            timestamp: Utc::now(),
            status: DeliveryStatus::Sent,
            read: false,
        }
    }

    #[test]
    fn provisional_then_confirmed() {
        let mut timeline = Timeline::default();
        let echo = timeline.push_provisional(user("alice"), user("bob"), "hi".into(), Utc::now());
        assert_eq!(timeline.items()[0].state, DisplayState::Provisional);

        let durable = stored(1, "alice", "bob", "hi");
        let confirmed = timeline.confirm(echo.local_id, &durable).unwrap();
        assert_eq!(confirmed.state, DisplayState::Confirmed);
        assert_eq!(confirmed.server_id, Some(durable.id));
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn failed_write_is_rolled_back() {
        let mut timeline = Timeline::default();
        let echo = timeline.push_provisional(user("alice"), user("bob"), "hi".into(), Utc::now());

        let failed = timeline.fail(echo.local_id).unwrap();
        assert_eq!(failed.state, DisplayState::Failed);
        assert!(timeline.is_empty());
        assert!(timeline.fail(echo.local_id).is_none());
    }

    #[test]
    fn refresh_keeps_in_flight_echoes() {
        let mut timeline = Timeline::default();
        timeline.apply_remote(&ChatPayload {
            sender_id: user("bob"),
            receiver_id: user("alice"),
            message: "stale".into(),
            timestamp: Utc::now(),
            status: DeliveryStatus::Delivered,
        });
        let echo = timeline.push_provisional(user("alice"), user("bob"), "pending".into(), Utc::now());

        timeline.replace_with_history(vec![
            stored(1, "bob", "alice", "first"),
            stored(2, "alice", "bob", "second"),
        ]);

        let texts: Vec<&str> = timeline.items().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["first", "second", "pending"]);
        assert_eq!(timeline.items()[2].local_id, echo.local_id);
    }

    #[test]
    fn confirm_after_refresh_drops_duplicate() {
        let mut timeline = Timeline::default();
        let echo = timeline.push_provisional(user("alice"), user("bob"), "hi".into(), Utc::now());
        let durable = stored(1, "alice", "bob", "hi");
        timeline.replace_with_history(vec![durable.clone()]);
        assert_eq!(timeline.len(), 2);

        let kept = timeline.confirm(echo.local_id, &durable).unwrap();
        assert_eq!(kept.server_id, Some(durable.id));
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn remote_duplicates_are_ignored() {
        let mut timeline = Timeline::default();
        let payload = ChatPayload {
            sender_id: user("bob"),
            receiver_id: user("alice"),
            message: "hello".into(),
            timestamp: Utc::now(),
            status: DeliveryStatus::Delivered,
        };
        assert!(timeline.apply_remote(&payload));
        assert!(!timeline.apply_remote(&payload));
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn bounded_retention() {
        let mut timeline = Timeline::new(2);
        for text in ["a", "b", "c"] {
            timeline.push_provisional(user("alice"), user("bob"), text.into(), Utc::now());
        }
        let texts: Vec<&str> = timeline.items().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["b", "c"]);
    }
}
