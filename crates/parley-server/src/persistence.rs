//! Async facade over the blocking [`MessageStore`].
//!
//! SQLite calls run on tokio's blocking pool so a slow write never stalls
//! the realtime router or other requests.

use std::sync::{Arc, Mutex};

use parley_shared::models::{ConversationSummary, Message, MessagePage, PageRequest};
use parley_shared::types::UserId;
use parley_store::MessageStore;

use crate::error::ServerError;

#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<Mutex<MessageStore>>,
}

impl SharedStore {
    pub fn new(store: MessageStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    async fn with_store<T, F>(&self, op: F) -> Result<T, ServerError>
    where
        T: Send + 'static,
        F: FnOnce(&mut MessageStore) -> parley_store::Result<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut store = inner
                .lock()
                .map_err(|e| ServerError::Internal(format!("Store lock poisoned: {e}")))?;
            op(&mut *store).map_err(ServerError::from)
        })
        .await
        .map_err(|e| ServerError::Internal(format!("Store task failed: {e}")))?
    }

    pub async fn append(
        &self,
        sender: UserId,
        receiver: UserId,
        text: String,
    ) -> Result<Message, ServerError> {
        self.with_store(move |store| store.append(&sender, &receiver, &text))
            .await
    }

    pub async fn list_conversation(
        &self,
        a: UserId,
        b: UserId,
        page: PageRequest,
    ) -> Result<MessagePage, ServerError> {
        self.with_store(move |store| store.list_conversation(&a, &b, page))
            .await
    }

    pub async fn mark_read(&self, reader: UserId, counterpart: UserId) -> Result<usize, ServerError> {
        self.with_store(move |store| store.mark_read(&reader, &counterpart))
            .await
    }

    pub async fn list_for_user(&self, user: UserId) -> Result<Vec<ConversationSummary>, ServerError> {
        self.with_store(move |store| store.list_for_user(&user)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::ValidationError;
    use parley_store::Database;

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_through_blocking_pool() {
        let store = SharedStore::new(MessageStore::new(Database::open_in_memory().unwrap()));

        let sent = store
            .append(user("alice"), user("bob"), "hello".into())
            .await
            .unwrap();
        let page = store
            .list_conversation(user("bob"), user("alice"), PageRequest::all())
            .await
            .unwrap();
        assert_eq!(page.messages, vec![sent]);

        assert_eq!(store.mark_read(user("bob"), user("alice")).await.unwrap(), 1);
        let list = store.list_for_user(user("bob")).await.unwrap();
        assert_eq!(list[0].unread_count, 0);
    }

    #[tokio::test]
    async fn test_history_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.db");

        let store = SharedStore::new(MessageStore::new(Database::open_at(&path).unwrap()));
        store
            .append(user("alice"), user("bob"), "before restart".into())
            .await
            .unwrap();
        drop(store);

        let reopened = SharedStore::new(MessageStore::new(Database::open_at(&path).unwrap()));
        let page = reopened
            .list_conversation(user("bob"), user("alice"), PageRequest::all())
            .await
            .unwrap();
        assert_eq!(page.messages.len(), 1);
        assert_eq!(page.messages[0].text, "before restart");
    }

    #[tokio::test]
    async fn test_validation_surfaces_as_server_error() {
        let store = SharedStore::new(MessageStore::new(Database::open_in_memory().unwrap()));
        let err = store
            .append(user("alice"), user("alice"), "hi".into())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServerError::Validation(ValidationError::SelfMessage)
        ));
    }
}
