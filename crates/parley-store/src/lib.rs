//! # parley-store
//!
//! Durable message storage for Parley, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` with typed query helpers, and [`MessageStore`],
//! which adds validation and the cached conversation index on top.

pub mod conversations;
pub mod database;
pub mod index;
pub mod messages;
pub mod migrations;
pub mod store;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use index::ConversationIndex;
pub use store::MessageStore;
