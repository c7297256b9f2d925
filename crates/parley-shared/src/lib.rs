//! # parley-shared
//!
//! Types shared by every Parley crate: identities, the persisted message
//! model, the realtime wire protocol and input validation.

pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod types;
pub mod validation;

pub use error::{ProtocolError, ValidationError};
pub use models::{ConversationSummary, Message, MessagePage, PageRequest};
pub use types::{DeliveryStatus, MessageId, SenderRole, UserId};
