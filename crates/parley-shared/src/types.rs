use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::MAX_USER_ID_CHARS;
use crate::error::ValidationError;

// User identity = opaque account id handed to us by the auth layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Build an identity, rejecting blank, padded and overlong ids.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        if raw.chars().count() > MAX_USER_ID_CHARS {
            let head: String = raw.chars().take(16).collect();
            return Err(ValidationError::InvalidUserId(format!("{head}...")));
        }
        if raw.is_empty() || raw.trim() != raw {
            return Err(ValidationError::InvalidUserId(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl std::str::FromStr for UserId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of the marketplace a participant is on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    User,
    Lawyer,
}

impl SenderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Lawyer => "lawyer",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    #[default]
    Sent,
    Delivered,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "delivered" => Self::Delivered,
            _ => Self::Sent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_rejects_blank_and_padded() {
        assert!(UserId::parse("").is_err());
        assert!(UserId::parse("  ").is_err());
        assert!(UserId::parse(" alice").is_err());
        assert_eq!(UserId::parse("alice").unwrap().as_str(), "alice");
    }

    #[test]
    fn test_user_id_length_cap() {
        let longest = "a".repeat(MAX_USER_ID_CHARS);
        assert!(UserId::parse(longest).is_ok());

        let err = UserId::parse("a".repeat(MAX_USER_ID_CHARS + 1)).unwrap_err();
        match err {
            ValidationError::InvalidUserId(shown) => assert!(shown.len() < 32),
            other => panic!("unexpected error: {other:?}"),
        }
        let json = format!("\"{}\"", "b".repeat(10_000));
        assert!(serde_json::from_str::<UserId>(&json).is_err());
    }

    #[test]
    fn test_user_id_short_is_char_safe() {
        let id = UserId::parse("éééééééééé").unwrap();
        assert_eq!(id.short().chars().count(), 8);
        assert_eq!(UserId::parse("bob").unwrap().short(), "bob");
    }

    #[test]
    fn test_user_id_deserialize_validates() {
        assert!(serde_json::from_str::<UserId>("\"\"").is_err());
        let id: UserId = serde_json::from_str("\"alice\"").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"alice\"");
    }

    #[test]
    fn test_role_and_status_wire_names() {
        assert_eq!(serde_json::to_string(&SenderRole::Lawyer).unwrap(), "\"lawyer\"");
        assert_eq!(
            serde_json::to_string(&DeliveryStatus::Delivered).unwrap(),
            "\"delivered\""
        );
        assert_eq!(DeliveryStatus::from_str_lossy("bogus"), DeliveryStatus::Sent);
    }
}
