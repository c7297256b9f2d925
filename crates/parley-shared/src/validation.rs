//! Checks applied to every message before it is persisted or routed.

use crate::error::ValidationError;
use crate::types::UserId;

/// Trim `text` and check it is non-empty and at most `max_chars` long.
///
/// Returns the trimmed body, which is what gets stored.
pub fn normalize_body(text: &str, max_chars: usize) -> Result<String, ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyBody);
    }
    let len = trimmed.chars().count();
    if len > max_chars {
        return Err(ValidationError::TooLong {
            len,
            max: max_chars,
        });
    }
    Ok(trimmed.to_string())
}

pub fn ensure_distinct(sender: &UserId, receiver: &UserId) -> Result<(), ValidationError> {
    if sender == receiver {
        return Err(ValidationError::SelfMessage);
    }
    Ok(())
}

/// Cut `text` to `max_chars` characters, appending an ellipsis when shortened.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", text[..idx].trim_end()),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_body_trims() {
        assert_eq!(normalize_body("  hi there \n", 100).unwrap(), "hi there");
    }

    #[test]
    fn test_normalize_body_rejects_whitespace_only() {
        assert_eq!(normalize_body(" \t\n ", 100), Err(ValidationError::EmptyBody));
        assert_eq!(normalize_body("", 100), Err(ValidationError::EmptyBody));
    }

    #[test]
    fn test_normalize_body_rejects_long() {
        let err = normalize_body(&"a".repeat(11), 10).unwrap_err();
        assert_eq!(err, ValidationError::TooLong { len: 11, max: 10 });
    }

    #[test]
    fn test_ensure_distinct() {
        let alice = UserId::parse("alice").unwrap();
        let bob = UserId::parse("bob").unwrap();
        assert_eq!(ensure_distinct(&alice, &alice), Err(ValidationError::SelfMessage));
        assert!(ensure_distinct(&alice, &bob).is_ok());
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("Need help with a lease", 9), "Need help…");
        assert_eq!(preview("ààààà", 2), "àà…");
    }
}
