//! Chat request and reply types

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};

pub const MAX_USER_ID_CHARS: usize = 128;
pub const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    pub message: String,
}

/// Outcome of one chat turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
    /// Reference passages that went into the prompt
    pub retrieved_documents: Vec<String>,
    /// Verbatim history rows loaded for this turn
    pub history_len: usize,
    pub compacted: bool,
}

/// Non-empty, bounded, `[A-Za-z0-9_.@-]` only
pub fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.is_empty() {
        return Err(ChatError::Validation("user_id cannot be empty".to_string()));
    }
    if user_id.chars().count() > MAX_USER_ID_CHARS {
        return Err(ChatError::Validation(format!(
            "user_id cannot exceed {} characters",
            MAX_USER_ID_CHARS
        )));
    }
    if let Some(bad) = user_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '@' | '-')))
    {
        return Err(ChatError::Validation(format!(
            "user_id contains invalid character '{}'",
            bad
        )));
    }
    Ok(())
}

pub fn validate_message(message: &str) -> Result<()> {
    if message.trim().is_empty() {
        return Err(ChatError::Validation("message cannot be empty".to_string()));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ChatError::Validation(format!(
            "message cannot exceed {} characters",
            MAX_MESSAGE_CHARS
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_rules() {
        assert!(validate_user_id("alice.smith@example-1_2").is_ok());
        assert!(validate_user_id("").is_err());
        assert!(validate_user_id("has space").is_err());
        assert!(validate_user_id("slash/inside").is_err());
        assert!(validate_user_id(&"a".repeat(128)).is_ok());
        assert!(validate_user_id(&"a".repeat(129)).is_err());
    }

    #[test]
    fn test_message_rules() {
        assert!(validate_message("hello").is_ok());
        assert!(matches!(validate_message("   \n"), Err(ChatError::Validation(_))));
        assert!(validate_message(&"é".repeat(4000)).is_ok());
        assert!(validate_message(&"a".repeat(4001)).is_err());
    }
}
