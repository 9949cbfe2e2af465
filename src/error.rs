use thiserror::Error;
use uuid::Uuid;

pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("no credential provided")]
    MissingCredential,

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("chat {0} not found")]
    ThreadNotFound(Uuid),

    #[error("not a participant of this chat")]
    NotParticipant,

    #[error("chat {0} is no longer active")]
    ThreadInactive(Uuid),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("forbidden: {0}")]
    Forbidden(String),
}

impl ChatError {
    /// Text sent back to the acting connection in an `error` event.
    ///
    /// Storage details stay in the log; the client only learns which
    /// operation failed.
    pub fn client_message(&self, operation: &str) -> String {
        match self {
            ChatError::ThreadNotFound(_) => "Chat not found".to_owned(),
            ChatError::NotParticipant => format!("Not authorized to {operation}"),
            ChatError::Storage(_) => format!("Error trying to {operation}"),
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for ChatError {
    fn from(err: sqlx::Error) -> Self {
        ChatError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::MalformedPayload(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_details_are_hidden_from_clients() {
        let err = ChatError::Storage("database is locked".into());
        let msg = err.client_message("send message");
        assert_eq!(msg, "Error trying to send message");
        assert!(!msg.contains("locked"));
    }

    #[test]
    fn test_not_participant_names_operation() {
        assert_eq!(
            ChatError::NotParticipant.client_message("join this chat"),
            "Not authorized to join this chat"
        );
    }
}
