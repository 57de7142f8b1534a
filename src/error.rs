//! Error taxonomy shared by the store, the chain resolver and the orchestrator

use thiserror::Error;

use crate::completion::CompletionError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed input, or an insert that would break the branch invariants
    #[error("{0}")]
    Validation(String),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(i64),

    #[error("Message not found: {0}")]
    MessageNotFound(i64),

    #[error("Chain broken: message {message_id} points to missing parent {missing_parent_id}")]
    ChainBroken {
        message_id: i64,
        missing_parent_id: i64,
    },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Completion service error: {0}")]
    Completion(#[from] CompletionError),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::ConversationNotFound(_) | Error::MessageNotFound(_)
        )
    }
}
