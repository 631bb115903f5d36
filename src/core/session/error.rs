use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no conversation selected")]
    InvalidConversation,
    #[error("message is empty")]
    EmptyInput,
    #[error("conversation {0} already has a response in progress")]
    JobActive(String),
    #[error("unknown conversation {0}")]
    UnknownConversation(String),
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

pub type SessionResult<T> = Result<T, SessionError>;
