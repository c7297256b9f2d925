use thiserror::Error;

/// Input rejected before anything is written or routed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message body is empty")]
    EmptyBody,

    #[error("Cannot send a message to yourself")]
    SelfMessage,

    #[error("Message body too long: {len} chars (max {max})")]
    TooLong { len: usize, max: usize },

    #[error("Invalid user id: {0:?}")]
    InvalidUserId(String),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unsupported frame type")]
    UnsupportedFrame,
}
