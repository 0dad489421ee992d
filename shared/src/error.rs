use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid command id: {0}")]
    InvalidCommandId(u8),
    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),
    #[error("invalid utf-8 payload: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("invalid json payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed chunk frame")]
    MalformedChunk,
    #[error("unexpected command: {0}")]
    UnexpectedCommand(String),
}
