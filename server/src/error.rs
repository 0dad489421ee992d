use shared::protocol::ErrorKind;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("Room '{0}' not found.")]
    RoomNotFound(String),
    #[error("Invalid name '{0}': names must be 1-{max} characters without control characters.", max = shared::MAX_NAME_LENGTH)]
    InvalidName(String),
    #[error("Room '{0}' was in an inconsistent state and has been closed.")]
    InternalInvariantViolation(String),
}

impl CoordinatorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoordinatorError::RoomNotFound(_) => ErrorKind::RoomNotFound,
            CoordinatorError::InvalidName(_) => ErrorKind::InvalidName,
            CoordinatorError::InternalInvariantViolation(_) => ErrorKind::Internal,
        }
    }
}
