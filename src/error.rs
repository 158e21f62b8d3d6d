#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("authentication required")]
    AuthRequired,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("persistence failure: {0}")]
    Persistence(#[source] anyhow::Error),

    #[error("persistence call timed out")]
    PersistenceTimeout,

    #[error("recipient is no longer connected")]
    StaleRecipient,

    #[error("room {0} not found")]
    RoomNotFound(String),

    #[error("user {0} not found")]
    UserNotFound(String),

    #[error("access to room denied")]
    AccessDenied,
}

impl RelayError {
    pub fn code(&self) -> &'static str {
        use RelayError::*;
        match self {
            AuthRequired => "auth_required",
            Protocol(_) => "protocol_error",
            Persistence(_) | PersistenceTimeout => "persistence_failure",
            StaleRecipient => "stale_recipient",
            RoomNotFound(_) => "room_not_found",
            UserNotFound(_) => "user_not_found",
            AccessDenied => "access_denied",
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}
