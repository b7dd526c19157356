use thiserror::Error;

/// Errors surfaced by the delivery engine.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Live connect failed or timed out. Converted into fallback activation.
    #[error("live transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    /// Best-effort durable write failed. Logged, never returned from a send.
    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("invalid JID: {0}")]
    InvalidJid(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("session not initialized")]
    NotInitialized,

    #[error("session is closed")]
    SessionClosed,
}

impl ChatError {
    /// Identity and configuration errors escape the connection manager; the rest are recoverable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ChatError::AuthenticationFailed(_) | ChatError::InvalidJid(_) | ChatError::Config(_)
        )
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::PersistenceFailed(err.to_string())
    }
}

impl From<tokio_xmpp::Error> for ChatError {
    fn from(err: tokio_xmpp::Error) -> Self {
        match err {
            tokio_xmpp::Error::Auth(e) => ChatError::AuthenticationFailed(format!("{:?}", e)),
            other => ChatError::TransportUnavailable(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_identity_errors_are_fatal() {
        assert!(ChatError::AuthenticationFailed("bad password".into()).is_fatal());
        assert!(ChatError::InvalidJid("nobody".into()).is_fatal());
        assert!(!ChatError::TransportUnavailable("timeout".into()).is_fatal());
        assert!(!ChatError::PersistenceFailed("503".into()).is_fatal());
        assert!(!ChatError::SendFailed("closed".into()).is_fatal());
    }
}
