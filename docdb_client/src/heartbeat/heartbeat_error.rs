/// Failure of a single heartbeat attempt.
///
/// Heartbeat errors are stored inside [`ServerDescription`](crate::ServerDescription)s, so
/// they carry rendered messages instead of source errors and can be cloned and compared.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatError {
    /// The connection could not be opened or broke while in use.
    #[error("Transport failure: {0}")]
    Transport(String),
    /// The node did not answer within the read timeout. It may be slow but healthy.
    #[error("Timed out waiting for a heartbeat reply: {0}")]
    ReadTimeout(String),
    /// The node refused our credentials.
    #[error("Authentication failed: {0}")]
    Authentication(String),
    /// The node answered with something that is not a heartbeat reply.
    #[error("Invalid heartbeat reply: {0}")]
    Protocol(String),
    /// The node answered but is not acceptable to this topology.
    #[error("Server rejected: {0}")]
    Rejected(String),
}

impl HeartbeatError {
    /// Whether this failure should discard the connection (and the pooled connections for
    /// the same address) before the next attempt.
    pub fn invalidates_connection(&self) -> bool {
        matches!(
            self,
            HeartbeatError::Transport(_) | HeartbeatError::Authentication(_)
        )
    }

    /// Whether a single immediate retry on a fresh connection is worth making.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HeartbeatError::Transport(_))
    }
}

impl From<reqwest::Error> for HeartbeatError {
    fn from(e: reqwest::Error) -> Self {
        let message = e.to_string();
        if e.is_timeout() {
            HeartbeatError::ReadTimeout(message)
        } else if e.is_decode() {
            HeartbeatError::Protocol(message)
        } else if let Some(status) = e.status() {
            if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
                HeartbeatError::Authentication(message)
            } else {
                HeartbeatError::Transport(message)
            }
        } else {
            HeartbeatError::Transport(message)
        }
    }
}
