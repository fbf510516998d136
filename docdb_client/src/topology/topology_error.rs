use std::time::Duration;

use crate::{
    error_chain_fmt, AddressParseError, ClusterDescription, MAX_SUPPORTED_WIRE_VERSION,
    MIN_SUPPORTED_WIRE_VERSION,
};

#[derive(thiserror::Error)]
pub enum TopologyError {
    #[error("No hosts were supplied and a topology can't exist without at least one")]
    MissingHostsError,
    #[error("Invalid topology configuration: {0}")]
    InvalidConfiguration(String),
    #[error(transparent)]
    InvalidAddress(#[from] AddressParseError),
    #[error(
        "Timed out after {} ms while waiting for {waiting_for}. Client view of cluster state is {cluster}",
        .timeout.as_millis()
    )]
    Timeout {
        waiting_for: String,
        timeout: Duration,
        cluster: ClusterDescription,
    },
    #[error("Too many callers are already waiting for a server. Max number of waiters ({max_wait_queue_size}) exceeded")]
    WaitQueueFull { max_wait_queue_size: usize },
    #[error("The topology is closed")]
    ClosedTopology,
    #[error(
        "A server in the cluster speaks a wire version outside the range this driver supports ({}..={}). Client view of cluster state is {cluster}",
        MIN_SUPPORTED_WIRE_VERSION,
        MAX_SUPPORTED_WIRE_VERSION
    )]
    IncompatibleDriver { cluster: ClusterDescription },
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl std::fmt::Debug for TopologyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use crate::{ClusterType, ConnectionMode, HeartbeatError, ServerAddress, ServerDescription};

    use super::*;

    #[test]
    fn timeout_message_renders_every_member() {
        // Arrange
        let cluster = ClusterDescription::new(
            ConnectionMode::Multiple,
            ClusterType::Unknown,
            [
                ServerDescription::connecting(ServerAddress::new("a", 27017)),
                ServerDescription::failed(
                    ServerAddress::new("b", 27017),
                    HeartbeatError::Transport("connection refused".to_string()),
                ),
            ],
        );
        let error = TopologyError::Timeout {
            waiting_for: "a server that matches PrimaryServerSelector".to_string(),
            timeout: Duration::from_millis(250),
            cluster,
        };

        // Act
        let message = error.to_string();

        // Assert
        assert!(message.starts_with("Timed out after 250 ms"));
        assert!(message.contains("PrimaryServerSelector"));
        assert!(message.contains("a:27017"));
        assert!(message.contains("connection refused"));
    }

    #[test]
    fn debug_renders_the_source_chain() {
        let error = TopologyError::from(anyhow::anyhow!("certificate unreadable"));

        let rendered = format!("{:?}", error);

        assert!(rendered.contains("certificate unreadable"));
    }
}
