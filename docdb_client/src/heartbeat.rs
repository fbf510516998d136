//! The boundary between the topology core and the transport that carries heartbeats.
//!
//! A [`ConnectionFactory`] opens one [`HeartbeatChannel`] per monitored address. Each
//! channel is owned by exactly one monitor and is dropped to close it.
mod heartbeat_error;
mod heartbeat_reply;
mod http_heartbeat_channel;
pub mod mock;

use std::fmt::Debug;

use async_trait::async_trait;

pub use heartbeat_error::HeartbeatError;
pub use heartbeat_reply::HeartbeatReply;
pub use http_heartbeat_channel::{DnsOverrides, HttpConnectionFactory, HttpHeartbeatChannel};

use crate::ServerAddress;

/// Supplies heartbeat connections and is told when connections to an address have gone
/// bad.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + Debug {
    /// Opens a fresh connection to `address`.
    async fn open(
        &self,
        address: &ServerAddress,
    ) -> Result<Box<dyn HeartbeatChannel>, HeartbeatError>;

    /// Discards any pooled connections to `address`. Called after authentication failures
    /// and transport errors.
    fn invalidate(&self, _address: &ServerAddress) {}
}

/// One open connection able to run the heartbeat status command.
#[async_trait]
pub trait HeartbeatChannel: Send + Sync + Debug {
    /// Runs the status command. Must be idempotent so a failed attempt can be retried.
    async fn check(&mut self) -> Result<HeartbeatReply, HeartbeatError>;
}
