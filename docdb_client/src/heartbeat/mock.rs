//! Scriptable in-memory heartbeat transport for testing topologies without a cluster.
//!
//! ```no_run
//! use docdb_client::heartbeat::{mock::MockConnectionFactory, HeartbeatReply};
//! use docdb_client::ServerAddress;
//!
//! let factory = MockConnectionFactory::new();
//! factory.set_reply(
//!     ServerAddress::new("a", 27017),
//!     HeartbeatReply { ok: 1.0, ..Default::default() },
//! );
//! ```
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ConnectionFactory, HeartbeatChannel, HeartbeatError, HeartbeatReply};
use crate::ServerAddress;

type Outcome = Result<HeartbeatReply, HeartbeatError>;

#[derive(Debug, Default)]
struct MockState {
    /// Standing outcome returned once the queue for an address is drained.
    standing: HashMap<ServerAddress, Outcome>,
    /// One-shot outcomes consumed in order before the standing one.
    queued: HashMap<ServerAddress, VecDeque<Outcome>>,
    open_failures: HashMap<ServerAddress, HeartbeatError>,
    opens: HashMap<ServerAddress, usize>,
    checks: HashMap<ServerAddress, usize>,
    invalidations: HashMap<ServerAddress, usize>,
}

/// A [`ConnectionFactory`] whose channels answer from a script.
///
/// Clones share the same script and counters.
#[derive(Debug, Clone, Default)]
pub struct MockConnectionFactory {
    state: Arc<Mutex<MockState>>,
}

impl MockConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every following heartbeat to `address` answers `reply`.
    pub fn set_reply(&self, address: ServerAddress, reply: HeartbeatReply) {
        self.state.lock().standing.insert(address, Ok(reply));
    }

    /// Every following heartbeat to `address` fails with `error`.
    pub fn set_error(&self, address: ServerAddress, error: HeartbeatError) {
        self.state.lock().standing.insert(address, Err(error));
    }

    /// The next heartbeat to `address` returns `outcome`, ahead of the standing one.
    pub fn push_outcome(&self, address: ServerAddress, outcome: Outcome) {
        self.state
            .lock()
            .queued
            .entry(address)
            .or_default()
            .push_back(outcome);
    }

    /// Opening a connection to `address` fails with `error` until cleared.
    pub fn fail_open(&self, address: ServerAddress, error: HeartbeatError) {
        self.state.lock().open_failures.insert(address, error);
    }

    pub fn clear_open_failure(&self, address: &ServerAddress) {
        self.state.lock().open_failures.remove(address);
    }

    pub fn open_count(&self, address: &ServerAddress) -> usize {
        self.state.lock().opens.get(address).copied().unwrap_or(0)
    }

    pub fn check_count(&self, address: &ServerAddress) -> usize {
        self.state.lock().checks.get(address).copied().unwrap_or(0)
    }

    pub fn invalidation_count(&self, address: &ServerAddress) -> usize {
        self.state
            .lock()
            .invalidations
            .get(address)
            .copied()
            .unwrap_or(0)
    }

    fn next_outcome(&self, address: &ServerAddress) -> Outcome {
        let mut state = self.state.lock();
        *state.checks.entry(address.clone()).or_default() += 1;

        if let Some(outcome) = state.queued.get_mut(address).and_then(VecDeque::pop_front) {
            return outcome;
        }

        state.standing.get(address).cloned().unwrap_or_else(|| {
            Err(HeartbeatError::Transport(format!(
                "No reply scripted for `{}`",
                address
            )))
        })
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn open(
        &self,
        address: &ServerAddress,
    ) -> Result<Box<dyn HeartbeatChannel>, HeartbeatError> {
        {
            let mut state = self.state.lock();
            *state.opens.entry(address.clone()).or_default() += 1;
            if let Some(error) = state.open_failures.get(address) {
                return Err(error.clone());
            }
        }

        Ok(Box::new(MockHeartbeatChannel {
            address: address.clone(),
            factory: self.clone(),
        }))
    }

    fn invalidate(&self, address: &ServerAddress) {
        *self
            .state
            .lock()
            .invalidations
            .entry(address.clone())
            .or_default() += 1;
    }
}

#[derive(Debug)]
pub struct MockHeartbeatChannel {
    address: ServerAddress,
    factory: MockConnectionFactory,
}

#[async_trait]
impl HeartbeatChannel for MockHeartbeatChannel {
    async fn check(&mut self) -> Result<HeartbeatReply, HeartbeatError> {
        self.factory.next_outcome(&self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queued_outcomes_come_before_the_standing_reply() {
        let address = ServerAddress::new("a", 27017);
        let factory = MockConnectionFactory::new();
        factory.set_reply(
            address.clone(),
            HeartbeatReply {
                ok: 1.0,
                ..Default::default()
            },
        );
        factory.push_outcome(
            address.clone(),
            Err(HeartbeatError::Transport("reset".to_string())),
        );

        let mut channel = factory.open(&address).await.unwrap();

        assert!(channel.check().await.is_err());
        assert!(channel.check().await.is_ok());
        assert!(channel.check().await.is_ok());
        assert_eq!(factory.open_count(&address), 1);
        assert_eq!(factory.check_count(&address), 3);
    }

    #[tokio::test]
    async fn unscripted_addresses_fail_with_transport_errors() {
        let address = ServerAddress::new("nowhere", 27017);
        let factory = MockConnectionFactory::new();

        let mut channel = factory.open(&address).await.unwrap();

        assert!(matches!(
            channel.check().await,
            Err(HeartbeatError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn open_failures_are_reported_until_cleared() {
        let address = ServerAddress::new("a", 27017);
        let factory = MockConnectionFactory::new();
        factory.fail_open(
            address.clone(),
            HeartbeatError::Authentication("denied".to_string()),
        );

        assert!(factory.open(&address).await.is_err());
        factory.clear_open_failure(&address);
        assert!(factory.open(&address).await.is_ok());
        assert_eq!(factory.open_count(&address), 2);
    }
}
