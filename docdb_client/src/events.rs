//! Notifications a [`Topology`](crate::Topology) publishes to its subscribers.
use tokio::sync::broadcast;

use crate::{ClusterDescription, ServerAddress, ServerDescription};

/// How many events a slow subscriber may fall behind before it starts missing some.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub enum TopologyEvent {
    /// A monitor was started for a seed or a discovered member.
    ServerAdded { address: ServerAddress },

    /// The membership protocol dropped a member and stopped its monitor.
    ServerRemoved { address: ServerAddress },

    /// A member's description changed in more than latency.
    ServerDescriptionChanged {
        previous: ServerDescription,
        current: ServerDescription,
    },

    /// The published cluster description changed in more than latency.
    ClusterDescriptionChanged {
        previous: ClusterDescription,
        current: ClusterDescription,
    },

    TopologyClosed,
}

/// Fan-out of [`TopologyEvent`]s. Publishing without subscribers does nothing.
#[derive(Debug, Clone)]
pub(crate) struct TopologyEventBus {
    tx: broadcast::Sender<TopologyEvent>,
}

impl TopologyEventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub(crate) fn publish(&self, event: TopologyEvent) {
        let _ = self.tx.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<TopologyEvent> {
        self.tx.subscribe()
    }
}

impl Default for TopologyEventBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}
