use std::{collections::VecDeque, fmt, time::Duration};

use tokio::time::Instant;

use crate::{ClusterDescription, Server, ServerSelector, TopologyError};

/// Invoked exactly once with the outcome of an asynchronous selection.
pub type SelectionCallback = Box<dyn FnOnce(Result<Server, TopologyError>) + Send + 'static>;

/// A queued asynchronous selection.
pub(crate) struct Waiter {
    pub(crate) selector: Box<dyn ServerSelector>,
    pub(crate) deadline: Instant,
    /// The full selection timeout, reported back on expiry.
    pub(crate) timeout: Duration,
    pub(crate) callback: SelectionCallback,
}

impl Waiter {
    pub(crate) fn complete(self, result: Result<Server, TopologyError>) {
        (self.callback)(result);
    }
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("selector", &self.selector.to_string())
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// Bounded queue of waiters, owned by the topology actor.
#[derive(Debug)]
pub(crate) struct WaiterRegistry {
    waiters: VecDeque<Waiter>,
    max_size: usize,
}

impl WaiterRegistry {
    pub(crate) fn new(max_size: usize) -> Self {
        Self {
            waiters: VecDeque::new(),
            max_size,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Queues `waiter`, or hands it back when the queue is full.
    pub(crate) fn try_enqueue(&mut self, waiter: Waiter) -> Result<(), Waiter> {
        if self.waiters.len() >= self.max_size {
            return Err(waiter);
        }
        self.waiters.push_back(waiter);
        Ok(())
    }

    /// Re-evaluates every waiter with `select`, completing those that matched or failed.
    /// Returns how many are still waiting.
    pub(crate) fn notify<F>(&mut self, mut select: F) -> usize
    where
        F: FnMut(&dyn ServerSelector) -> Result<Option<Server>, TopologyError>,
    {
        let mut still_waiting = VecDeque::with_capacity(self.waiters.len());
        for waiter in self.waiters.drain(..) {
            match select(waiter.selector.as_ref()) {
                Ok(Some(server)) => waiter.complete(Ok(server)),
                Ok(None) => still_waiting.push_back(waiter),
                Err(e) => waiter.complete(Err(e)),
            }
        }
        self.waiters = still_waiting;
        self.waiters.len()
    }

    /// Fails every waiter whose deadline is at or before `now` with a timeout.
    pub(crate) fn expire(&mut self, now: Instant, cluster: &ClusterDescription) -> usize {
        let (expired, waiting): (VecDeque<_>, VecDeque<_>) = self
            .waiters
            .drain(..)
            .partition(|waiter| waiter.deadline <= now);
        self.waiters = waiting;

        let count = expired.len();
        for waiter in expired {
            tracing::debug!("Selection with {} timed out.", waiter.selector);
            let error = TopologyError::Timeout {
                waiting_for: format!("a server that matches {}", waiter.selector),
                timeout: waiter.timeout,
                cluster: cluster.clone(),
            };
            waiter.complete(Err(error));
        }
        count
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.waiters.iter().map(|waiter| waiter.deadline).min()
    }

    /// Fails every waiter with [`TopologyError::ClosedTopology`].
    pub(crate) fn close_all(&mut self) {
        for waiter in self.waiters.drain(..) {
            waiter.complete(Err(TopologyError::ClosedTopology));
        }
    }
}
