use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    time::Instant,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    events::{TopologyEvent, TopologyEventBus},
    heartbeat::ConnectionFactory,
    ClusterDescription, ClusterTime, ClusterType, Server, ServerAddress, ServerSelector,
    TopologyBuilder, TopologyError,
};

use super::{
    topology_actor::{run_topology_actor, TopologyActor},
    topology_helpers::{select_from, TopologyMessage, TopologySettings, TopologySnapshot},
    waiter_registry::Waiter,
};

/**
This is a handle to the topology actor.

The actor monitors every known node in the background and keeps an up to date
[`ClusterDescription`]. Cloning this handle is very cheap and will not start another actor.
When the last handle is dropped the actor closes itself, the same way
[`close`](Topology::close) does.

```no_run
# tokio_test::block_on(async {
use docdb_client::{PrimaryServerSelector, Topology};

let topology = Topology::builder()
    .set_hosts(&["db1.example.com:27017", "db2.example.com:27017"])
    .build()?;

let server = topology.select_server(PrimaryServerSelector).await?;
println!("Writing to {}", server.address());

topology.close().await;
# Ok::<(), docdb_client::TopologyError>(())
# });
```
*/
#[derive(Clone, Debug)]
pub struct Topology {
    id: Uuid,
    sender: mpsc::UnboundedSender<TopologyMessage>,
    snapshot: watch::Receiver<TopologySnapshot>,
    events: TopologyEventBus,
    closed: Arc<AtomicBool>,
    settings: Arc<TopologySettings>,
}

impl Topology {
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::default()
    }

    /// Starts monitoring the configured hosts. Must be called from within a tokio runtime.
    /// Only the builder creates topologies.
    pub(crate) fn new(
        settings: TopologySettings,
        connection_factory: Arc<dyn ConnectionFactory>,
    ) -> Self {
        let id = Uuid::new_v4();
        let settings = Arc::new(settings);
        let (sender, receiver) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(TopologySnapshot::default());
        let events = TopologyEventBus::default();

        let mut actor = TopologyActor::new(
            id,
            settings.clone(),
            connection_factory,
            receiver,
            snapshot_tx,
            events.clone(),
        );
        actor.start();
        tokio::spawn(run_topology_actor(actor));

        Self {
            id,
            sender,
            snapshot,
            events,
            closed: Arc::new(AtomicBool::new(false)),
            settings,
        }
    }

    pub fn settings(&self) -> &TopologySettings {
        &self.settings
    }

    /// Waits until the cluster type is known, then returns the current description.
    /// Fails with [`TopologyError::Timeout`] after the server selection timeout.
    #[instrument(level = "debug", name = "Topology Handle - Get Description", skip(self), fields(topology_id = %self.id))]
    pub async fn get_description(&self) -> Result<ClusterDescription, TopologyError> {
        let timeout = self.settings.server_selection_timeout;
        let deadline = Instant::now() + timeout;
        let mut snapshot = self.snapshot.clone();

        loop {
            let current = snapshot.borrow_and_update().clone();
            if self.is_closed() || current.closed {
                return Err(TopologyError::ClosedTopology);
            }
            if current.description.cluster_type() != ClusterType::Unknown {
                return Ok(current.description);
            }
            current.request_checks();

            if let Err(e) = self.wait_for_change(&mut snapshot, deadline).await {
                return Err(match e {
                    WaitError::Closed => TopologyError::ClosedTopology,
                    WaitError::TimedOut => TopologyError::Timeout {
                        waiting_for: "the cluster type to be known".to_string(),
                        timeout,
                        cluster: snapshot.borrow().description.clone(),
                    },
                });
            }
        }
    }

    /// The latest published description, without waiting.
    pub fn current_description(&self) -> ClusterDescription {
        self.snapshot.borrow().description.clone()
    }

    /**
    Returns a server matching `selector`, waiting for one to appear if none does yet.

    Any cluster-wide selector configured on the builder narrows the cluster first. While
    nothing matches, every monitor is asked for an early heartbeat and the selection is
    retried on every published change until the server selection timeout elapses.
    */
    #[instrument(level = "debug", name = "Topology Handle - Select Server", skip(self, selector), fields(topology_id = %self.id, selector = %selector))]
    pub async fn select_server(
        &self,
        selector: impl ServerSelector + 'static,
    ) -> Result<Server, TopologyError> {
        let selector = self.settings.effective_selector(Box::new(selector));
        let timeout = self.settings.server_selection_timeout;
        let deadline = Instant::now() + timeout;
        let mut snapshot = self.snapshot.clone();

        loop {
            let current = snapshot.borrow_and_update().clone();
            if self.is_closed() {
                return Err(TopologyError::ClosedTopology);
            }
            if let Some(server) = select_from(&current, selector.as_ref())? {
                return Ok(server);
            }
            tracing::trace!("No server matches {} yet. Requesting checks.", selector);
            current.request_checks();

            if let Err(e) = self.wait_for_change(&mut snapshot, deadline).await {
                return Err(match e {
                    WaitError::Closed => TopologyError::ClosedTopology,
                    WaitError::TimedOut => TopologyError::Timeout {
                        waiting_for: format!("a server that matches {}", selector),
                        timeout,
                        cluster: snapshot.borrow().description.clone(),
                    },
                });
            }
        }
    }

    /**
    Resolves `selector` without blocking the caller. `callback` is invoked exactly once:
    with a server, a [`TopologyError::Timeout`], a [`TopologyError::WaitQueueFull`] when
    too many selections are already queued, or a [`TopologyError::ClosedTopology`].

    The callback may run on the topology's own task and must not block.
    */
    #[instrument(level = "debug", name = "Topology Handle - Select Server Async", skip(self, selector, callback), fields(topology_id = %self.id, selector = %selector))]
    pub fn select_server_async<F>(&self, selector: impl ServerSelector + 'static, callback: F)
    where
        F: FnOnce(Result<Server, TopologyError>) + Send + 'static,
    {
        if self.is_closed() {
            callback(Err(TopologyError::ClosedTopology));
            return;
        }

        let selector = self.settings.effective_selector(Box::new(selector));
        let current = self.snapshot.borrow().clone();
        match select_from(&current, selector.as_ref()) {
            Ok(Some(server)) => return callback(Ok(server)),
            Err(e) => return callback(Err(e)),
            Ok(None) => {}
        }

        let timeout = self.settings.server_selection_timeout;
        let waiter = Waiter {
            selector,
            deadline: Instant::now() + timeout,
            timeout,
            callback: Box::new(callback),
        };
        if let Err(mpsc::error::SendError(msg)) =
            self.sender.send(TopologyMessage::SelectServerAsync { waiter })
        {
            tracing::debug!("Topology actor is gone. Failing selection.");
            if let TopologyMessage::SelectServerAsync { waiter } = msg {
                waiter.complete(Err(TopologyError::ClosedTopology));
            }
        }
    }

    /// Asks every monitor for an immediate heartbeat.
    pub fn connect(&self) {
        self.snapshot.borrow().request_checks();
    }

    /// Restarts the monitor of `address` on a fresh connection. Unknown addresses are
    /// ignored.
    pub fn invalidate(&self, address: &ServerAddress) {
        let monitor = self.snapshot.borrow().monitors.get(address).cloned();
        match monitor {
            Some(monitor) => monitor.invalidate(),
            None => tracing::debug!("Not invalidating untracked `{}`.", address),
        }
    }

    /// Stops every monitor and fails every pending selection with
    /// [`TopologyError::ClosedTopology`]. Calling it again does nothing.
    #[instrument(level = "debug", name = "Topology Handle - Close", skip(self), fields(topology_id = %self.id))]
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(TopologyMessage::Close { respond_to: tx })
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Receives every [`TopologyEvent`] published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TopologyEvent> {
        self.events.subscribe()
    }

    /// The greatest cluster time any node has reported.
    pub fn cluster_time(&self) -> Option<ClusterTime> {
        self.snapshot.borrow().cluster_time
    }

    async fn wait_for_change(
        &self,
        snapshot: &mut watch::Receiver<TopologySnapshot>,
        deadline: Instant,
    ) -> Result<(), WaitError> {
        match tokio::time::timeout_at(deadline, snapshot.changed()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(WaitError::Closed),
            Err(_) => Err(WaitError::TimedOut),
        }
    }
}

enum WaitError {
    Closed,
    TimedOut,
}
