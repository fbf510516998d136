use std::{collections::BTreeMap, sync::Arc};

use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};
use tracing::{instrument, Span};
use uuid::Uuid;

use crate::{
    events::{TopologyEvent, TopologyEventBus},
    heartbeat::ConnectionFactory,
    ClusterTime, ServerAddress, ServerDescriptionChangedEvent, ServerMonitor, TopologyError,
};

use super::{
    membership::Membership,
    topology_helpers::{select_from, TopologyMessage, TopologySettings, TopologySnapshot},
    waiter_registry::{Waiter, WaiterRegistry},
};

/// Single writer of the topology state. Every monitor event and every queued selection
/// passes through here, one at a time.
pub(crate) struct TopologyActor {
    id: Uuid,
    settings: Arc<TopologySettings>,
    connection_factory: Arc<dyn ConnectionFactory>,
    membership: Membership,
    monitors: BTreeMap<ServerAddress, ServerMonitor>,
    waiters: WaiterRegistry,
    cluster_time: Option<ClusterTime>,
    closed: bool,
    receiver: mpsc::UnboundedReceiver<TopologyMessage>,
    /// Heartbeat outcomes from the monitors this actor owns.
    receiver_internal: mpsc::UnboundedReceiver<ServerDescriptionChangedEvent>,
    /// Handed to every monitor this actor starts.
    sender_internal: mpsc::UnboundedSender<ServerDescriptionChangedEvent>,
    snapshot: watch::Sender<TopologySnapshot>,
    events: TopologyEventBus,
}

impl TopologyActor {
    pub(crate) fn new(
        id: Uuid,
        settings: Arc<TopologySettings>,
        connection_factory: Arc<dyn ConnectionFactory>,
        receiver: mpsc::UnboundedReceiver<TopologyMessage>,
        snapshot: watch::Sender<TopologySnapshot>,
        events: TopologyEventBus,
    ) -> Self {
        let (sender_internal, receiver_internal) = mpsc::unbounded_channel();
        let membership = Membership::new(
            settings.connection_mode,
            &settings.hosts,
            settings.required_cluster_type,
            settings.required_replica_set_name.clone(),
        );

        Self {
            id,
            waiters: WaiterRegistry::new(settings.max_wait_queue_size),
            settings,
            connection_factory,
            membership,
            monitors: BTreeMap::new(),
            cluster_time: None,
            closed: false,
            receiver,
            receiver_internal,
            sender_internal,
            snapshot,
            events,
        }
    }

    /// Starts one monitor per seed and publishes the first snapshot.
    #[instrument(level = "debug", skip(self), fields(topology_id = %self.id))]
    pub(crate) fn start(&mut self) {
        tracing::info!(
            "Starting {} topology with seeds {:?}.",
            self.settings.connection_mode,
            self.settings.hosts
        );
        for address in self.membership.addresses() {
            self.add_monitor(address);
        }
        self.publish();
    }

    /// Message handler for the TopologyActor
    #[instrument(
        level = "debug",
        name = "Topology Actor - Handle Message",
        skip(self),
        fields(correlation_id, topology_id = %self.id)
    )]
    async fn handle_message(&mut self, msg: TopologyMessage) {
        // Apply a correlation id to all child spans of this message handler
        Span::current().record("correlation_id", Uuid::new_v4().to_string());
        match msg {
            TopologyMessage::SelectServerAsync { waiter } => self.select_server_async(waiter),
            TopologyMessage::Close { respond_to } => {
                self.shutdown();
                let _ = respond_to.send(());
            }
        }
    }

    fn select_server_async(&mut self, waiter: Waiter) {
        if self.closed {
            waiter.complete(Err(TopologyError::ClosedTopology));
            return;
        }

        let snapshot = self.snapshot.borrow().clone();
        match select_from(&snapshot, waiter.selector.as_ref()) {
            Ok(Some(server)) => waiter.complete(Ok(server)),
            Err(e) => waiter.complete(Err(e)),
            Ok(None) => {
                if let Err(waiter) = self.waiters.try_enqueue(waiter) {
                    tracing::warn!(
                        "Wait queue is full ({} waiters). Rejecting selection with {}.",
                        self.settings.max_wait_queue_size,
                        waiter.selector
                    );
                    waiter.complete(Err(TopologyError::WaitQueueFull {
                        max_wait_queue_size: self.settings.max_wait_queue_size,
                    }));
                    return;
                }
                tracing::trace!("Queued selection. {} waiters.", self.waiters.len());
                snapshot.request_checks();
            }
        }
    }

    /// Folds one heartbeat outcome into the membership model and republishes.
    #[instrument(
        level = "trace",
        skip(self, event),
        fields(address = %event.current.address())
    )]
    fn handle_server_event(&mut self, event: ServerDescriptionChangedEvent) {
        if self.closed {
            return;
        }

        if let Some(cluster_time) = event.current.cluster_time() {
            if self.cluster_time.map_or(true, |known| cluster_time > known) {
                self.cluster_time = Some(cluster_time);
            }
        }

        let previous = self.membership.description();
        let changes = match self.membership.apply(event.current.clone()) {
            Some(changes) => changes,
            None => return,
        };

        for address in changes.removed {
            self.remove_monitor(&address);
        }
        for address in changes.added {
            self.add_monitor(address);
        }

        if event.is_material() {
            tracing::info!("Server description changed: {}", event.current);
            self.events.publish(TopologyEvent::ServerDescriptionChanged {
                previous: event.previous,
                current: event.current,
            });
        } else {
            tracing::trace!("Latency of `{}` refreshed.", event.current.address());
        }

        let current = self.membership.description();
        if !previous.is_materially_equal(&current) {
            tracing::info!("Cluster description changed: {}", current);
            self.events.publish(TopologyEvent::ClusterDescriptionChanged {
                previous,
                current,
            });
        }

        self.publish();
        self.notify_waiters();
    }

    fn notify_waiters(&mut self) {
        if self.waiters.is_empty() {
            return;
        }
        let snapshot = self.snapshot.borrow().clone();
        let remaining = self
            .waiters
            .notify(|selector| select_from(&snapshot, selector));
        if remaining > 0 {
            snapshot.request_checks();
        }
    }

    fn expire_waiters(&mut self) {
        let cluster = self.membership.description();
        let expired = self.waiters.expire(Instant::now(), &cluster);
        if expired > 0 {
            tracing::debug!("{} selections timed out. Cluster: {}", expired, cluster);
        }
    }

    fn add_monitor(&mut self, address: ServerAddress) {
        let monitor = ServerMonitor::new(
            address.clone(),
            self.settings.monitor_settings.clone(),
            self.connection_factory.clone(),
            self.sender_internal.clone(),
        );
        monitor.start();
        tracing::info!("Monitoring `{}`.", address);
        self.monitors.insert(address.clone(), monitor);
        self.events.publish(TopologyEvent::ServerAdded { address });
    }

    fn remove_monitor(&mut self, address: &ServerAddress) {
        if let Some(monitor) = self.monitors.remove(address) {
            monitor.close();
            tracing::info!("Stopped monitoring `{}`.", address);
            self.events.publish(TopologyEvent::ServerRemoved {
                address: address.clone(),
            });
        }
    }

    /// Swaps in a new snapshot and wakes everyone blocked on a selection.
    fn publish(&self) {
        self.snapshot.send_replace(TopologySnapshot {
            description: self.membership.description(),
            monitors: Arc::new(self.monitors.clone()),
            cluster_time: self.cluster_time,
            closed: self.closed,
        });
    }

    /// Stops every monitor and fails every pending selection. Calling it again does
    /// nothing.
    #[instrument(level = "debug", skip(self), fields(topology_id = %self.id))]
    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.waiters.close_all();
        for monitor in std::mem::take(&mut self.monitors).into_values() {
            monitor.close();
        }
        self.publish();
        self.events.publish(TopologyEvent::TopologyClosed);
        tracing::info!("Topology closed.");
    }
}

#[instrument(
    level = "debug",
    name = "Running Topology Actor",
    skip(actor),
    fields(topology_id = %actor.id)
)]
pub(crate) async fn run_topology_actor(mut actor: TopologyActor) {
    loop {
        let next_deadline = actor.waiters.next_deadline();
        tokio::select! {
            opt_msg = actor.receiver.recv() => {
                let msg = match opt_msg {
                    Some(msg) => msg,
                    None => {
                        tracing::debug!("Every topology handle was dropped.");
                        actor.shutdown();
                        break;
                    }
                };
                actor.handle_message(msg).await;
            },
            Some(event) = actor.receiver_internal.recv() => {
                actor.handle_server_event(event);
            },
            _ = tokio::time::sleep_until(next_deadline.unwrap_or_else(Instant::now)), if next_deadline.is_some() => {
                actor.expire_waiters();
            }
        }

        if actor.closed {
            break;
        }
    }

    // Selections queued behind the close still get their answer.
    actor.receiver.close();
    while let Ok(msg) = actor.receiver.try_recv() {
        actor.handle_message(msg).await;
    }
}
