use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use tokio::{
    sync::{mpsc, Notify},
    task::JoinHandle,
};
use tracing::instrument;

use crate::{heartbeat::ConnectionFactory, ServerAddress};

use super::{
    server_monitor_actor::{run_server_monitor_actor, ServerMonitorActor},
    ServerDescriptionChangedEvent, ServerMonitorSettings, ServerMonitorState,
};

/**
Handle to the background heartbeat loop of one node.

Cloning the handle is cheap and every clone controls the same loop. The loop is stopped
by [`close`](ServerMonitor::close) or when the last handle is dropped.
*/
#[derive(Clone)]
pub struct ServerMonitor {
    inner: Arc<ServerMonitorInner>,
}

struct ServerMonitorInner {
    address: ServerAddress,
    settings: ServerMonitorSettings,
    connection_factory: Arc<dyn ConnectionFactory>,
    listener: mpsc::UnboundedSender<ServerDescriptionChangedEvent>,
    check_now: Arc<Notify>,
    state: Arc<Mutex<ServerMonitorState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ServerMonitor {
    /// Creates a monitor for `address` that reports to `listener`. Nothing runs until
    /// [`start`](ServerMonitor::start) is called.
    pub fn new(
        address: ServerAddress,
        settings: ServerMonitorSettings,
        connection_factory: Arc<dyn ConnectionFactory>,
        listener: mpsc::UnboundedSender<ServerDescriptionChangedEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(ServerMonitorInner {
                address,
                settings,
                connection_factory,
                listener,
                check_now: Arc::new(Notify::new()),
                state: Arc::new(Mutex::new(ServerMonitorState::Idle)),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn address(&self) -> &ServerAddress {
        &self.inner.address
    }

    pub fn state(&self) -> ServerMonitorState {
        *self.inner.state.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ServerMonitorState::Closed
    }

    /// Spawns the heartbeat loop. The first heartbeat is sent right away. Does nothing if
    /// the loop is already running or the monitor was closed.
    #[instrument(level = "debug", skip(self), fields(address = %self.inner.address))]
    pub fn start(&self) {
        let mut task = self.inner.task.lock();
        if task.is_some() || self.is_closed() {
            return;
        }
        *task = Some(self.spawn_actor());
    }

    /// Wakes the loop for an early heartbeat, subject to the minimum heartbeat frequency.
    pub fn request_check(&self) {
        self.inner.check_now.notify_one();
    }

    /// Throws away the current connection and restarts the loop from scratch. Pooled
    /// connections to the address are invalidated too.
    #[instrument(level = "debug", skip(self), fields(address = %self.inner.address))]
    pub fn invalidate(&self) {
        let mut task = self.inner.task.lock();
        if self.is_closed() {
            return;
        }
        if let Some(running) = task.take() {
            running.abort();
        }
        self.inner
            .connection_factory
            .invalidate(&self.inner.address);
        *task = Some(self.spawn_actor());
        tracing::debug!("Monitor for `{}` restarted.", self.inner.address);
    }

    /// Stops the loop for good. Calling it again does nothing.
    pub fn close(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == ServerMonitorState::Closed {
                return;
            }
            *state = ServerMonitorState::Closed;
        }
        if let Some(running) = self.inner.task.lock().take() {
            running.abort();
        }
        tracing::debug!("Monitor for `{}` closed.", self.inner.address);
    }

    fn spawn_actor(&self) -> JoinHandle<()> {
        let actor = ServerMonitorActor::new(
            self.inner.address.clone(),
            self.inner.settings.clone(),
            self.inner.connection_factory.clone(),
            self.inner.listener.clone(),
            self.inner.check_now.clone(),
            self.inner.state.clone(),
        );
        tokio::spawn(run_server_monitor_actor(actor))
    }
}

impl Drop for ServerMonitorInner {
    fn drop(&mut self) {
        if let Some(running) = self.task.get_mut().take() {
            running.abort();
        }
    }
}

impl fmt::Debug for ServerMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerMonitor")
            .field("address", &self.inner.address)
            .field("state", &self.state())
            .finish()
    }
}
