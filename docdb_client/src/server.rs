use crate::{ServerAddress, ServerDescription, ServerMonitor};

/// A node chosen by server selection, together with the description it was chosen on.
///
/// The description is a snapshot and does not change. Select again for a fresher view.
#[derive(Debug, Clone)]
pub struct Server {
    description: ServerDescription,
    monitor: ServerMonitor,
}

impl Server {
    pub(crate) fn new(description: ServerDescription, monitor: ServerMonitor) -> Self {
        Self {
            description,
            monitor,
        }
    }

    pub fn address(&self) -> &ServerAddress {
        self.description.address()
    }

    pub fn description(&self) -> &ServerDescription {
        &self.description
    }

    /// Reports the node as broken. Its monitor starts over on a fresh connection and the
    /// connection factory drops whatever it pooled for the address.
    pub fn invalidate(&self) {
        self.monitor.invalidate();
    }
}
