mod membership;
mod topology_actor;
mod topology_builder;
mod topology_error;
mod topology_handle;
mod topology_helpers;
mod waiter_registry;

pub use topology_builder::*;
pub use topology_error::*;
pub use topology_handle::*;
pub use topology_helpers::TopologySettings;
