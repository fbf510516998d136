mod server_monitor_actor;
mod server_monitor_handle;
mod server_monitor_helpers;

pub use server_monitor_handle::ServerMonitor;
pub use server_monitor_helpers::{
    ServerDescriptionChangedEvent, ServerMonitorSettings, ServerMonitorState,
};
pub(crate) use server_monitor_helpers::ExponentiallyWeightedMovingAverage;
