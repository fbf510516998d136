/*!
docdb_client is the topology core of a client for a replicated, shardable document
database. It discovers and tracks the live state of a cluster of nodes and selects a
correct, reachable node for every operation while nodes fail, change role, or join and
leave the cluster.

This library requires tokio and async, and uses the actor pattern. One background task
per known node sends periodic heartbeats, and a single [`Topology`] actor folds their
results into an immutable [`ClusterDescription`], applying the replica set membership
protocol along the way. Callers hold a cheap, cloneable [`Topology`] handle and ask it for
a [`Server`] matching a [`ServerSelector`].

# Example
```no_run
# tokio_test::block_on(async {
use std::time::Duration;

use docdb_client::{PrimaryOrSecondaryServerSelector, Topology};

let topology = Topology::builder()
    .set_hosts(&["db1.example.com", "db2.example.com:27018"])
    .set_required_replica_set_name("rs0")
    .set_server_selection_timeout(Duration::from_secs(5))
    .build()?;

let server = topology
    .select_server(PrimaryOrSecondaryServerSelector)
    .await?;
println!("{}", server.description());
# Ok::<(), docdb_client::TopologyError>(())
# });
```

When the last `Topology` handle is dropped, its monitors are stopped on their own.
*/

mod cluster_description;
mod server;
mod server_address;
mod server_description;
mod server_monitor;
mod server_selector;
mod topology;

pub mod events;
pub mod heartbeat;

pub use cluster_description::*;
pub use events::TopologyEvent;
pub use heartbeat::{ConnectionFactory, HeartbeatChannel, HeartbeatError, HeartbeatReply};
pub use server::*;
pub use server_address::*;
pub use server_description::*;
pub use server_monitor::{
    ServerDescriptionChangedEvent, ServerMonitor, ServerMonitorSettings, ServerMonitorState,
};
pub use server_selector::*;
pub use topology::*;

/// Renders an error followed by every error in its source chain.
pub fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{}\n", e)?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{}", cause)?;
        current = cause.source();
    }
    Ok(())
}
