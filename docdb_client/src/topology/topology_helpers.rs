use std::{collections::BTreeMap, sync::Arc, time::Duration};

use rand::seq::SliceRandom;
use tokio::sync::oneshot;

use crate::{
    ClusterDescription, ClusterTime, ClusterType, CompositeServerSelector, ConnectionMode, Server,
    ServerAddress, ServerMonitor, ServerMonitorSettings, ServerSelector, TopologyError,
};

use super::waiter_registry::Waiter;

#[derive(Debug)]
pub(crate) enum TopologyMessage {
    /// Queues a selection that could not be satisfied right away.
    SelectServerAsync { waiter: Waiter },
    Close { respond_to: oneshot::Sender<()> },
}

/// Everything needed to start a [`Topology`](crate::Topology). Built and validated by
/// [`TopologyBuilder`](crate::TopologyBuilder).
#[derive(Debug, Clone)]
pub struct TopologySettings {
    pub(crate) hosts: Vec<ServerAddress>,
    pub(crate) connection_mode: ConnectionMode,
    pub(crate) required_cluster_type: Option<ClusterType>,
    pub(crate) required_replica_set_name: Option<String>,
    pub(crate) server_selection_timeout: Duration,
    pub(crate) max_wait_queue_size: usize,
    pub(crate) cluster_selector: Option<Box<dyn ServerSelector>>,
    pub(crate) monitor_settings: ServerMonitorSettings,
}

impl TopologySettings {
    pub fn hosts(&self) -> &[ServerAddress] {
        &self.hosts
    }

    pub fn connection_mode(&self) -> ConnectionMode {
        self.connection_mode
    }

    pub fn required_cluster_type(&self) -> Option<ClusterType> {
        self.required_cluster_type
    }

    pub fn required_replica_set_name(&self) -> Option<&str> {
        self.required_replica_set_name.as_deref()
    }

    pub fn server_selection_timeout(&self) -> Duration {
        self.server_selection_timeout
    }

    pub fn max_wait_queue_size(&self) -> usize {
        self.max_wait_queue_size
    }

    pub fn monitor_settings(&self) -> &ServerMonitorSettings {
        &self.monitor_settings
    }

    /// The caller's selector, with its result narrowed by the cluster-wide selector if one
    /// is set. Anything selected is always acceptable to the caller's selector on the whole
    /// cluster.
    pub(crate) fn effective_selector(
        &self,
        selector: Box<dyn ServerSelector>,
    ) -> Box<dyn ServerSelector> {
        match &self.cluster_selector {
            Some(cluster_selector) => Box::new(CompositeServerSelector::new(vec![
                selector,
                cluster_selector.clone(),
            ])),
            None => selector,
        }
    }
}

/// What the topology actor publishes after every recomputation. Readers only ever see
/// a complete snapshot.
#[derive(Debug, Clone, Default)]
pub(crate) struct TopologySnapshot {
    pub(crate) description: ClusterDescription,
    pub(crate) monitors: Arc<BTreeMap<ServerAddress, ServerMonitor>>,
    pub(crate) cluster_time: Option<ClusterTime>,
    pub(crate) closed: bool,
}

impl TopologySnapshot {
    /// Asks every monitor for an early heartbeat.
    pub(crate) fn request_checks(&self) {
        for monitor in self.monitors.values() {
            monitor.request_check();
        }
    }
}

/// Resolves `selector` against `snapshot`, picking one candidate at random. `Ok(None)`
/// means nothing matches yet.
pub(crate) fn select_from(
    snapshot: &TopologySnapshot,
    selector: &dyn ServerSelector,
) -> Result<Option<Server>, TopologyError> {
    if snapshot.closed {
        return Err(TopologyError::ClosedTopology);
    }
    if !snapshot.description.is_compatible() {
        return Err(TopologyError::IncompatibleDriver {
            cluster: snapshot.description.clone(),
        });
    }

    let candidates = selector
        .select(&snapshot.description)
        .into_iter()
        .filter_map(|description| {
            snapshot
                .monitors
                .get(description.address())
                .map(|monitor| Server::new(description, monitor.clone()))
        })
        .collect::<Vec<_>>();

    let server = candidates.choose(&mut rand::thread_rng()).cloned();
    if let Some(server) = &server {
        tracing::debug!("Selected `{}` with {}", server.address(), selector);
    }
    Ok(server)
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use crate::{
        heartbeat::{mock::MockConnectionFactory, HeartbeatReply},
        LatencyMinimizingServerSelector, PrimaryServerSelector, ServerAddressSelector,
        ServerDescription,
    };

    use super::*;

    fn snapshot(members: Vec<ServerDescription>) -> TopologySnapshot {
        let (tx, _rx) = mpsc::unbounded_channel();
        let factory = Arc::new(MockConnectionFactory::new());
        let monitors = members
            .iter()
            .map(|member| {
                let monitor = ServerMonitor::new(
                    member.address().clone(),
                    ServerMonitorSettings::default(),
                    factory.clone(),
                    tx.clone(),
                );
                (member.address().clone(), monitor)
            })
            .collect();
        TopologySnapshot {
            description: ClusterDescription::new(
                ConnectionMode::Multiple,
                ClusterType::ReplicaSet,
                members,
            ),
            monitors: Arc::new(monitors),
            cluster_time: None,
            closed: false,
        }
    }

    fn member(host: &str, is_master: bool, max_wire_version: i32) -> ServerDescription {
        ServerDescription::from_reply(
            ServerAddress::new(host, 27017),
            &HeartbeatReply {
                ok: 1.0,
                is_master,
                secondary: !is_master,
                set_name: Some("rs0".to_string()),
                max_wire_version,
                ..Default::default()
            },
            1_000,
        )
    }

    #[test]
    fn select_from_returns_a_matching_server() {
        let snapshot = snapshot(vec![member("a", true, 17), member("b", false, 17)]);

        let server = select_from(&snapshot, &PrimaryServerSelector).unwrap().unwrap();

        assert_eq!(server.address(), &ServerAddress::new("a", 27017));
        assert!(server.description().is_primary());
    }

    #[test]
    fn select_from_without_match_returns_none() {
        let snapshot = snapshot(vec![member("b", false, 17)]);

        let server = select_from(&snapshot, &PrimaryServerSelector).unwrap();

        assert!(server.is_none());
    }

    #[test]
    fn select_from_fails_when_closed() {
        let mut snapshot = snapshot(vec![member("a", true, 17)]);
        snapshot.closed = true;

        let result = select_from(&snapshot, &PrimaryServerSelector);

        assert!(matches!(result, Err(TopologyError::ClosedTopology)));
    }

    #[test]
    fn select_from_fails_fast_for_incompatible_wire_versions() {
        let mut old = member("a", true, 0);
        old.min_wire_version = 99;
        old.max_wire_version = 120;
        let snapshot = snapshot(vec![old]);

        let result = select_from(
            &snapshot,
            &ServerAddressSelector::new(ServerAddress::new("a", 27017)),
        );

        assert!(matches!(
            result,
            Err(TopologyError::IncompatibleDriver { .. })
        ));
    }

    fn settings_with_cluster_selector(cluster_selector: Box<dyn ServerSelector>) -> TopologySettings {
        TopologySettings {
            hosts: vec![ServerAddress::new("a", 27017)],
            connection_mode: ConnectionMode::Multiple,
            required_cluster_type: None,
            required_replica_set_name: None,
            server_selection_timeout: Duration::from_secs(1),
            max_wait_queue_size: 10,
            cluster_selector: Some(cluster_selector),
            monitor_settings: ServerMonitorSettings::default(),
        }
    }

    #[test]
    fn effective_selector_requires_both_selectors_to_accept() {
        let settings = settings_with_cluster_selector(Box::new(ServerAddressSelector::new(
            ServerAddress::new("b", 27017),
        )));
        let snapshot = snapshot(vec![member("a", true, 17), member("b", false, 17)]);

        let selector = settings.effective_selector(Box::new(PrimaryServerSelector));

        assert!(select_from(&snapshot, selector.as_ref()).unwrap().is_none());
        assert!(selector.to_string().starts_with("CompositeServerSelector"));
    }

    #[test]
    fn effective_selector_never_picks_outside_the_callers_selection() {
        // Arrange
        let settings = settings_with_cluster_selector(Box::new(ServerAddressSelector::new(
            ServerAddress::new("a", 27017),
        )));
        let mut slow_primary = member("a", true, 17);
        slow_primary.round_trip_time_nanos = 30_000_000;
        let mut fast_secondary = member("b", false, 17);
        fast_secondary.round_trip_time_nanos = 5_000_000;
        let snapshot = snapshot(vec![slow_primary, fast_secondary]);
        let caller = LatencyMinimizingServerSelector::new(Duration::from_millis(10));
        let acceptable: Vec<ServerAddress> = caller
            .select(&snapshot.description)
            .iter()
            .map(|member| member.address().clone())
            .collect();

        // Act
        let selector = settings.effective_selector(Box::new(caller));
        let selected = selector.select(&snapshot.description);
        let server = select_from(&snapshot, selector.as_ref()).unwrap();

        // Assert
        assert_eq!(acceptable, vec![ServerAddress::new("b", 27017)]);
        assert!(selected
            .iter()
            .all(|member| acceptable.contains(member.address())));
        assert!(server.is_none());
    }
}
