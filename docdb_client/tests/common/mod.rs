#![allow(dead_code)]
use std::{sync::Once, time::Duration};

use docdb_client::{
    heartbeat::{mock::MockConnectionFactory, HeartbeatReply},
    ClusterDescription, ConnectionMode, ServerAddress, Topology, TopologyBuilder,
};
use tracing::subscriber::set_global_default;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

static TRACING: Once = Once::new();

/// Installs a bunyan subscriber when `TEST_LOG` is set. Logs are discarded otherwise.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        if std::env::var("TEST_LOG").is_ok() {
            let subscriber = Registry::default()
                .with(env_filter)
                .with(JsonStorageLayer)
                .with(BunyanFormattingLayer::new(
                    "docdb-client-test".into(),
                    std::io::stdout,
                ));
            set_global_default(subscriber).expect("Failed to set subscriber");
        } else {
            let subscriber = Registry::default()
                .with(env_filter)
                .with(JsonStorageLayer)
                .with(BunyanFormattingLayer::new(
                    "docdb-client-test".into(),
                    std::io::sink,
                ));
            set_global_default(subscriber).expect("Failed to set subscriber");
        }
        LogTracer::init().expect("Failed to set logger");
    });
}

pub fn address(host: &str) -> ServerAddress {
    ServerAddress::new(host, 27017)
}

pub fn addresses(hosts: &[&str]) -> Vec<ServerAddress> {
    hosts.iter().map(|host| address(host)).collect()
}

pub fn primary(set_name: &str, hosts: &[&str]) -> HeartbeatReply {
    HeartbeatReply {
        ok: 1.0,
        is_master: true,
        set_name: Some(set_name.to_string()),
        hosts: addresses(hosts),
        max_wire_version: 17,
        ..Default::default()
    }
}

pub fn secondary(set_name: &str, hosts: &[&str]) -> HeartbeatReply {
    HeartbeatReply {
        ok: 1.0,
        secondary: true,
        set_name: Some(set_name.to_string()),
        hosts: addresses(hosts),
        max_wire_version: 17,
        ..Default::default()
    }
}

pub fn standalone() -> HeartbeatReply {
    HeartbeatReply {
        ok: 1.0,
        max_wire_version: 17,
        ..Default::default()
    }
}

/// A builder with short heartbeat intervals, talking to `factory`.
pub fn builder(factory: &MockConnectionFactory, seeds: &[&str]) -> TopologyBuilder {
    init_tracing();
    TopologyBuilder::new()
        .set_hosts(seeds)
        .set_connection_mode(ConnectionMode::Multiple)
        .set_heartbeat_frequency(Duration::from_secs(1))
        .set_min_heartbeat_frequency(Duration::from_millis(10))
        .set_server_selection_timeout(Duration::from_secs(2))
        .set_connection_factory(factory.clone())
}

/// Polls the published description until `predicate` holds.
pub async fn wait_until<F>(topology: &Topology, predicate: F) -> ClusterDescription
where
    F: Fn(&ClusterDescription) -> bool,
{
    for _ in 0..1_000 {
        let description = topology.current_description();
        if predicate(&description) {
            return description;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "Condition never held. Last description: {}",
        topology.current_description()
    );
}

pub fn hosts(description: &ClusterDescription) -> Vec<String> {
    description
        .addresses()
        .iter()
        .map(|address| address.host().to_string())
        .collect()
}
