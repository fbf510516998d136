use std::time::Duration;

use docdb_client::{
    PrimaryOrSecondaryServerSelector, PrimaryServerSelector, Topology, TopologyEvent,
};
use tracing::subscriber::set_global_default;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    let hosts: Vec<String> = std::env::var("DOCDB_HOSTS")
        .unwrap_or_else(|_| "localhost:27017".to_string())
        .split(',')
        .map(str::to_string)
        .collect();

    let mut builder = Topology::builder()
        .set_hosts(&hosts)
        .set_server_selection_timeout(Duration::from_secs(10));
    if let Ok(replica_set_name) = std::env::var("DOCDB_REPLICA_SET") {
        builder = builder.set_required_replica_set_name(&replica_set_name);
    }
    if let Ok(certificate) = std::env::var("DOCDB_CLIENT_CERTIFICATE") {
        builder = builder.set_client_certificate(&certificate);
    }

    let topology = builder.build()?;

    let mut events = topology.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                TopologyEvent::ServerAdded { address } => println!("+ {}", address),
                TopologyEvent::ServerRemoved { address } => println!("- {}", address),
                TopologyEvent::ClusterDescriptionChanged { current, .. } => {
                    println!("~ {}", current)
                }
                TopologyEvent::TopologyClosed => break,
                TopologyEvent::ServerDescriptionChanged { .. } => {}
            }
        }
    });

    match topology.select_server(PrimaryServerSelector).await {
        Ok(server) => println!("Primary: {}", server.description()),
        Err(e) => {
            tracing::error!("Error happened: {}", &e);
            let server = topology
                .select_server(PrimaryOrSecondaryServerSelector)
                .await?;
            println!("No primary, falling back to {}", server.address());
        }
    }

    println!("{}", topology.get_description().await?);
    topology.close().await;

    Ok(())
}

fn setup_tracing() {
    // Redirect all `log`'s events to the subscriber
    LogTracer::init().expect("Failed to set logger");
    // Set up tracing
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let formatting_layer = BunyanFormattingLayer::new("docdb-client-demo".into(), std::io::stdout);
    let subscriber = Registry::default()
        .with(env_filter)
        .with(JsonStorageLayer)
        .with(formatting_layer);
    set_global_default(subscriber).expect("Failed to set subscriber");
}
