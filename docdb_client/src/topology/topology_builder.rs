use std::{fs::File, io::Read, sync::Arc, time::Duration};

use tracing::instrument;

use crate::{
    heartbeat::{ConnectionFactory, DnsOverrides, HttpConnectionFactory},
    ClusterType, ConnectionMode, ServerAddress, ServerMonitorSettings, ServerSelector, Topology,
    TopologyError,
};

use super::topology_helpers::TopologySettings;

pub const DEFAULT_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_WAIT_QUEUE_SIZE: usize = 500;

#[derive(Debug)]
pub struct TopologyBuilder {
    client_certificate_path: Option<String>,
    cluster_selector: Option<Box<dyn ServerSelector>>,
    connection_factory: Option<Arc<dyn ConnectionFactory>>,
    connection_mode: Option<ConnectionMode>,
    dns_overrides: Option<DnsOverrides>,
    hosts: Vec<String>,
    max_wait_queue_size: usize,
    monitor_settings: ServerMonitorSettings,
    proxy_address: Option<String>,
    required_cluster_type: Option<ClusterType>,
    required_replica_set_name: Option<String>,
    server_selection_timeout: Duration,
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds seed addresses in `host`, `host:port` or `[ipv6]:port` form.
    pub fn set_hosts<T>(mut self, hosts: &[T]) -> Self
    where
        T: AsRef<str>,
    {
        for host in hosts {
            self.hosts.push(host.as_ref().to_string());
        }
        self
    }

    /// Defaults to [`ConnectionMode::Single`] for exactly one host with no required
    /// replica set name, and [`ConnectionMode::Multiple`] otherwise.
    pub fn set_connection_mode(mut self, connection_mode: ConnectionMode) -> Self {
        self.connection_mode = Some(connection_mode);
        self
    }

    pub fn set_required_cluster_type(mut self, cluster_type: ClusterType) -> Self {
        self.required_cluster_type = Some(cluster_type);
        self
    }

    pub fn set_required_replica_set_name(mut self, replica_set_name: &str) -> Self {
        self.required_replica_set_name = Some(replica_set_name.to_string());
        self
    }

    pub fn set_server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.server_selection_timeout = timeout;
        self
    }

    pub fn set_max_wait_queue_size(mut self, max_wait_queue_size: usize) -> Self {
        self.max_wait_queue_size = max_wait_queue_size;
        self
    }

    pub fn set_heartbeat_frequency(mut self, frequency: Duration) -> Self {
        self.monitor_settings.heartbeat_frequency = frequency;
        self
    }

    pub fn set_min_heartbeat_frequency(mut self, frequency: Duration) -> Self {
        self.monitor_settings.min_heartbeat_frequency = frequency;
        self
    }

    /// Narrows every selection made through the topology. It is applied to what the
    /// caller's selector returned.
    pub fn set_cluster_selector(mut self, selector: impl ServerSelector + 'static) -> Self {
        self.cluster_selector = Some(Box::new(selector));
        self
    }

    /// Replaces the default HTTP heartbeat transport. The certificate, DNS override and
    /// proxy settings only apply to the default transport.
    pub fn set_connection_factory(mut self, factory: impl ConnectionFactory + 'static) -> Self {
        self.connection_factory = Some(Arc::new(factory));
        self
    }

    pub fn set_client_certificate(mut self, certificate_path: &str) -> Self {
        self.client_certificate_path = Some(certificate_path.to_string());
        self
    }

    pub fn set_dns_overrides(mut self, overrides: DnsOverrides) -> Self {
        tracing::trace!("Adding to dns_overrides: {:?}", &overrides);
        self.dns_overrides = Some(overrides);
        self
    }

    pub fn set_proxy_address(mut self, proxy_address: &str) -> Self {
        self.proxy_address = Some(proxy_address.to_string());
        self
    }

    /// Validates the configuration, starts a [`Topology`] and returns a handle to it.
    ///
    /// Every call starts a new topology with its own monitors, so the builder can be
    /// reused as a template. Must be called from within a tokio runtime.
    #[instrument(level = "debug", name = "Build TopologyBuilder", skip(self))]
    pub fn build(&self) -> Result<Topology, TopologyError> {
        let settings = self.settings()?;
        let connection_factory: Arc<dyn ConnectionFactory> = match &self.connection_factory {
            Some(factory) => factory.clone(),
            None => Arc::new(self.http_connection_factory()?),
        };

        tracing::trace!("Topology settings: {:?}", &settings);

        Ok(Topology::new(settings, connection_factory))
    }

    fn settings(&self) -> Result<TopologySettings, TopologyError> {
        if self.hosts.is_empty() {
            tracing::error!(
                "No hosts were supplied and a topology can't exist without at least one"
            );
            return Err(TopologyError::MissingHostsError);
        }

        let hosts = validate_hosts(&self.hosts)?;

        let connection_mode = self.connection_mode.unwrap_or(
            if hosts.len() == 1 && self.required_replica_set_name.is_none() {
                ConnectionMode::Single
            } else {
                ConnectionMode::Multiple
            },
        );

        if connection_mode == ConnectionMode::Single && hosts.len() > 1 {
            return Err(TopologyError::InvalidConfiguration(format!(
                "{} connection mode takes exactly one host, got {}",
                connection_mode,
                hosts.len()
            )));
        }

        if let (Some(_), Some(cluster_type)) =
            (&self.required_replica_set_name, self.required_cluster_type)
        {
            if cluster_type != ClusterType::ReplicaSet {
                return Err(TopologyError::InvalidConfiguration(format!(
                    "a required replica set name needs a {} cluster, not {}",
                    ClusterType::ReplicaSet,
                    cluster_type
                )));
            }
        }

        if self.monitor_settings.min_heartbeat_frequency > self.monitor_settings.heartbeat_frequency
        {
            return Err(TopologyError::InvalidConfiguration(format!(
                "min heartbeat frequency ({:?}) exceeds heartbeat frequency ({:?})",
                self.monitor_settings.min_heartbeat_frequency,
                self.monitor_settings.heartbeat_frequency
            )));
        }

        Ok(TopologySettings {
            hosts,
            connection_mode,
            required_cluster_type: self.required_cluster_type,
            required_replica_set_name: self.required_replica_set_name.clone(),
            server_selection_timeout: self.server_selection_timeout,
            max_wait_queue_size: self.max_wait_queue_size,
            cluster_selector: self.cluster_selector.clone(),
            monitor_settings: self.monitor_settings.clone(),
        })
    }

    fn http_connection_factory(&self) -> Result<HttpConnectionFactory, TopologyError> {
        let mut factory = HttpConnectionFactory::new();

        if let Some(certpath) = &self.client_certificate_path {
            // Open and validate certificate, and create an identity from it
            let mut buf = Vec::new();
            File::open(certpath)
                .map_err(|e| {
                    let err = anyhow::anyhow!("Failed to open certificate file. Caused by: {}", e);
                    tracing::error!("{}", &err);
                    err
                })?
                .read_to_end(&mut buf)
                .map_err(|e| {
                    let err =
                        anyhow::anyhow!("File was opened but unable to read. Caused by: {}", e);
                    tracing::error!("{}", err);
                    err
                })?;
            let identity = reqwest::Identity::from_pem(&buf).map_err(|e| {
                let err = anyhow::anyhow!("Invalid pem file. Caused by: {}", e);
                tracing::error!("{}", err);
                err
            })?;
            factory = factory.with_client_identity(identity);
        }

        if let Some(overrides) = &self.dns_overrides {
            factory = factory.with_dns_overrides(overrides.clone());
        }

        if let Some(proxy) = &self.proxy_address {
            factory = factory.with_proxy_address(proxy);
        }

        Ok(factory)
    }
}

impl Default for TopologyBuilder {
    fn default() -> Self {
        Self {
            client_certificate_path: None,
            cluster_selector: None,
            connection_factory: None,
            connection_mode: None,
            dns_overrides: None,
            hosts: Vec::new(),
            max_wait_queue_size: DEFAULT_MAX_WAIT_QUEUE_SIZE,
            monitor_settings: ServerMonitorSettings::default(),
            proxy_address: None,
            required_cluster_type: None,
            required_replica_set_name: None,
            server_selection_timeout: DEFAULT_SERVER_SELECTION_TIMEOUT,
        }
    }
}

/// Parses the seed list, dropping duplicates while keeping the first occurrence's
/// position.
#[instrument(level = "debug", name = "Validate Hosts")]
fn validate_hosts<T>(hosts: &[T]) -> Result<Vec<ServerAddress>, TopologyError>
where
    T: AsRef<str> + std::fmt::Debug,
{
    let mut clean_hosts = Vec::with_capacity(hosts.len());
    for host in hosts {
        let address = host.as_ref().parse::<ServerAddress>()?;
        if !clean_hosts.contains(&address) {
            clean_hosts.push(address);
        }
    }
    Ok(clean_hosts)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use crate::{heartbeat::mock::MockConnectionFactory, AddressParseError};

    use super::*;

    #[test]
    fn validate_hosts_returns_addresses_in_order_without_duplicates() {
        // Arrange
        let hosts = vec!["B:27018", "a", "b:27018", "[::1]:27019"];

        // Act
        let result = validate_hosts(hosts.as_slice()).unwrap();

        // Assert
        assert_eq!(
            result,
            vec![
                ServerAddress::new("b", 27018),
                ServerAddress::new("a", 27017),
                ServerAddress::new("::1", 27019),
            ]
        );
    }

    #[test]
    fn validate_hosts_fails_for_a_bad_port() {
        let hosts = vec!["a:notaport"];

        let result = validate_hosts(hosts.as_slice());

        assert!(matches!(
            result,
            Err(TopologyError::InvalidAddress(AddressParseError::InvalidPort(_)))
        ));
    }

    #[test]
    fn settings_default_to_single_mode_for_one_host() {
        let settings = TopologyBuilder::new().set_hosts(&["a"]).settings().unwrap();

        assert_eq!(settings.connection_mode(), ConnectionMode::Single);
        assert_eq!(settings.server_selection_timeout(), Duration::from_secs(30));
        assert_eq!(settings.max_wait_queue_size(), 500);
        assert_eq!(
            settings.monitor_settings().heartbeat_frequency,
            Duration::from_secs(10)
        );
    }

    #[test]
    fn settings_default_to_multiple_mode_with_a_replica_set_name() {
        let settings = TopologyBuilder::new()
            .set_hosts(&["a"])
            .set_required_replica_set_name("rs0")
            .settings()
            .unwrap();

        assert_eq!(settings.connection_mode(), ConnectionMode::Multiple);
    }

    #[test]
    fn settings_fail_for_single_mode_with_several_hosts() {
        let result = TopologyBuilder::new()
            .set_hosts(&["a", "b"])
            .set_connection_mode(ConnectionMode::Single)
            .settings();

        assert!(matches!(
            result,
            Err(TopologyError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn settings_fail_for_replica_set_name_with_sharded_type() {
        let result = TopologyBuilder::new()
            .set_hosts(&["a", "b"])
            .set_required_replica_set_name("rs0")
            .set_required_cluster_type(ClusterType::Sharded)
            .settings();

        assert!(matches!(
            result,
            Err(TopologyError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn settings_fail_when_min_heartbeat_exceeds_heartbeat() {
        let result = TopologyBuilder::new()
            .set_hosts(&["a"])
            .set_heartbeat_frequency(Duration::from_millis(100))
            .set_min_heartbeat_frequency(Duration::from_secs(1))
            .settings();

        assert!(matches!(
            result,
            Err(TopologyError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn topologybuilder_build_fails_if_no_hosts() {
        let topology = TopologyBuilder::new()
            .set_connection_factory(MockConnectionFactory::new())
            .build();

        assert!(matches!(topology, Err(TopologyError::MissingHostsError)));
    }

    #[tokio::test]
    async fn topologybuilder_build_fails_for_missing_certificate() {
        let topology = TopologyBuilder::new()
            .set_hosts(&["localhost:8080"])
            .set_client_certificate("does-not-exist.pem")
            .build();

        assert!(matches!(topology, Err(TopologyError::UnexpectedError(_))));
    }

    #[tokio::test]
    async fn topologybuilder_build_fails_for_invalid_pem() {
        let topology = TopologyBuilder::new()
            .set_hosts(&["localhost:8080"])
            // Cargo.toml is not a valid PEM file
            .set_client_certificate("Cargo.toml")
            .build();

        assert!(topology.is_err());
    }

    #[tokio::test]
    async fn topologybuilder_build_succeeds_for_valid_configuration() {
        let topology = TopologyBuilder::new()
            .set_hosts(&["localhost:8080"])
            .set_connection_factory(MockConnectionFactory::new())
            .build();

        assert!(topology.is_ok());
        topology.unwrap().close().await;
    }
}
