use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::{Identity, Method, StatusCode};
use tracing::instrument;
use url::Url;

use super::{ConnectionFactory, HeartbeatChannel, HeartbeatError, HeartbeatReply};
use crate::ServerAddress;

pub type DnsOverrides = HashMap<String, IpAddr>;

/// Opens heartbeat channels that poll a status endpoint over HTTP(S).
///
/// Every channel gets its own [`reqwest::Client`], so reopening a channel always
/// starts from a fresh connection.
#[derive(Clone, Debug)]
pub struct HttpConnectionFactory {
    client_identity: Option<Identity>,
    dns_overrides: Option<DnsOverrides>,
    proxy_address: Option<String>,
    require_https: bool,
    status_path: String,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl Default for HttpConnectionFactory {
    fn default() -> Self {
        Self {
            client_identity: None,
            dns_overrides: None,
            proxy_address: None,
            require_https: false,
            status_path: "/status".to_string(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
        }
    }
}

impl HttpConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Presents `identity` as a client certificate. Implies https.
    pub fn with_client_identity(mut self, identity: Identity) -> Self {
        self.client_identity = Some(identity);
        self.require_https = true;
        self
    }

    pub fn with_dns_overrides(mut self, overrides: DnsOverrides) -> Self {
        tracing::trace!("Adding to dns_overrides: {:?}", &overrides);
        self.dns_overrides = Some(overrides);
        self
    }

    pub fn with_proxy_address(mut self, proxy_address: &str) -> Self {
        self.proxy_address = Some(proxy_address.to_string());
        self
    }

    pub fn with_https(mut self, require_https: bool) -> Self {
        self.require_https = require_https;
        self
    }

    pub fn with_status_path(mut self, status_path: &str) -> Self {
        self.status_path = status_path.to_string();
        self
    }

    pub fn with_timeouts(mut self, connect_timeout: Duration, read_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.read_timeout = read_timeout;
        self
    }

    fn scheme(&self) -> &'static str {
        if self.require_https {
            "https"
        } else {
            "http"
        }
    }

    /// The status endpoint for `address`.
    pub fn status_url(&self, address: &ServerAddress) -> Result<Url, HeartbeatError> {
        let base = Url::parse(&format!("{}://{}/", self.scheme(), address)).map_err(|e| {
            HeartbeatError::Transport(format!("Invalid url for `{}`. Caused by: {}", address, e))
        })?;
        base.join(self.status_path.trim_start_matches('/'))
            .map_err(|e| {
                HeartbeatError::Transport(format!(
                    "Invalid status path `{}`. Caused by: {}",
                    self.status_path, e
                ))
            })
    }

    fn build_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        let mut client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.read_timeout);

        if let Some(identity) = self.client_identity.clone() {
            client = client.identity(identity).use_rustls_tls();
        }

        // Convert Option<HashMap<String, IpAddr>> into HashMap<String,SocketAddr>
        let overrides = self
            .dns_overrides
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, SocketAddr::new(v, 0)))
            .collect::<HashMap<String, SocketAddr>>();

        for (domain, address) in overrides {
            tracing::trace!(
                "Adding `{}->{}` to dns overrides for this client.",
                domain,
                address
            );
            client = client.resolve(domain.as_str(), address);
        }

        if let Some(proxy) = &self.proxy_address {
            tracing::trace!("Proxy set to `{}`", proxy);
            client = client.proxy(reqwest::Proxy::http(proxy)?);
        } else {
            tracing::trace!("No proxy defined. Using system settings.");
        }

        client.build()
    }
}

#[async_trait]
impl ConnectionFactory for HttpConnectionFactory {
    #[instrument(level = "debug", skip(self))]
    async fn open(
        &self,
        address: &ServerAddress,
    ) -> Result<Box<dyn HeartbeatChannel>, HeartbeatError> {
        let status_url = self.status_url(address)?;
        let client = self.build_client().map_err(|e| {
            HeartbeatError::Transport(format!("Unable to build http client. Caused by: {}", e))
        })?;

        Ok(Box::new(HttpHeartbeatChannel { client, status_url }))
    }

    fn invalidate(&self, address: &ServerAddress) {
        // Channels own their clients, so there is no shared pool to clear.
        tracing::debug!("Connections to `{}` invalidated.", address);
    }
}

/// A heartbeat channel backed by its own HTTP client.
#[derive(Debug)]
pub struct HttpHeartbeatChannel {
    client: reqwest::Client,
    status_url: Url,
}

impl HttpHeartbeatChannel {
    pub fn status_url(&self) -> &Url {
        &self.status_url
    }
}

#[async_trait]
impl HeartbeatChannel for HttpHeartbeatChannel {
    #[instrument(level = "trace", skip(self), fields(url = %self.status_url))]
    async fn check(&mut self) -> Result<HeartbeatReply, HeartbeatError> {
        let request = self
            .client
            .request(Method::GET, self.status_url.clone())
            .build()?;
        let response = self.client.execute(request).await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(HeartbeatError::Authentication(format!(
                "`{}` answered {}",
                self.status_url, status
            )));
        }
        if !status.is_success() {
            return Err(HeartbeatError::Transport(format!(
                "`{}` answered {}",
                self.status_url, status
            )));
        }

        Ok(response.json::<HeartbeatReply>().await?)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn status_url_uses_scheme_address_and_path() {
        let factory = HttpConnectionFactory::new().with_status_path("/admin/status");

        let url = factory
            .status_url(&ServerAddress::new("db1", 27017))
            .unwrap();

        assert_eq!(url.as_str(), "http://db1:27017/admin/status");
    }

    #[test]
    fn status_url_switches_to_https() {
        let factory = HttpConnectionFactory::new().with_https(true);

        let url = factory.status_url(&ServerAddress::new("db1", 443)).unwrap();

        assert_eq!(url.as_str(), "https://db1/status");
    }

    #[test]
    fn status_url_brackets_IPv6_hosts() {
        let factory = HttpConnectionFactory::new();

        let url = factory.status_url(&ServerAddress::new("::1", 8080)).unwrap();

        assert_eq!(url.as_str(), "http://[::1]:8080/status");
    }

    #[tokio::test]
    async fn open_does_not_touch_the_network() {
        let factory = HttpConnectionFactory::new();

        let channel = factory.open(&ServerAddress::new("db1", 27017)).await;

        assert!(channel.is_ok());
    }
}
