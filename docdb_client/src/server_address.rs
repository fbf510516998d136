use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// The port a node is assumed to listen on when an address omits it.
pub const DEFAULT_PORT: u16 = 27017;

/// Identity of one node: the host and port used to open connections to it.
///
/// Addresses are compared case-insensitively on the host, so `Node1:27017` and
/// `node1:27017` are tracked as the same member.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServerAddress {
    host: String,
    port: u16,
}

impl ServerAddress {
    pub fn new(host: impl AsRef<str>, port: u16) -> Self {
        Self {
            host: host.as_ref().to_lowercase(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressParseError {
    #[error("Address is empty")]
    Empty,
    #[error("Address `{0}` has an unterminated IPv6 bracket")]
    UnterminatedBracket(String),
    #[error("Address `{0}` has an invalid port")]
    InvalidPort(String),
}

impl FromStr for ServerAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AddressParseError::Empty);
        }

        // [::1]:27017 or [::1]
        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| AddressParseError::UnterminatedBracket(s.to_string()))?;
            if host.is_empty() {
                return Err(AddressParseError::Empty);
            }
            let port = match tail {
                "" => DEFAULT_PORT,
                tail => tail
                    .strip_prefix(':')
                    .and_then(|p| p.parse::<u16>().ok())
                    .ok_or_else(|| AddressParseError::InvalidPort(s.to_string()))?,
            };
            return Ok(ServerAddress::new(host, port));
        }

        match s.rsplit_once(':') {
            Some((host, port)) => {
                if host.is_empty() {
                    return Err(AddressParseError::Empty);
                }
                // IPv6 literals must be bracketed.
                if host.contains(':') {
                    return Err(AddressParseError::InvalidPort(s.to_string()));
                }
                let port = port
                    .parse::<u16>()
                    .map_err(|_| AddressParseError::InvalidPort(s.to_string()))?;
                Ok(ServerAddress::new(host, port))
            }
            None => Ok(ServerAddress::new(s, DEFAULT_PORT)),
        }
    }
}

impl TryFrom<String> for ServerAddress {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ServerAddress> for String {
    fn from(address: ServerAddress) -> Self {
        address.to_string()
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn parse_uses_default_port_when_missing() {
        let address: ServerAddress = "db1.example.com".parse().unwrap();

        assert_eq!(address.host(), "db1.example.com");
        assert_eq!(address.port(), DEFAULT_PORT);
    }

    #[test]
    fn parse_lowercases_host_and_keeps_port() {
        let address: ServerAddress = "DB1.Example.com:27018".parse().unwrap();

        assert_eq!(address, ServerAddress::new("db1.example.com", 27018));
        assert_eq!(address.to_string(), "db1.example.com:27018");
    }

    #[test]
    fn parse_handles_bracketed_IPv6() {
        let address: ServerAddress = "[::1]:27019".parse().unwrap();

        assert_eq!(address.host(), "::1");
        assert_eq!(address.port(), 27019);
        assert_eq!(address.to_string(), "[::1]:27019");
        assert_eq!("[::1]".parse::<ServerAddress>().unwrap().port(), DEFAULT_PORT);
    }

    #[test]
    fn parse_rejects_unbracketed_IPv6() {
        let result = "::1".parse::<ServerAddress>();

        assert!(matches!(result, Err(AddressParseError::InvalidPort(_))));
        assert!(matches!(
            "fe80::1:27017".parse::<ServerAddress>(),
            Err(AddressParseError::InvalidPort(_))
        ));
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert_eq!("".parse::<ServerAddress>(), Err(AddressParseError::Empty));
        assert!(matches!(
            "db1:notaport".parse::<ServerAddress>(),
            Err(AddressParseError::InvalidPort(_))
        ));
        assert!(matches!(
            "[::1:27017".parse::<ServerAddress>(),
            Err(AddressParseError::UnterminatedBracket(_))
        ));
    }

    #[test]
    fn addresses_order_by_host_then_port() {
        let mut addresses = vec![
            ServerAddress::new("b", 1),
            ServerAddress::new("a", 2),
            ServerAddress::new("a", 1),
        ];
        addresses.sort();

        assert_eq!(
            addresses,
            vec![
                ServerAddress::new("a", 1),
                ServerAddress::new("a", 2),
                ServerAddress::new("b", 1),
            ]
        );
    }

    #[test]
    fn serde_round_trips_through_string_form() {
        let address: ServerAddress = serde_json::from_str("\"db1:27017\"").unwrap();

        assert_eq!(address, ServerAddress::new("db1", 27017));
        assert_eq!(serde_json::to_string(&address).unwrap(), "\"db1:27017\"");
    }
}
