use std::{collections::BTreeMap, fmt};

use crate::{ServerAddress, ServerDescription, TagSet};

/// Lowest wire protocol version this driver speaks.
pub const MIN_SUPPORTED_WIRE_VERSION: i32 = 0;
/// Highest wire protocol version this driver speaks.
pub const MAX_SUPPORTED_WIRE_VERSION: i32 = 21;

/// Whether the topology talks to exactly one node or discovers a cluster.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionMode {
    #[default]
    Single,
    Multiple,
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionMode::Single => f.write_str("SINGLE"),
            ConnectionMode::Multiple => f.write_str("MULTIPLE"),
        }
    }
}

/// Overall classification of the cluster.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterType {
    #[default]
    Unknown,
    Standalone,
    ReplicaSet,
    Sharded,
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClusterType::Unknown => "UNKNOWN",
            ClusterType::Standalone => "STANDALONE",
            ClusterType::ReplicaSet => "REPLICA_SET",
            ClusterType::Sharded => "SHARDED",
        };
        f.write_str(name)
    }
}

/// Immutable snapshot of every node the topology tracks.
///
/// Members are kept ordered by address so iteration and equality are deterministic.
/// Every query returns a freshly built collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterDescription {
    connection_mode: ConnectionMode,
    cluster_type: ClusterType,
    members: BTreeMap<ServerAddress, ServerDescription>,
}

impl ClusterDescription {
    pub fn new(
        connection_mode: ConnectionMode,
        cluster_type: ClusterType,
        members: impl IntoIterator<Item = ServerDescription>,
    ) -> Self {
        Self {
            connection_mode,
            cluster_type,
            members: members
                .into_iter()
                .map(|member| (member.address().clone(), member))
                .collect(),
        }
    }

    /// The same cluster, narrowed to `members`. Used to chain selectors.
    pub fn with_members(&self, members: impl IntoIterator<Item = ServerDescription>) -> Self {
        ClusterDescription::new(self.connection_mode, self.cluster_type, members)
    }

    pub fn connection_mode(&self) -> ConnectionMode {
        self.connection_mode
    }

    pub fn cluster_type(&self) -> ClusterType {
        self.cluster_type
    }

    /// All members, ok or not, in address order.
    pub fn members(&self) -> Vec<ServerDescription> {
        self.members.values().cloned().collect()
    }

    pub fn addresses(&self) -> Vec<ServerAddress> {
        self.members.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members whose last heartbeat succeeded.
    pub fn any(&self) -> Vec<ServerDescription> {
        self.members
            .values()
            .filter(|member| member.is_ok())
            .cloned()
            .collect()
    }

    pub fn primaries(&self) -> Vec<ServerDescription> {
        self.members
            .values()
            .filter(|member| member.is_primary())
            .cloned()
            .collect()
    }

    pub fn secondaries(&self) -> Vec<ServerDescription> {
        self.members
            .values()
            .filter(|member| member.is_secondary())
            .cloned()
            .collect()
    }

    pub fn secondaries_with_tags(&self, tag_set: &TagSet) -> Vec<ServerDescription> {
        self.members
            .values()
            .filter(|member| member.is_secondary() && member.has_tags(tag_set))
            .cloned()
            .collect()
    }

    pub fn any_ok(&self) -> bool {
        self.members.values().any(ServerDescription::is_ok)
    }

    /// The member at `address`, only if it is currently ok.
    pub fn by_address(&self, address: &ServerAddress) -> Option<ServerDescription> {
        self.members
            .get(address)
            .filter(|member| member.is_ok())
            .cloned()
    }

    /// Whether every ok member speaks a wire version this driver supports.
    pub fn is_compatible(&self) -> bool {
        self.members
            .values()
            .filter(|member| member.is_ok())
            .all(|member| {
                member.is_compatible_with(MIN_SUPPORTED_WIRE_VERSION, MAX_SUPPORTED_WIRE_VERSION)
            })
    }

    /// Equality ignoring latency-only differences between members.
    pub fn is_materially_equal(&self, other: &ClusterDescription) -> bool {
        self.connection_mode == other.connection_mode
            && self.cluster_type == other.cluster_type
            && self.members.len() == other.members.len()
            && self
                .members
                .values()
                .zip(other.members.values())
                .all(|(a, b)| a.is_materially_equal(b))
    }

    /// Rendering of every member with its role, state and last error.
    pub fn short_description(&self) -> String {
        let servers = self
            .members
            .values()
            .map(ServerDescription::short_description)
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{{type={}, connectionMode={}, servers=[{}]}}",
            self.cluster_type, self.connection_mode, servers
        )
    }
}

impl fmt::Display for ClusterDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_description())
    }
}
