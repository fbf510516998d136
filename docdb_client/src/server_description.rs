use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{heartbeat::HeartbeatReply, ClusterType, HeartbeatError, ServerAddress};

/// Key/value labels a replica-set member advertises, e.g. `{"dc": "east"}`.
pub type TagSet = BTreeMap<String, String>;

/// Whether the monitor currently holds a working connection to the node.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerConnectionState {
    #[default]
    Connecting,
    Connected,
}

impl fmt::Display for ServerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerConnectionState::Connecting => f.write_str("CONNECTING"),
            ServerConnectionState::Connected => f.write_str("CONNECTED"),
        }
    }
}

/// The role a node reports for itself.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerType {
    #[default]
    Unknown,
    Standalone,
    ReplicaSetPrimary,
    ReplicaSetSecondary,
    ReplicaSetArbiter,
    ReplicaSetOther,
    ReplicaSetGhost,
    ShardRouter,
}

impl ServerType {
    /// The kind of cluster a node of this type belongs to.
    pub fn cluster_type(&self) -> ClusterType {
        match self {
            ServerType::Unknown => ClusterType::Unknown,
            ServerType::Standalone => ClusterType::Standalone,
            ServerType::ReplicaSetPrimary
            | ServerType::ReplicaSetSecondary
            | ServerType::ReplicaSetArbiter
            | ServerType::ReplicaSetOther
            | ServerType::ReplicaSetGhost => ClusterType::ReplicaSet,
            ServerType::ShardRouter => ClusterType::Sharded,
        }
    }

    /// Whether a healthy node of this type is enough to fix the cluster type of a
    /// multi-node topology. Ghosts and arbiters never are.
    pub fn is_informative(&self) -> bool {
        matches!(
            self,
            ServerType::Standalone
                | ServerType::ReplicaSetPrimary
                | ServerType::ReplicaSetSecondary
                | ServerType::ReplicaSetOther
                | ServerType::ShardRouter
        )
    }

    pub fn is_replica_set_member(&self) -> bool {
        self.cluster_type() == ClusterType::ReplicaSet
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerType::Unknown => "UNKNOWN",
            ServerType::Standalone => "STANDALONE",
            ServerType::ReplicaSetPrimary => "REPLICA_SET_PRIMARY",
            ServerType::ReplicaSetSecondary => "REPLICA_SET_SECONDARY",
            ServerType::ReplicaSetArbiter => "REPLICA_SET_ARBITER",
            ServerType::ReplicaSetOther => "REPLICA_SET_OTHER",
            ServerType::ReplicaSetGhost => "REPLICA_SET_GHOST",
            ServerType::ShardRouter => "SHARD_ROUTER",
        };
        f.write_str(name)
    }
}

/// Logical clock value gossiped by the cluster in heartbeat replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTime {
    pub cluster_time: u64,
}

impl ClusterTime {
    pub fn new(cluster_time: u64) -> Self {
        Self { cluster_time }
    }
}

/// Immutable snapshot of what the client last observed about one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescription {
    pub(crate) address: ServerAddress,
    pub(crate) state: ServerConnectionState,
    pub(crate) server_type: ServerType,
    pub(crate) ok: bool,
    pub(crate) hosts: BTreeSet<ServerAddress>,
    pub(crate) passives: BTreeSet<ServerAddress>,
    pub(crate) primary: Option<ServerAddress>,
    pub(crate) set_name: Option<String>,
    pub(crate) tags: TagSet,
    pub(crate) min_wire_version: i32,
    pub(crate) max_wire_version: i32,
    pub(crate) round_trip_time_nanos: u64,
    pub(crate) cluster_time: Option<ClusterTime>,
    pub(crate) last_error: Option<HeartbeatError>,
}

impl ServerDescription {
    /// Description of a node nothing is known about yet.
    pub fn connecting(address: ServerAddress) -> Self {
        Self {
            address,
            state: ServerConnectionState::Connecting,
            server_type: ServerType::Unknown,
            ok: false,
            hosts: BTreeSet::new(),
            passives: BTreeSet::new(),
            primary: None,
            set_name: None,
            tags: TagSet::new(),
            min_wire_version: 0,
            max_wire_version: 0,
            round_trip_time_nanos: 0,
            cluster_time: None,
            last_error: None,
        }
    }

    /// Description of a node whose last heartbeat attempt failed.
    pub fn failed(address: ServerAddress, error: HeartbeatError) -> Self {
        Self {
            last_error: Some(error),
            ..ServerDescription::connecting(address)
        }
    }

    /// Description built from a successful heartbeat reply.
    pub fn from_reply(
        address: ServerAddress,
        reply: &HeartbeatReply,
        round_trip_time_nanos: u64,
    ) -> Self {
        Self {
            address,
            state: ServerConnectionState::Connected,
            server_type: reply.server_type(),
            ok: reply.is_ok(),
            hosts: reply.hosts.iter().cloned().collect(),
            passives: reply.passives.iter().cloned().collect(),
            primary: reply.primary.clone(),
            set_name: reply.set_name.clone(),
            tags: reply.tags.clone(),
            min_wire_version: reply.min_wire_version,
            max_wire_version: reply.max_wire_version,
            round_trip_time_nanos,
            cluster_time: reply.cluster_time,
            last_error: None,
        }
    }

    /// Copy of this description that the topology refuses to use. The node stays
    /// visible, with the reason, but is no longer `ok`.
    pub(crate) fn rejected(&self, reason: String) -> Self {
        Self {
            ok: false,
            server_type: ServerType::Unknown,
            last_error: Some(HeartbeatError::Rejected(reason)),
            ..self.clone()
        }
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub fn state(&self) -> ServerConnectionState {
        self.state
    }

    pub fn server_type(&self) -> ServerType {
        self.server_type
    }

    pub fn is_ok(&self) -> bool {
        self.ok
    }

    pub fn hosts(&self) -> &BTreeSet<ServerAddress> {
        &self.hosts
    }

    pub fn passives(&self) -> &BTreeSet<ServerAddress> {
        &self.passives
    }

    /// Every address this node claims belongs to its replica set.
    pub fn all_hosts(&self) -> BTreeSet<ServerAddress> {
        self.hosts.union(&self.passives).cloned().collect()
    }

    pub fn primary(&self) -> Option<&ServerAddress> {
        self.primary.as_ref()
    }

    pub fn set_name(&self) -> Option<&str> {
        self.set_name.as_deref()
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// True when every tag in `tag_set` is present with the same value.
    pub fn has_tags(&self, tag_set: &TagSet) -> bool {
        tag_set
            .iter()
            .all(|(name, value)| self.tags.get(name) == Some(value))
    }

    pub fn min_wire_version(&self) -> i32 {
        self.min_wire_version
    }

    pub fn max_wire_version(&self) -> i32 {
        self.max_wire_version
    }

    pub fn round_trip_time_nanos(&self) -> u64 {
        self.round_trip_time_nanos
    }

    pub fn round_trip_time(&self) -> Duration {
        Duration::from_nanos(self.round_trip_time_nanos)
    }

    pub fn cluster_time(&self) -> Option<ClusterTime> {
        self.cluster_time
    }

    pub fn last_error(&self) -> Option<&HeartbeatError> {
        self.last_error.as_ref()
    }

    pub fn is_primary(&self) -> bool {
        self.ok && self.server_type == ServerType::ReplicaSetPrimary
    }

    pub fn is_secondary(&self) -> bool {
        self.ok && self.server_type == ServerType::ReplicaSetSecondary
    }

    /// Whether the wire version range overlaps `[min, max]`.
    pub fn is_compatible_with(&self, min: i32, max: i32) -> bool {
        self.min_wire_version <= max && self.max_wire_version >= min
    }

    /// Equality ignoring the smoothed latency and the gossiped cluster clock, which
    /// change on nearly every heartbeat.
    pub fn is_materially_equal(&self, other: &ServerDescription) -> bool {
        self.address == other.address
            && self.state == other.state
            && self.server_type == other.server_type
            && self.ok == other.ok
            && self.hosts == other.hosts
            && self.passives == other.passives
            && self.primary == other.primary
            && self.set_name == other.set_name
            && self.tags == other.tags
            && self.min_wire_version == other.min_wire_version
            && self.max_wire_version == other.max_wire_version
            && self.last_error == other.last_error
    }

    /// One-line rendering used in logs and timeout diagnostics.
    pub fn short_description(&self) -> String {
        let mut out = format!(
            "{{address={}, type={}, state={}",
            self.address, self.server_type, self.state
        );
        if let Some(set_name) = &self.set_name {
            out.push_str(&format!(", setName={}", set_name));
        }
        if self.ok {
            out.push_str(&format!(
                ", roundTripTime={:.1} ms",
                self.round_trip_time_nanos as f64 / 1_000_000.0
            ));
        }
        if let Some(error) = &self.last_error {
            out.push_str(&format!(", lastError={}", error));
        }
        out.push('}');
        out
    }
}

impl fmt::Display for ServerDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_description())
    }
}
