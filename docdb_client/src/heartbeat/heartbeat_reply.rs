use serde::{Deserialize, Serialize};

use crate::{ClusterTime, ServerAddress, ServerType, TagSet};

/// `msg` value reported by shard routers.
const SHARD_ROUTER_MESSAGE: &str = "isdbgrid";

/// Parsed reply to the heartbeat status command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatReply {
    /// `1.0` when the node considers itself healthy.
    pub ok: f64,
    #[serde(default, rename = "ismaster", alias = "isWritablePrimary")]
    pub is_master: bool,
    #[serde(default)]
    pub secondary: bool,
    #[serde(default)]
    pub arbiter_only: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, rename = "isreplicaset")]
    pub is_replica_set: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_name: Option<String>,
    #[serde(default)]
    pub hosts: Vec<ServerAddress>,
    #[serde(default)]
    pub passives: Vec<ServerAddress>,
    /// The primary this node believes in, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<ServerAddress>,
    /// The address the node calls itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub me: Option<ServerAddress>,
    #[serde(default)]
    pub tags: TagSet,
    #[serde(default)]
    pub min_wire_version: i32,
    #[serde(default)]
    pub max_wire_version: i32,
    #[serde(default, rename = "$clusterTime", skip_serializing_if = "Option::is_none")]
    pub cluster_time: Option<ClusterTime>,
}

impl HeartbeatReply {
    pub fn is_ok(&self) -> bool {
        self.ok == 1.0
    }

    /// Derives the role the node is playing from its self-report.
    pub fn server_type(&self) -> ServerType {
        if !self.is_ok() {
            return ServerType::Unknown;
        }

        if self.is_replica_set {
            return ServerType::ReplicaSetGhost;
        }

        if self.set_name.is_some() {
            return if self.hidden {
                ServerType::ReplicaSetOther
            } else if self.is_master {
                ServerType::ReplicaSetPrimary
            } else if self.secondary {
                ServerType::ReplicaSetSecondary
            } else if self.arbiter_only {
                ServerType::ReplicaSetArbiter
            } else {
                ServerType::ReplicaSetOther
            };
        }

        if self.msg.as_deref() == Some(SHARD_ROUTER_MESSAGE) {
            return ServerType::ShardRouter;
        }

        ServerType::Standalone
    }
}
