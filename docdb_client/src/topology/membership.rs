use std::collections::{BTreeMap, BTreeSet};

use crate::{
    ClusterDescription, ClusterType, ConnectionMode, ServerAddress, ServerDescription, ServerType,
};

/// Addresses whose monitors must be started or stopped after a description was applied.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct MembershipChanges {
    pub(crate) added: Vec<ServerAddress>,
    pub(crate) removed: Vec<ServerAddress>,
}

/// Which nodes the topology tracks and what it believes about each of them.
#[derive(Debug)]
pub(crate) enum Membership {
    Single(SingleNodeMembership),
    Multiple(MultiNodeMembership),
}

impl Membership {
    pub(crate) fn new(
        connection_mode: ConnectionMode,
        seeds: &[ServerAddress],
        required_cluster_type: Option<ClusterType>,
        required_replica_set_name: Option<String>,
    ) -> Self {
        match connection_mode {
            ConnectionMode::Single => Membership::Single(SingleNodeMembership::new(
                seeds.first().cloned().unwrap_or_default(),
                required_cluster_type,
                required_replica_set_name,
            )),
            ConnectionMode::Multiple => Membership::Multiple(MultiNodeMembership::new(
                seeds,
                required_cluster_type,
                required_replica_set_name,
            )),
        }
    }

    /// Folds the latest description of one node into the model. `None` means the node is
    /// not tracked and the description was ignored.
    pub(crate) fn apply(&mut self, current: ServerDescription) -> Option<MembershipChanges> {
        match self {
            Membership::Single(single) => single.apply(current),
            Membership::Multiple(multiple) => multiple.apply(current),
        }
    }

    pub(crate) fn description(&self) -> ClusterDescription {
        match self {
            Membership::Single(single) => single.description(),
            Membership::Multiple(multiple) => multiple.description(),
        }
    }

    pub(crate) fn addresses(&self) -> Vec<ServerAddress> {
        match self {
            Membership::Single(single) => vec![single.description.address().clone()],
            Membership::Multiple(multiple) => multiple.members.keys().cloned().collect(),
        }
    }
}

/// Mirrors exactly one node. The node is never removed; a node that does not fit the
/// configuration is published as not ok instead.
#[derive(Debug)]
pub(crate) struct SingleNodeMembership {
    required_cluster_type: Option<ClusterType>,
    required_replica_set_name: Option<String>,
    cluster_type: ClusterType,
    description: ServerDescription,
}

impl SingleNodeMembership {
    fn new(
        address: ServerAddress,
        required_cluster_type: Option<ClusterType>,
        required_replica_set_name: Option<String>,
    ) -> Self {
        Self {
            cluster_type: required_cluster_type.unwrap_or_default(),
            required_cluster_type,
            required_replica_set_name,
            description: ServerDescription::connecting(address),
        }
    }

    fn apply(&mut self, current: ServerDescription) -> Option<MembershipChanges> {
        if current.address() != self.description.address() {
            return None;
        }

        let current = match self.rejection(&current) {
            Some(reason) => {
                tracing::warn!("Rejecting `{}`: {}", current.address(), reason);
                current.rejected(reason)
            }
            None => current,
        };

        let cluster_type = current.server_type().cluster_type();
        if current.is_ok() && cluster_type != ClusterType::Unknown {
            if self.cluster_type != cluster_type {
                tracing::info!("Cluster type is now {}.", cluster_type);
            }
            self.cluster_type = cluster_type;
        }
        self.description = current;
        Some(MembershipChanges::default())
    }

    fn rejection(&self, current: &ServerDescription) -> Option<String> {
        if !current.is_ok() {
            return None;
        }
        if let (Some(required), Some(actual)) =
            (&self.required_replica_set_name, current.set_name())
        {
            if required != actual {
                return Some(format!(
                    "replica set name `{}` does not match the required name `{}`",
                    actual, required
                ));
            }
        }
        if let Some(required) = self.required_cluster_type {
            if !is_compatible_role(current.server_type(), required) {
                return Some(format!(
                    "a {} does not belong in a {} cluster",
                    current.server_type(),
                    required
                ));
            }
        }
        None
    }

    fn description(&self) -> ClusterDescription {
        ClusterDescription::new(
            ConnectionMode::Single,
            self.cluster_type,
            [self.description.clone()],
        )
    }
}

/// Discovers a cluster from its seeds by following what the nodes report.
#[derive(Debug)]
pub(crate) struct MultiNodeMembership {
    seed_count: usize,
    required_cluster_type: Option<ClusterType>,
    /// Configured up front, or locked in from the first replica-set member seen.
    replica_set_name: Option<String>,
    cluster_type: ClusterType,
    members: BTreeMap<ServerAddress, ServerDescription>,
}

impl MultiNodeMembership {
    fn new(
        seeds: &[ServerAddress],
        required_cluster_type: Option<ClusterType>,
        required_replica_set_name: Option<String>,
    ) -> Self {
        let members = seeds
            .iter()
            .map(|seed| (seed.clone(), ServerDescription::connecting(seed.clone())))
            .collect::<BTreeMap<_, _>>();
        let cluster_type = match (required_cluster_type, &required_replica_set_name) {
            (Some(required), _) => required,
            (None, Some(_)) => ClusterType::ReplicaSet,
            (None, None) => ClusterType::Unknown,
        };

        Self {
            seed_count: members.len(),
            required_cluster_type,
            replica_set_name: required_replica_set_name,
            cluster_type,
            members,
        }
    }

    fn apply(&mut self, current: ServerDescription) -> Option<MembershipChanges> {
        let address = current.address().clone();
        if !self.members.contains_key(&address) {
            tracing::trace!("Ignoring description of untracked `{}`.", address);
            return None;
        }

        let mut changes = MembershipChanges::default();

        if let (Some(expected), Some(actual)) = (&self.replica_set_name, current.set_name()) {
            if expected != actual {
                tracing::info!(
                    "Removing `{}`: replica set name `{}` does not match `{}`.",
                    address,
                    actual,
                    expected
                );
                self.remove(&address, &mut changes);
                return Some(changes);
            }
        }

        if let Some(required) = self.required_cluster_type {
            if current.is_ok() && !is_compatible_role(current.server_type(), required) {
                tracing::info!(
                    "Removing `{}`: a {} does not belong in a {} cluster.",
                    address,
                    current.server_type(),
                    required
                );
                self.remove(&address, &mut changes);
                return Some(changes);
            }
        }

        let server_type = current.server_type();
        let is_ok = current.is_ok();
        self.members.insert(address.clone(), current.clone());

        if !is_ok || server_type == ServerType::Unknown {
            return Some(changes);
        }

        if self.cluster_type == ClusterType::Unknown && server_type.is_informative() {
            self.cluster_type = server_type.cluster_type();
            tracing::info!("Cluster type locked in as {}.", self.cluster_type);
        }

        match self.cluster_type {
            ClusterType::ReplicaSet => self.apply_replica_set_member(&current, &mut changes),
            ClusterType::Standalone => {
                if !(server_type == ServerType::Standalone && self.is_lone_standalone_seed()) {
                    tracing::info!("Removing `{}` from a standalone cluster.", address);
                    self.remove(&address, &mut changes);
                }
            }
            ClusterType::Sharded => {
                if server_type != ServerType::ShardRouter {
                    tracing::info!("Removing {} `{}` from a sharded cluster.", server_type, address);
                    self.remove(&address, &mut changes);
                }
            }
            ClusterType::Unknown => {}
        }

        Some(changes)
    }

    fn apply_replica_set_member(
        &mut self,
        current: &ServerDescription,
        changes: &mut MembershipChanges,
    ) {
        let address = current.address();

        match current.server_type() {
            ServerType::Standalone if !self.is_lone_standalone_seed() => {
                tracing::info!("Removing standalone `{}` from a replica set.", address);
                self.remove(address, changes);
                return;
            }
            ServerType::ShardRouter => {
                tracing::info!("Removing shard router `{}` from a replica set.", address);
                self.remove(address, changes);
                return;
            }
            _ => {}
        }

        if self.replica_set_name.is_none() {
            if let Some(set_name) = current.set_name() {
                tracing::info!("Replica set name locked in as `{}`.", set_name);
                self.replica_set_name = Some(set_name.to_string());
            }
        }

        match current.server_type() {
            ServerType::ReplicaSetPrimary => {
                let authoritative = current.all_hosts();
                let stale = self
                    .members
                    .keys()
                    .filter(|tracked| !authoritative.contains(*tracked))
                    .cloned()
                    .collect::<Vec<_>>();
                for tracked in stale {
                    tracing::info!(
                        "Removing `{}`: not listed by primary `{}`.",
                        tracked,
                        address
                    );
                    self.remove(&tracked, changes);
                }
                self.add_all(authoritative, changes);
            }
            ServerType::ReplicaSetSecondary | ServerType::ReplicaSetOther
                if !self.has_primary() =>
            {
                self.add_all(current.all_hosts(), changes);
            }
            _ => {}
        }
    }

    /// A standalone may stay only when it was the single seed and nothing else was found.
    fn is_lone_standalone_seed(&self) -> bool {
        self.seed_count == 1 && self.members.len() == 1
    }

    fn has_primary(&self) -> bool {
        self.members.values().any(ServerDescription::is_primary)
    }

    fn add_all(&mut self, addresses: BTreeSet<ServerAddress>, changes: &mut MembershipChanges) {
        for address in addresses {
            if !self.members.contains_key(&address) {
                tracing::info!("Adding discovered member `{}`.", address);
                self.members
                    .insert(address.clone(), ServerDescription::connecting(address.clone()));
                changes.added.push(address);
            }
        }
    }

    fn remove(&mut self, address: &ServerAddress, changes: &mut MembershipChanges) {
        if self.members.remove(address).is_some() {
            changes.removed.push(address.clone());
        }
    }

    fn description(&self) -> ClusterDescription {
        ClusterDescription::new(
            ConnectionMode::Multiple,
            self.cluster_type,
            self.members.values().cloned(),
        )
    }
}

/// Unknown roles carry no information and are never held against a node.
fn is_compatible_role(server_type: ServerType, required: ClusterType) -> bool {
    server_type == ServerType::Unknown || server_type.cluster_type() == required
}
