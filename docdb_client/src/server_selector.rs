//! Selectors narrow a [`ClusterDescription`] down to the members an operation may use.
//!
//! A selector is a pure function of the description it is handed. Selectors compose
//! with [`CompositeServerSelector`], which feeds each selector the cluster narrowed by the
//! selectors before it.
use std::{fmt, time::Duration};

use dyn_clone::DynClone;

use crate::{ClusterDescription, ServerAddress, ServerDescription, TagSet};

pub trait ServerSelector: DynClone + fmt::Debug + fmt::Display + Send + Sync {
    /// Returns the candidates in `cluster` acceptable to this selector. Any one of them
    /// may be used.
    fn select(&self, cluster: &ClusterDescription) -> Vec<ServerDescription>;
}

dyn_clone::clone_trait_object!(ServerSelector);

/// Selects the primary, if one is known.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrimaryServerSelector;

impl ServerSelector for PrimaryServerSelector {
    fn select(&self, cluster: &ClusterDescription) -> Vec<ServerDescription> {
        cluster.primaries()
    }
}

impl fmt::Display for PrimaryServerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrimaryServerSelector")
    }
}

/// Selects any primary or secondary. Outside of a replica set, any ok member.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrimaryOrSecondaryServerSelector;

impl ServerSelector for PrimaryOrSecondaryServerSelector {
    fn select(&self, cluster: &ClusterDescription) -> Vec<ServerDescription> {
        match cluster.cluster_type() {
            crate::ClusterType::ReplicaSet => {
                let mut candidates = cluster.primaries();
                candidates.extend(cluster.secondaries());
                candidates
            }
            _ => cluster.any(),
        }
    }
}

impl fmt::Display for PrimaryOrSecondaryServerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrimaryOrSecondaryServerSelector")
    }
}

/// Selects exactly one address, provided it is ok.
#[derive(Debug, Clone)]
pub struct ServerAddressSelector {
    address: ServerAddress,
}

impl ServerAddressSelector {
    pub fn new(address: ServerAddress) -> Self {
        Self { address }
    }
}

impl ServerSelector for ServerAddressSelector {
    fn select(&self, cluster: &ClusterDescription) -> Vec<ServerDescription> {
        cluster.by_address(&self.address).into_iter().collect()
    }
}

impl fmt::Display for ServerAddressSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerAddressSelector{{address={}}}", self.address)
    }
}

/// Selects secondaries carrying the tags of the first tag set that matches anything.
///
/// Tag sets are tried in order. An empty tag set matches every secondary.
#[derive(Debug, Clone, Default)]
pub struct TagSetServerSelector {
    tag_sets: Vec<TagSet>,
}

impl TagSetServerSelector {
    pub fn new(tag_sets: Vec<TagSet>) -> Self {
        Self { tag_sets }
    }
}

impl ServerSelector for TagSetServerSelector {
    fn select(&self, cluster: &ClusterDescription) -> Vec<ServerDescription> {
        self.tag_sets
            .iter()
            .map(|tag_set| cluster.secondaries_with_tags(tag_set))
            .find(|candidates| !candidates.is_empty())
            .unwrap_or_default()
    }
}

impl fmt::Display for TagSetServerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TagSetServerSelector{{tagSets={:?}}}", self.tag_sets)
    }
}

/// Narrows ok members to those within `acceptable_latency` of the fastest one.
#[derive(Debug, Clone, Copy)]
pub struct LatencyMinimizingServerSelector {
    acceptable_latency: Duration,
}

impl LatencyMinimizingServerSelector {
    pub fn new(acceptable_latency: Duration) -> Self {
        Self { acceptable_latency }
    }
}

impl Default for LatencyMinimizingServerSelector {
    fn default() -> Self {
        Self::new(Duration::from_millis(15))
    }
}

impl ServerSelector for LatencyMinimizingServerSelector {
    fn select(&self, cluster: &ClusterDescription) -> Vec<ServerDescription> {
        let candidates = cluster.any();
        let fastest = match candidates
            .iter()
            .map(ServerDescription::round_trip_time_nanos)
            .min()
        {
            Some(fastest) => fastest,
            None => return Vec::new(),
        };
        let window = u64::try_from(self.acceptable_latency.as_nanos()).unwrap_or(u64::MAX);
        let limit = fastest.saturating_add(window);

        candidates
            .into_iter()
            .filter(|member| member.round_trip_time_nanos() <= limit)
            .collect()
    }
}

impl fmt::Display for LatencyMinimizingServerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LatencyMinimizingServerSelector{{acceptableLatency={} ms}}",
            self.acceptable_latency.as_millis()
        )
    }
}

/// Applies selectors in order, each one seeing only what the previous one selected.
#[derive(Debug, Clone)]
pub struct CompositeServerSelector {
    selectors: Vec<Box<dyn ServerSelector>>,
}

impl CompositeServerSelector {
    pub fn new(selectors: Vec<Box<dyn ServerSelector>>) -> Self {
        Self { selectors }
    }
}

impl ServerSelector for CompositeServerSelector {
    fn select(&self, cluster: &ClusterDescription) -> Vec<ServerDescription> {
        let mut current = cluster.clone();
        for selector in &self.selectors {
            let candidates = selector.select(&current);
            current = cluster.with_members(candidates);
        }
        current.members()
    }
}

impl fmt::Display for CompositeServerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let selectors = self
            .selectors
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "CompositeServerSelector{{selectors=[{}]}}", selectors)
    }
}
