//! Tier / mirror-set / resource placement topology of a bucket.
//!
//! A bucket's placement policy is an ordered list of tiers. Each tier holds
//! mirror sets, and each mirror set holds resources backed by pools. Every
//! mirror set keeps an independent full copy of the tier's data.

use core::fmt;
use std::collections::HashMap;
use std::ops::Add;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::id::ObjectId;
use crate::quota::Quota;

/// Kind of storage resource a mirror set can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceKind {
    /// A pool of host storage nodes; contributes its live node count.
    Hosts,
    /// A cloud target; imposes no drive ceiling.
    Cloud,
    /// Internal database-backed storage; imposes no drive ceiling.
    Internal,
}

/// One leaf of the placement tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Pool name (key into the host pool table).
    pub name: String,
    /// Resource kind.
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    /// Backing pool id.
    pub pool_id: ObjectId,
}

/// A group of resources holding one full copy of a tier's data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorSet {
    /// Mirror set id.
    pub id: ObjectId,
    /// Display name.
    pub name: String,
    /// Resources in declaration order.
    pub resources: Vec<Resource>,
}

/// A named placement layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    /// Tier id.
    pub id: ObjectId,
    /// Display name.
    pub name: String,
    /// Disabled tiers receive no placements and report no mirror groups.
    #[serde(default)]
    pub disabled: bool,
    /// Mirror sets in declaration order.
    pub mirror_sets: Vec<MirrorSet>,
}

/// Ordered tiers of a bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlacementPolicy {
    /// Tiers in declaration order.
    pub tiers: Vec<Tier>,
}

/// A bucket as seen by the placement engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// Bucket id.
    pub id: ObjectId,
    /// Owning system (tenant).
    pub system: ObjectId,
    /// Bucket name.
    pub name: String,
    /// Placement policy.
    pub placement: PlacementPolicy,
    /// Optional quota.
    #[serde(default)]
    pub quota: Option<Quota>,
}

/// One row of a flattened placement policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementRow<'a> {
    /// Bucket name.
    pub bucket: &'a str,
    /// Tier name.
    pub tier: &'a str,
    /// Mirror set name.
    pub mirror_set: &'a str,
    /// The leaf resource.
    pub resource: &'a Resource,
}

/// Live node count of a host pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostPoolInfo {
    /// Storage nodes currently in the pool.
    pub storage_node_count: u64,
}

/// Number of drives a mirror set can offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeCount {
    /// A host-only mirror set with this many nodes.
    Finite(u64),
    /// At least one resource imposes no ceiling.
    Unbounded,
}

impl NodeCount {
    /// Returns the finite count, or `None` when unbounded.
    pub fn finite(&self) -> Option<u64> {
        match self {
            NodeCount::Finite(n) => Some(*n),
            NodeCount::Unbounded => None,
        }
    }
}

impl Add for NodeCount {
    type Output = NodeCount;

    fn add(self, rhs: NodeCount) -> NodeCount {
        match (self, rhs) {
            (NodeCount::Finite(a), NodeCount::Finite(b)) => NodeCount::Finite(a.saturating_add(b)),
            _ => NodeCount::Unbounded,
        }
    }
}

impl fmt::Display for NodeCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeCount::Finite(n) => write!(f, "{}", n),
            NodeCount::Unbounded => write!(f, "unbounded"),
        }
    }
}

impl Bucket {
    /// One row per leaf resource, preserving tier and mirror-set order.
    pub fn flatten(&self) -> Vec<PlacementRow<'_>> {
        self.placement
            .tiers
            .iter()
            .flat_map(|tier| {
                tier.mirror_sets.iter().flat_map(move |ms| {
                    ms.resources.iter().map(move |resource| PlacementRow {
                        bucket: &self.name,
                        tier: &tier.name,
                        mirror_set: &ms.name,
                        resource,
                    })
                })
            })
            .collect()
    }

    /// Contributing node count of every mirror set, tier by tier.
    ///
    /// Host resources contribute their pool's live node count (zero when the
    /// pool is unknown); any other resource makes the mirror set unbounded.
    pub fn count_storage_nodes_per_mirror_set(
        &self,
        host_pools: &HashMap<String, HostPoolInfo>,
    ) -> Vec<NodeCount> {
        let counts: Vec<NodeCount> = self
            .placement
            .tiers
            .iter()
            .flat_map(|tier| tier.mirror_sets.iter())
            .map(|ms| {
                ms.resources
                    .iter()
                    .map(|res| match res.kind {
                        ResourceKind::Hosts => NodeCount::Finite(
                            host_pools
                                .get(&res.name)
                                .map(|p| p.storage_node_count)
                                .unwrap_or(0),
                        ),
                        _ => NodeCount::Unbounded,
                    })
                    .fold(NodeCount::Finite(0), |acc, c| acc + c)
            })
            .collect();
        debug!(bucket = %self.name, ?counts, "counted storage nodes per mirror set");
        counts
    }

    /// The most drives a chunk can be spread over: the smallest mirror set.
    ///
    /// A policy with no mirror sets has a ceiling of zero.
    pub fn drive_ceiling(&self, host_pools: &HashMap<String, HostPoolInfo>) -> NodeCount {
        self.count_storage_nodes_per_mirror_set(host_pools)
            .into_iter()
            .min()
            .unwrap_or(NodeCount::Finite(0))
    }

    /// Total number of resources across all tiers and mirror sets.
    pub fn resource_count(&self) -> usize {
        self.placement
            .tiers
            .iter()
            .flat_map(|t| t.mirror_sets.iter())
            .map(|ms| ms.resources.len())
            .sum()
    }
}

impl PlacementPolicy {
    /// Mirror set of an enabled tier whose resources include `pool_id`.
    ///
    /// When several mirror sets match, the last one declared wins.
    pub fn mirror_group_for_pool(&self, pool_id: ObjectId) -> Option<ObjectId> {
        let mut mirror_group = None;
        for tier in self.tiers.iter().filter(|t| !t.disabled) {
            for ms in &tier.mirror_sets {
                if ms.resources.iter().any(|r| r.pool_id == pool_id) {
                    mirror_group = Some(ms.id);
                }
            }
        }
        mirror_group
    }
}
