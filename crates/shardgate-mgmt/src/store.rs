//! Persistence seam for nodes, tiers, vendors and data blocks.
//!
//! Every query is tenant-scoped and skips soft-deleted records. The
//! in-memory store backs the server and the tests; a database-backed store
//! plugs in behind the same trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shardgate_storage::{BlockRecord, ObjectId};
use tokio::sync::RwLock;

use crate::error::{MgmtError, MgmtResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierRecord {
    pub id: ObjectId,
    pub system: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStorage {
    pub alloc: u64,
    pub used: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: ObjectId,
    pub system: String,
    pub name: String,
    pub tier: ObjectId,
    pub is_server: bool,
    pub geolocation: Option<String>,
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub heartbeat: DateTime<Utc>,
    pub storage: NodeStorage,
    pub vendor: Option<ObjectId>,
    pub vendor_node_id: Option<String>,
    pub device_info: Option<serde_json::Value>,
    pub started: bool,
    pub deleted: Option<DateTime<Utc>>,
}

/// Field-wise node update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeUpdate {
    pub is_server: Option<bool>,
    pub geolocation: Option<String>,
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub heartbeat: Option<DateTime<Utc>>,
    pub storage_alloc: Option<u64>,
    pub storage_used: Option<u64>,
    pub device_info: Option<serde_json::Value>,
    pub started: Option<bool>,
    pub deleted: Option<DateTime<Utc>>,
}

impl NodeUpdate {
    fn apply(self, node: &mut NodeRecord) {
        if let Some(v) = self.is_server {
            node.is_server = v;
        }
        if let Some(v) = self.geolocation {
            node.geolocation = Some(v);
        }
        if let Some(v) = self.ip {
            node.ip = Some(v);
        }
        if let Some(v) = self.port {
            node.port = Some(v);
        }
        if let Some(v) = self.heartbeat {
            node.heartbeat = v;
        }
        if let Some(v) = self.storage_alloc {
            node.storage.alloc = v;
        }
        if let Some(v) = self.storage_used {
            node.storage.used = v;
        }
        if let Some(v) = self.device_info {
            node.device_info = Some(v);
        }
        if let Some(v) = self.started {
            node.started = v;
        }
        if let Some(v) = self.deleted {
            node.deleted = Some(v);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorRecord {
    pub id: ObjectId,
    pub system: String,
    pub name: String,
    pub category: Option<String>,
    pub kind: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

#[async_trait]
pub trait NodeStore: Send + Sync {
    async fn insert_tier(&self, tier: TierRecord) -> MgmtResult<()>;

    async fn find_tier(&self, system: &str, name: &str) -> MgmtResult<Option<TierRecord>>;

    /// Unscoped lookup; callers compare `system` themselves.
    async fn get_tier(&self, id: ObjectId) -> MgmtResult<Option<TierRecord>>;

    /// Fails with `AlreadyExists` when the name is taken within the system.
    async fn insert_node(&self, node: NodeRecord) -> MgmtResult<()>;

    async fn find_node(&self, system: &str, name: &str) -> MgmtResult<Option<NodeRecord>>;

    async fn get_node(&self, system: &str, id: ObjectId) -> MgmtResult<Option<NodeRecord>>;

    /// Live nodes of `system`, newest first.
    async fn list_nodes(&self, system: &str) -> MgmtResult<Vec<NodeRecord>>;

    /// Applies `update` to a live node and returns the result.
    async fn update_node(&self, system: &str, id: ObjectId, update: NodeUpdate) -> MgmtResult<NodeRecord>;

    async fn nodes_by_vendor(&self, system: &str, vendor: ObjectId) -> MgmtResult<Vec<NodeRecord>>;

    async fn insert_vendor(&self, vendor: VendorRecord) -> MgmtResult<()>;

    async fn find_vendor(&self, system: &str, name: &str) -> MgmtResult<Option<VendorRecord>>;

    async fn get_vendor(&self, id: ObjectId) -> MgmtResult<Option<VendorRecord>>;

    /// Stores all of `blocks` or none; fails with `AlreadyExists` if any id
    /// is already stored.
    async fn insert_blocks(&self, blocks: Vec<BlockRecord>) -> MgmtResult<()>;

    /// Total size of every block currently assigned to `node`.
    async fn sum_block_sizes(&self, node: ObjectId) -> MgmtResult<u64>;
}

#[derive(Default)]
struct MemoryState {
    tiers: Vec<TierRecord>,
    // insertion order; newest last
    nodes: Vec<NodeRecord>,
    vendors: Vec<VendorRecord>,
    blocks: Vec<BlockRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_live(node: &NodeRecord, system: &str) -> bool {
    node.system == system && node.deleted.is_none()
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn insert_tier(&self, tier: TierRecord) -> MgmtResult<()> {
        let mut state = self.state.write().await;
        if state
            .tiers
            .iter()
            .any(|t| t.system == tier.system && t.name == tier.name)
        {
            return Err(MgmtError::AlreadyExists {
                kind: "tier",
                name: tier.name,
            });
        }
        state.tiers.push(tier);
        Ok(())
    }

    async fn find_tier(&self, system: &str, name: &str) -> MgmtResult<Option<TierRecord>> {
        let state = self.state.read().await;
        Ok(state
            .tiers
            .iter()
            .find(|t| t.system == system && t.name == name)
            .cloned())
    }

    async fn get_tier(&self, id: ObjectId) -> MgmtResult<Option<TierRecord>> {
        let state = self.state.read().await;
        Ok(state.tiers.iter().find(|t| t.id == id).cloned())
    }

    async fn insert_node(&self, node: NodeRecord) -> MgmtResult<()> {
        let mut state = self.state.write().await;
        if state
            .nodes
            .iter()
            .any(|n| is_live(n, &node.system) && n.name == node.name)
        {
            return Err(MgmtError::AlreadyExists {
                kind: "node",
                name: node.name,
            });
        }
        state.nodes.push(node);
        Ok(())
    }

    async fn find_node(&self, system: &str, name: &str) -> MgmtResult<Option<NodeRecord>> {
        let state = self.state.read().await;
        Ok(state
            .nodes
            .iter()
            .find(|n| is_live(n, system) && n.name == name)
            .cloned())
    }

    async fn get_node(&self, system: &str, id: ObjectId) -> MgmtResult<Option<NodeRecord>> {
        let state = self.state.read().await;
        Ok(state
            .nodes
            .iter()
            .find(|n| n.id == id && is_live(n, system))
            .cloned())
    }

    async fn list_nodes(&self, system: &str) -> MgmtResult<Vec<NodeRecord>> {
        let state = self.state.read().await;
        Ok(state
            .nodes
            .iter()
            .rev()
            .filter(|n| is_live(n, system))
            .cloned()
            .collect())
    }

    async fn update_node(&self, system: &str, id: ObjectId, update: NodeUpdate) -> MgmtResult<NodeRecord> {
        let mut state = self.state.write().await;
        let node = state
            .nodes
            .iter_mut()
            .find(|n| n.id == id && is_live(n, system))
            .ok_or_else(|| MgmtError::not_found("node", id.to_string()))?;
        update.apply(node);
        Ok(node.clone())
    }

    async fn nodes_by_vendor(&self, system: &str, vendor: ObjectId) -> MgmtResult<Vec<NodeRecord>> {
        let state = self.state.read().await;
        Ok(state
            .nodes
            .iter()
            .filter(|n| is_live(n, system) && n.vendor == Some(vendor))
            .cloned()
            .collect())
    }

    async fn insert_vendor(&self, vendor: VendorRecord) -> MgmtResult<()> {
        let mut state = self.state.write().await;
        if state
            .vendors
            .iter()
            .any(|v| v.system == vendor.system && v.name == vendor.name)
        {
            return Err(MgmtError::AlreadyExists {
                kind: "vendor",
                name: vendor.name,
            });
        }
        state.vendors.push(vendor);
        Ok(())
    }

    async fn find_vendor(&self, system: &str, name: &str) -> MgmtResult<Option<VendorRecord>> {
        let state = self.state.read().await;
        Ok(state
            .vendors
            .iter()
            .find(|v| v.system == system && v.name == name)
            .cloned())
    }

    async fn get_vendor(&self, id: ObjectId) -> MgmtResult<Option<VendorRecord>> {
        let state = self.state.read().await;
        Ok(state.vendors.iter().find(|v| v.id == id).cloned())
    }

    async fn insert_blocks(&self, blocks: Vec<BlockRecord>) -> MgmtResult<()> {
        let mut state = self.state.write().await;
        if let Some(dup) = blocks.iter().find(|b| state.blocks.iter().any(|stored| stored.id == b.id)) {
            return Err(MgmtError::AlreadyExists {
                kind: "block",
                name: dup.id.to_string(),
            });
        }
        state.blocks.extend(blocks);
        Ok(())
    }

    async fn sum_block_sizes(&self, node: ObjectId) -> MgmtResult<u64> {
        let state = self.state.read().await;
        Ok(state
            .blocks
            .iter()
            .filter(|b| b.node == Some(node))
            .fold(0u64, |acc, b| acc.saturating_add(b.size)))
    }
}
