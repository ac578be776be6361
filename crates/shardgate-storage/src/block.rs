//! Blocks: physical on-node replicas of a fragment.

use serde::{Deserialize, Serialize};

use crate::entity::Identified;
use crate::error::{StorageError, StorageResult};
use crate::id::{optional_id_str, ObjectId};
use crate::placement::PlacementPolicy;
use crate::record::BlockRecord;

/// Storage node a block lives on, as resolved by the node monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockNode {
    /// Node id; must match the block's recorded node.
    pub id: ObjectId,
    /// Node name.
    pub name: String,
    /// Address blocks on this node are read and written through.
    pub rpc_address: String,
    /// Node ip.
    pub ip: String,
    /// Host the node runs on.
    pub host_name: String,
    /// Drive mount point.
    pub mount: String,
    /// Node type (e.g. "BLOCK_STORE_FS").
    pub node_type: String,
    /// Whether the node is heartbeating.
    pub online: bool,
}

/// Block metadata handed to readers and writers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMd {
    /// Block id.
    pub id: String,
    /// Node id, once allocated.
    pub node: Option<String>,
    /// Pool id, once allocated.
    pub pool: Option<String>,
    /// Node address, once the node is attached.
    pub address: Option<String>,
    /// Bytes held by this block.
    pub size: u64,
    /// Node type, once the node is attached.
    pub node_type: Option<String>,
    /// Whether space was reserved before the write.
    pub is_preallocated: bool,
}

/// Admin-only view of where a block sits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAdminInfo {
    /// Node name.
    pub node_name: String,
    /// Host name.
    pub host_name: String,
    /// Drive mount point.
    pub mount: String,
    /// Node ip.
    pub node_ip: String,
    /// Whether the node is heartbeating.
    pub online: bool,
    /// Mirror set the block's pool belongs to.
    pub mirror_group: Option<String>,
}

/// API projection of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Metadata.
    pub block_md: BlockMd,
    /// Readable right now.
    pub is_accessible: bool,
    /// Being allocated.
    pub is_allocation: bool,
    /// Being deleted.
    pub is_deletion: bool,
    /// Scheduled for deletion once a replacement exists.
    pub is_future_deletion: bool,
    /// Present only when requested with a placement policy and a resolved node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adminfo: Option<BlockAdminInfo>,
}

/// A persisted block and its runtime flags.
#[derive(Debug, Clone)]
pub struct BlockDb {
    record: BlockRecord,
    node: Option<BlockNode>,
    /// Candidate pools; set only while the block awaits a node.
    pub allocation_pools: Option<Vec<ObjectId>>,
    /// Readable right now.
    pub is_accessible: bool,
    /// Space was reserved before the write.
    pub is_preallocated: bool,
    /// Being allocated.
    pub is_allocation: bool,
    /// Being deleted.
    pub is_deletion: bool,
    /// Scheduled for deletion once a replacement exists.
    pub is_future_deletion: bool,
}

impl BlockDb {
    /// Wraps a persisted block.
    pub fn new(record: BlockRecord) -> Self {
        Self {
            record,
            node: None,
            allocation_pools: None,
            is_accessible: false,
            is_preallocated: false,
            is_allocation: false,
            is_deletion: false,
            is_future_deletion: false,
        }
    }

    /// Node the block is stored on; unset while allocation is pending.
    pub fn node_id(&self) -> Option<ObjectId> {
        self.record.node
    }

    /// Pool the node was chosen from.
    pub fn pool_id(&self) -> Option<ObjectId> {
        self.record.pool
    }

    /// Owning chunk.
    pub fn chunk_id(&self) -> ObjectId {
        self.record.chunk
    }

    /// Owning fragment.
    pub fn frag_id(&self) -> ObjectId {
        self.record.frag
    }

    /// Owning bucket.
    pub fn bucket_id(&self) -> ObjectId {
        self.record.bucket
    }

    /// Owning system (tenant).
    pub fn system_id(&self) -> ObjectId {
        self.record.system
    }

    /// Bytes held by this block.
    pub fn size(&self) -> u64 {
        self.record.size
    }

    /// The attached node, if resolved.
    pub fn node(&self) -> Option<&BlockNode> {
        self.node.as_ref()
    }

    /// Network address of the block; `None` until allocation completes and
    /// the node has been attached.
    pub fn address(&self) -> Option<&str> {
        self.node.as_ref().map(|n| n.rpc_address.as_str())
    }

    /// Attaches the resolved node the block was allocated on.
    pub fn attach_node(&mut self, node: BlockNode) -> StorageResult<()> {
        if self.record.node != Some(node.id) {
            return Err(StorageError::NodeMismatch {
                block_id: self.record.id,
                expected: self.record.node,
                actual: node.id,
            });
        }
        self.node = Some(node);
        Ok(())
    }

    /// Persisted blocks keep the node they were written to.
    pub fn set_allocated_node(&mut self, _node: ObjectId, _pool: ObjectId) -> StorageResult<()> {
        Err(StorageError::IdentityReassignment {
            entity: "block",
            id: self.record.id,
        })
    }

    /// Persisted blocks keep their parents.
    pub fn set_parent_ids(&mut self, _frag: ObjectId, _chunk: ObjectId) -> StorageResult<()> {
        Err(StorageError::IdentityReassignment {
            entity: "block",
            id: self.record.id,
        })
    }

    /// Metadata the data path needs to read or write the block.
    pub fn to_block_md(&self) -> BlockMd {
        BlockMd {
            id: self.record.id.to_hex(),
            node: optional_id_str(self.record.node),
            pool: optional_id_str(self.record.pool),
            address: self.address().map(str::to_string),
            size: self.record.size,
            node_type: self.node.as_ref().map(|n| n.node_type.clone()),
            is_preallocated: self.is_preallocated,
        }
    }

    /// API projection; admin info needs both a placement policy and a node.
    pub fn to_info(&self, placement: Option<&PlacementPolicy>) -> BlockInfo {
        let adminfo = match (placement, &self.node) {
            (Some(placement), Some(node)) => Some(BlockAdminInfo {
                node_name: node.name.clone(),
                host_name: node.host_name.clone(),
                mount: node.mount.clone(),
                node_ip: node.ip.clone(),
                online: node.online,
                mirror_group: self
                    .record
                    .pool
                    .and_then(|pool| placement.mirror_group_for_pool(pool))
                    .map(|id| id.to_hex()),
            }),
            _ => None,
        };
        BlockInfo {
            block_md: self.to_block_md(),
            is_accessible: self.is_accessible,
            is_allocation: self.is_allocation,
            is_deletion: self.is_deletion,
            is_future_deletion: self.is_future_deletion,
            adminfo,
        }
    }

    /// Persisted shape.
    pub fn to_record(&self) -> BlockRecord {
        self.record.clone()
    }
}

impl Identified for BlockDb {
    fn id(&self) -> ObjectId {
        self.record.id
    }

    fn set_new_id(&mut self) -> StorageResult<ObjectId> {
        Err(StorageError::IdentityReassignment {
            entity: "block",
            id: self.record.id,
        })
    }
}
