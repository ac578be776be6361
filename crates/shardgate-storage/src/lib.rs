#![warn(missing_docs)]

//! Shardgate storage model: chunk/fragment/block/part entities, placement
//! policy math, resiliency summaries and quota accounting.
//!
//! Everything here is synchronous and side-effect free. Entities wrap the
//! persisted records and derive their children once at construction; the
//! management crate owns persistence and the network.

pub mod block;
pub mod chunk;
pub mod entity;
pub mod error;
pub mod frag;
pub mod id;
pub mod mode;
pub mod part;
pub mod placement;
pub mod quota;
pub mod record;
pub mod resiliency;

pub use block::{BlockAdminInfo, BlockDb, BlockInfo, BlockMd, BlockNode};
pub use chunk::{ChunkCoderConfig, ChunkDb, ChunkInfo};
pub use entity::Identified;
pub use error::{StorageError, StorageResult};
pub use frag::{FragDb, FragInfo, FragRole};
pub use id::{optional_id_str, ObjectId};
pub use mode::{BucketMode, PlacementMode, QuotaMode, ResiliencyMode};
pub use part::{PartDb, PartInfo};
pub use placement::{
    Bucket, HostPoolInfo, MirrorSet, NodeCount, PlacementPolicy, PlacementRow, Resource, ResourceKind, Tier,
};
pub use quota::{quota_breakdown, quota_bytes, DataBreakdown, Quota, QuotaUnit};
pub use record::{BlockRecord, ChunkRecord, FragRecord, PartRecord};
pub use resiliency::{summarize, RebuildEffort, ResiliencyDescriptor, ResiliencySummary, ResiliencyType};
