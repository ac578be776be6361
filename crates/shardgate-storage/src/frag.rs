//! Fragments: the data, parity or LRC units a chunk is coded into.

use serde::{Deserialize, Serialize};

use crate::block::{BlockDb, BlockInfo};
use crate::entity::{to_b64, Identified};
use crate::error::{StorageError, StorageResult};
use crate::id::ObjectId;
use crate::placement::PlacementPolicy;
use crate::record::FragRecord;

/// Role of a fragment within its chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FragRole {
    /// Data fragment `D<i>`.
    Data(u32),
    /// Parity fragment `P<i>`.
    Parity(u32),
    /// Local reconstruction fragment `L<i>`.
    Lrc(u32),
}

impl FragRole {
    /// Label such as `D0`, `P1` or `L2`.
    pub fn label(&self) -> String {
        match self {
            FragRole::Data(i) => format!("D{}", i),
            FragRole::Parity(i) => format!("P{}", i),
            FragRole::Lrc(i) => format!("L{}", i),
        }
    }
}

/// API projection of a fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragInfo {
    /// Fragment id (hex).
    pub id: String,
    /// Set for data fragments.
    pub data_index: Option<u32>,
    /// Set for parity fragments.
    pub parity_index: Option<u32>,
    /// Set for local-reconstruction fragments.
    pub lrc_index: Option<u32>,
    /// Content digest, base64.
    pub digest_b64: Option<String>,
    /// Replicas of this fragment.
    pub blocks: Vec<BlockInfo>,
}

/// A persisted fragment with its blocks.
#[derive(Debug, Clone)]
pub struct FragDb {
    record: FragRecord,
    blocks: Vec<BlockDb>,
    /// Enough blocks are readable.
    pub is_accessible: bool,
    /// Blocks are being allocated for this fragment.
    pub is_building_blocks: bool,
}

impl FragDb {
    /// Wraps a persisted fragment; its blocks are built once here.
    pub fn new(mut record: FragRecord) -> Self {
        let blocks = std::mem::take(&mut record.blocks)
            .into_iter()
            .map(BlockDb::new)
            .collect();
        Self {
            record,
            blocks,
            is_accessible: false,
            is_building_blocks: false,
        }
    }

    /// Index among data fragments.
    pub fn data_index(&self) -> Option<u32> {
        self.record.data_index
    }

    /// Index among parity fragments.
    pub fn parity_index(&self) -> Option<u32> {
        self.record.parity_index
    }

    /// Index among LRC fragments.
    pub fn lrc_index(&self) -> Option<u32> {
        self.record.lrc_index
    }

    /// Content digest, base64.
    pub fn digest_b64(&self) -> Option<String> {
        to_b64(self.record.digest.as_deref())
    }

    /// Role derived from whichever index is set, checked data, parity, lrc.
    pub fn role(&self) -> StorageResult<FragRole> {
        if let Some(i) = self.record.data_index {
            return Ok(FragRole::Data(i));
        }
        if let Some(i) = self.record.parity_index {
            return Ok(FragRole::Parity(i));
        }
        if let Some(i) = self.record.lrc_index {
            return Ok(FragRole::Lrc(i));
        }
        Err(StorageError::InvalidFragment { id: self.record.id })
    }

    /// The `D<i>` / `P<i>` / `L<i>` label.
    pub fn index_label(&self) -> StorageResult<String> {
        self.role().map(|r| r.label())
    }

    /// Replicas of this fragment.
    pub fn blocks(&self) -> &[BlockDb] {
        &self.blocks
    }

    /// Mutable replicas, for allocation bookkeeping.
    pub fn blocks_mut(&mut self) -> &mut [BlockDb] {
        &mut self.blocks
    }

    pub(crate) fn push_block(&mut self, block: BlockDb) {
        self.blocks.push(block);
    }

    /// API projection; pass the bucket's placement to include block admin info.
    pub fn to_info(&self, placement: Option<&PlacementPolicy>) -> FragInfo {
        FragInfo {
            id: self.record.id.to_hex(),
            data_index: self.record.data_index,
            parity_index: self.record.parity_index,
            lrc_index: self.record.lrc_index,
            digest_b64: self.digest_b64(),
            blocks: self.blocks.iter().map(|b| b.to_info(placement)).collect(),
        }
    }

    /// Persisted shape, including blocks appended since loading.
    pub fn to_record(&self) -> FragRecord {
        FragRecord {
            blocks: self.blocks.iter().map(BlockDb::to_record).collect(),
            ..self.record.clone()
        }
    }
}

impl Identified for FragDb {
    fn id(&self) -> ObjectId {
        self.record.id
    }

    fn set_new_id(&mut self) -> StorageResult<ObjectId> {
        Err(StorageError::IdentityReassignment {
            entity: "frag",
            id: self.record.id,
        })
    }
}
