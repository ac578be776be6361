//! Chunks: content-addressed, encrypted, redundancy-protected units of data.
//!
//! A [`ChunkDb`] wraps a persisted [`ChunkRecord`]. Its fragments, their
//! blocks, and the parts referencing the chunk are derived once in
//! [`ChunkDb::new`] and owned by the wrapper from then on;
//! [`ChunkDb::to_record`] reassembles the persisted shape.
//!
//! New blocks enter an existing chunk only through
//! [`ChunkDb::add_block_allocation`], which creates a placeholder with no
//! node and leaves node selection to the allocator.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::block::BlockDb;
use crate::entity::{to_b64, Identified};
use crate::error::{StorageError, StorageResult};
use crate::frag::{FragDb, FragInfo};
use crate::id::{optional_id_str, ObjectId};
use crate::part::{PartDb, PartInfo};
use crate::placement::PlacementPolicy;
use crate::record::{BlockRecord, ChunkRecord};
use crate::resiliency::ResiliencyDescriptor;

/// Coding parameters a chunk was written with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkCoderConfig {
    /// Blocks per fragment.
    pub replicas: u32,
    /// Data fragments per chunk.
    pub data_frags: u32,
    /// Parity fragments per chunk.
    #[serde(default)]
    pub parity_frags: u32,
    /// Fragments per LRC group.
    #[serde(default)]
    pub lrc_group: u32,
    /// LRC fragments per group.
    #[serde(default)]
    pub lrc_frags: u32,
    /// Chunk digest algorithm.
    #[serde(default)]
    pub digest_type: Option<String>,
    /// Fragment digest algorithm.
    #[serde(default)]
    pub frag_digest_type: Option<String>,
    /// Compression algorithm.
    #[serde(default)]
    pub compress_type: Option<String>,
    /// Cipher.
    #[serde(default)]
    pub cipher_type: Option<String>,
}

impl ChunkCoderConfig {
    /// Plain replication with `replicas` copies.
    pub fn replicated(replicas: u32) -> Self {
        Self {
            replicas,
            data_frags: 1,
            parity_frags: 0,
            lrc_group: 0,
            lrc_frags: 0,
            digest_type: Some("sha384".to_string()),
            frag_digest_type: Some("sha1".to_string()),
            compress_type: Some("snappy".to_string()),
            cipher_type: Some("aes-256-gcm".to_string()),
        }
    }

    /// Any parity, or more than one data fragment, means erasure coding.
    pub fn resiliency(&self) -> ResiliencyDescriptor {
        if self.parity_frags > 0 || self.data_frags > 1 {
            ResiliencyDescriptor::ErasureCoding {
                data_frags: i64::from(self.data_frags),
                parity_frags: i64::from(self.parity_frags),
            }
        } else {
            ResiliencyDescriptor::Replication {
                replicas: i64::from(self.replicas),
            }
        }
    }
}

/// API projection of a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkInfo {
    /// Chunk id (hex).
    pub id: String,
    /// Owning bucket (hex).
    pub bucket_id: String,
    /// Tier the chunk was placed on (hex).
    pub tier_id: String,
    /// Logical size in bytes.
    pub size: u64,
    /// Size after compression.
    pub compress_size: u64,
    /// Size of each fragment.
    pub frag_size: u64,
    /// Content digest, base64.
    pub digest_b64: Option<String>,
    /// Cipher key, base64.
    pub cipher_key_b64: Option<String>,
    /// Cipher IV, base64.
    pub cipher_iv_b64: Option<String>,
    /// Cipher authentication tag, base64.
    pub cipher_auth_tag_b64: Option<String>,
    /// Coding parameters, when resolved.
    pub chunk_coder_config: Option<ChunkCoderConfig>,
    /// Chunk this one duplicates (hex).
    pub dup_chunk: Option<String>,
    /// Enough fragments are readable.
    pub is_accessible: bool,
    /// Blocks are being allocated.
    pub is_building_blocks: bool,
    /// Fragments are being rebuilt.
    pub is_building_frags: bool,
    /// Fragments in index order.
    pub frags: Vec<FragInfo>,
    /// Parts referencing the chunk.
    pub parts: Vec<PartInfo>,
}

/// A persisted chunk with its derived fragments and parts.
#[derive(Debug, Clone)]
pub struct ChunkDb {
    record: ChunkRecord,
    frags: Vec<FragDb>,
    parts: Vec<PartDb>,
    coder_config: Option<ChunkCoderConfig>,
    /// Chunk this one duplicates, found by dedup.
    pub dup_chunk_id: Option<ObjectId>,
    /// A read or write against this chunk failed.
    pub had_errors: bool,
    /// Enough fragments are readable.
    pub is_accessible: bool,
    /// Blocks are being allocated.
    pub is_building_blocks: bool,
    /// Fragments are being rebuilt.
    pub is_building_frags: bool,
}

impl ChunkDb {
    /// Wraps a persisted chunk, deriving fragments, blocks and parts.
    ///
    /// Fails if any block names a different owning chunk.
    pub fn new(mut record: ChunkRecord) -> StorageResult<Self> {
        let frags: Vec<FragDb> = std::mem::take(&mut record.frags)
            .into_iter()
            .map(FragDb::new)
            .collect();
        let parts = std::mem::take(&mut record.parts)
            .into_iter()
            .map(PartDb::new)
            .collect();

        if let Some(block) = frags
            .iter()
            .flat_map(|f| f.blocks())
            .find(|b| b.chunk_id() != record.id)
        {
            return Err(StorageError::ParentMismatch {
                block_id: block.id(),
                block_chunk: block.chunk_id(),
                chunk_id: record.id,
            });
        }

        Ok(Self {
            record,
            frags,
            parts,
            coder_config: None,
            dup_chunk_id: None,
            had_errors: false,
            is_accessible: false,
            is_building_blocks: false,
            is_building_frags: false,
        })
    }

    /// Attaches the coder config resolved from `chunk_config_id`.
    pub fn with_coder_config(mut self, config: ChunkCoderConfig) -> Self {
        self.coder_config = Some(config);
        self
    }

    /// Owning system (tenant).
    pub fn system_id(&self) -> ObjectId {
        self.record.system
    }

    /// Owning bucket.
    pub fn bucket_id(&self) -> ObjectId {
        self.record.bucket
    }

    /// Tier the chunk was placed on.
    pub fn tier_id(&self) -> ObjectId {
        self.record.tier
    }

    /// Redundancy configuration id.
    pub fn chunk_config_id(&self) -> ObjectId {
        self.record.chunk_config
    }

    /// Logical size in bytes.
    pub fn size(&self) -> u64 {
        self.record.size
    }

    /// Size after compression.
    pub fn compress_size(&self) -> u64 {
        self.record.compress_size
    }

    /// Size of each fragment.
    pub fn frag_size(&self) -> u64 {
        self.record.frag_size
    }

    /// Content digest, base64.
    pub fn digest_b64(&self) -> Option<String> {
        to_b64(self.record.digest.as_deref())
    }

    /// Cipher key, base64.
    pub fn cipher_key_b64(&self) -> Option<String> {
        to_b64(self.record.cipher_key.as_deref())
    }

    /// Cipher IV, base64.
    pub fn cipher_iv_b64(&self) -> Option<String> {
        to_b64(self.record.cipher_iv.as_deref())
    }

    /// Cipher authentication tag, base64.
    pub fn cipher_auth_tag_b64(&self) -> Option<String> {
        to_b64(self.record.cipher_auth_tag.as_deref())
    }

    /// Coding parameters, if attached.
    pub fn coder_config(&self) -> Option<&ChunkCoderConfig> {
        self.coder_config.as_ref()
    }

    /// Fragments in index order.
    pub fn frags(&self) -> &[FragDb] {
        &self.frags
    }

    /// Mutable fragments, for allocation bookkeeping.
    pub fn frags_mut(&mut self) -> &mut [FragDb] {
        &mut self.frags
    }

    /// Parts referencing the chunk.
    pub fn parts(&self) -> &[PartDb] {
        &self.parts
    }

    /// Fragment whose index label (`D0`, `P1`, ...) equals `label`.
    pub fn fragment_by_index(&self, label: &str) -> Option<&FragDb> {
        self.frags
            .iter()
            .find(|f| f.index_label().map(|l| l == label).unwrap_or(false))
    }

    /// Every block of every fragment, in fragment order.
    pub fn blocks(&self) -> impl Iterator<Item = &BlockDb> {
        self.frags.iter().flat_map(|f| f.blocks().iter())
    }

    /// Appends a block placeholder to `frag_id`, to be placed on one of `pools`.
    ///
    /// The block has no node or pool yet. Both the fragment and the chunk are
    /// marked as building blocks. Returns the new block's id.
    pub fn add_block_allocation(&mut self, frag_id: ObjectId, pools: Vec<ObjectId>) -> StorageResult<ObjectId> {
        let chunk_id = self.record.id;
        let frag = self
            .frags
            .iter_mut()
            .find(|f| f.id() == frag_id)
            .ok_or(StorageError::FragmentNotFound { chunk_id, frag_id })?;

        let block_id = ObjectId::new();
        let mut block = BlockDb::new(BlockRecord {
            id: block_id,
            system: self.record.system,
            bucket: self.record.bucket,
            chunk: chunk_id,
            frag: frag_id,
            node: None,
            pool: None,
            size: self.record.frag_size,
        });
        debug!(chunk = %chunk_id, frag = %frag_id, block = %block_id, pools = pools.len(), "added block allocation");
        block.allocation_pools = Some(pools);
        frag.push_block(block);
        frag.is_building_blocks = true;
        self.is_building_blocks = true;
        Ok(block_id)
    }

    /// API projection; pass the bucket's placement to include block admin info.
    pub fn to_info(&self, placement: Option<&PlacementPolicy>) -> ChunkInfo {
        ChunkInfo {
            id: self.record.id.to_hex(),
            bucket_id: self.record.bucket.to_hex(),
            tier_id: self.record.tier.to_hex(),
            size: self.record.size,
            compress_size: self.record.compress_size,
            frag_size: self.record.frag_size,
            digest_b64: self.digest_b64(),
            cipher_key_b64: self.cipher_key_b64(),
            cipher_iv_b64: self.cipher_iv_b64(),
            cipher_auth_tag_b64: self.cipher_auth_tag_b64(),
            chunk_coder_config: self.coder_config.clone(),
            dup_chunk: optional_id_str(self.dup_chunk_id),
            is_accessible: self.is_accessible,
            is_building_blocks: self.is_building_blocks,
            is_building_frags: self.is_building_frags,
            frags: self.frags.iter().map(|f| f.to_info(placement)).collect(),
            parts: self.parts.iter().map(PartDb::to_info).collect(),
        }
    }

    /// Persisted shape, including blocks added since loading.
    pub fn to_record(&self) -> ChunkRecord {
        ChunkRecord {
            frags: self.frags.iter().map(FragDb::to_record).collect(),
            parts: self.parts.iter().map(PartDb::to_record).collect(),
            ..self.record.clone()
        }
    }
}

impl Identified for ChunkDb {
    fn id(&self) -> ObjectId {
        self.record.id
    }

    fn set_new_id(&mut self) -> StorageResult<ObjectId> {
        Err(StorageError::IdentityReassignment {
            entity: "chunk",
            id: self.record.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FragRecord, PartRecord};

    fn block_record(chunk: ObjectId, frag: ObjectId, size: u64) -> BlockRecord {
        BlockRecord {
            id: ObjectId::new(),
            system: ObjectId::new(),
            bucket: ObjectId::new(),
            chunk,
            frag,
            node: Some(ObjectId::new()),
            pool: Some(ObjectId::new()),
            size,
        }
    }

    fn chunk_record() -> ChunkRecord {
        let id = ObjectId::new();
        let d0 = ObjectId::new();
        let p0 = ObjectId::new();
        ChunkRecord {
            id,
            system: ObjectId::new(),
            bucket: ObjectId::new(),
            tier: ObjectId::new(),
            chunk_config: ObjectId::new(),
            size: 1000,
            compress_size: 800,
            frag_size: 400,
            digest: Some(b"digest".to_vec()),
            cipher_key: Some(vec![1, 2, 3]),
            cipher_iv: None,
            cipher_auth_tag: None,
            frags: vec![
                FragRecord {
                    id: d0,
                    data_index: Some(0),
                    parity_index: None,
                    lrc_index: None,
                    digest: None,
                    blocks: vec![block_record(id, d0, 400), block_record(id, d0, 400)],
                },
                FragRecord {
                    id: p0,
                    data_index: None,
                    parity_index: Some(0),
                    lrc_index: None,
                    digest: None,
                    blocks: vec![block_record(id, p0, 400)],
                },
            ],
            parts: vec![PartRecord {
                id: ObjectId::new(),
                obj: Some(ObjectId::new()),
                multipart: None,
                chunk: id,
                start: 0,
                end: 1000,
                seq: 0,
            }],
        }
    }

    #[test]
    fn test_derived_collections() {
        let chunk = ChunkDb::new(chunk_record()).unwrap();
        assert_eq!(chunk.frags().len(), 2);
        assert_eq!(chunk.parts().len(), 1);
        assert_eq!(chunk.blocks().count(), 3);
        assert!(chunk.blocks().all(|b| b.chunk_id() == chunk.id()));
    }

    #[test]
    fn test_fragment_by_index() {
        let chunk = ChunkDb::new(chunk_record()).unwrap();
        assert_eq!(chunk.fragment_by_index("D0").unwrap().data_index(), Some(0));
        assert_eq!(chunk.fragment_by_index("P0").unwrap().parity_index(), Some(0));
        assert!(chunk.fragment_by_index("D1").is_none());
    }

    #[test]
    fn test_block_of_foreign_chunk_rejected() {
        let mut record = chunk_record();
        let foreign = ObjectId::new();
        let frag_id = record.frags[0].id;
        record.frags[0].blocks.push(block_record(foreign, frag_id, 10));
        let err = ChunkDb::new(record).unwrap_err();
        assert!(matches!(err, StorageError::ParentMismatch { block_chunk, .. } if block_chunk == foreign));
    }

    #[test]
    fn test_add_block_allocation() {
        let mut chunk = ChunkDb::new(chunk_record()).unwrap();
        let frag_id = chunk.frags()[1].id();
        let pools = vec![ObjectId::new(), ObjectId::new()];

        let block_id = chunk.add_block_allocation(frag_id, pools.clone()).unwrap();

        assert!(chunk.is_building_blocks);
        let frag = &chunk.frags()[1];
        assert!(frag.is_building_blocks);
        assert!(!chunk.frags()[0].is_building_blocks);
        assert_eq!(frag.blocks().len(), 2);

        let block = frag.blocks().last().unwrap();
        assert_eq!(block.id(), block_id);
        assert_eq!(block.node_id(), None);
        assert_eq!(block.pool_id(), None);
        assert_eq!(block.address(), None);
        assert_eq!(block.chunk_id(), chunk.id());
        assert_eq!(block.frag_id(), frag_id);
        assert_eq!(block.bucket_id(), chunk.bucket_id());
        assert_eq!(block.system_id(), chunk.system_id());
        assert_eq!(block.size(), chunk.frag_size());
        assert_eq!(block.allocation_pools.as_deref(), Some(pools.as_slice()));
    }

    #[test]
    fn test_add_block_allocation_unknown_frag() {
        let mut chunk = ChunkDb::new(chunk_record()).unwrap();
        let err = chunk.add_block_allocation(ObjectId::new(), vec![]).unwrap_err();
        assert!(matches!(err, StorageError::FragmentNotFound { .. }));
        assert!(!chunk.is_building_blocks);
    }

    #[test]
    fn test_to_record_includes_new_blocks() {
        let mut chunk = ChunkDb::new(chunk_record()).unwrap();
        let frag_id = chunk.frags()[0].id();
        chunk.add_block_allocation(frag_id, vec![]).unwrap();

        let record = chunk.to_record();
        assert_eq!(record.id, chunk.id());
        assert_eq!(record.frags[0].blocks.len(), 3);
        assert_eq!(record.parts.len(), 1);
    }

    #[test]
    fn test_identity_is_immutable() {
        let mut chunk = ChunkDb::new(chunk_record()).unwrap();
        let id = chunk.id();
        assert_eq!(
            chunk.set_new_id(),
            Err(StorageError::IdentityReassignment { entity: "chunk", id })
        );
    }

    #[test]
    fn test_info_projection() {
        let chunk = ChunkDb::new(chunk_record())
            .unwrap()
            .with_coder_config(ChunkCoderConfig::replicated(3));
        let info = chunk.to_info(None);
        assert_eq!(info.id, chunk.id().to_hex());
        assert_eq!(info.digest_b64.as_deref(), Some("ZGlnZXN0"));
        assert_eq!(info.cipher_key_b64.as_deref(), Some("AQID"));
        assert_eq!(info.cipher_iv_b64, None);
        assert_eq!(info.frags.len(), 2);
        assert_eq!(info.frags[0].blocks.len(), 2);
        assert_eq!(info.chunk_coder_config.unwrap().replicas, 3);
    }

    #[test]
    fn test_coder_config_resiliency() {
        assert_eq!(
            ChunkCoderConfig::replicated(3).resiliency(),
            ResiliencyDescriptor::Replication { replicas: 3 }
        );
        let ec = ChunkCoderConfig {
            data_frags: 4,
            parity_frags: 2,
            ..ChunkCoderConfig::replicated(1)
        };
        assert_eq!(ec.resiliency(), ResiliencyDescriptor::ec_4_2());
    }
}
