//! Persisted shapes of chunks, fragments, blocks and parts.
//!
//! These are what the metadata store reads and writes. The `*Db` wrappers in
//! the sibling modules derive runtime state from them.

use serde::{Deserialize, Serialize};

use crate::id::ObjectId;

/// One physical replica of a fragment as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    /// Block id.
    pub id: ObjectId,
    /// Owning system (tenant).
    pub system: ObjectId,
    /// Owning bucket (denormalized).
    pub bucket: ObjectId,
    /// Owning chunk (denormalized).
    pub chunk: ObjectId,
    /// Owning fragment.
    pub frag: ObjectId,
    /// Storage node; unset while allocation is pending.
    pub node: Option<ObjectId>,
    /// Pool the node was chosen from; unset while allocation is pending.
    pub pool: Option<ObjectId>,
    /// Bytes held by this block.
    pub size: u64,
}

/// One erasure-coded or replicated unit of a chunk as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragRecord {
    /// Fragment id.
    pub id: ObjectId,
    /// Set for data fragments.
    #[serde(default)]
    pub data_index: Option<u32>,
    /// Set for parity fragments.
    #[serde(default)]
    pub parity_index: Option<u32>,
    /// Set for local-reconstruction fragments.
    #[serde(default)]
    pub lrc_index: Option<u32>,
    /// Content digest.
    #[serde(default)]
    pub digest: Option<Vec<u8>>,
    /// Replicas of this fragment.
    #[serde(default)]
    pub blocks: Vec<BlockRecord>,
}

/// A byte range of an object mapped to a chunk, as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRecord {
    /// Part id.
    pub id: ObjectId,
    /// Owning object, once the upload completes.
    #[serde(default)]
    pub obj: Option<ObjectId>,
    /// Owning multipart upload, while one is in progress.
    #[serde(default)]
    pub multipart: Option<ObjectId>,
    /// Chunk holding the bytes.
    pub chunk: ObjectId,
    /// First byte offset (inclusive).
    pub start: u64,
    /// Last byte offset (exclusive).
    pub end: u64,
    /// Order within the object.
    pub seq: u64,
}

/// A content-addressed, redundancy-protected unit of data as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Chunk id.
    pub id: ObjectId,
    /// Owning system (tenant).
    pub system: ObjectId,
    /// Owning bucket.
    pub bucket: ObjectId,
    /// Tier the chunk was placed on.
    pub tier: ObjectId,
    /// Redundancy configuration the chunk was coded with.
    pub chunk_config: ObjectId,
    /// Logical size in bytes.
    pub size: u64,
    /// Size after compression.
    pub compress_size: u64,
    /// Size of each fragment.
    pub frag_size: u64,
    /// Content digest.
    #[serde(default)]
    pub digest: Option<Vec<u8>>,
    /// Cipher key.
    #[serde(default)]
    pub cipher_key: Option<Vec<u8>>,
    /// Cipher IV.
    #[serde(default)]
    pub cipher_iv: Option<Vec<u8>>,
    /// Cipher authentication tag.
    #[serde(default)]
    pub cipher_auth_tag: Option<Vec<u8>>,
    /// Fragments in index order.
    #[serde(default)]
    pub frags: Vec<FragRecord>,
    /// Parts that reference this chunk.
    #[serde(default)]
    pub parts: Vec<PartRecord>,
}
