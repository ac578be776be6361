//! Parts: byte ranges of an object mapped onto chunks.

use serde::{Deserialize, Serialize};

use crate::entity::Identified;
use crate::error::{StorageError, StorageResult};
use crate::id::{optional_id_str, ObjectId};
use crate::record::PartRecord;

/// API projection of a part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartInfo {
    /// Owning object (hex), once the upload completes.
    pub obj_id: Option<String>,
    /// Chunk holding the bytes (hex).
    pub chunk_id: String,
    /// Owning multipart upload (hex), while in progress.
    pub multipart_id: Option<String>,
    /// Order within the object.
    pub seq: u64,
    /// First byte offset (inclusive).
    pub start: u64,
    /// Last byte offset (exclusive).
    pub end: u64,
}

/// A persisted part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartDb {
    record: PartRecord,
}

impl PartDb {
    /// Wraps a persisted part.
    pub fn new(record: PartRecord) -> Self {
        Self { record }
    }

    /// Owning object, once the upload completes.
    pub fn obj_id(&self) -> Option<ObjectId> {
        self.record.obj
    }

    /// Chunk holding the bytes.
    pub fn chunk_id(&self) -> ObjectId {
        self.record.chunk
    }

    /// Owning multipart upload, while in progress.
    pub fn multipart_id(&self) -> Option<ObjectId> {
        self.record.multipart
    }

    /// First byte offset (inclusive).
    pub fn start(&self) -> u64 {
        self.record.start
    }

    /// Last byte offset (exclusive).
    pub fn end(&self) -> u64 {
        self.record.end
    }

    /// Order within the object.
    pub fn seq(&self) -> u64 {
        self.record.seq
    }

    /// Bytes covered by `[start, end)`.
    pub fn len(&self) -> u64 {
        self.record.end.saturating_sub(self.record.start)
    }

    /// Whether the part covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Points the part at a different chunk (dedup).
    pub fn set_chunk(&mut self, chunk_id: ObjectId) {
        self.record.chunk = chunk_id;
    }

    /// Binds a multipart part to its completed object.
    pub fn set_obj_id(&mut self, obj_id: ObjectId) {
        self.record.obj = Some(obj_id);
    }

    /// API projection.
    pub fn to_info(&self) -> PartInfo {
        PartInfo {
            obj_id: optional_id_str(self.record.obj),
            chunk_id: self.record.chunk.to_hex(),
            multipart_id: optional_id_str(self.record.multipart),
            seq: self.record.seq,
            start: self.record.start,
            end: self.record.end,
        }
    }

    /// Persisted shape.
    pub fn to_record(&self) -> PartRecord {
        self.record.clone()
    }
}

impl Identified for PartDb {
    fn id(&self) -> ObjectId {
        self.record.id
    }

    fn set_new_id(&mut self) -> StorageResult<ObjectId> {
        Err(StorageError::IdentityReassignment {
            entity: "part",
            id: self.record.id,
        })
    }
}
