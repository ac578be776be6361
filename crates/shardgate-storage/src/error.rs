//! Error types for the storage subsystem.

use thiserror::Error;

use crate::id::ObjectId;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error variants for the data-placement model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// A persisted entity was asked to take a new identity.
    ///
    /// This is a logic bug in the caller and is never retried.
    #[error("{entity}: unexpected identity reassignment of persisted {entity} {id}")]
    IdentityReassignment {
        /// Entity kind ("chunk", "frag", "block", "part").
        entity: &'static str,
        /// The identity the entity already has.
        id: ObjectId,
    },

    /// A fragment has none of its data, parity or LRC index set.
    #[error("Invalid fragment {id}: no data, parity or lrc index")]
    InvalidFragment {
        /// The offending fragment.
        id: ObjectId,
    },

    /// A block allocation referenced a fragment the chunk does not own.
    #[error("Fragment {frag_id} not found in chunk {chunk_id}")]
    FragmentNotFound {
        /// The owning chunk.
        chunk_id: ObjectId,
        /// The missing fragment.
        frag_id: ObjectId,
    },

    /// A block's denormalized parent references disagree with its fragment.
    #[error("Block {block_id} references chunk {block_chunk} but its fragment belongs to chunk {chunk_id}")]
    ParentMismatch {
        /// The offending block.
        block_id: ObjectId,
        /// Chunk id recorded on the block.
        block_chunk: ObjectId,
        /// Chunk that actually owns the fragment.
        chunk_id: ObjectId,
    },

    /// A resolved node was attached to a block recorded on another node.
    #[error("Block {block_id} is recorded on node {expected:?}, not {actual}")]
    NodeMismatch {
        /// The block.
        block_id: ObjectId,
        /// Node recorded on the block, if any.
        expected: Option<ObjectId>,
        /// Node that was offered.
        actual: ObjectId,
    },
}
