//! Identity seam shared by the persisted entity wrappers.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::block::BlockDb;
use crate::chunk::ChunkDb;
use crate::error::StorageResult;
use crate::frag::FragDb;
use crate::id::ObjectId;
use crate::part::PartDb;

/// An entity with a stable identity.
///
/// Entities loaded from the store already have their identity; asking one of
/// them for a new id fails with [`StorageError::IdentityReassignment`].
///
/// [`StorageError::IdentityReassignment`]: crate::error::StorageError::IdentityReassignment
pub trait Identified {
    /// Current identity.
    fn id(&self) -> ObjectId;

    /// Assigns a fresh identity and returns it.
    fn set_new_id(&mut self) -> StorageResult<ObjectId>;
}

// Every persisted wrapper must satisfy the identity contract.
const _: fn() = || {
    fn assert_identified<T: Identified>() {}
    assert_identified::<ChunkDb>();
    assert_identified::<FragDb>();
    assert_identified::<BlockDb>();
    assert_identified::<PartDb>();
};

pub(crate) fn to_b64(buf: Option<&[u8]>) -> Option<String> {
    buf.map(|b| STANDARD.encode(b))
}
