//! # Block Identity Validator
//!
//! Checks that a block id is well-formed and that it really names the
//! header it is stored with. Used by replay at height boundaries only.

use crate::domain::codec::encode_header;
use crate::domain::entities::{BlockId, BlockMeta, Header, PartSetHeader, HASH_LEN};
use crate::domain::errors::BlockValidationError;
use sha2::{Digest, Sha256};

impl Header {
    /// SHA-256 of the canonical header encoding.
    pub fn hash(&self) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(encode_header(self));
        hasher.finalize().to_vec()
    }
}

impl PartSetHeader {
    pub fn validate_basic(&self) -> Result<(), BlockValidationError> {
        if !self.hash.is_empty() && self.hash.len() != HASH_LEN {
            return Err(BlockValidationError::InvalidHashLength {
                context: "part set header hash",
                expected: HASH_LEN,
                len: self.hash.len(),
            });
        }
        if (self.total == 0) != self.hash.is_empty() {
            return Err(BlockValidationError::InconsistentPartSet {
                total: self.total,
                hash_len: self.hash.len(),
            });
        }
        Ok(())
    }
}

impl BlockId {
    /// Structural checks that need no header.
    pub fn validate_basic(&self) -> Result<(), BlockValidationError> {
        validate_block_id(self)
    }
}

pub fn validate_block_id(block_id: &BlockId) -> Result<(), BlockValidationError> {
    if block_id.hash.len() != HASH_LEN {
        return Err(BlockValidationError::InvalidHashLength {
            context: "block id hash",
            expected: HASH_LEN,
            len: block_id.hash.len(),
        });
    }
    block_id.part_set_header.validate_basic()
}

/// Validate a committed block's meta: a well-formed id whose hash is the
/// header's hash.
pub fn validate_block_meta(meta: &BlockMeta) -> Result<(), BlockValidationError> {
    validate_block_id(&meta.block_id)?;

    let header_hash = meta.header.hash();
    if meta.block_id.hash != header_hash {
        return Err(BlockValidationError::HashMismatch {
            expected: hex::encode_upper(&meta.block_id.hash),
            actual: hex::encode_upper(&header_hash),
        });
    }
    Ok(())
}
