// src/block_plan.rs
//
// Deterministic partitioning of a local byte source into bounded blocks.
//
// Block `i` (1-based) covers `[(i-1)*C, min(i*C, S))`. Identifiers are the
// sequence number zero-padded to BLOCK_ID_WIDTH digits, so lexical order of
// the ids equals numeric order of the blocks.

use crate::constants::{BLOCK_ID_WIDTH, DEFAULT_BLOCK_SIZE, MAX_BLOCK_COUNT};
use crate::error::{Result, UploadError};

/// One planned block: a byte range of the source plus its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub block_id: String,
    pub block_number: u32,
    pub offset: u64,
    pub size: u64,
}

impl Block {
    /// Exclusive end offset of the range.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// A block that was uploaded and verified, waiting for commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedBlock {
    pub block_id: String,
    pub block_number: u32,
}

/// Render a sequence number as a fixed-width block identifier.
pub fn block_id(block_number: u32) -> String {
    format!("{:0width$}", block_number, width = BLOCK_ID_WIDTH)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPlan {
    total_size: u64,
    block_size: u64,
    block_count: u64,
}

impl UploadPlan {
    /// Plan `total_size` bytes into blocks no larger than `block_size`.
    ///
    /// Fails with a configuration error when the ceiling is zero or when the
    /// plan would need more blocks than the identifier width can express.
    pub fn new(total_size: u64, block_size: u64) -> Result<Self> {
        if block_size == 0 {
            return Err(UploadError::Config("block size must be greater than zero".into()));
        }
        let block_count = total_size.div_ceil(block_size);
        if block_count > MAX_BLOCK_COUNT {
            return Err(UploadError::Config(format!(
                "{} bytes need {} blocks of {} bytes, more than the supported maximum of {}",
                total_size, block_count, block_size, MAX_BLOCK_COUNT
            )));
        }
        Ok(Self { total_size, block_size, block_count })
    }

    /// Plan with the default 4 MiB ceiling.
    pub fn with_default_block_size(total_size: u64) -> Result<Self> {
        Self::new(total_size, DEFAULT_BLOCK_SIZE)
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    /// Iterate over the planned blocks in sequence order.
    pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        (1..=self.block_count).map(move |n| {
            let offset = (n - 1) * self.block_size;
            let size = (self.total_size - offset).min(self.block_size);
            // block_count <= MAX_BLOCK_COUNT, so the cast cannot truncate
            let block_number = n as u32;
            Block {
                block_id: block_id(block_number),
                block_number,
                offset,
                size,
            }
        })
    }
}
