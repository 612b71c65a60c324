use anyhow::{anyhow, Result};

use crate::disk_format::block::{Block, EMPTY_BLOCK};
use crate::newfs::BlockNumber;

use super::newfs_storage::NewfsStorage;

/// A RAM disk. Starts out blank (all zeroes).
#[derive(Clone)]
pub struct MemoryStorage {
    blocks: Vec<Block>,
}

impl MemoryStorage {
    /// Constructs a new [`MemoryStorage`] of `num_blocks` zeroed blocks.
    #[must_use]
    pub fn new(num_blocks: usize) -> Self {
        Self {
            blocks: vec![EMPTY_BLOCK; num_blocks],
        }
    }
}

impl NewfsStorage for MemoryStorage {
    fn num_blocks(&self) -> Result<usize> {
        Ok(self.blocks.len())
    }

    fn read_block(&self, block_number: BlockNumber) -> Result<Block> {
        self.blocks
            .get(block_number)
            .copied()
            .ok_or_else(|| anyhow!("block number out of bounds: {block_number}"))
    }

    fn write_block(&mut self, block_number: BlockNumber, block: &Block) -> Result<()> {
        let slot = self
            .blocks
            .get_mut(block_number)
            .ok_or_else(|| anyhow!("block number out of bounds: {block_number}"))?;

        *slot = *block;

        Ok(())
    }
}
