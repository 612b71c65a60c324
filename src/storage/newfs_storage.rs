use anyhow::Result;

use crate::disk_format::block::Block;
use crate::metadata::{OwnershipMetadata, TimeMetadata};
use crate::newfs::BlockNumber;

/// A fixed-size, block-addressed device holding a newfs image.
///
/// The filesystem assumes exclusive access for as long as it is mounted.
pub trait NewfsStorage {
    /// The total number of blocks the device holds. Must not change while mounted.
    fn num_blocks(&self) -> Result<usize>;

    fn read_block(&self, block_number: BlockNumber) -> Result<Block>;

    fn write_block(&mut self, block_number: BlockNumber, block: &Block) -> Result<()>;

    /// Makes previously written blocks durable.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn time_metadata(&self) -> Result<TimeMetadata> {
        Ok(TimeMetadata::default())
    }

    fn ownership_metadata(&self) -> Result<OwnershipMetadata> {
        Ok(OwnershipMetadata::default())
    }
}
