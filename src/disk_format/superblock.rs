use anyhow::{bail, ensure, Result};
use serde::{Deserialize, Serialize};

use crate::newfs::{BlockNumber, InodeNumber};

use super::{
    block::{BITS_PER_BLOCK, BLOCK_SIZE},
    inode::{INODE_SIZE, ROOT_INODE},
};

/// Identifies a formatted newfs image.
pub const MAGIC: u32 = 0x4e46_5321;

/// The block number of the superblock.
pub const SUPERBLOCK_BLOCK_NUMBER: BlockNumber = 0;

/// The number of bytes occupied by a serialized superblock.
pub const SUPERBLOCK_SIZE: usize = 4 * 15;

/// Describes the geometry of the image and where each region lives.
///
/// Regions are laid out in this order: superblock, inode bitmap, data bitmap, inode table, data.
/// Start positions are absolute block numbers; data block indices stored in inodes are relative
/// to `data_start`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct Superblock {
    pub magic: u32,
    pub block_size: u32,
    /// The number of blocks in the underlying storage.
    pub num_blocks: u32,
    /// The number of usable inode ids. Ids are one-indexed.
    pub max_inodes: u32,
    pub inode_bitmap_start: u32,
    pub inode_bitmap_blocks: u32,
    pub data_bitmap_start: u32,
    pub data_bitmap_blocks: u32,
    pub inode_table_start: u32,
    pub inode_table_blocks: u32,
    pub data_start: u32,
    pub num_data_blocks: u32,
    pub root_inode: u32,
    /// The number of inode ids in use, including the root.
    pub allocated_inodes: u32,
    /// The number of data blocks in use.
    pub allocated_blocks: u32,
}

impl Superblock {
    /// Lays out a fresh image over `num_blocks` blocks with room for `max_inodes` inodes.
    pub fn new(num_blocks: usize, max_inodes: usize) -> Result<Self> {
        ensure!(max_inodes >= 1, "at least the root inode is required");
        ensure!(
            num_blocks <= u32::MAX as usize && max_inodes < u32::MAX as usize,
            "storage too large"
        );

        // inode ids are one-indexed; slot zero exists in the bitmap and the table but is unused
        let inode_slots = max_inodes + 1;

        let inode_bitmap_start = SUPERBLOCK_BLOCK_NUMBER + 1;
        let inode_bitmap_blocks = inode_slots.div_ceil(BITS_PER_BLOCK);
        let data_bitmap_start = inode_bitmap_start + inode_bitmap_blocks;
        let data_bitmap_blocks = num_blocks.div_ceil(BITS_PER_BLOCK);
        let inode_table_start = data_bitmap_start + data_bitmap_blocks;
        let inode_table_blocks = (inode_slots * INODE_SIZE).div_ceil(BLOCK_SIZE);
        let data_start = inode_table_start + inode_table_blocks;

        if data_start >= num_blocks {
            bail!(
                "{num_blocks} blocks cannot hold {max_inodes} inodes and any data \
                 (metadata needs {data_start} blocks)"
            );
        }

        Ok(Superblock {
            magic: MAGIC,
            block_size: BLOCK_SIZE as u32,
            num_blocks: num_blocks as u32,
            max_inodes: max_inodes as u32,
            inode_bitmap_start: inode_bitmap_start as u32,
            inode_bitmap_blocks: inode_bitmap_blocks as u32,
            data_bitmap_start: data_bitmap_start as u32,
            data_bitmap_blocks: data_bitmap_blocks as u32,
            inode_table_start: inode_table_start as u32,
            inode_table_blocks: inode_table_blocks as u32,
            data_start: data_start as u32,
            num_data_blocks: (num_blocks - data_start) as u32,
            root_inode: ROOT_INODE,
            allocated_inodes: 0,
            allocated_blocks: 0,
        })
    }

    /// Whether this looks like the superblock of a formatted image.
    pub fn is_formatted(&self) -> bool {
        self.magic == MAGIC && self.block_size as usize == BLOCK_SIZE
    }

    /// Checks that the recorded layout is the one [`Self::new`] would produce for the storage.
    pub fn validate(&self, storage_blocks: usize) -> Result<()> {
        ensure!(self.is_formatted(), "not a newfs image");
        ensure!(
            self.num_blocks as usize <= storage_blocks,
            "image claims {} blocks but the storage holds {storage_blocks}",
            self.num_blocks
        );
        ensure!(
            self.root_inode == ROOT_INODE,
            "unexpected root inode: {}",
            self.root_inode
        );

        let expected = Superblock::new(self.num_blocks as usize, self.max_inodes as usize)?;
        ensure!(
            Superblock {
                allocated_inodes: self.allocated_inodes,
                allocated_blocks: self.allocated_blocks,
                ..expected
            } == *self,
            "inconsistent image layout"
        );

        ensure!(
            self.allocated_inodes <= self.max_inodes,
            "more inodes allocated than exist: {}",
            self.allocated_inodes
        );
        ensure!(
            self.allocated_blocks <= self.num_data_blocks,
            "more data blocks allocated than exist: {}",
            self.allocated_blocks
        );

        Ok(())
    }

    /// The absolute block number of data block `index`.
    pub fn data_block_number(&self, index: u32) -> BlockNumber {
        (self.data_start + index) as BlockNumber
    }

    /// The absolute block number and byte offset of the inode table slot for `inum`.
    pub fn inode_position(&self, inum: InodeNumber) -> (BlockNumber, usize) {
        let position = inum as usize * INODE_SIZE;

        (
            self.inode_table_start as BlockNumber + position / BLOCK_SIZE,
            position % BLOCK_SIZE,
        )
    }
}
