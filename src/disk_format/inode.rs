use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::newfs::InodeNumber;

use super::{
    block::BLOCK_SIZE,
    directory_entry::{DirectoryEntry, DirectoryEntryName, DIRECTORY_ENTRY_SIZE},
};

/// The number of bytes occupied by an inode record in the inode table.
pub const INODE_SIZE: usize = 128;

const_assert!(BLOCK_SIZE % INODE_SIZE == 0);

/// The maximum number of data blocks a file may own.
pub const MAX_BLOCKS_PER_FILE: usize = 16;

pub const MAX_FILE_SIZE: usize = MAX_BLOCKS_PER_FILE * BLOCK_SIZE;

pub const ROOT_INODE: InodeNumber = 1;

const INODE_PADDING: usize =
    INODE_SIZE - DIRECTORY_ENTRY_SIZE - 2 - 8 - 4 * 2 - 4 * MAX_BLOCKS_PER_FILE;

/// An inode record as stored in the inode table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct Inode {
    /// the entry that owns this inode
    pub entry: DirectoryEntry,
    /// file type (e.g., directory or regular)
    pub type_: InodeType,
    /// file size in bytes; unused for directories
    pub size: u64,
    /// number of entries in a directory; unused for files
    pub child_count: u32,
    /// number of valid entries in `blocks`
    pub block_count: u32,
    /// data block indices, relative to the start of the data region
    pub blocks: [u32; MAX_BLOCKS_PER_FILE],
    /// padding to make the record occupy exactly [`INODE_SIZE`] bytes
    pub padding: [u8; INODE_PADDING],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u16)]
pub enum InodeType {
    /// This inode is not in use for any file.
    Free = 0,
    /// This inode describes a directory.
    Directory = 1,
    /// This inode describes a regular data file.
    Regular = 2,
}

pub const FREE_INODE: Inode = Inode {
    entry: DirectoryEntry {
        inum: 0,
        parent: 0,
        name: DirectoryEntryName::EMPTY,
    },
    type_: InodeType::Free,
    size: 0,
    child_count: 0,
    block_count: 0,
    blocks: [0; MAX_BLOCKS_PER_FILE],
    padding: [0; INODE_PADDING],
};

impl Inode {
    /// The allocated data block indices.
    pub fn block_indices(&self) -> &[u32] {
        let count = (self.block_count as usize).min(MAX_BLOCKS_PER_FILE);
        &self.blocks[..count]
    }
}
