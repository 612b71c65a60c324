//! The filesystem engine: an in-memory dentry/inode tree mirrored to a block store.
//!
//! A [`Newfs`] session is created by [`Newfs::mount`], which loads an existing image or formats
//! a blank one, and ends with [`Newfs::unmount`], which writes the whole image back. Nothing is
//! persisted in between.
//!
//! Every operation takes `&mut self` or `&self`, so a session is its own (single) lock: callers
//! sharing one across threads must put the whole session behind one mutex.

use log::{debug, info, warn};

use crate::{
    disk_format::{
        directory_entry::{DirectoryEntryName, DIRECTORY_ENTRY_SIZE},
        superblock::Superblock,
    },
    error::{NewfsError, Result},
    storage::NewfsStorage,
};

/// Block allocation bitmaps.
mod bitmap;
/// Reads, writes and truncation.
mod data;
/// Path resolution.
mod path;
/// Mounting, formatting and flushing.
mod persist;
/// The dentry/inode arena.
mod tree;

pub use bitmap::Bitmap;
pub use path::Resolution;
pub use persist::FormatOptions;
pub use tree::EntryKind;

use tree::{Dentry, FileContents, Inode, InodeKind, Tree};

// inode numbers are one-indexed; zero marks "no inode"
pub type InodeNumber = u32;

// block numbers are absolute positions in the backing store
pub type BlockNumber = usize;

/// What the host sees of an entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attributes {
    pub inum: InodeNumber,
    pub kind: EntryKind,
    /// For files, the tracked size. For directories, `child_count * DIRECTORY_ENTRY_SIZE`,
    /// except the root, which reports zero.
    pub size: u64,
    pub child_count: usize,
    /// The number of data blocks allocated to the entry. The root reports the size of the whole
    /// image instead.
    pub blocks: usize,
}

/// One entry of a directory listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Child {
    pub inum: InodeNumber,
    pub name: String,
    pub kind: EntryKind,
}

pub struct Newfs<S: NewfsStorage> {
    storage: S,
    superblock: Superblock,
    /// Tracks which inode ids are in use. Bit zero is always set.
    inode_bitmap: Bitmap,
    /// Tracks which blocks of the data region are in use.
    block_bitmap: Bitmap,
    tree: Tree,
}

impl<S: NewfsStorage> Newfs<S> {
    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    pub fn free_blocks(&self) -> usize {
        self.block_bitmap.count_free()
    }

    pub fn free_inodes(&self) -> usize {
        self.inode_bitmap.count_free()
    }

    /// The absolute path of the entry owning `inum`.
    pub fn path_of(&self, inum: InodeNumber) -> Option<String> {
        self.tree.path_of(inum)
    }

    /// Creates an entry called `name` inside the directory `parent`.
    pub fn create_entry(
        &mut self,
        parent: InodeNumber,
        name: &str,
        kind: EntryKind,
    ) -> Result<InodeNumber> {
        let parent_dentry = self.tree.get(parent).ok_or(NewfsError::NotFound)?;

        if parent_dentry.inode.kind() != EntryKind::Directory {
            return Err(NewfsError::NotADirectory);
        }

        if self.tree.find_child(parent, name.as_bytes()).is_some() {
            return Err(NewfsError::Exists);
        }

        let name = DirectoryEntryName::try_from(name)?;
        let inum = self.allocate_inode()?;

        self.tree.insert(Dentry {
            name,
            parent: Some(parent),
            inode: Inode::new(inum, kind),
        });
        self.tree.link(parent, inum);

        debug!("[inode #{parent}] created {kind:?} {name} as inode #{inum}");

        Ok(inum)
    }

    /// Creates a regular file at `path`. Every component but the last must already exist.
    pub fn create_file(&mut self, path: &str) -> Result<InodeNumber> {
        self.create_at(path, EntryKind::Regular)
    }

    /// Creates a directory at `path`. Every component but the last must already exist.
    pub fn create_directory(&mut self, path: &str) -> Result<InodeNumber> {
        self.create_at(path, EntryKind::Directory)
    }

    pub fn attributes(&self, path: &str) -> Result<Attributes> {
        let inum = self.lookup(path)?;
        let dentry = self.dentry(inum);

        let (size, blocks) = match &dentry.inode.kind {
            InodeKind::Regular(contents) => (dentry.inode.size as u64, contents.blocks.len()),
            InodeKind::Directory { .. } if dentry.parent.is_none() => {
                (0, self.superblock.num_blocks as usize)
            }
            InodeKind::Directory { children } => {
                ((children.len() * DIRECTORY_ENTRY_SIZE) as u64, 0)
            }
        };

        Ok(Attributes {
            inum,
            kind: dentry.inode.kind(),
            size,
            child_count: dentry.inode.child_count(),
            blocks,
        })
    }

    /// The child at position `start` of the directory at `path`, or `None` past the end.
    pub fn list_children(&self, path: &str, start: usize) -> Result<Option<Child>> {
        let inum = self.lookup(path)?;
        let inode = &self.dentry(inum).inode;

        if inode.kind() != EntryKind::Directory {
            return Err(NewfsError::NotADirectory);
        }

        Ok(inode.children().get(start).map(|child| {
            let dentry = self.dentry(*child);

            Child {
                inum: *child,
                name: dentry.name.to_string(),
                kind: dentry.inode.kind(),
            }
        }))
    }

    /// Succeeds if `path` exists.
    pub fn open(&self, path: &str) -> Result<()> {
        self.lookup(path).map(|_| ())
    }

    /// Succeeds if `path` exists and is a directory.
    pub fn open_directory(&self, path: &str) -> Result<()> {
        let inum = self.lookup(path)?;

        match self.dentry(inum).inode.kind() {
            EntryKind::Directory => Ok(()),
            EntryKind::Regular => Err(NewfsError::NotADirectory),
        }
    }

    /// Deletion is not supported. Reports `NotFound` for missing paths and `Unsupported`
    /// otherwise.
    pub fn remove_file(&mut self, path: &str) -> Result<()> {
        self.unsupported(path)
    }

    /// See [`Self::remove_file`].
    pub fn remove_directory(&mut self, path: &str) -> Result<()> {
        self.unsupported(path)
    }

    /// Renaming is not supported. Reports `NotFound` if `from` is missing and `Unsupported`
    /// otherwise.
    pub fn rename(&mut self, from: &str, _to: &str) -> Result<()> {
        self.unsupported(from)
    }

    /// Marks the lowest free data block as used and returns its index within the data region.
    pub(crate) fn allocate_block(&mut self) -> Result<u32> {
        let Some(index) = self.block_bitmap.allocate() else {
            warn!("no more free data blocks");
            return Err(NewfsError::NoSpace);
        };

        self.superblock.allocated_blocks += 1;

        Ok(index as u32)
    }

    /// Returns a data block to the free pool.
    ///
    /// Nothing references the block afterwards only if the caller already unlinked it from its
    /// file.
    pub(crate) fn free_block(&mut self, index: u32) {
        if !self.block_bitmap.is_used(index as usize) {
            warn!("freeing data block {index}, which is not allocated");
            return;
        }

        self.block_bitmap.free(index as usize);
        self.superblock.allocated_blocks -= 1;
    }

    /// Allocates `count` data blocks, or none at all.
    fn allocate_blocks(&mut self, count: usize) -> Result<Vec<u32>> {
        if count > self.block_bitmap.count_free() {
            warn!(
                "{count} data blocks requested but only {} are free",
                self.block_bitmap.count_free()
            );
            return Err(NewfsError::NoSpace);
        }

        (0..count).map(|_| self.allocate_block()).collect()
    }

    fn allocate_inode(&mut self) -> Result<InodeNumber> {
        let Some(inum) = self.inode_bitmap.allocate() else {
            warn!("no more free inodes");
            return Err(NewfsError::NoSpace);
        };

        self.superblock.allocated_inodes += 1;

        Ok(inum as InodeNumber)
    }

    fn create_at(&mut self, path: &str, kind: EntryKind) -> Result<InodeNumber> {
        let resolution = self.resolve(path);

        if resolution.found {
            return Err(NewfsError::Exists);
        }

        if self.dentry(resolution.node).inode.kind() == EntryKind::Regular {
            return Err(match kind {
                EntryKind::Directory => NewfsError::Unsupported,
                EntryKind::Regular => NewfsError::NotADirectory,
            });
        }

        if resolution.remaining > 1 {
            return Err(NewfsError::NotFound);
        }

        let name = path::file_name(path).ok_or(NewfsError::InvalidName)?;
        self.create_entry(resolution.node, name, kind)
    }

    fn unsupported(&self, path: &str) -> Result<()> {
        self.lookup(path)?;

        info!("unsupported operation on {path}");
        Err(NewfsError::Unsupported)
    }

    /// The dentry owning `inum`.
    ///
    /// # Panics
    ///
    /// Panics if `inum` is not in the tree. Only call with ids obtained from the tree.
    fn dentry(&self, inum: InodeNumber) -> &Dentry {
        self.tree
            .get(inum)
            .expect("inode numbers handed out by the tree stay in the tree")
    }
}

impl Inode {
    fn new(inum: InodeNumber, kind: EntryKind) -> Self {
        Inode {
            inum,
            size: 0,
            kind: match kind {
                EntryKind::Regular => InodeKind::Regular(FileContents::default()),
                EntryKind::Directory => InodeKind::Directory { children: vec![] },
            },
        }
    }
}
