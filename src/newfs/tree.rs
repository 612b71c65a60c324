use bitvec::vec::BitVec;

use crate::disk_format::{
    block::BLOCK_SIZE,
    directory_entry::{DirectoryEntryName, PATH_SEPARATOR},
};

use super::InodeNumber;

/// The type of an entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Regular,
    Directory,
}

/// A named entry in the tree. Owns exactly one inode.
#[derive(Clone, Debug)]
pub struct Dentry {
    pub name: DirectoryEntryName,
    /// Non-owning back-reference; `None` only for the root.
    pub parent: Option<InodeNumber>,
    pub inode: Inode,
}

#[derive(Clone, Debug)]
pub struct Inode {
    pub inum: InodeNumber,
    /// Size in bytes. May differ from the allocated capacity after a truncate.
    pub size: usize,
    pub kind: InodeKind,
}

#[derive(Clone, Debug)]
pub enum InodeKind {
    Regular(FileContents),
    Directory {
        /// Children in creation order.
        children: Vec<InodeNumber>,
    },
}

/// The data blocks of a file and their in-memory mirror.
#[derive(Clone, Debug, Default)]
pub struct FileContents {
    /// Data block indices, relative to the data region.
    pub blocks: Vec<u32>,
    /// One flag per entry of `blocks`; set when the mirror differs from the persisted block.
    pub dirty: BitVec,
    /// Exactly `blocks.len() * BLOCK_SIZE` bytes.
    pub data: Vec<u8>,
}

impl FileContents {
    /// The number of bytes backed by allocated blocks.
    pub fn capacity(&self) -> usize {
        self.blocks.len() * BLOCK_SIZE
    }

    /// Appends a freshly allocated block. Its mirror starts zeroed and dirty.
    pub fn push_block(&mut self, index: u32) {
        self.blocks.push(index);
        self.dirty.push(true);
        self.data.resize(self.capacity(), 0);
    }

    /// Appends a block loaded from storage. Its mirror starts clean.
    pub fn push_loaded_block(&mut self, index: u32, contents: &[u8]) {
        self.blocks.push(index);
        self.dirty.push(false);
        self.data.extend_from_slice(contents);
    }

    /// Marks every block intersecting `[start, end)` as dirty.
    pub fn mark_dirty(&mut self, start: usize, end: usize) {
        if start >= end {
            return;
        }

        let last = end.div_ceil(BLOCK_SIZE).min(self.blocks.len());
        for n in start / BLOCK_SIZE..last {
            self.dirty.set(n, true);
        }
    }

    pub fn clear_dirty(&mut self) {
        self.dirty.fill(false);
    }
}

impl Inode {
    pub fn kind(&self) -> EntryKind {
        match self.kind {
            InodeKind::Regular(_) => EntryKind::Regular,
            InodeKind::Directory { .. } => EntryKind::Directory,
        }
    }

    pub fn children(&self) -> &[InodeNumber] {
        match &self.kind {
            InodeKind::Directory { children } => children,
            InodeKind::Regular(_) => &[],
        }
    }

    pub fn child_count(&self) -> usize {
        self.children().len()
    }
}

/// The arena holding every dentry, addressed by the id of the inode it owns.
pub struct Tree {
    nodes: Vec<Option<Dentry>>,
}

impl Tree {
    /// An empty tree with room for ids `0..=max_inodes`.
    pub fn new(max_inodes: usize) -> Self {
        Tree {
            nodes: vec![None; max_inodes + 1],
        }
    }

    pub fn get(&self, inum: InodeNumber) -> Option<&Dentry> {
        self.nodes.get(inum as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, inum: InodeNumber) -> Option<&mut Dentry> {
        self.nodes.get_mut(inum as usize)?.as_mut()
    }

    pub fn contains(&self, inum: InodeNumber) -> bool {
        self.get(inum).is_some()
    }

    /// Places a node in the arena without linking it to a parent.
    ///
    /// # Panics
    ///
    /// Panics if `inum` is outside the arena.
    pub fn insert(&mut self, dentry: Dentry) {
        let inum = dentry.inode.inum as usize;
        self.nodes[inum] = Some(dentry);
    }

    /// Appends `child` to the child list of `parent`. Returns `false` if `parent` is not a
    /// directory in the tree.
    pub fn link(&mut self, parent: InodeNumber, child: InodeNumber) -> bool {
        match self.get_mut(parent).map(|dentry| &mut dentry.inode.kind) {
            Some(InodeKind::Directory { children }) => {
                children.push(child);
                true
            }
            _ => false,
        }
    }

    /// Finds the child of `directory` called `name`. Names are compared byte for byte.
    pub fn find_child(&self, directory: InodeNumber, name: &[u8]) -> Option<InodeNumber> {
        self.get(directory)?
            .inode
            .children()
            .iter()
            .copied()
            .find(|child| {
                self.get(*child)
                    .is_some_and(|dentry| dentry.name.as_bytes() == name)
            })
    }

    /// The absolute path of `inum`, built by following parent back-references.
    pub fn path_of(&self, inum: InodeNumber) -> Option<String> {
        let mut components = vec![];
        let mut current = self.get(inum)?;

        while let Some(parent) = current.parent {
            components.push(current.name.to_string());
            current = self.get(parent)?;
        }

        components.reverse();

        Some(format!(
            "{PATH_SEPARATOR}{}",
            components.join(PATH_SEPARATOR)
        ))
    }

    /// Every node in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Dentry> {
        self.nodes.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Dentry> {
        self.nodes.iter_mut().flatten()
    }
}
