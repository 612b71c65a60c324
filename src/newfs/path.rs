use crate::{
    disk_format::directory_entry::PATH_SEPARATOR,
    error::{NewfsError, Result},
    storage::NewfsStorage,
};

use super::{InodeKind, InodeNumber, Newfs};

/// The outcome of walking a path from the root.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    /// The entry the path names if `found`; otherwise the deepest entry that did match, which is
    /// the intended parent of a new entry when `remaining == 1`.
    pub node: InodeNumber,
    pub found: bool,
    pub is_root: bool,
    /// The number of components left unmatched, starting with the one that failed.
    pub remaining: usize,
}

/// The non-empty components of `path`.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split(PATH_SEPARATOR).filter(|c| !c.is_empty())
}

/// The last component of `path`.
pub fn file_name(path: &str) -> Option<&str> {
    components(path).last()
}

impl<S: NewfsStorage> Newfs<S> {
    /// Walks `path` from the root, matching one component per level.
    ///
    /// Resolution stops at the first component that is missing, or at a regular file that still
    /// has components after it.
    pub fn resolve(&self, path: &str) -> Resolution {
        let components = components(path).collect::<Vec<_>>();
        let mut node = self.superblock.root_inode;

        for (depth, component) in components.iter().enumerate() {
            let dentry = self.dentry(node);

            let child = match &dentry.inode.kind {
                InodeKind::Directory { .. } => self.tree.find_child(node, component.as_bytes()),
                InodeKind::Regular(_) => None,
            };

            let Some(child) = child else {
                return Resolution {
                    node,
                    found: false,
                    is_root: false,
                    remaining: components.len() - depth,
                };
            };

            node = child;
        }

        Resolution {
            node,
            found: true,
            is_root: components.is_empty(),
            remaining: 0,
        }
    }

    /// The inode number of the entry at `path`.
    pub fn lookup(&self, path: &str) -> Result<InodeNumber> {
        let resolution = self.resolve(path);

        if resolution.found {
            Ok(resolution.node)
        } else {
            Err(NewfsError::NotFound)
        }
    }
}
