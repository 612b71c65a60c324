use std::fmt::{self, Debug};

use serde::{Deserialize, Serialize};

use crate::error::NewfsError;

/// The maximum supported size of a file or directory name in bytes.
pub const MAX_NAME_LEN: usize = 32;

/// The number of bytes occupied by a serialized directory entry.
///
/// Directories report `child_count * DIRECTORY_ENTRY_SIZE` as their size.
pub const DIRECTORY_ENTRY_SIZE: usize = MAX_NAME_LEN + 2 * 4;

/// The separator between path components.
pub const PATH_SEPARATOR: &str = "/";

/// The dentry linkage stored alongside the inode it owns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct DirectoryEntry {
    /// The inode number owned by this entry.
    pub inum: u32,
    /// The inode number of the parent directory, or zero for the root.
    pub parent: u32,
    /// The name of the entry.
    pub name: DirectoryEntryName,
}

/// A name, as used in [`DirectoryEntry`].
///
/// Names are stored zero-padded and are not nul-terminated when they use all
/// [`MAX_NAME_LEN`] bytes.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirectoryEntryName([u8; MAX_NAME_LEN]);

impl DirectoryEntryName {
    /// The name of a free entry.
    pub const EMPTY: Self = DirectoryEntryName([0; MAX_NAME_LEN]);

    /// The name's bytes, without padding.
    pub fn as_bytes(&self) -> &[u8] {
        let len = self.0.iter().position(|b| *b == 0).unwrap_or(MAX_NAME_LEN);
        &self.0[..len]
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }
}

impl TryFrom<&str> for DirectoryEntryName {
    type Error = NewfsError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.is_empty() || value.contains(PATH_SEPARATOR) || value.contains('\0') {
            return Err(NewfsError::InvalidName);
        }

        if value.len() > MAX_NAME_LEN {
            return Err(NewfsError::NameTooLong);
        }

        let bytes = value.as_bytes();
        let mut converted = [0; MAX_NAME_LEN];
        converted[0..bytes.len()].copy_from_slice(bytes);

        Ok(DirectoryEntryName(converted))
    }
}

impl Debug for DirectoryEntryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DirectoryEntryName")
            .field(&String::from_utf8_lossy(self.as_bytes()))
            .finish()
    }
}

impl fmt::Display for DirectoryEntryName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.as_bytes()))
    }
}
