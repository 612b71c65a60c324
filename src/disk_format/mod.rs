//! Constants and structures that define the newfs image format.

/// Perform a const assertion.
macro_rules! const_assert {
    ($($tt:tt)*) => {
        const _: () = assert!($($tt)*);
    }
}

/// Blocks of the backing store.
pub mod block;
/// Directory entries and entry names.
pub mod directory_entry;
/// Inode records.
pub mod inode;
/// The superblock and the image layout it describes.
pub mod superblock;
