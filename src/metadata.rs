use std::time::SystemTime;

/// Timestamps reported for every entry. newfs keeps no per-inode times, so these come from the
/// backing storage.
#[derive(Clone, Copy, Debug)]
pub struct TimeMetadata {
    /// Last access time.
    pub atime: SystemTime,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Creation time.
    pub crtime: SystemTime,
}

impl Default for TimeMetadata {
    fn default() -> Self {
        Self {
            atime: SystemTime::UNIX_EPOCH,
            mtime: SystemTime::UNIX_EPOCH,
            crtime: SystemTime::UNIX_EPOCH,
        }
    }
}

/// Ownership reported for every entry, taken from the backing storage.
#[derive(Clone, Copy, Debug, Default)]
pub struct OwnershipMetadata {
    /// Owner user ID.
    pub uid: u32,
    /// Owner group ID.
    pub gid: u32,
}
