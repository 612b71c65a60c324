use thiserror::Error;

/// Errors returned by filesystem operations.
///
/// Every variant maps to exactly one errno through [`NewfsError::to_errno`]. Session-level
/// failures (mounting, loading, flushing) are not represented here; those are fatal and are
/// reported through [`anyhow::Error`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NewfsError {
    /// The path does not resolve to an entry.
    #[error("no such file or directory")]
    NotFound,
    /// An entry with the requested name already exists.
    #[error("file exists")]
    Exists,
    /// The operation is not supported, e.g. creating a directory beneath a regular file.
    #[error("operation not supported")]
    Unsupported,
    /// A data operation targeted a directory.
    #[error("is a directory")]
    IsDirectory,
    /// An entry was to be created inside something that is not a directory.
    #[error("not a directory")]
    NotADirectory,
    /// No free inodes or data blocks, or the file reached its maximum block count.
    #[error("no space left on device")]
    NoSpace,
    /// The offset lies beyond the current end of the file.
    #[error("offset is past the end of the file")]
    Seek,
    /// The access check failed.
    #[error("permission denied")]
    Access,
    /// The entry name does not fit in a directory entry.
    #[error("name too long")]
    NameTooLong,
    /// The entry name is empty or contains a path separator or nul byte.
    #[error("invalid name")]
    InvalidName,
}

impl NewfsError {
    /// The errno reported to the host for this error.
    #[must_use]
    pub fn to_errno(self) -> libc::c_int {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::Exists => libc::EEXIST,
            Self::Unsupported => libc::ENXIO,
            Self::IsDirectory => libc::EISDIR,
            Self::NotADirectory => libc::ENOTDIR,
            Self::NoSpace => libc::ENOSPC,
            Self::Seek => libc::ESPIPE,
            Self::Access => libc::EACCES,
            Self::NameTooLong => libc::ENAMETOOLONG,
            Self::InvalidName => libc::EINVAL,
        }
    }

    /// The negative numeric code of this error, as returned by C-style callback layers.
    #[must_use]
    pub fn code(self) -> libc::c_int {
        -self.to_errno()
    }
}

/// Result alias for filesystem operations.
pub type Result<T> = std::result::Result<T, NewfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        let cases = [
            (NewfsError::NotFound, libc::ENOENT),
            (NewfsError::Exists, libc::EEXIST),
            (NewfsError::Unsupported, libc::ENXIO),
            (NewfsError::IsDirectory, libc::EISDIR),
            (NewfsError::NotADirectory, libc::ENOTDIR),
            (NewfsError::NoSpace, libc::ENOSPC),
            (NewfsError::Seek, libc::ESPIPE),
            (NewfsError::Access, libc::EACCES),
            (NewfsError::NameTooLong, libc::ENAMETOOLONG),
            (NewfsError::InvalidName, libc::EINVAL),
        ];

        for (error, errno) in cases {
            assert_eq!(error.to_errno(), errno, "wrong errno for {error:?}");
            assert_eq!(error.code(), -errno);
        }
    }

    #[test]
    fn test_codes_are_distinct() {
        let mut codes = [
            NewfsError::NotFound,
            NewfsError::Exists,
            NewfsError::Unsupported,
            NewfsError::IsDirectory,
            NewfsError::NotADirectory,
            NewfsError::NoSpace,
            NewfsError::Seek,
            NewfsError::Access,
            NewfsError::NameTooLong,
            NewfsError::InvalidName,
        ]
        .map(NewfsError::code);

        codes.sort_unstable();
        assert!(codes.windows(2).all(|pair| pair[0] != pair[1]));
        assert!(codes.iter().all(|code| *code < 0));
    }

    #[test]
    fn test_display() {
        assert_eq!(NewfsError::Seek.to_string(), "offset is past the end of the file");
        assert_eq!(NewfsError::Exists.to_string(), "file exists");
    }
}
