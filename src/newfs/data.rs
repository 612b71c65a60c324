use log::{debug, info};

use crate::{
    disk_format::{block::BLOCK_SIZE, inode::MAX_FILE_SIZE},
    error::{NewfsError, Result},
    storage::NewfsStorage,
};

use super::{FileContents, InodeKind, InodeNumber, Newfs};

impl<S: NewfsStorage> Newfs<S> {
    /// Writes `data` at `offset`, allocating blocks as the file grows.
    ///
    /// Offsets past the end of the file are rejected; files have no holes. The blocks needed to
    /// back the new size are reserved before anything is copied, so a write either completes or
    /// fails with `NoSpace` without changing the file.
    pub fn write(&mut self, path: &str, data: &[u8], offset: usize) -> Result<usize> {
        let inum = self.lookup(path)?;
        let (size, capacity) = {
            let (size, contents) = self.file(inum)?;
            (size, contents.blocks.len())
        };

        info!(
            "[inode #{inum}] writing file (offset = {offset}; data.len() = {})",
            data.len()
        );

        if offset > size {
            return Err(NewfsError::Seek);
        }

        let end = offset
            .checked_add(data.len())
            .ok_or(NewfsError::NoSpace)?;
        let new_size = size.max(end);

        let needed = new_size.div_ceil(BLOCK_SIZE);
        let new_blocks = if needed > capacity {
            if new_size > MAX_FILE_SIZE {
                info!("[inode #{inum}] {new_size} bytes exceed the maximum file size");
                return Err(NewfsError::NoSpace);
            }

            self.allocate_blocks(needed - capacity)?
        } else {
            vec![]
        };

        let dentry = self
            .tree
            .get_mut(inum)
            .expect("we just looked the inode up");
        let InodeKind::Regular(contents) = &mut dentry.inode.kind else {
            unreachable!("we checked the inode is a file above");
        };

        for block in new_blocks {
            debug!("[inode #{inum}] allocated data block {block}");
            contents.push_block(block);
        }

        contents.data[offset..end].copy_from_slice(data);
        contents.mark_dirty(offset, end);
        dentry.inode.size = new_size;

        Ok(data.len())
    }

    /// Reads into `buf` from `offset`.
    ///
    /// Reads are not limited by the file size, only by the allocated capacity: bytes past the
    /// size but inside an allocated block are returned as they are in the mirror. Returns the
    /// number of bytes copied.
    pub fn read(&self, path: &str, buf: &mut [u8], offset: usize) -> Result<usize> {
        let inum = self.lookup(path)?;
        let (size, contents) = self.file(inum)?;

        if offset > size {
            return Err(NewfsError::Seek);
        }

        let end = offset.saturating_add(buf.len()).min(contents.capacity());
        if offset >= end {
            return Ok(0);
        }

        let len = end - offset;
        buf[..len].copy_from_slice(&contents.data[offset..end]);

        debug!("[inode #{inum}] read {len} bytes at {offset}");

        Ok(len)
    }

    /// Sets the size of the file at `path`.
    ///
    /// Blocks are neither allocated, freed nor zeroed.
    pub fn truncate(&mut self, path: &str, size: usize) -> Result<()> {
        let inum = self.lookup(path)?;
        self.file(inum)?;

        info!("[inode #{inum}] truncating to {size} bytes");

        self.tree
            .get_mut(inum)
            .expect("we just looked the inode up")
            .inode
            .size = size;

        Ok(())
    }

    /// Checks `mode` against `path`.
    ///
    /// There are no permissions: `F_OK` succeeds if the path exists, and any combination of
    /// `R_OK`, `W_OK` and `X_OK` succeeds unconditionally.
    pub fn access(&self, path: &str, mode: libc::c_int) -> Result<()> {
        const PERMISSION_BITS: libc::c_int = libc::R_OK | libc::W_OK | libc::X_OK;

        if mode == libc::F_OK {
            return if self.resolve(path).found {
                Ok(())
            } else {
                Err(NewfsError::Access)
            };
        }

        if mode & !PERMISSION_BITS != 0 {
            return Err(NewfsError::Access);
        }

        Ok(())
    }

    /// Accepted and ignored; newfs keeps no timestamps.
    pub fn update_timestamps(&mut self, _path: &str) -> Result<()> {
        Ok(())
    }

    /// The data block indices allocated to the file at `path`, in file order.
    pub fn file_blocks(&self, path: &str) -> Result<Vec<u32>> {
        let inum = self.lookup(path)?;
        let (_, contents) = self.file(inum)?;

        Ok(contents.blocks.clone())
    }

    /// The positions (within the file) of blocks modified since they were last persisted.
    pub fn dirty_blocks(&self, path: &str) -> Result<Vec<usize>> {
        let inum = self.lookup(path)?;
        let (_, contents) = self.file(inum)?;

        Ok(contents.dirty.iter_ones().collect())
    }

    /// The size and contents of a regular file.
    fn file(&self, inum: InodeNumber) -> Result<(usize, &FileContents)> {
        let inode = &self.dentry(inum).inode;

        match &inode.kind {
            InodeKind::Regular(contents) => Ok((inode.size, contents)),
            InodeKind::Directory { .. } => Err(NewfsError::IsDirectory),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        disk_format::inode::MAX_BLOCKS_PER_FILE,
        newfs::tests::{new_fs, new_fs_with},
    };

    use super::*;

    mod write {
        use super::*;

        #[test]
        fn test_round_trip() {
            let mut fs = new_fs();
            fs.create_file("/f").unwrap();

            assert_eq!(fs.write("/f", b"hello", 0), Ok(5));
            assert_eq!(fs.write("/f", b" world", 5), Ok(6));

            let mut buf = [0; 11];
            assert_eq!(fs.read("/f", &mut buf, 0), Ok(11));
            assert_eq!(&buf, b"hello world");
            assert_eq!(fs.attributes("/f").unwrap().size, 11);
        }

        #[test]
        fn test_overwrite_keeps_size() {
            let mut fs = new_fs();
            fs.create_file("/f").unwrap();
            fs.write("/f", b"abcdef", 0).unwrap();

            assert_eq!(fs.write("/f", b"XY", 1), Ok(2));
            assert_eq!(fs.attributes("/f").unwrap().size, 6);

            let mut buf = [0; 6];
            fs.read("/f", &mut buf, 0).unwrap();
            assert_eq!(&buf, b"aXYdef");
        }

        #[test]
        fn test_append_at_size() {
            let mut fs = new_fs();
            fs.create_file("/f").unwrap();
            fs.write("/f", b"abc", 0).unwrap();

            assert_eq!(fs.write("/f", b"d", 3), Ok(1));
            assert_eq!(fs.attributes("/f").unwrap().size, 4);
        }

        #[test]
        fn test_seek_past_end() {
            let mut fs = new_fs();
            fs.create_file("/f").unwrap();
            fs.write("/f", b"abc", 0).unwrap();

            assert_eq!(fs.write("/f", b"x", 4), Err(NewfsError::Seek));
            assert_eq!(fs.attributes("/f").unwrap().size, 3);
            assert_eq!(fs.file_blocks("/f").unwrap().len(), 1);
        }

        #[test]
        fn test_missing_and_directory() {
            let mut fs = new_fs();
            fs.create_directory("/d").unwrap();

            assert_eq!(fs.write("/nope", b"x", 0), Err(NewfsError::NotFound));
            assert_eq!(
                fs.write("/missingdir/x", b"x", 0),
                Err(NewfsError::NotFound)
            );
            assert_eq!(fs.write("/d", b"x", 0), Err(NewfsError::IsDirectory));
            assert_eq!(fs.write("/", b"x", 0), Err(NewfsError::IsDirectory));
        }

        #[test]
        fn test_empty_write() {
            let mut fs = new_fs();
            fs.create_file("/f").unwrap();

            assert_eq!(fs.write("/f", b"", 0), Ok(0));
            assert!(fs.file_blocks("/f").unwrap().is_empty());
            assert!(fs.dirty_blocks("/f").unwrap().is_empty());
        }

        #[test]
        fn test_block_count_follows_size() {
            for len in [1, BLOCK_SIZE - 1, BLOCK_SIZE, BLOCK_SIZE + 1, 3 * BLOCK_SIZE] {
                let mut fs = new_fs();
                fs.create_file("/f").unwrap();

                fs.write("/f", &vec![7; len], 0).unwrap();

                assert_eq!(
                    fs.file_blocks("/f").unwrap().len(),
                    len.div_ceil(BLOCK_SIZE),
                    "writing {len} bytes"
                );
            }
        }

        #[test]
        fn test_incremental_growth() {
            let mut fs = new_fs();
            fs.create_file("/f").unwrap();

            let chunk = vec![1; 300];
            let mut written = 0;
            for _ in 0..10 {
                fs.write("/f", &chunk, written).unwrap();
                written += chunk.len();

                assert_eq!(
                    fs.file_blocks("/f").unwrap().len(),
                    written.div_ceil(BLOCK_SIZE)
                );
            }
        }

        #[test]
        fn test_blocks_interleave_between_files() {
            let mut fs = new_fs();
            fs.create_file("/a").unwrap();
            fs.create_file("/b").unwrap();

            fs.write("/a", &[1; BLOCK_SIZE], 0).unwrap();
            fs.write("/b", &[2; BLOCK_SIZE], 0).unwrap();
            fs.write("/a", &[3; BLOCK_SIZE], BLOCK_SIZE).unwrap();

            assert_eq!(fs.file_blocks("/a").unwrap(), vec![0, 2]);
            assert_eq!(fs.file_blocks("/b").unwrap(), vec![1]);
        }

        #[test]
        fn test_dirty_blocks_intersect_written_range() {
            let mut fs = new_fs();
            fs.create_file("/f").unwrap();
            fs.write("/f", &[0; 3 * BLOCK_SIZE], 0).unwrap();
            fs.sync().unwrap();
            assert!(fs.dirty_blocks("/f").unwrap().is_empty());

            fs.write("/f", b"xy", BLOCK_SIZE - 1).unwrap();
            assert_eq!(fs.dirty_blocks("/f").unwrap(), vec![0, 1]);
        }

        #[test]
        fn test_exceeding_maximum_file_size() {
            let mut fs = new_fs();
            fs.create_file("/f").unwrap();

            let max = MAX_BLOCKS_PER_FILE * BLOCK_SIZE;
            fs.write("/f", &vec![1; max - 10], 0).unwrap();
            let blocks = fs.file_blocks("/f").unwrap();
            let free = fs.free_blocks();

            assert_eq!(fs.write("/f", &[2; 20], max - 10), Err(NewfsError::NoSpace));

            // nothing was copied, allocated, or resized
            assert_eq!(fs.file_blocks("/f").unwrap(), blocks);
            assert_eq!(fs.free_blocks(), free);
            assert_eq!(fs.attributes("/f").unwrap().size as usize, max - 10);

            // filling the file exactly still works
            assert_eq!(fs.write("/f", &[2; 10], max - 10), Ok(10));
            assert_eq!(fs.file_blocks("/f").unwrap().len(), MAX_BLOCKS_PER_FILE);
        }

        #[test]
        fn test_end_past_address_space() {
            let mut fs = new_fs();
            fs.create_file("/f").unwrap();
            fs.truncate("/f", usize::MAX).unwrap();
            let free = fs.free_blocks();

            assert_eq!(
                fs.write("/f", b"abcdefgh", usize::MAX - 2),
                Err(NewfsError::NoSpace)
            );
            assert_eq!(fs.free_blocks(), free);
            assert_eq!(fs.attributes("/f").unwrap().size, usize::MAX as u64);
        }

        #[test]
        fn test_disk_full() {
            // 27 data blocks
            let mut fs = new_fs_with(32, 8);
            let total = fs.free_blocks();
            fs.create_file("/a").unwrap();
            fs.create_file("/b").unwrap();

            fs.write("/a", &vec![1; MAX_BLOCKS_PER_FILE * BLOCK_SIZE], 0)
                .unwrap();
            let remaining = total - MAX_BLOCKS_PER_FILE;

            let too_much = vec![2; (remaining + 1) * BLOCK_SIZE];
            assert_eq!(fs.write("/b", &too_much, 0), Err(NewfsError::NoSpace));
            assert!(fs.file_blocks("/b").unwrap().is_empty());
            assert_eq!(fs.attributes("/b").unwrap().size, 0);
            assert_eq!(fs.free_blocks(), remaining);

            let fits = vec![2; remaining * BLOCK_SIZE];
            assert_eq!(fs.write("/b", &fits, 0), Ok(fits.len()));
            assert_eq!(fs.free_blocks(), 0);
        }
    }

    mod read {
        use super::*;

        #[test]
        fn test_partial_range() {
            let mut fs = new_fs();
            fs.create_file("/f").unwrap();
            fs.write("/f", b"0123456789", 0).unwrap();

            let mut buf = [0; 4];
            assert_eq!(fs.read("/f", &mut buf, 3), Ok(4));
            assert_eq!(&buf, b"3456");
        }

        #[test]
        fn test_not_clamped_at_size() {
            let mut fs = new_fs();
            fs.create_file("/f").unwrap();
            fs.write("/f", b"abc", 0).unwrap();

            let mut buf = [0xff; 8];
            assert_eq!(fs.read("/f", &mut buf, 0), Ok(8));
            assert_eq!(&buf, b"abc\0\0\0\0\0");
        }

        #[test]
        fn test_clamped_at_capacity() {
            let mut fs = new_fs();
            fs.create_file("/f").unwrap();
            fs.write("/f", b"abc", 0).unwrap();

            let mut buf = vec![0; 2 * BLOCK_SIZE];
            assert_eq!(fs.read("/f", &mut buf, 1), Ok(BLOCK_SIZE - 1));
        }

        #[test]
        fn test_seek_past_end() {
            let mut fs = new_fs();
            fs.create_file("/f").unwrap();
            fs.write("/f", b"abc", 0).unwrap();

            let mut buf = [0; 1];
            assert_eq!(fs.read("/f", &mut buf, 3), Ok(1));
            assert_eq!(fs.read("/f", &mut buf, 4), Err(NewfsError::Seek));
        }

        #[test]
        fn test_end_past_address_space() {
            let mut fs = new_fs();
            fs.create_file("/f").unwrap();
            fs.write("/f", b"abc", 0).unwrap();
            fs.truncate("/f", usize::MAX).unwrap();

            let mut buf = [0; 8];
            assert_eq!(fs.read("/f", &mut buf, usize::MAX - 2), Ok(0));
            assert_eq!(fs.read("/f", &mut buf, 1), Ok(8));
            assert_eq!(&buf[..2], b"bc");
        }

        #[test]
        fn test_empty_file() {
            let mut fs = new_fs();
            fs.create_file("/f").unwrap();

            let mut buf = [0; 4];
            assert_eq!(fs.read("/f", &mut buf, 0), Ok(0));
        }

        #[test]
        fn test_errors() {
            let mut fs = new_fs();
            fs.create_directory("/d").unwrap();

            let mut buf = [0; 4];
            assert_eq!(fs.read("/nope", &mut buf, 0), Err(NewfsError::NotFound));
            assert_eq!(fs.read("/d", &mut buf, 0), Err(NewfsError::IsDirectory));
        }
    }

    mod truncate {
        use super::*;

        #[test]
        fn test_shrink_keeps_blocks() {
            let mut fs = new_fs();
            fs.create_file("/f").unwrap();
            fs.write("/f", &[1; 2 * BLOCK_SIZE], 0).unwrap();

            let blocks = fs.file_blocks("/f").unwrap();
            let dirty = fs.dirty_blocks("/f").unwrap();

            fs.truncate("/f", 10).unwrap();

            assert_eq!(fs.attributes("/f").unwrap().size, 10);
            assert_eq!(fs.file_blocks("/f").unwrap(), blocks);
            assert_eq!(fs.dirty_blocks("/f").unwrap(), dirty);
        }

        #[test]
        fn test_stale_bytes_visible_after_shrink() {
            let mut fs = new_fs();
            fs.create_file("/f").unwrap();
            fs.write("/f", b"hello", 0).unwrap();
            fs.truncate("/f", 2).unwrap();

            let mut buf = [0; 5];
            fs.read("/f", &mut buf, 0).unwrap();
            assert_eq!(&buf, b"hello");

            // the old bytes are past the size, so writing at 3 is a seek error
            assert_eq!(fs.write("/f", b"x", 3), Err(NewfsError::Seek));
        }

        #[test]
        fn test_grow_allocates_nothing() {
            let mut fs = new_fs();
            fs.create_file("/f").unwrap();
            let free = fs.free_blocks();

            fs.truncate("/f", 5 * BLOCK_SIZE).unwrap();

            assert_eq!(fs.attributes("/f").unwrap().size as usize, 5 * BLOCK_SIZE);
            assert!(fs.file_blocks("/f").unwrap().is_empty());
            assert_eq!(fs.free_blocks(), free);
        }

        #[test]
        fn test_write_after_grow_backs_whole_size() {
            let mut fs = new_fs();
            fs.create_file("/f").unwrap();
            fs.truncate("/f", 2 * BLOCK_SIZE + 1).unwrap();

            assert_eq!(fs.write("/f", b"x", 0), Ok(1));
            assert_eq!(fs.file_blocks("/f").unwrap().len(), 3);
            assert_eq!(fs.attributes("/f").unwrap().size as usize, 2 * BLOCK_SIZE + 1);
        }

        #[test]
        fn test_errors() {
            let mut fs = new_fs();
            fs.create_directory("/d").unwrap();

            assert_eq!(fs.truncate("/nope", 0), Err(NewfsError::NotFound));
            assert_eq!(fs.truncate("/d", 0), Err(NewfsError::IsDirectory));
        }
    }

    mod access {
        use super::*;

        #[test]
        fn test_existence() {
            let mut fs = new_fs();
            fs.create_file("/f").unwrap();

            assert_eq!(fs.access("/f", libc::F_OK), Ok(()));
            assert_eq!(fs.access("/", libc::F_OK), Ok(()));
            assert_eq!(fs.access("/g", libc::F_OK), Err(NewfsError::Access));
        }

        #[test]
        fn test_permissions_always_granted() {
            let fs = new_fs();

            for mode in [
                libc::R_OK,
                libc::W_OK,
                libc::X_OK,
                libc::R_OK | libc::W_OK | libc::X_OK,
            ] {
                assert_eq!(fs.access("/missing", mode), Ok(()), "mode {mode}");
            }
        }

        #[test]
        fn test_unknown_mode_bits() {
            let fs = new_fs();

            assert_eq!(fs.access("/", 0x100), Err(NewfsError::Access));
        }
    }

    #[test]
    fn test_update_timestamps_always_succeeds() {
        let mut fs = new_fs();

        assert_eq!(fs.update_timestamps("/"), Ok(()));
        assert_eq!(fs.update_timestamps("/missing"), Ok(()));
    }
}
