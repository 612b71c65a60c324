use std::fs::File;
use std::os::linux::fs::MetadataExt;
use std::os::unix::prelude::FileExt;
use std::path::Path;

use anyhow::{ensure, Context, Result};

use crate::disk_format::block::{Block, BLOCK_SIZE, EMPTY_BLOCK};
use crate::metadata::{OwnershipMetadata, TimeMetadata};
use crate::newfs::BlockNumber;

use super::newfs_storage::NewfsStorage;

/// A disk image stored in a regular file (or a block device node).
///
/// Trailing bytes that do not make up a whole block are ignored.
pub struct FileBackedStorage {
    file: File,
    num_blocks: usize,
}

impl FileBackedStorage {
    pub fn new(file: File) -> Result<Self> {
        let len = file.metadata().context("reading disk file metadata")?.len();

        Ok(FileBackedStorage {
            file,
            num_blocks: len as usize / BLOCK_SIZE,
        })
    }

    /// Creates (or truncates) a blank image of `num_blocks` zeroed blocks at `path`.
    pub fn create(path: impl AsRef<Path>, num_blocks: usize) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .context("creating disk file")?;

        file.set_len((num_blocks * BLOCK_SIZE) as u64)
            .context("sizing disk file")?;

        Self::new(file)
    }

    fn check_bounds(&self, block_number: BlockNumber) -> Result<()> {
        ensure!(
            block_number < self.num_blocks,
            "block number out of bounds: {block_number} (disk has {} blocks)",
            self.num_blocks
        );

        Ok(())
    }
}

impl NewfsStorage for FileBackedStorage {
    fn num_blocks(&self) -> Result<usize> {
        Ok(self.num_blocks)
    }

    fn read_block(&self, block_number: BlockNumber) -> Result<Block> {
        self.check_bounds(block_number)?;

        let mut buf = EMPTY_BLOCK;
        let position = block_number * BLOCK_SIZE;

        self.file
            .read_exact_at(&mut buf, position as u64)
            .with_context(|| format!("reading block {block_number}"))?;

        Ok(buf)
    }

    fn write_block(&mut self, block_number: BlockNumber, block: &Block) -> Result<()> {
        self.check_bounds(block_number)?;

        let position = block_number * BLOCK_SIZE;

        self.file
            .write_all_at(block, position as u64)
            .with_context(|| format!("writing block {block_number}"))?;

        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.file.sync_all().context("syncing disk file")
    }

    fn time_metadata(&self) -> Result<TimeMetadata> {
        let metadata = self.file.metadata()?;
        let mtime = metadata.modified()?;

        Ok(TimeMetadata {
            atime: metadata.accessed()?,
            mtime,
            // not every filesystem records birth times
            crtime: metadata.created().unwrap_or(mtime),
        })
    }

    fn ownership_metadata(&self) -> Result<OwnershipMetadata> {
        let metadata = self.file.metadata()?;

        Ok(OwnershipMetadata {
            uid: metadata.st_uid(),
            gid: metadata.st_gid(),
        })
    }
}
