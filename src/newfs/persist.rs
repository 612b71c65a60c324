use anyhow::{bail, ensure, Context, Result};
use log::{debug, info, warn};

use crate::{
    disk_format::{
        block::{Block, BLOCK_SIZE, EMPTY_BLOCK},
        directory_entry::{DirectoryEntry, DirectoryEntryName},
        inode::{
            Inode as InodeRecord, InodeType, FREE_INODE, INODE_SIZE, MAX_BLOCKS_PER_FILE, ROOT_INODE,
        },
        superblock::{Superblock, SUPERBLOCK_BLOCK_NUMBER},
    },
    storage::NewfsStorage,
};

use super::{Bitmap, Dentry, EntryKind, FileContents, Inode, InodeKind, InodeNumber, Newfs, Tree};

pub const DEFAULT_MAX_INODES: usize = 256;

/// Parameters of a freshly formatted image. Loading an existing image ignores them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormatOptions {
    /// The number of inode ids available, including the root.
    pub max_inodes: usize,
}

impl Default for FormatOptions {
    fn default() -> Self {
        FormatOptions {
            max_inodes: DEFAULT_MAX_INODES,
        }
    }
}

impl<S: NewfsStorage> Newfs<S> {
    /// Starts a session: loads the image on `storage`, or formats it if it holds none.
    pub fn mount(storage: S, options: &FormatOptions) -> Result<Self> {
        if Self::is_formatted(&storage)? {
            info!("loading existing image");
            Self::load(storage)
        } else {
            info!("no image found, formatting");
            Self::format(storage, options)
        }
    }

    /// Whether `storage` starts with a newfs superblock.
    pub fn is_formatted(storage: &S) -> Result<bool> {
        let block = storage
            .read_block(SUPERBLOCK_BLOCK_NUMBER)
            .context("reading superblock")?;

        Ok(bincode::deserialize::<Superblock>(&block).is_ok_and(|sb| sb.is_formatted()))
    }

    /// Writes an empty image, holding only the root directory, to `storage`.
    pub fn format(storage: S, options: &FormatOptions) -> Result<Self> {
        let num_blocks = storage.num_blocks()?;
        let superblock = Superblock::new(num_blocks, options.max_inodes)
            .context("laying out a new image")?;

        let mut inode_bitmap = Bitmap::new(options.max_inodes + 1);
        // inode zero doesn't exist
        inode_bitmap.reserve(0);

        let mut fs = Newfs {
            storage,
            superblock,
            inode_bitmap,
            block_bitmap: Bitmap::new(superblock.num_data_blocks as usize),
            tree: Tree::new(options.max_inodes),
        };

        let root = fs.allocate_inode().context("allocating root inode")?;
        ensure!(root == ROOT_INODE, "root was assigned inode #{root}");

        fs.tree.insert(Dentry {
            name: DirectoryEntryName::EMPTY,
            parent: None,
            inode: Inode::new(root, EntryKind::Directory),
        });

        fs.sync().context("writing new image")?;

        info!(
            "formatted {num_blocks} blocks: {} inodes, {} data blocks starting at block {}",
            superblock.max_inodes, superblock.num_data_blocks, superblock.data_start
        );

        Ok(fs)
    }

    /// Reads and checks the whole image on `storage`.
    pub fn load(storage: S) -> Result<Self> {
        let num_blocks = storage.num_blocks()?;

        let block = storage
            .read_block(SUPERBLOCK_BLOCK_NUMBER)
            .context("reading superblock")?;
        let superblock: Superblock =
            bincode::deserialize(&block).context("unable to parse superblock")?;
        superblock.validate(num_blocks)?;

        info!("{} total blocks", superblock.num_blocks);
        info!("{} total inodes", superblock.max_inodes);

        let inode_bitmap = read_bitmap(
            &storage,
            superblock.inode_bitmap_start,
            superblock.inode_bitmap_blocks,
            superblock.max_inodes as usize + 1,
        )
        .context("reading inode bitmap")?;
        let block_bitmap = read_bitmap(
            &storage,
            superblock.data_bitmap_start,
            superblock.data_bitmap_blocks,
            superblock.num_data_blocks as usize,
        )
        .context("reading data bitmap")?;

        ensure!(inode_bitmap.is_used(0), "inode zero is marked free");
        ensure!(
            inode_bitmap.is_used(ROOT_INODE as usize),
            "root inode is marked free"
        );
        ensure!(
            inode_bitmap.count_used() - 1 == superblock.allocated_inodes as usize,
            "superblock counts {} inodes but the bitmap marks {}",
            superblock.allocated_inodes,
            inode_bitmap.count_used() - 1
        );
        ensure!(
            block_bitmap.count_used() == superblock.allocated_blocks as usize,
            "superblock counts {} data blocks but the bitmap marks {}",
            superblock.allocated_blocks,
            block_bitmap.count_used()
        );

        let table = read_region(
            &storage,
            superblock.inode_table_start,
            superblock.inode_table_blocks,
        )
        .context("reading inode table")?;

        let mut tree = Tree::new(superblock.max_inodes as usize);
        let mut claimed_blocks = Bitmap::new(superblock.num_data_blocks as usize);
        let mut recorded_child_counts = vec![];

        for inum in inode_bitmap.iter_used().skip(1) {
            let position = inum * INODE_SIZE;
            let record: InodeRecord = bincode::deserialize(&table[position..position + INODE_SIZE])
                .with_context(|| format!("parsing inode #{inum}"))?;

            ensure!(
                record.entry.inum as usize == inum,
                "inode #{inum} is recorded as #{}",
                record.entry.inum
            );

            if record.type_ == InodeType::Directory {
                recorded_child_counts.push((inum as InodeNumber, record.child_count));
            }

            let dentry = load_dentry(
                &storage,
                &superblock,
                &block_bitmap,
                &mut claimed_blocks,
                &record,
            )
            .with_context(|| format!("loading inode #{inum}"))?;

            tree.insert(dentry);
        }

        let leaked_blocks = block_bitmap
            .iter_used()
            .filter(|index| !claimed_blocks.is_used(*index))
            .collect::<Vec<_>>();

        // ids are issued in creation order, so linking in id order restores each child list
        let inums = inode_bitmap.iter_used().skip(2);
        for inum in inums {
            let inum = inum as InodeNumber;
            let dentry = tree.get(inum).expect("we inserted every used inode");
            let parent = dentry.parent.expect("only the root has no parent");
            let name = dentry.name;

            if !tree.contains(parent) {
                bail!("inode #{inum} has free parent #{parent}");
            }

            if tree.find_child(parent, name.as_bytes()).is_some() {
                bail!("directory #{parent} contains duplicate entry: {name}");
            }

            if !tree.link(parent, inum) {
                bail!("inode #{inum} has non-directory parent #{parent}");
            }
        }

        for (inum, recorded) in recorded_child_counts {
            let actual = tree.get(inum).map_or(0, |dentry| dentry.inode.child_count());

            ensure!(
                actual == recorded as usize,
                "directory #{inum} records {recorded} entries but has {actual}"
            );
        }

        check_reachable(&tree, inode_bitmap.count_used() - 1)?;

        let mut fs = Newfs {
            storage,
            superblock,
            inode_bitmap,
            block_bitmap,
            tree,
        };

        for index in leaked_blocks {
            warn!("data block {index} is marked used but no file owns it, reclaiming");
            fs.free_block(index as u32);
        }

        Ok(fs)
    }

    /// Writes the whole in-memory image to storage: superblock, bitmaps, inode table and every
    /// allocated data block.
    pub fn sync(&mut self) -> Result<()> {
        let superblock = self.superblock;

        let superblock_bytes = bincode::serialize(&superblock).context("serializing superblock")?;
        write_region(
            &mut self.storage,
            SUPERBLOCK_BLOCK_NUMBER as u32,
            1,
            &superblock_bytes,
        )
        .context("writing superblock")?;

        write_region(
            &mut self.storage,
            superblock.inode_bitmap_start,
            superblock.inode_bitmap_blocks,
            self.inode_bitmap.as_bytes(),
        )
        .context("writing inode bitmap")?;

        write_region(
            &mut self.storage,
            superblock.data_bitmap_start,
            superblock.data_bitmap_blocks,
            self.block_bitmap.as_bytes(),
        )
        .context("writing data bitmap")?;

        let mut table = vec![0; superblock.inode_table_blocks as usize * BLOCK_SIZE];
        for dentry in self.tree.iter() {
            let position = dentry.inode.inum as usize * INODE_SIZE;
            let record = bincode::serialize(&to_record(dentry)).context("serializing inode")?;

            table[position..position + INODE_SIZE].copy_from_slice(&record);
        }

        write_region(
            &mut self.storage,
            superblock.inode_table_start,
            superblock.inode_table_blocks,
            &table,
        )
        .context("writing inode table")?;

        let mut num_data_blocks = 0;
        for dentry in self.tree.iter_mut() {
            let InodeKind::Regular(contents) = &mut dentry.inode.kind else {
                continue;
            };

            for (n, index) in contents.blocks.iter().enumerate() {
                let block: Block = contents.data[n * BLOCK_SIZE..(n + 1) * BLOCK_SIZE]
                    .try_into()
                    .expect("the mirror holds exactly one block per block index");

                self.storage
                    .write_block(superblock.data_block_number(*index), &block)
                    .with_context(|| format!("writing data block {index}"))?;

                num_data_blocks += 1;
            }

            contents.clear_dirty();
        }

        self.storage.flush().context("flushing storage")?;

        debug!("synced image with {num_data_blocks} data blocks");

        Ok(())
    }

    /// Ends the session, writing the whole image back. Returns the storage.
    pub fn unmount(mut self) -> Result<S> {
        self.sync().context("flushing image")?;

        info!(
            "unmounted: {} inodes and {} data blocks in use",
            self.superblock.allocated_inodes, self.superblock.allocated_blocks
        );

        Ok(self.storage)
    }
}

/// Rebuilds one unlinked dentry from its inode record, reading the file's data blocks.
fn load_dentry<S: NewfsStorage>(
    storage: &S,
    superblock: &Superblock,
    block_bitmap: &Bitmap,
    claimed_blocks: &mut Bitmap,
    record: &InodeRecord,
) -> Result<Dentry> {
    let inum = record.entry.inum;
    let is_root = inum == ROOT_INODE;

    if is_root {
        ensure!(
            record.type_ == InodeType::Directory,
            "root inode does not represent a directory"
        );
        ensure!(record.entry.parent == 0, "root inode has a parent");
    } else {
        ensure!(record.entry.parent != 0, "inode has no parent");
        ensure!(!record.entry.name.is_empty(), "entry has an empty name");
    }

    let kind = match record.type_ {
        InodeType::Free => bail!("inode is marked used but is free"),
        InodeType::Directory => {
            ensure!(record.block_count == 0, "directory owns data blocks");
            InodeKind::Directory { children: vec![] }
        }
        InodeType::Regular => {
            ensure!(
                record.block_count as usize <= MAX_BLOCKS_PER_FILE,
                "file owns {} blocks, more than the maximum",
                record.block_count
            );

            let mut contents = FileContents::default();
            for &index in record.block_indices() {
                ensure!(
                    index < superblock.num_data_blocks,
                    "invalid data block index: {index}"
                );
                ensure!(
                    block_bitmap.is_used(index as usize),
                    "data block {index} is marked free"
                );
                ensure!(
                    !claimed_blocks.is_used(index as usize),
                    "data block {index} is already allocated"
                );
                claimed_blocks.reserve(index as usize);

                let block = storage
                    .read_block(superblock.data_block_number(index))
                    .with_context(|| format!("reading data block {index}"))?;
                contents.push_loaded_block(index, &block);
            }

            InodeKind::Regular(contents)
        }
    };

    Ok(Dentry {
        name: record.entry.name,
        parent: (!is_root).then_some(record.entry.parent),
        inode: Inode {
            inum,
            size: usize::try_from(record.size).context("file size does not fit in memory")?,
            kind,
        },
    })
}

fn to_record(dentry: &Dentry) -> InodeRecord {
    let inode = &dentry.inode;
    let mut record = InodeRecord {
        entry: DirectoryEntry {
            inum: inode.inum,
            parent: dentry.parent.unwrap_or(0),
            name: dentry.name,
        },
        child_count: inode.child_count() as u32,
        ..FREE_INODE
    };

    match &inode.kind {
        InodeKind::Regular(contents) => {
            record.type_ = InodeType::Regular;
            record.size = inode.size as u64;
            record.block_count = contents.blocks.len() as u32;
            record.blocks[..contents.blocks.len()].copy_from_slice(&contents.blocks);
        }
        InodeKind::Directory { .. } => record.type_ = InodeType::Directory,
    }

    record
}

/// Fails unless every one of the `expected` nodes can be reached from the root.
fn check_reachable(tree: &Tree, expected: usize) -> Result<()> {
    let mut stack = vec![ROOT_INODE];
    let mut seen = 0;

    while let Some(inum) = stack.pop() {
        seen += 1;
        ensure!(seen <= expected, "directory tree includes loop");

        if let Some(dentry) = tree.get(inum) {
            stack.extend_from_slice(dentry.inode.children());
        }
    }

    ensure!(
        seen == expected,
        "{} inodes are not reachable from the root",
        expected - seen
    );

    Ok(())
}

fn read_region<S: NewfsStorage>(storage: &S, start: u32, num_blocks: u32) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(num_blocks as usize * BLOCK_SIZE);

    for block_number in start..start + num_blocks {
        bytes.extend_from_slice(&storage.read_block(block_number as usize)?);
    }

    Ok(bytes)
}

fn write_region<S: NewfsStorage>(
    storage: &mut S,
    start: u32,
    num_blocks: u32,
    bytes: &[u8],
) -> Result<()> {
    ensure!(
        bytes.len() <= num_blocks as usize * BLOCK_SIZE,
        "{} bytes do not fit in {num_blocks} blocks",
        bytes.len()
    );

    for n in 0..num_blocks as usize {
        let lo = (n * BLOCK_SIZE).min(bytes.len());
        let hi = ((n + 1) * BLOCK_SIZE).min(bytes.len());

        let mut block = EMPTY_BLOCK;
        block[..hi - lo].copy_from_slice(&bytes[lo..hi]);

        storage.write_block(start as usize + n, &block)?;
    }

    Ok(())
}

fn read_bitmap<S: NewfsStorage>(
    storage: &S,
    start: u32,
    num_blocks: u32,
    len: usize,
) -> Result<Bitmap> {
    let bytes = read_region(storage, start, num_blocks)?;

    Bitmap::from_bytes(bytes, len).context("bitmap region too small")
}
