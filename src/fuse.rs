use std::ffi::OsStr;
use std::ops::ControlFlow;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use log::{error, info};

use crate::{
    disk_format::{
        block::BLOCK_SIZE,
        directory_entry::{MAX_NAME_LEN, PATH_SEPARATOR},
        inode::ROOT_INODE,
    },
    error::{NewfsError, Result},
    metadata::{OwnershipMetadata, TimeMetadata},
    newfs::{Attributes, Child, EntryKind, InodeNumber, Newfs},
    storage::NewfsStorage,
};

/// Serves a [`Newfs`] session to the kernel. FUSE inode numbers are newfs inode numbers.
///
/// fuser hands out `&mut self` to one callback at a time, which is the only locking the session
/// needs.
pub struct NewfsFs<S: NewfsStorage> {
    newfs: Newfs<S>,
    first_free_handle: u64,
}

impl<S: NewfsStorage> NewfsFs<S> {
    const TTL: Duration = Duration::new(1, 0);
    const GENERATION: u64 = 1;

    pub fn new(newfs: Newfs<S>) -> NewfsFs<S> {
        NewfsFs {
            newfs,
            first_free_handle: 0,
        }
    }

    pub fn into_inner(self) -> Newfs<S> {
        self.newfs
    }

    fn path(&self, ino: u64) -> Result<String> {
        self.newfs
            .path_of(ino as InodeNumber)
            .ok_or(NewfsError::NotFound)
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Result<String> {
        let name = name.to_str().ok_or(NewfsError::InvalidName)?;

        Ok(join_path(&self.path(parent)?, name))
    }

    /// Sets uid and gid to those of the backing store. Sets permissions to 755.
    fn get_attributes(&self, path: &str) -> Result<FileAttr> {
        let attributes = self.newfs.attributes(path)?;

        let time_metadata = self.newfs.storage().time_metadata().unwrap_or_default();
        let ownership_metadata = self.newfs.storage().ownership_metadata().unwrap_or_default();

        Ok(file_attr(&attributes, &time_metadata, &ownership_metadata))
    }

    fn lookup_entry(&self, parent: u64, name: &OsStr) -> Result<FileAttr> {
        self.get_attributes(&self.child_path(parent, name)?)
    }

    fn set_attributes(
        &mut self,
        ino: u64,
        size: Option<u64>,
        times_changed: bool,
    ) -> Result<FileAttr> {
        let path = self.path(ino)?;

        if let Some(size) = size {
            self.newfs.truncate(&path, size as usize)?;
        }

        if times_changed {
            self.newfs.update_timestamps(&path)?;
        }

        self.get_attributes(&path)
    }

    /// Reads at most `size` bytes, stopping at the end of the file.
    fn read_file(&self, ino: u64, offset: usize, size: usize) -> Result<Vec<u8>> {
        let path = self.path(ino)?;
        let file_size = self.newfs.attributes(&path)?.size as usize;

        let mut data = vec![0; size.min(file_size.saturating_sub(offset))];
        if data.is_empty() {
            return Ok(data);
        }

        let read_len = self.newfs.read(&path, &mut data, offset)?;
        data.truncate(read_len);

        Ok(data)
    }

    fn read_directory(&self, ino: u64, offset: usize) -> Result<Vec<Child>> {
        let path = self.path(ino)?;
        let mut children = vec![];

        while let Some(child) = self.newfs.list_children(&path, offset + children.len())? {
            children.push(child);
        }

        Ok(children)
    }

    fn write_file(&mut self, ino: u64, offset: usize, data: &[u8]) -> Result<u32> {
        let path = self.path(ino)?;
        let write_len = self.newfs.write(&path, data, offset)?;

        Ok(write_len as u32)
    }

    fn create_entry(&mut self, parent: u64, name: &OsStr, kind: EntryKind) -> Result<FileAttr> {
        let path = self.child_path(parent, name)?;

        match kind {
            EntryKind::Regular => self.newfs.create_file(&path)?,
            EntryKind::Directory => self.newfs.create_directory(&path)?,
        };

        self.get_attributes(&path)
    }

    fn check_access(&self, ino: u64, mask: i32) -> Result<()> {
        self.newfs.access(&self.path(ino)?, mask)
    }

    fn open_entry(&mut self, ino: u64, kind: EntryKind) -> Result<u64> {
        let path = self.path(ino)?;

        match kind {
            EntryKind::Regular => self.newfs.open(&path)?,
            EntryKind::Directory => self.newfs.open_directory(&path)?,
        }

        Ok(self.assign_file_handle())
    }

    fn remove_entry(&mut self, parent: u64, name: &OsStr, kind: EntryKind) -> Result<()> {
        let path = self.child_path(parent, name)?;

        match kind {
            EntryKind::Regular => self.newfs.remove_file(&path),
            EntryKind::Directory => self.newfs.remove_directory(&path),
        }
    }

    fn rename_entry(
        &mut self,
        parent: u64,
        name: &OsStr,
        new_parent: u64,
        new_name: &OsStr,
    ) -> Result<()> {
        let from = self.child_path(parent, name)?;
        let to = self.child_path(new_parent, new_name)?;

        self.newfs.rename(&from, &to)
    }

    fn assign_file_handle(&mut self) -> u64 {
        let assigned = self.first_free_handle;
        self.first_free_handle += 1;

        assigned
    }
}

/// The path of the entry `name` inside the directory at `parent`.
fn join_path(parent: &str, name: &str) -> String {
    format!(
        "{}{PATH_SEPARATOR}{name}",
        parent.trim_end_matches(PATH_SEPARATOR)
    )
}

fn file_attr(
    attributes: &Attributes,
    time_metadata: &TimeMetadata,
    ownership_metadata: &OwnershipMetadata,
) -> FileAttr {
    FileAttr {
        ino: attributes.inum as u64,
        size: attributes.size,
        blocks: attributes.blocks as u64,
        atime: time_metadata.atime,
        mtime: time_metadata.mtime,
        ctime: time_metadata.mtime,
        crtime: time_metadata.crtime,
        kind: file_type(attributes.kind),
        perm: 0o755,
        nlink: if attributes.inum == ROOT_INODE { 2 } else { 1 },
        uid: ownership_metadata.uid,
        gid: ownership_metadata.gid,
        rdev: 0,
        flags: 0,
        blksize: BLOCK_SIZE as u32,
    }
}

fn file_type(kind: EntryKind) -> FileType {
    match kind {
        EntryKind::Regular => FileType::RegularFile,
        EntryKind::Directory => FileType::Directory,
    }
}

impl<S: NewfsStorage> Filesystem for NewfsFs<S> {
    fn destroy(&mut self) {
        if let Err(err) = self.newfs.sync() {
            error!("unable to write the image back: {err:#}");
            std::process::exit(1);
        }

        info!("image written back");
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let superblock = self.newfs.superblock();
        let num_free_blocks = self.newfs.free_blocks();

        reply.statfs(
            superblock.num_blocks as u64,
            num_free_blocks as u64,
            num_free_blocks as u64,
            superblock.max_inodes as u64,
            self.newfs.free_inodes() as u64,
            BLOCK_SIZE as u32,
            MAX_NAME_LEN as u32,
            BLOCK_SIZE as u32,
        );
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        match self.lookup_entry(parent, name) {
            Ok(attr) => reply.entry(&Self::TTL, &attr, Self::GENERATION),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        match self.path(ino).and_then(|path| self.get_attributes(&path)) {
            Ok(attr) => reply.attr(&Self::TTL, &attr),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let times_changed = atime.is_some() || mtime.is_some();

        match self.set_attributes(ino, size, times_changed) {
            Ok(attr) => reply.attr(&Self::TTL, &attr),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        match self.check_access(ino, mask) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        match self.open_entry(ino, EntryKind::Regular) {
            Ok(handle) => reply.opened(handle, flags as u32),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        match self.open_entry(ino, EntryKind::Directory) {
            Ok(handle) => reply.opened(handle, flags as u32),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock: Option<u64>,
        reply: ReplyData,
    ) {
        match self.read_file(ino, offset as usize, size as usize) {
            Ok(data) => reply.data(&data),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let children = match self.read_directory(ino, offset as usize) {
            Ok(children) => children,
            Err(err) => {
                reply.error(err.to_errno());
                return;
            }
        };

        children
            .into_iter()
            .enumerate()
            .try_for_each(|(i, child)| {
                let is_buffer_full = reply.add(
                    child.inum as u64,
                    offset + (i + 1) as i64,
                    file_type(child.kind),
                    child.name,
                );

                if is_buffer_full {
                    return ControlFlow::Break(());
                }

                ControlFlow::Continue(())
            });

        reply.ok();
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        match self.write_file(ino, offset as usize, data) {
            Ok(write_len) => reply.written(write_len),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        let kind = if mode & libc::S_IFMT == libc::S_IFDIR {
            EntryKind::Directory
        } else {
            EntryKind::Regular
        };

        match self.create_entry(parent, name, kind) {
            Ok(attr) => reply.entry(&Self::TTL, &attr, Self::GENERATION),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        match self.create_entry(parent, name, EntryKind::Regular) {
            Ok(attr) => reply.created(
                &Self::TTL,
                &attr,
                Self::GENERATION,
                self.assign_file_handle(),
                flags as u32,
            ),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        match self.create_entry(parent, name, EntryKind::Directory) {
            Ok(attr) => reply.entry(&Self::TTL, &attr, Self::GENERATION),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        match self.remove_entry(parent, name, EntryKind::Regular) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        match self.remove_entry(parent, name, EntryKind::Directory) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        match self.rename_entry(parent, name, newparent, newname) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.to_errno()),
        }
    }
}
