pub mod disk_format;
pub mod error;
pub mod fuse;
pub mod metadata;
pub mod newfs;
pub mod storage;
