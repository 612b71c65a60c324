/// File-backed newfs storage.
mod file;
/// Memory-backed newfs storage.
mod memory;
/// The newfs storage abstraction.
mod newfs_storage;

pub use file::*;
pub use memory::*;
pub use newfs_storage::*;
