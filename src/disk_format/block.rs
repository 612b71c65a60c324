/// size of a block in bytes
pub const BLOCK_SIZE: usize = 1024;

/// number of bits held by one bitmap block
pub const BITS_PER_BLOCK: usize = BLOCK_SIZE * 8;

pub type Block = [u8; BLOCK_SIZE];

pub const EMPTY_BLOCK: Block = [0; BLOCK_SIZE];
