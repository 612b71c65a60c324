use bitvec::prelude::{BitVec, Lsb0};

/// A bit-per-unit allocation tracker. A set bit means "in use".
///
/// Used for both inode ids and data blocks. Allocation is first-fit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bitmap {
    bits: BitVec<u8, Lsb0>,
}

impl Bitmap {
    /// A bitmap of `len` free units.
    pub fn new(len: usize) -> Self {
        let mut bits = BitVec::new();
        bits.resize(len, false);

        Bitmap { bits }
    }

    /// Reconstructs a bitmap of `len` units from its raw on-disk bytes.
    ///
    /// Returns `None` if `bytes` is too short to hold `len` bits.
    pub fn from_bytes(mut bytes: Vec<u8>, len: usize) -> Option<Self> {
        if bytes.len() * 8 < len {
            return None;
        }

        bytes.truncate(len.div_ceil(8));

        let mut bits = BitVec::from_vec(bytes);
        bits.truncate(len);
        bits.set_uninitialized(false);

        Some(Bitmap { bits })
    }

    /// The raw bytes of the bitmap. Bits past `len` are zero.
    pub fn as_bytes(&self) -> &[u8] {
        self.bits.as_raw_slice()
    }

    pub fn is_used(&self, index: usize) -> bool {
        self.bits.get(index).is_some_and(|bit| *bit)
    }

    pub fn count_used(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn count_free(&self) -> usize {
        self.bits.count_zeros()
    }

    /// Marks the lowest free unit as used and returns its index.
    ///
    /// Leaves the bitmap untouched if every unit is in use.
    pub fn allocate(&mut self) -> Option<usize> {
        let assigned = self.bits.first_zero();

        if let Some(index) = assigned {
            self.bits.set(index, true);
        }

        assigned
    }

    /// Marks `index` as used regardless of its current state.
    pub fn reserve(&mut self, index: usize) {
        self.bits.set(index, true);
    }

    pub fn free(&mut self, index: usize) {
        self.bits.set(index, false);
    }

    /// The indices of every used unit, in ascending order.
    pub fn iter_used(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter_ones()
    }
}
