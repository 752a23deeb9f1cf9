use crate::replace::{Line, Owner};

/// Bit added to every address of stream A so the two streams never share
/// a tag. Also the bit the owner test looks at.
pub const OWNER_BIT: u32 = 53;
pub const OWNER_MARK: u64 = 1 << OWNER_BIT;

pub const SLICE_BITS: u32 = 3;

// Physical slice hash: each output bit is the parity of these address bits.
const SLICE_HASH: [&[u32]; SLICE_BITS as usize] = [
    &[37, 36, 35, 34, 31, 30, 27, 26, 23, 22, 19, 16, 13, 12, 8],
    &[
        37, 35, 34, 33, 31, 29, 28, 26, 24, 23, 22, 21, 20, 19, 17, 15, 13, 11, 7,
    ],
    &[
        36, 35, 33, 32, 30, 28, 27, 26, 25, 24, 22, 20, 18, 17, 16, 14, 12, 10, 6,
    ],
];

const fn bit_mask(bits: &[u32]) -> u64 {
    let mut mask = 0u64;
    let mut i = 0;
    while i < bits.len() {
        mask |= 1 << bits[i];
        i += 1;
    }
    mask
}

const SLICE_MASKS: [u64; SLICE_BITS as usize] = [
    bit_mask(SLICE_HASH[0]),
    bit_mask(SLICE_HASH[1]),
    bit_mask(SLICE_HASH[2]),
];

/// Slice index of `addr`, first hash term in the most significant bit.
pub fn slice_of(addr: u64) -> usize {
    SLICE_MASKS
        .iter()
        .fold(0, |acc, mask| (acc << 1) | ((addr & mask).count_ones() & 1) as usize)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addr {
    pub tag: u64,
    pub set: usize,
    pub slice: usize,
    pub owner: Owner,
}

impl Addr {
    pub fn line(&self) -> Line {
        Line {
            tag: self.tag,
            owner: self.owner,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BitSection {
    shift: u32,
    mask: u64,
}

impl BitSection {
    fn apply(&self, num: u64) -> u64 {
        (num >> self.shift) & self.mask
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    set_sec: BitSection,
    tag_shift: u32,
    owner_shift: u32,
    sliced: bool,
}

impl Classifier {
    /// `set_bits + block_bits` must stay below [`OWNER_BIT`].
    pub fn new(set_bits: u32, block_bits: u32, sliced: bool) -> Self {
        assert!(set_bits + block_bits < OWNER_BIT);
        let tag_shift = set_bits + block_bits;
        Classifier {
            set_sec: BitSection {
                shift: block_bits,
                mask: (1u64 << set_bits) - 1,
            },
            tag_shift,
            owner_shift: OWNER_BIT - tag_shift,
            sliced,
        }
    }

    pub fn n_sets(&self) -> usize {
        self.set_sec.mask as usize + 1
    }

    pub fn n_slices(&self) -> usize {
        if self.sliced {
            1 << SLICE_BITS
        } else {
            1
        }
    }

    pub fn owner_of(&self, tag: u64) -> Owner {
        if tag >> self.owner_shift == 1 {
            Owner::A
        } else {
            Owner::B
        }
    }

    pub fn classify(&self, addr: u64) -> Addr {
        let tag = addr >> self.tag_shift;
        Addr {
            tag,
            set: self.set_sec.apply(addr) as usize,
            slice: if self.sliced { slice_of(addr) } else { 0 },
            owner: self.owner_of(tag),
        }
    }
}
