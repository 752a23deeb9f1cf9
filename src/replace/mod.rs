pub mod lru;
pub mod partition;

use std::ops::RangeInclusive;

use thiserror::Error;

/// The two co-running workloads sharing the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    A,
    B,
}

impl Owner {
    pub fn index(self) -> usize {
        match self {
            Owner::A => 0,
            Owner::B => 1,
        }
    }

    pub fn other(self) -> Owner {
        match self {
            Owner::A => Owner::B,
            Owner::B => Owner::A,
        }
    }
}

/// A resident cache line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line {
    pub tag: u64,
    pub owner: Owner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessResult {
    Hit { way: usize },
    MissInsert { way: usize },
    MissEvict { way: usize, victim: Line },
}

impl AccessResult {
    pub fn is_miss(&self) -> bool {
        !matches!(self, AccessResult::Hit { .. })
    }
}

/// Bookkeeping inside a set broke. Never caused by input data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantError {
    #[error("way {way} outside of ways {range:?}")]
    WayOutOfRange {
        way: usize,
        range: RangeInclusive<usize>,
    },
    #[error("no free way left after {filled} allocations in ways {range:?}")]
    NoFreeWay {
        filled: usize,
        range: RangeInclusive<usize>,
    },
    #[error("way {way} already holds tag {resident:#x}, cannot allocate it to tag {incoming:#x}")]
    WayClaimed {
        way: usize,
        resident: u64,
        incoming: u64,
    },
    #[error("way {way} is the LRU tail of a full set but holds no line")]
    VacantTail { way: usize },
    #[error("mirrored views disagree on way {way}: {left:?} vs {right:?}")]
    MirrorMismatch {
        way: usize,
        left: Option<Line>,
        right: Option<Line>,
    },
    #[error("tag {tag:#x} maps to way {way} which holds {found:?}")]
    StaleTag {
        tag: u64,
        way: usize,
        found: Option<Line>,
    },
    #[error("occupancy of owner {owner:?} would drop below zero")]
    OccupancyUnderflow { owner: Owner },
}

/// Replacement state of a single set.
pub trait Replace {
    fn access(&mut self, line: Line) -> Result<AccessResult, InvariantError>;
    fn occupancy(&self, owner: Owner) -> usize;
    fn resident(&self) -> usize;
}

/// Occupancy bookkeeping shared by every set kind: an insert credits the
/// accessor, an eviction of the other owner's line moves one unit over.
pub(crate) fn account(
    occupancy: &mut [usize; 2],
    owner: Owner,
    result: &AccessResult,
) -> Result<(), InvariantError> {
    match *result {
        AccessResult::Hit { .. } => {}
        AccessResult::MissInsert { .. } => occupancy[owner.index()] += 1,
        AccessResult::MissEvict { victim, .. } if victim.owner == owner.other() => {
            let loser = &mut occupancy[victim.owner.index()];
            *loser = loser
                .checked_sub(1)
                .ok_or(InvariantError::OccupancyUnderflow {
                    owner: victim.owner,
                })?;
            occupancy[owner.index()] += 1;
        }
        AccessResult::MissEvict { .. } => {}
    }
    Ok(())
}
