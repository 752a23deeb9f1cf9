use serde::Deserialize;

use super::{
    account,
    lru::{FillOrder, LruView},
    AccessResult, InvariantError, Line, Owner, Replace,
};

/// Way allocation of the two owners: A gets `0..=end_a`, B gets
/// `begin_b..=ways-1`. The ranges may overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Partition {
    pub end_a: usize,
    pub begin_b: usize,
}

impl Partition {
    /// Number of ways both owners may use.
    pub fn overlap(&self) -> usize {
        (self.end_a + 1).saturating_sub(self.begin_b)
    }
}

/// A set split between two owners with an optional shared band.
///
/// Each owner sees its own recency view. A line living in the band is
/// present in both views at the same way, so both views observe every
/// access to it.
#[derive(Debug)]
pub struct PartitionedSet {
    a: LruView,
    b: LruView,
    occupancy: [usize; 2],
}

impl PartitionedSet {
    pub fn new(n_ways: usize, partition: Partition) -> Self {
        PartitionedSet {
            a: LruView::new(0..=partition.end_a, FillOrder::Ascending),
            b: LruView::new(partition.begin_b..=n_ways - 1, FillOrder::Descending),
            occupancy: [0; 2],
        }
    }

    pub fn view(&self, owner: Owner) -> &LruView {
        match owner {
            Owner::A => &self.a,
            Owner::B => &self.b,
        }
    }

    /// Both views must agree on every band way and be internally sound.
    pub fn check(&self) -> Result<(), InvariantError> {
        self.a.check()?;
        self.b.check()?;
        for way in self.a.recency().filter(|&way| self.b.contains(way)) {
            let left = self.a.line(way);
            let right = self.b.line(way);
            if left != right {
                return Err(InvariantError::MirrorMismatch { way, left, right });
            }
        }
        Ok(())
    }

    fn access_from(&mut self, line: Line) -> Result<AccessResult, InvariantError> {
        let filled = self.occupancy[line.owner.index()];
        let (own, other) = match line.owner {
            Owner::A => (&mut self.a, &mut self.b),
            Owner::B => (&mut self.b, &mut self.a),
        };

        if let Some(way) = own.lookup(line.tag) {
            own.touch(way)?;
            if other.contains(way) {
                other.touch(way)?;
            }
            return Ok(AccessResult::Hit { way });
        }

        if !own.is_full() {
            let way = own.fill_way(filled)?;
            own.claim(way, line)?;
            own.touch(way)?;
            if other.contains(way) {
                other.claim(way, line)?;
                other.touch(way)?;
            }
            return Ok(AccessResult::MissInsert { way });
        }

        let way = own.tail_way();
        let victim = own.reclaim(way, line)?;
        own.touch(way)?;
        if other.contains(way) {
            let mirrored = other.reclaim(way, line)?;
            if mirrored != victim {
                return Err(InvariantError::MirrorMismatch {
                    way,
                    left: Some(victim),
                    right: Some(mirrored),
                });
            }
            other.touch(way)?;
        }
        Ok(AccessResult::MissEvict { way, victim })
    }
}

impl Replace for PartitionedSet {
    fn access(&mut self, line: Line) -> Result<AccessResult, InvariantError> {
        let result = self.access_from(line)?;
        account(&mut self.occupancy, line.owner, &result)?;
        #[cfg(debug_assertions)]
        self.check()?;
        Ok(result)
    }

    fn occupancy(&self, owner: Owner) -> usize {
        self.occupancy[owner.index()]
    }

    fn resident(&self) -> usize {
        let shared = self
            .a
            .recency()
            .filter(|&way| self.b.contains(way) && self.a.line(way).is_some())
            .count();
        self.a.resident() + self.b.resident() - shared
    }
}
