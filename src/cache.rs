use std::{io, iter};

use serde::Serialize;

use crate::{
    classify::{Addr, Classifier},
    replace::{self, AccessResult, InvariantError, Owner, Replace},
    snapshot::Snapshot,
};

/// Which sets of the cache are simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    All,
    /// Only this slice/set; everything else is skipped.
    One { slice: usize, set: usize },
}

#[derive(Serialize)]
pub struct CacheStats {
    pub name: String,
    pub slices: usize,
    pub sets: usize,
    pub ways: usize,
    pub accesses: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub miss_rate: f64,
    pub occupancy_a: u64,
    pub occupancy_b: u64,
}

/// Every simulated set of every slice, plus running statistics.
#[derive(Debug)]
pub struct Cache<S: Replace> {
    name: String,
    classifier: Classifier,
    scope: Scope,
    n_ways: usize,
    pub sets: Vec<S>,
    accesses: Vec<u64>,
    misses: Vec<u64>,
    hits: u64,
    total_misses: u64,
    evictions: u64,
    occupancy: [usize; 2],
}

impl<S: Replace> Cache<S> {
    pub fn new(
        name: String,
        classifier: Classifier,
        scope: Scope,
        n_ways: usize,
        make_set: impl FnMut() -> S,
    ) -> Self {
        let n_sets = match scope {
            Scope::All => classifier.n_slices() * classifier.n_sets(),
            Scope::One { slice, set } => {
                assert!(slice < classifier.n_slices() && set < classifier.n_sets());
                1
            }
        };

        Cache {
            name,
            classifier,
            scope,
            n_ways,
            sets: iter::repeat_with(make_set).take(n_sets).collect(),
            accesses: vec![0; n_sets],
            misses: vec![0; n_sets],
            hits: 0,
            total_misses: 0,
            evictions: 0,
            occupancy: [0; 2],
        }
    }

    /// Row of `addr` in slice-major, set-minor order, if it is simulated.
    fn index(&self, addr: &Addr) -> Option<usize> {
        match self.scope {
            Scope::All => Some(addr.slice * self.classifier.n_sets() + addr.set),
            Scope::One { slice, set } => (addr.slice == slice && addr.set == set).then_some(0),
        }
    }

    fn account(&mut self, owner: Owner, result: &AccessResult) -> Result<(), InvariantError> {
        match *result {
            AccessResult::Hit { .. } => self.hits += 1,
            AccessResult::MissInsert { .. } => self.total_misses += 1,
            AccessResult::MissEvict { .. } => {
                self.total_misses += 1;
                self.evictions += 1;
            }
        }
        replace::account(&mut self.occupancy, owner, result)
    }
}

pub trait IsCache {
    /// `None` when the address falls outside the simulated scope.
    fn access(&mut self, addr: u64) -> Result<Option<AccessResult>, InvariantError>;
    fn split_addr(&self, addr: u64) -> Addr;
    fn snapshot(&self, event: u64) -> Snapshot;
    /// Per-set access and miss counts, one row per simulated set.
    fn write_table(&self, accesses: &mut dyn io::Write, misses: &mut dyn io::Write)
        -> io::Result<()>;
    fn make_stats(&self) -> CacheStats;
}

impl<S: Replace> IsCache for Cache<S> {
    fn access(&mut self, addr: u64) -> Result<Option<AccessResult>, InvariantError> {
        let addr = self.split_addr(addr);
        let Some(idx) = self.index(&addr) else {
            return Ok(None);
        };

        let result = self.sets[idx].access(addr.line())?;
        self.accesses[idx] += 1;
        if result.is_miss() {
            self.misses[idx] += 1;
        }
        self.account(addr.owner, &result)?;
        Ok(Some(result))
    }

    fn split_addr(&self, addr: u64) -> Addr {
        self.classifier.classify(addr)
    }

    fn snapshot(&self, event: u64) -> Snapshot {
        Snapshot {
            event,
            occupancy: self.occupancy.map(|o| o as u64),
            accesses: self.hits + self.total_misses,
            misses: self.total_misses,
        }
    }

    fn write_table(
        &self,
        accesses: &mut dyn io::Write,
        misses: &mut dyn io::Write,
    ) -> io::Result<()> {
        for (a, m) in self.accesses.iter().zip(&self.misses) {
            writeln!(accesses, "{a}")?;
            writeln!(misses, "{m}")?;
        }
        Ok(())
    }

    fn make_stats(&self) -> CacheStats {
        let accesses = self.hits + self.total_misses;
        CacheStats {
            name: self.name.clone(),
            slices: self.classifier.n_slices(),
            sets: match self.scope {
                Scope::All => self.classifier.n_sets(),
                Scope::One { .. } => 1,
            },
            ways: self.n_ways,
            accesses,
            hits: self.hits,
            misses: self.total_misses,
            evictions: self.evictions,
            miss_rate: if accesses == 0 {
                0.0
            } else {
                self.total_misses as f64 / accesses as f64
            },
            occupancy_a: self.occupancy[Owner::A.index()] as u64,
            occupancy_b: self.occupancy[Owner::B.index()] as u64,
        }
    }
}
