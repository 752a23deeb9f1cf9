use std::{collections::HashMap, ops::RangeInclusive};

use super::{account, AccessResult, InvariantError, Line, Owner, Replace};

const NIL: usize = usize::MAX;

/// Which end of the way range is handed out first while a view fills up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy)]
struct Node {
    prev: usize,
    next: usize,
    line: Option<Line>,
}

/// Recency order over a contiguous range of physical ways.
///
/// Nodes live in a fixed array indexed by `way - first way`; the list is
/// threaded through `prev`/`next` offsets with `NIL` as the end marker.
/// `tags` maps every resident tag to its physical way.
#[derive(Debug)]
pub struct LruView {
    ways: RangeInclusive<usize>,
    nodes: Vec<Node>,
    head: usize,
    tail: usize,
    tags: HashMap<u64, usize>,
    fill: FillOrder,
}

impl LruView {
    pub fn new(ways: RangeInclusive<usize>, fill: FillOrder) -> Self {
        assert!(!ways.is_empty());
        let len = ways.end() - ways.start() + 1;
        let order: Vec<usize> = match fill {
            FillOrder::Ascending => (0..len).collect(),
            FillOrder::Descending => (0..len).rev().collect(),
        };

        let mut nodes = vec![
            Node {
                prev: NIL,
                next: NIL,
                line: None,
            };
            len
        ];
        for pair in order.windows(2) {
            nodes[pair[0]].next = pair[1];
            nodes[pair[1]].prev = pair[0];
        }

        LruView {
            ways,
            nodes,
            head: order[0],
            tail: order[len - 1],
            tags: HashMap::with_capacity(len),
            fill,
        }
    }

    fn local(&self, way: usize) -> Result<usize, InvariantError> {
        if self.ways.contains(&way) {
            Ok(way - self.ways.start())
        } else {
            Err(InvariantError::WayOutOfRange {
                way,
                range: self.ways.clone(),
            })
        }
    }

    pub fn contains(&self, way: usize) -> bool {
        self.ways.contains(&way)
    }

    pub fn resident(&self) -> usize {
        self.tags.len()
    }

    pub fn is_full(&self) -> bool {
        self.tags.len() >= self.nodes.len()
    }

    pub fn lookup(&self, tag: u64) -> Option<usize> {
        self.tags.get(&tag).copied()
    }

    pub fn line(&self, way: usize) -> Option<Line> {
        self.local(way).ok().and_then(|idx| self.nodes[idx].line)
    }

    pub fn mru_way(&self) -> usize {
        self.ways.start() + self.head
    }

    pub fn tail_way(&self) -> usize {
        self.ways.start() + self.tail
    }

    /// Physical ways from MRU to LRU.
    pub fn recency(&self) -> impl Iterator<Item = usize> + '_ {
        let first = *self.ways.start();
        std::iter::successors((self.head != NIL).then_some(self.head), move |&idx| {
            let next = self.nodes[idx].next;
            (next != NIL).then_some(next)
        })
        .map(move |idx| first + idx)
    }

    /// The way a view hands out after `filled` allocations.
    pub fn fill_way(&self, filled: usize) -> Result<usize, InvariantError> {
        if filled >= self.nodes.len() {
            return Err(InvariantError::NoFreeWay {
                filled,
                range: self.ways.clone(),
            });
        }
        Ok(match self.fill {
            FillOrder::Ascending => self.ways.start() + filled,
            FillOrder::Descending => self.ways.end() - filled,
        })
    }

    /// Move `way` to the MRU position.
    pub fn touch(&mut self, way: usize) -> Result<(), InvariantError> {
        let idx = self.local(way)?;
        if self.head == idx {
            return Ok(());
        }

        let Node { prev, next, .. } = self.nodes[idx];
        self.nodes[prev].next = next;
        if next == NIL {
            self.tail = prev;
        } else {
            self.nodes[next].prev = prev;
        }

        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = self.head;
        self.nodes[self.head].prev = idx;
        self.head = idx;
        Ok(())
    }

    fn install(&mut self, way: usize, line: Line) -> Result<Option<Line>, InvariantError> {
        let idx = self.local(way)?;
        let old = self.nodes[idx].line.replace(line);
        if let Some(old) = old {
            self.tags.remove(&old.tag);
        }
        self.tags.insert(line.tag, way);
        Ok(old)
    }

    /// Place `line` into a vacant way.
    pub fn claim(&mut self, way: usize, line: Line) -> Result<(), InvariantError> {
        match self.install(way, line)? {
            None => Ok(()),
            Some(resident) => Err(InvariantError::WayClaimed {
                way,
                resident: resident.tag,
                incoming: line.tag,
            }),
        }
    }

    /// Replace the line held by `way`, returning the evicted one.
    pub fn reclaim(&mut self, way: usize, line: Line) -> Result<Line, InvariantError> {
        self.install(way, line)?
            .ok_or(InvariantError::VacantTail { way })
    }

    /// Every tag points at a way holding it and every held line is mapped.
    pub fn check(&self) -> Result<(), InvariantError> {
        for (&tag, &way) in &self.tags {
            let found = self.line(way);
            if found.map(|l| l.tag) != Some(tag) {
                return Err(InvariantError::StaleTag { tag, way, found });
            }
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            if let Some(line) = node.line {
                let way = self.ways.start() + idx;
                if self.tags.get(&line.tag) != Some(&way) {
                    return Err(InvariantError::StaleTag {
                        tag: line.tag,
                        way,
                        found: Some(line),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A plain set: one view over all of its ways.
#[derive(Debug)]
pub struct LruSet {
    view: LruView,
    occupancy: [usize; 2],
}

impl LruSet {
    pub fn new(n_ways: usize) -> Self {
        LruSet::with_fill(n_ways, FillOrder::Ascending)
    }

    pub fn with_fill(n_ways: usize, fill: FillOrder) -> Self {
        LruSet {
            view: LruView::new(0..=n_ways - 1, fill),
            occupancy: [0; 2],
        }
    }

    pub fn view(&self) -> &LruView {
        &self.view
    }
}

impl Replace for LruSet {
    fn access(&mut self, line: Line) -> Result<AccessResult, InvariantError> {
        let view = &mut self.view;
        let result = if let Some(way) = view.lookup(line.tag) {
            view.touch(way)?;
            AccessResult::Hit { way }
        } else if !view.is_full() {
            let way = view.fill_way(view.resident())?;
            view.claim(way, line)?;
            view.touch(way)?;
            AccessResult::MissInsert { way }
        } else {
            let way = view.tail_way();
            let victim = view.reclaim(way, line)?;
            view.touch(way)?;
            AccessResult::MissEvict { way, victim }
        };
        account(&mut self.occupancy, line.owner, &result)?;
        Ok(result)
    }

    fn occupancy(&self, owner: Owner) -> usize {
        self.occupancy[owner.index()]
    }

    fn resident(&self) -> usize {
        self.view.resident()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn a(tag: u64) -> Line {
        Line {
            tag,
            owner: Owner::A,
        }
    }

    fn b(tag: u64) -> Line {
        Line {
            tag,
            owner: Owner::B,
        }
    }

    #[test]
    fn eleven_lines_fill_the_set_and_the_twelfth_evicts_the_first() {
        let mut set = LruSet::new(11);
        for tag in 0..11 {
            assert_eq!(
                set.access(a(tag)).unwrap(),
                AccessResult::MissInsert { way: tag as usize }
            );
        }
        assert_eq!(set.resident(), 11);
        assert_eq!(set.occupancy(Owner::A), 11);

        assert_eq!(
            set.access(a(11)).unwrap(),
            AccessResult::MissEvict {
                way: 0,
                victim: a(0)
            }
        );
        assert_eq!(set.resident(), 11);
        assert_eq!(set.view().lookup(0), None);
        assert_eq!(set.view().lookup(11), Some(0));
    }

    #[test]
    fn hits_refresh_without_evicting() {
        let mut set = LruSet::new(4);
        for tag in 0..4 {
            set.access(a(tag)).unwrap();
        }
        for _ in 0..10 {
            assert_eq!(set.access(a(1)).unwrap(), AccessResult::Hit { way: 1 });
        }
        assert_eq!(set.occupancy(Owner::A), 4);
        assert_eq!(set.view().mru_way(), 1);
        assert_eq!(set.view().recency().collect::<Vec<_>>(), vec![1, 3, 2, 0]);
    }

    #[test]
    fn evicts_the_line_touched_longest_ago() {
        let mut set = LruSet::new(4);
        for tag in 0..4 {
            set.access(a(tag)).unwrap();
        }
        set.access(a(0)).unwrap();
        set.access(a(2)).unwrap();
        set.access(a(3)).unwrap();

        let result = set.access(a(9)).unwrap();
        assert_eq!(
            result,
            AccessResult::MissEvict {
                way: 1,
                victim: a(1)
            }
        );
        assert_eq!(set.view().tail_way(), 0);
    }

    #[test]
    fn descending_fill_starts_at_the_last_way() {
        let mut set = LruSet::with_fill(4, FillOrder::Descending);
        let ways: Vec<_> = (0..4)
            .map(|tag| match set.access(b(tag)).unwrap() {
                AccessResult::MissInsert { way } => way,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(ways, vec![3, 2, 1, 0]);
        assert_eq!(set.occupancy(Owner::B), 4);
    }

    #[test]
    fn evicting_the_other_owners_line_moves_occupancy() {
        let mut set = LruSet::new(2);
        set.access(a(1)).unwrap();
        set.access(b(2)).unwrap();
        assert_eq!(set.occupancy(Owner::A), 1);
        assert_eq!(set.occupancy(Owner::B), 1);

        // A evicts its own line: no transfer.
        set.access(a(3)).unwrap();
        assert_eq!(set.occupancy(Owner::A), 1);
        assert_eq!(set.occupancy(Owner::B), 1);

        // A evicts B's line.
        set.access(a(4)).unwrap();
        assert_eq!(set.occupancy(Owner::A), 2);
        assert_eq!(set.occupancy(Owner::B), 0);
    }

    #[test]
    fn touching_a_foreign_way_is_an_invariant_error() {
        let mut view = LruView::new(3..=5, FillOrder::Ascending);
        assert_eq!(
            view.touch(7),
            Err(InvariantError::WayOutOfRange { way: 7, range: 3..=5 })
        );
        assert!(view.fill_way(3).is_err());
    }

    #[test]
    fn claiming_an_occupied_way_is_rejected() {
        let mut view = LruView::new(0..=1, FillOrder::Ascending);
        view.claim(0, a(1)).unwrap();
        assert!(matches!(
            view.claim(0, a(2)),
            Err(InvariantError::WayClaimed { way: 0, .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_matches_reference_lru(tags in prop::collection::vec(0u64..12, 1..200)) {
            const WAYS: usize = 4;
            let mut set = LruSet::new(WAYS);
            // MRU first.
            let mut model: Vec<u64> = Vec::new();

            for tag in tags {
                let before = set.resident();
                let result = set.access(a(tag)).unwrap();
                if let Some(pos) = model.iter().position(|&t| t == tag) {
                    prop_assert!(
                        matches!(result, AccessResult::Hit { .. }),
                        "expected hit, got {:?}",
                        result
                    );
                    prop_assert_eq!(set.resident(), before);
                    model.remove(pos);
                } else if model.len() < WAYS {
                    prop_assert!(
                        matches!(result, AccessResult::MissInsert { .. }),
                        "expected insert, got {:?}",
                        result
                    );
                } else {
                    let lru = model.pop().unwrap();
                    match result {
                        AccessResult::MissEvict { victim, .. } => prop_assert_eq!(victim.tag, lru),
                        other => prop_assert!(false, "expected eviction, got {:?}", other),
                    }
                }
                model.insert(0, tag);

                prop_assert!(set.resident() <= WAYS);
                prop_assert_eq!(set.view().lookup(tag), Some(set.view().mru_way()));
                let order: Vec<u64> = set
                    .view()
                    .recency()
                    .filter_map(|way| set.view().line(way))
                    .map(|line| line.tag)
                    .collect();
                prop_assert_eq!(&order, &model);
                prop_assert!(set.view().check().is_ok());
            }
        }
    }
}
