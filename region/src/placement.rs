use core::fmt;
use core::str::FromStr;

use log::debug;
use serde::Deserialize;
use serde::Serialize;

use crate::block::Block;
use crate::block::BlockKind;
use crate::block::OwnerId;
use crate::check_invariants;
use crate::error::RegionError;
use crate::error::Result;
use crate::table::Mode;
use crate::table::RegionTable;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    FirstFit,
    BestFit,
    WorstFit,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [Strategy::FirstFit, Strategy::BestFit, Strategy::WorstFit];

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::FirstFit => "first_fit",
            Strategy::BestFit => "best_fit",
            Strategy::WorstFit => "worst_fit",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = &'static str;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s {
            "first_fit" => Ok(Strategy::FirstFit),
            "best_fit" => Ok(Strategy::BestFit),
            "worst_fit" => Ok(Strategy::WorstFit),
            _ => Err("unknown strategy, expected first_fit, best_fit or worst_fit"),
        }
    }
}

/// Picks the index of the hole `strategy` would place `size` units into.
/// Ties go to the lowest address.
pub fn find_hole(blocks: &[Block], size: usize, strategy: Strategy) -> Option<usize> {
    let mut candidates = blocks
        .iter()
        .enumerate()
        .filter(|(_, b)| b.is_hole() && b.size() >= size);
    match strategy {
        Strategy::FirstFit => candidates.next().map(|(i, _)| i),
        // min_by_key keeps the first of equal minima.
        Strategy::BestFit => candidates.min_by_key(|(_, b)| b.size()).map(|(i, _)| i),
        Strategy::WorstFit => candidates
            .fold(None, |best: Option<(usize, usize)>, (i, b)| match best {
                Some((_, largest)) if largest >= b.size() => best,
                _ => Some((i, b.size())),
            })
            .map(|(i, _)| i),
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub owner: OwnerId,
    pub start: usize,
    pub size: usize,
}

impl RegionTable {
    /// Places `size` units with `strategy` under a fresh owner id.
    pub fn allocate(&mut self, size: usize, strategy: Strategy) -> Result<Allocation> {
        self.expect_mode(Mode::Contiguous)?;
        let owner = OwnerId(self.next_owner);
        let allocation = self.allocate_as(owner, size, strategy)?;
        self.next_owner += 1;
        self.total_allocations += 1;
        check_invariants!(self);
        Ok(allocation)
    }

    pub(crate) fn allocate_as(
        &mut self,
        owner: OwnerId,
        size: usize,
        strategy: Strategy,
    ) -> Result<Allocation> {
        if size == 0 {
            return Err(RegionError::InvalidSize);
        }
        let free = self.free_size();
        if size > free {
            return Err(RegionError::InsufficientMemory {
                requested: size,
                free,
            });
        }
        let index =
            find_hole(&self.blocks, size, strategy).ok_or(RegionError::NoFit { requested: size })?;
        self.occupy(index, size, owner)
    }

    /// Turns the first `size` units of the hole at `index` into `owner`'s block.
    fn occupy(&mut self, index: usize, size: usize, owner: OwnerId) -> Result<Allocation> {
        if self.blocks[index].size() > size {
            self.split_at(index, size)?;
        }
        self.replace_kind(index, BlockKind::Occupied(owner));
        self.fill_backing(index, owner.fill_byte());
        let start = self.blocks[index].start;
        debug!("placement: {owner} <- [{start}, {}]", start + size - 1);
        Ok(Allocation { owner, start, size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockId;
    use crate::config::RegionConfig;
    use crate::store::HeapStore;
    use crate::store::NoBacking;

    fn table() -> RegionTable {
        RegionTable::new(RegionConfig::new(1024, 256), Box::new(HeapStore::new())).unwrap()
    }

    fn holes(sizes: &[(bool, usize)]) -> Vec<Block> {
        let mut start = 0;
        sizes
            .iter()
            .enumerate()
            .map(|(i, &(hole, size))| {
                let kind = if hole {
                    BlockKind::Hole
                } else {
                    BlockKind::Occupied(OwnerId(i as u32))
                };
                let block = Block::new(kind, start, start + size - 1, BlockId(i as u32));
                start += size;
                block
            })
            .collect()
    }

    #[test]
    fn strategy_names_round_trip() {
        for strategy in Strategy::ALL {
            assert_eq!(strategy.as_str().parse::<Strategy>(), Ok(strategy));
        }
        assert!("next_fit".parse::<Strategy>().is_err());
    }

    #[test]
    fn find_hole_per_strategy() {
        // [H50][P10][H200][P10][H100]
        let blocks = holes(&[(true, 50), (false, 10), (true, 200), (false, 10), (true, 100)]);
        assert_eq!(find_hole(&blocks, 80, Strategy::FirstFit), Some(2));
        assert_eq!(find_hole(&blocks, 80, Strategy::BestFit), Some(4));
        assert_eq!(find_hole(&blocks, 80, Strategy::WorstFit), Some(2));
        assert_eq!(find_hole(&blocks, 40, Strategy::BestFit), Some(0));
        assert_eq!(find_hole(&blocks, 201, Strategy::FirstFit), None);
    }

    #[test]
    fn ties_go_to_lowest_address() {
        let blocks = holes(&[(true, 100), (false, 1), (true, 100), (false, 1), (true, 100)]);
        assert_eq!(find_hole(&blocks, 10, Strategy::BestFit), Some(0));
        assert_eq!(find_hole(&blocks, 10, Strategy::WorstFit), Some(0));
    }

    #[test]
    fn allocate_splits_and_stamps() {
        let mut table = table();
        let a = table.allocate(100, Strategy::FirstFit).unwrap();
        assert_eq!(a.owner, OwnerId(1));
        assert_eq!(a.start, 256);
        assert_eq!(table.blocks().len(), 2);
        assert_eq!(table.free_size(), 668);
        let block = table.block_of(a.owner).unwrap();
        let bytes = table.backing_bytes(block).unwrap();
        assert_eq!(bytes.len(), 100 * 1024);
        assert!(bytes.iter().all(|&b| b == 1));
        let rest = table.backing_bytes(&table.blocks()[1]).unwrap();
        assert!(rest.iter().all(|&b| b == 0));
        assert_eq!(table.total_allocations(), 1);
    }

    #[test]
    fn exact_fit_converts_in_place() {
        let mut table = table();
        let a = table.allocate(768, Strategy::BestFit).unwrap();
        assert_eq!(a.start, 256);
        assert_eq!(table.blocks().len(), 1);
        assert_eq!(table.hole_count(), 0);
        assert_eq!(table.free_size(), 0);
    }

    #[test]
    fn zero_size_is_invalid() {
        let mut table = table();
        assert!(matches!(
            table.allocate(0, Strategy::FirstFit),
            Err(RegionError::InvalidSize)
        ));
        assert_eq!(table.total_allocations(), 0);
    }

    #[test]
    fn oversized_request_is_insufficient_memory() {
        let mut table = table();
        assert!(matches!(
            table.allocate(769, Strategy::FirstFit),
            Err(RegionError::InsufficientMemory {
                requested: 769,
                free: 768
            })
        ));
    }

    #[test]
    fn fragmented_request_is_no_fit() {
        let mut table = table();
        let ids: Vec<_> = (0..4)
            .map(|_| table.allocate(192, Strategy::FirstFit).unwrap().owner)
            .collect();
        table.deallocate(ids[0]).unwrap();
        table.deallocate(ids[2]).unwrap();
        assert_eq!(table.free_size(), 384);
        assert!(matches!(
            table.allocate(300, Strategy::WorstFit),
            Err(RegionError::NoFit { requested: 300 })
        ));
    }

    #[test]
    fn owner_ids_only_advance_on_success() {
        let mut table = table();
        assert!(table.allocate(1000, Strategy::FirstFit).is_err());
        let a = table.allocate(10, Strategy::FirstFit).unwrap();
        assert_eq!(a.owner, OwnerId(1));
    }

    #[test]
    fn unbacked_allocation_still_tracks_layout() {
        let mut table = RegionTable::new(RegionConfig::default(), Box::new(NoBacking)).unwrap();
        let a = table.allocate(64, Strategy::FirstFit).unwrap();
        let block = table.block_of(a.owner).unwrap();
        assert_eq!(block.backing(), None);
        assert!(table.backing_bytes(block).is_none());
    }
}
