use log::debug;
use serde::Serialize;

use crate::block::OwnerId;
use crate::check_invariants;
use crate::error::Result;
use crate::table::Mode;
use crate::table::RegionTable;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Freed {
    pub owner: OwnerId,
    pub start: usize,
    pub size: usize,
}

impl RegionTable {
    /// Frees `owner`'s block and merges it with its immediate free neighbours.
    ///
    /// Coalescing is local: the right neighbour is absorbed first, then the
    /// freed block is absorbed by its left neighbour. Nothing beyond the two
    /// immediate neighbours is inspected.
    pub fn deallocate(&mut self, owner: OwnerId) -> Result<Freed> {
        self.expect_mode(Mode::Contiguous)?;
        let index = self.release_owner(owner)?;
        let block = &self.blocks[index];
        let freed = Freed {
            owner,
            start: block.start,
            size: block.size(),
        };
        let merged = self.coalesce_neighbours(index)?;
        self.total_deallocations += 1;
        debug!(
            "coalesce: freed {owner} [{}, {}], now hole [{}, {}]",
            freed.start,
            freed.start + freed.size - 1,
            self.blocks[merged].start,
            self.blocks[merged].end
        );
        check_invariants!(self);
        Ok(freed)
    }

    /// Returns the index of the hole that ends up containing `index`.
    fn coalesce_neighbours(&mut self, mut index: usize) -> Result<usize> {
        if self.blocks.get(index + 1).is_some_and(|b| b.is_hole()) {
            self.merge_adjacent(index)?;
        }
        if index > 0 && self.blocks[index - 1].is_hole() {
            self.merge_adjacent(index - 1)?;
            index -= 1;
        }
        Ok(index)
    }
}
