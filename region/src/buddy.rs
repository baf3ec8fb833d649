//! Power-of-two buddy mode.
//!
//! In buddy mode the table manages the largest power of two that fits in the
//! user size. Splitting a block gives both halves fresh ids that point at each
//! other; the parent's identity is remembered in each half's lineage so that
//! merging the pair back restores the parent, including its own buddy link.
//! This lets a free pair keep merging upwards until it meets a busy buddy.

use log::debug;
use log::info;
use log::warn;
use serde::Serialize;

use crate::block::Ancestor;
use crate::block::BlockKind;
use crate::block::OwnerId;
use crate::check_invariants;
use crate::coalesce::Freed;
use crate::error::RegionError;
use crate::error::Result;
use crate::placement::Strategy;
use crate::table::Mode;
use crate::table::RegionTable;

/// Largest power of two that is not greater than `user_size`.
pub fn buddy_capacity(user_size: usize) -> usize {
    match user_size.checked_ilog2() {
        Some(log) => 1 << log,
        None => 0,
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuddyAllocation {
    pub owner: OwnerId,
    pub start: usize,
    pub requested: usize,
    pub allocated: usize,
    pub wasted: usize,
}

/// Outcome of re-placing every live block after a mode switch.
///
/// Re-placed owners are not new allocations: `total_allocations` and
/// `total_deallocations` are left as they were before the switch.
#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionReport {
    pub converted: usize,
    pub attempted: usize,
    pub capacity: usize,
    pub lost: Vec<OwnerId>,
}

impl RegionTable {
    pub fn convert_to_buddy(&mut self) -> Result<ConversionReport> {
        self.expect_mode(Mode::Contiguous)?;
        let snapshot = self.occupied_snapshot();
        let capacity = buddy_capacity(self.user_size());
        self.rebuild(Mode::Buddy, capacity);
        let report = self.replay(snapshot, |table, owner, size| {
            table.buddy_allocate_as(owner, size).map(drop)
        });
        info!(
            "buddy: converted {}/{} blocks into {capacity} units ({} units not represented)",
            report.converted,
            report.attempted,
            self.user_size() - capacity
        );
        check_invariants!(self);
        Ok(report)
    }

    pub fn revert_from_buddy(&mut self) -> Result<ConversionReport> {
        self.expect_mode(Mode::Buddy)?;
        let snapshot = self.occupied_snapshot();
        self.rebuild(Mode::Contiguous, self.user_size());
        let report = self.replay(snapshot, |table, owner, size| {
            table.allocate_as(owner, size, Strategy::FirstFit).map(drop)
        });
        info!(
            "buddy: reverted {}/{} blocks to contiguous mode",
            report.converted, report.attempted
        );
        check_invariants!(self);
        Ok(report)
    }

    /// Re-places `snapshot` in order. Owners keep their ids; failures are
    /// reported as lost.
    fn replay<F>(&mut self, snapshot: Vec<(OwnerId, usize)>, mut place: F) -> ConversionReport
    where
        F: FnMut(&mut Self, OwnerId, usize) -> Result<()>,
    {
        let attempted = snapshot.len();
        let mut lost = Vec::new();
        for (owner, size) in snapshot {
            if let Err(err) = place(self, owner, size) {
                warn!("buddy: could not re-place {owner} ({size} units): {err}");
                lost.push(owner);
            }
        }
        ConversionReport {
            converted: attempted - lost.len(),
            attempted,
            capacity: self.managed_size,
            lost,
        }
    }

    pub fn buddy_allocate(&mut self, size: usize) -> Result<BuddyAllocation> {
        self.expect_mode(Mode::Buddy)?;
        let owner = OwnerId(self.next_owner);
        let allocation = self.buddy_allocate_as(owner, size)?;
        self.next_owner += 1;
        self.total_allocations += 1;
        check_invariants!(self);
        Ok(allocation)
    }

    fn buddy_allocate_as(&mut self, owner: OwnerId, size: usize) -> Result<BuddyAllocation> {
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
        let rounded = size
            .checked_next_power_of_two()
            .ok_or(RegionError::NoFit { requested: size })?;
        let index = self
            .blocks
            .iter()
            .position(|b| b.is_hole() && b.size() >= rounded)
            .ok_or(RegionError::NoFit { requested: size })?;
        while self.blocks[index].size() > rounded {
            self.split_buddy(index)?;
        }
        self.replace_kind(index, BlockKind::Occupied(owner));
        self.fill_backing(index, owner.fill_byte());
        let start = self.blocks[index].start;
        debug!("buddy: {owner} <- [{start}, {}] for {size} units", start + rounded - 1);
        Ok(BuddyAllocation {
            owner,
            start,
            requested: size,
            allocated: rounded,
            wasted: rounded - size,
        })
    }

    /// Halves the block at `index`; the halves become each other's buddy.
    fn split_buddy(&mut self, index: usize) -> Result<()> {
        let parent = &self.blocks[index];
        let mut lineage = parent.lineage.clone();
        lineage.push(Ancestor {
            id: parent.id,
            buddy: parent.buddy,
        });
        let half = parent.size() / 2;
        self.split_at(index, half)?;

        let left_id = self.alloc_block_id();
        let right = &mut self.blocks[index + 1];
        let right_id = right.id;
        right.buddy = Some(left_id);
        right.lineage.clone_from(&lineage);

        let left = &mut self.blocks[index];
        left.id = left_id;
        left.buddy = Some(right_id);
        left.lineage = lineage;
        Ok(())
    }

    pub fn buddy_deallocate(&mut self, owner: OwnerId) -> Result<Freed> {
        self.expect_mode(Mode::Buddy)?;
        let index = self.release_owner(owner)?;
        let block = &self.blocks[index];
        let freed = Freed {
            owner,
            start: block.start,
            size: block.size(),
        };
        let merges = self.merge_buddies()?;
        self.total_deallocations += 1;
        debug!("buddy: freed {owner} after {merges} merges");
        check_invariants!(self);
        Ok(freed)
    }

    /// Merges free buddy pairs until a full scan finds none.
    fn merge_buddies(&mut self) -> Result<usize> {
        let mut merges = 0;
        while let Some(lower) = self.find_free_pair()? {
            self.merge_adjacent(lower)?;
            let merged = &mut self.blocks[lower];
            match merged.lineage.pop() {
                Some(parent) => {
                    merged.id = parent.id;
                    merged.buddy = parent.buddy;
                }
                None => merged.buddy = None,
            }
            debug!("buddy: merged pair into [{}, {}]", merged.start, merged.end);
            merges += 1;
        }
        Ok(merges)
    }

    /// Index of the lower block of the first pair of free buddies.
    fn find_free_pair(&self) -> Result<Option<usize>> {
        for (index, block) in self.blocks.iter().enumerate() {
            let Some(buddy_id) = block.buddy.filter(|_| block.is_hole()) else {
                continue;
            };
            let Some(other) = self.blocks.iter().position(|b| b.id == buddy_id) else {
                continue;
            };
            if !self.blocks[other].is_hole() {
                continue;
            }
            if index.abs_diff(other) != 1 {
                return Err(RegionError::InvariantViolation(format!(
                    "buddies {:?} and {buddy_id:?} are not adjacent",
                    block.id
                )));
            }
            return Ok(Some(index.min(other)));
        }
        Ok(None)
    }
}
