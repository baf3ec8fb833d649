use std::collections::HashSet;

use log::debug;
use log::info;
use log::warn;
use serde::Serialize;

use crate::block::BackingRange;
use crate::block::Block;
use crate::block::BlockId;
use crate::block::BlockKind;
use crate::block::OwnerId;
use crate::check_invariants;
use crate::config::RegionConfig;
use crate::error::BackingError;
use crate::error::RegionError;
use crate::error::Result;
use crate::store::BackingRegion;
use crate::store::BackingStore;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Contiguous,
    Buddy,
}

/// Ordered arena of blocks covering `[os_reserved, os_reserved + managed_size)`.
///
/// The following must hold before and after every public operation:
/// - blocks are sorted by start address and each starts right after the previous one ends,
/// - the first block starts at `os_reserved` and the last one ends at the managed boundary,
/// - every block mirrors exactly its share of the backing buffer, or none at all when unbacked.
pub struct RegionTable {
    pub(crate) config: RegionConfig,
    pub(crate) blocks: Vec<Block>,
    pub(crate) mode: Mode,
    pub(crate) managed_size: usize,
    pub(crate) next_block_id: u32,
    pub(crate) next_owner: u32,
    pub(crate) total_allocations: u64,
    pub(crate) total_deallocations: u64,
    pub(crate) total_compactions: u64,
    store: Box<dyn BackingStore>,
    region: Option<BackingRegion>,
}

impl RegionTable {
    /// Builds a table over a fresh buffer from `store`. If the store cannot
    /// provide one the table runs unbacked.
    pub fn new(config: RegionConfig, store: Box<dyn BackingStore>) -> Result<Self> {
        let mut table = Self::empty(config, store)?;
        table.initialize();
        table.log_initialized();
        Ok(table)
    }

    /// Like [`RegionTable::new`], but fails when the store cannot back the table.
    pub fn new_backed(config: RegionConfig, store: Box<dyn BackingStore>) -> Result<Self> {
        let mut table = Self::empty(config, store)?;
        table.acquire_backing()?;
        table.create_initial_hole();
        table.log_initialized();
        Ok(table)
    }

    fn empty(config: RegionConfig, store: Box<dyn BackingStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            blocks: Vec::new(),
            mode: Mode::Contiguous,
            managed_size: config.user_size(),
            next_block_id: 1,
            next_owner: 1,
            total_allocations: 0,
            total_deallocations: 0,
            total_compactions: 0,
            store,
            region: None,
        })
    }

    fn log_initialized(&self) {
        info!(
            "region: initialized total={} os_reserved={} user={} backing={}",
            self.config.total_size,
            self.config.os_reserved,
            self.config.user_size(),
            self.region
                .as_ref()
                .map_or_else(|| "unbacked".to_string(), |r| format!("{r:?}")),
        );
    }

    fn initialize(&mut self) {
        self.mode = Mode::Contiguous;
        self.next_block_id = 1;
        self.next_owner = 1;
        self.total_allocations = 0;
        self.total_deallocations = 0;
        self.total_compactions = 0;
        self.rebuild(Mode::Contiguous, self.config.user_size());
    }

    /// Releases the backing buffer and reinitializes with the same sizes.
    pub fn reset(&mut self) {
        self.release_backing();
        self.initialize();
        info!("region: reset");
        check_invariants!(self);
    }

    /// Drops every block, re-acquires a buffer for `managed_size` units and
    /// lays down a single hole over it.
    pub(crate) fn rebuild(&mut self, mode: Mode, managed_size: usize) {
        self.release_backing();
        self.mode = mode;
        self.managed_size = managed_size;
        if let Err(err) = self.acquire_backing() {
            warn!(
                "region: {} store could not back {} units ({err}), continuing unbacked",
                self.store.name(),
                managed_size
            );
        }
        self.create_initial_hole();
    }

    fn acquire_backing(&mut self) -> core::result::Result<(), BackingError> {
        let len = self
            .managed_size
            .checked_mul(self.config.unit_bytes)
            .ok_or(BackingError::SizeOverflow {
                units: self.managed_size,
                unit_bytes: self.config.unit_bytes,
            })?;
        let region = self.store.acquire(len)?;
        debug!("region: acquired {region:?} from {}", self.store.name());
        self.region = Some(region);
        Ok(())
    }

    fn release_backing(&mut self) {
        if let Some(region) = self.region.take() {
            debug!("region: releasing {region:?}");
            self.store.release(region);
        }
    }

    pub(crate) fn create_initial_hole(&mut self) {
        debug_assert!(self.managed_size > 0, "a table always manages at least one unit");
        self.blocks.clear();
        let start = self.config.os_reserved;
        let id = self.alloc_block_id();
        let mut hole = Block::new(BlockKind::Hole, start, start + self.managed_size - 1, id);
        hole.backing = self.backing_for(start, self.managed_size);
        self.blocks.push(hole);
    }

    pub(crate) fn alloc_block_id(&mut self) -> BlockId {
        let id = BlockId(self.next_block_id);
        self.next_block_id += 1;
        id
    }

    pub(crate) fn backing_for(&self, start: usize, size: usize) -> Option<BackingRange> {
        self.region.as_ref().map(|_| BackingRange {
            offset: (start - self.config.os_reserved) * self.config.unit_bytes,
            len: size * self.config.unit_bytes,
        })
    }

    /// Splits the block at `index` so that the left part holds `offset` units.
    /// The left part keeps the block id; the right part gets a fresh one and
    /// is inserted right after it. Both keep the original kind.
    pub(crate) fn split_at(&mut self, index: usize, offset: usize) -> Result<(usize, usize)> {
        let block = self
            .blocks
            .get(index)
            .ok_or_else(|| RegionError::InvariantViolation(format!("no block at {index}")))?;
        if offset == 0 || offset >= block.size() {
            return Err(RegionError::InvariantViolation(format!(
                "split offset {offset} outside block {:?} of size {}",
                block.id,
                block.size()
            )));
        }
        let (kind, start, end) = (block.kind, block.start, block.end);
        let split = start + offset;

        let id = self.alloc_block_id();
        let mut right = Block::new(kind, split, end, id);
        right.backing = self.backing_for(split, end - split + 1);

        let left_backing = self.backing_for(start, offset);
        let left = &mut self.blocks[index];
        left.end = split - 1;
        left.backing = left_backing;

        self.blocks.insert(index + 1, right);
        debug!("region: split [{start}, {end}] at {split}");
        Ok((index, index + 1))
    }

    /// Merges the block at `index + 1` into the block at `index`.
    pub(crate) fn merge_adjacent(&mut self, index: usize) -> Result<()> {
        let (Some(a), Some(b)) = (self.blocks.get(index), self.blocks.get(index + 1)) else {
            return Err(RegionError::InvariantViolation(format!(
                "merge at {index} needs two blocks"
            )));
        };
        if a.end + 1 != b.start {
            return Err(RegionError::InvariantViolation(format!(
                "blocks [{}, {}] and [{}, {}] are not contiguous",
                a.start, a.end, b.start, b.end
            )));
        }
        if !a.is_hole() || !b.is_hole() {
            return Err(RegionError::InvariantViolation(format!(
                "cannot merge occupied block at {}",
                if a.is_hole() { b.start } else { a.start }
            )));
        }
        let end = b.end;
        let start = a.start;
        let backing = self.backing_for(start, end - start + 1);
        let absorber = &mut self.blocks[index];
        absorber.end = end;
        absorber.backing = backing;
        self.blocks.remove(index + 1);
        debug!("region: merged into [{start}, {end}]");
        Ok(())
    }

    pub(crate) fn replace_kind(&mut self, index: usize, kind: BlockKind) {
        self.blocks[index].kind = kind;
    }

    pub(crate) fn fill_backing(&mut self, index: usize, byte: u8) {
        let Some(range) = self.blocks[index].backing else {
            return;
        };
        if let Some(region) = self.region.as_mut() {
            region.as_mut_slice()[range.offset..range.end()].fill(byte);
        }
    }

    pub(crate) fn region_mut(&mut self) -> Option<&mut BackingRegion> {
        self.region.as_mut()
    }

    pub(crate) fn position_of(&self, owner: OwnerId) -> Option<usize> {
        self.blocks.iter().position(|b| b.owner() == Some(owner))
    }

    /// Finds the occupied block of `owner`, zeroes its bytes and turns it into a hole.
    pub(crate) fn release_owner(&mut self, owner: OwnerId) -> Result<usize> {
        let index = self.position_of(owner).ok_or(RegionError::NotFound(owner))?;
        self.fill_backing(index, 0);
        self.replace_kind(index, BlockKind::Hole);
        Ok(index)
    }

    /// `(owner, size)` of every occupied block, in address order.
    pub(crate) fn occupied_snapshot(&self) -> Vec<(OwnerId, usize)> {
        self.blocks
            .iter()
            .filter_map(|b| b.owner().map(|owner| (owner, b.size())))
            .collect()
    }

    pub(crate) fn expect_mode(&self, expected: Mode) -> Result<()> {
        if self.mode == expected {
            Ok(())
        } else {
            Err(RegionError::ModeMismatch {
                expected,
                actual: self.mode,
            })
        }
    }

    /// Checks every structural invariant of the table.
    pub fn validate(&self) -> Result<()> {
        let violation = |msg: String| Err(RegionError::InvariantViolation(msg));
        let first_start = self.config.os_reserved;
        let last_end = first_start + self.managed_size - 1;

        let Some(first) = self.blocks.first() else {
            return violation("table is empty".to_string());
        };
        if first.start != first_start {
            return violation(format!("first block starts at {}", first.start));
        }
        let mut ids = HashSet::with_capacity(self.blocks.len());
        let mut owners = HashSet::new();
        let mut expected_start = first_start;
        let mut covered = 0;
        for block in &self.blocks {
            if block.start != expected_start {
                return violation(format!(
                    "block {:?} starts at {}, expected {expected_start}",
                    block.id, block.start
                ));
            }
            if block.end < block.start {
                return violation(format!("block {:?} ends before it starts", block.id));
            }
            if !ids.insert(block.id) {
                return violation(format!("duplicate block id {:?}", block.id));
            }
            if let Some(owner) = block.owner() {
                if !owners.insert(owner) {
                    return violation(format!("owner {owner} occupies two blocks"));
                }
            }
            let expected_backing = self.backing_for(block.start, block.size());
            if block.backing != expected_backing {
                return violation(format!(
                    "block {:?} mirrors {:?}, expected {expected_backing:?}",
                    block.id, block.backing
                ));
            }
            if let (Some(range), Some(region)) = (block.backing, self.region.as_ref()) {
                if range.end() > region.len() {
                    return violation(format!("block {:?} overruns the backing buffer", block.id));
                }
            }
            covered += block.size();
            expected_start = block.end + 1;
        }
        if expected_start != last_end + 1 || covered != self.managed_size {
            return violation(format!(
                "blocks cover {covered} units ending at {}, expected {} ending at {last_end}",
                expected_start - 1,
                self.managed_size
            ));
        }
        for block in &self.blocks {
            let Some(buddy_id) = block.buddy else {
                continue;
            };
            if let Some(buddy) = self.blocks.iter().find(|b| b.id == buddy_id) {
                if buddy.size() != block.size() {
                    return violation(format!(
                        "block {:?} of size {} has buddy {buddy_id:?} of size {}",
                        block.id,
                        block.size(),
                        buddy.size()
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn config(&self) -> &RegionConfig {
        &self.config
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn total_size(&self) -> usize {
        self.config.total_size
    }

    pub fn os_reserved(&self) -> usize {
        self.config.os_reserved
    }

    pub fn user_size(&self) -> usize {
        self.config.user_size()
    }

    /// Units represented by the table: the user size, or its largest power
    /// of two in buddy mode.
    pub fn managed_size(&self) -> usize {
        self.managed_size
    }

    pub fn unit_bytes(&self) -> usize {
        self.config.unit_bytes
    }

    pub fn free_size(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_hole()).map(Block::size).sum()
    }

    pub fn occupied_count(&self) -> usize {
        self.blocks.iter().filter(|b| !b.is_hole()).count()
    }

    pub fn hole_count(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_hole()).count()
    }

    pub fn largest_hole(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| b.is_hole())
            .map(Block::size)
            .max()
            .unwrap_or(0)
    }

    pub fn block_of(&self, owner: OwnerId) -> Option<&Block> {
        self.position_of(owner).map(|i| &self.blocks[i])
    }

    pub fn backing(&self) -> Option<&BackingRegion> {
        self.region.as_ref()
    }

    /// Bytes currently mirrored by `block`, if the table is backed.
    pub fn backing_bytes(&self, block: &Block) -> Option<&[u8]> {
        let range = block.backing?;
        self.region
            .as_ref()
            .map(|region| &region.as_slice()[range.offset..range.end()])
    }

    pub fn page_size(&self) -> usize {
        self.store.page_size()
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    pub fn total_allocations(&self) -> u64 {
        self.total_allocations
    }

    pub fn total_deallocations(&self) -> u64 {
        self.total_deallocations
    }

    pub fn total_compactions(&self) -> u64 {
        self.total_compactions
    }
}

impl Drop for RegionTable {
    fn drop(&mut self) {
        self.release_backing();
    }
}

impl core::fmt::Debug for RegionTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RegionTable")
            .field("mode", &self.mode)
            .field("total_size", &self.config.total_size)
            .field("os_reserved", &self.config.os_reserved)
            .field("managed_size", &self.managed_size)
            .field("blocks", &self.blocks)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}
