use serde::Serialize;
use spin::RwLock;

use crate::block::BlockId;
use crate::block::OwnerId;
use crate::buddy::BuddyAllocation;
use crate::buddy::ConversionReport;
use crate::coalesce::Freed;
use crate::compact::AutoCompaction;
use crate::compact::CompactionReport;
use crate::error::Result;
use crate::placement::Allocation;
use crate::placement::Strategy;
use crate::stats::BlockView;
use crate::stats::Stats;
use crate::table::Mode;
use crate::table::RegionTable;

/// Result of a mode-routed allocation.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Granted {
    Contiguous(Allocation),
    Buddy(BuddyAllocation),
}

impl Granted {
    pub fn owner(&self) -> OwnerId {
        match self {
            Granted::Contiguous(a) => a.owner,
            Granted::Buddy(a) => a.owner,
        }
    }

    pub fn start(&self) -> usize {
        match self {
            Granted::Contiguous(a) => a.start,
            Granted::Buddy(a) => a.start,
        }
    }
}

/// A [`RegionTable`] behind a reader-writer lock.
///
/// Mutations hold the write lock for the whole operation. Queries take the
/// read lock and may run alongside each other.
pub struct SharedRegion {
    table: RwLock<RegionTable>,
}

impl SharedRegion {
    pub fn new(table: RegionTable) -> Self {
        Self {
            table: RwLock::new(table),
        }
    }

    /// Allocates with `strategy` in contiguous mode; buddy mode ignores it.
    pub fn allocate(&self, size: usize, strategy: Strategy) -> Result<Granted> {
        let mut table = self.table.write();
        match table.mode() {
            Mode::Contiguous => table.allocate(size, strategy).map(Granted::Contiguous),
            Mode::Buddy => table.buddy_allocate(size).map(Granted::Buddy),
        }
    }

    pub fn deallocate(&self, owner: OwnerId) -> Result<Freed> {
        let mut table = self.table.write();
        match table.mode() {
            Mode::Contiguous => table.deallocate(owner),
            Mode::Buddy => table.buddy_deallocate(owner),
        }
    }

    pub fn compact(&self) -> Result<CompactionReport> {
        self.table.write().compact()
    }

    /// `None` uses the configured threshold.
    pub fn auto_compact(&self, threshold: Option<f64>) -> Result<AutoCompaction> {
        let mut table = self.table.write();
        match threshold {
            Some(threshold) => table.auto_compact(threshold),
            None => table.auto_compact_default(),
        }
    }

    pub fn convert_to_buddy(&self) -> Result<ConversionReport> {
        self.table.write().convert_to_buddy()
    }

    pub fn revert_from_buddy(&self) -> Result<ConversionReport> {
        self.table.write().revert_from_buddy()
    }

    pub fn reset(&self) {
        self.table.write().reset();
    }

    pub fn stats(&self) -> Stats {
        self.table.read().stats()
    }

    pub fn list_blocks(&self) -> Vec<BlockView> {
        self.table.read().list_blocks()
    }

    pub fn fragmentation(&self) -> f64 {
        self.table.read().fragmentation()
    }

    pub fn buddy_of(&self, id: BlockId) -> Option<BlockId> {
        self.read(|table| {
            table
                .blocks()
                .iter()
                .find(|b| b.id() == id)
                .and_then(|b| b.buddy())
        })
    }

    pub fn read<R>(&self, f: impl FnOnce(&RegionTable) -> R) -> R {
        f(&self.table.read())
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut RegionTable) -> R) -> R {
        f(&mut self.table.write())
    }

    pub fn into_inner(self) -> RegionTable {
        self.table.into_inner()
    }
}

impl core::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.table.try_read() {
            Some(table) => f.debug_struct("SharedRegion").field("table", &*table).finish(),
            None => f
                .debug_struct("SharedRegion")
                .field("table", &"<locked>")
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::config::RegionConfig;
    use crate::store::HeapStore;

    fn shared() -> SharedRegion {
        let table =
            RegionTable::new(RegionConfig::new(1024, 256), Box::new(HeapStore::new())).unwrap();
        SharedRegion::new(table)
    }

    #[test]
    fn allocation_is_routed_by_mode() {
        let region = shared();
        let a = region.allocate(100, Strategy::BestFit).unwrap();
        assert!(matches!(a, Granted::Contiguous(_)));
        region.deallocate(a.owner()).unwrap();

        region.convert_to_buddy().unwrap();
        let b = region.allocate(100, Strategy::WorstFit).unwrap();
        let Granted::Buddy(buddy) = b else {
            panic!("expected a buddy allocation, got {b:?}");
        };
        assert_eq!(buddy.allocated, 128);
        assert!(region.buddy_of(BlockId(0)).is_none());
        region.deallocate(b.owner()).unwrap();
        assert_eq!(region.stats().free_size, 512);
    }

    #[test]
    fn auto_compact_without_threshold_uses_config() {
        let region = shared();
        let a = region.allocate(10, Strategy::FirstFit).unwrap();
        region.allocate(10, Strategy::FirstFit).unwrap();
        region.deallocate(a.owner()).unwrap();
        let outcome = region.auto_compact(None).unwrap();
        assert!(!outcome.compacted());
        let outcome = region.auto_compact(Some(0.0)).unwrap();
        assert!(outcome.compacted());
        assert_eq!(region.read(RegionTable::total_compactions), 1);
    }

    #[test]
    fn concurrent_mutations_keep_the_table_valid() {
        let region = Arc::new(shared());
        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let region = Arc::clone(&region);
                thread::spawn(move || {
                    for round in 0..25 {
                        let size = 1 + (worker * 7 + round) % 20;
                        if let Ok(granted) = region.allocate(size, Strategy::ALL[round % 3]) {
                            let _ = region.stats();
                            region.deallocate(granted.owner()).unwrap();
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        let table = Arc::try_unwrap(region).unwrap().into_inner();
        assert!(table.validate().is_ok());
        assert_eq!(table.free_size(), 768);
        assert_eq!(table.hole_count(), 1);
        assert_eq!(table.total_allocations(), table.total_deallocations());
    }
}
