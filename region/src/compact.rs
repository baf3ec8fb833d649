use log::debug;
use log::info;
use serde::Serialize;

use crate::block::Block;
use crate::block::BlockKind;
use crate::block::OwnerId;
use crate::check_invariants;
use crate::error::RegionError;
use crate::error::Result;
use crate::table::Mode;
use crate::table::RegionTable;

#[derive(Clone, Copy, PartialEq, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionReport {
    pub moved_count: usize,
    pub bytes_moved: usize,
    pub frag_before: f64,
    pub frag_after: f64,
    pub holes_before: usize,
    pub holes_after: usize,
}

#[derive(Clone, Copy, PartialEq, Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AutoCompaction {
    Compacted(CompactionReport),
    Skipped { fragmentation: f64, threshold: f64 },
}

impl AutoCompaction {
    pub fn compacted(&self) -> bool {
        matches!(self, AutoCompaction::Compacted(_))
    }
}

impl RegionTable {
    /// Slides every occupied block down to `os_reserved`, in address order,
    /// leaving at most one trailing hole.
    pub fn compact(&mut self) -> Result<CompactionReport> {
        self.expect_mode(Mode::Contiguous)?;
        let frag_before = self.fragmentation();
        let holes_before = self.hole_count();
        let occupied: Vec<(OwnerId, usize, usize)> = self
            .blocks
            .iter()
            .filter_map(|b| b.owner().map(|owner| (owner, b.start, b.size())))
            .collect();
        if occupied.is_empty() {
            return Err(RegionError::NothingToCompact);
        }

        let os_reserved = self.config.os_reserved;
        let unit = self.config.unit_bytes;
        let mut cursor = os_reserved;
        let mut moved_count = 0;
        let mut bytes_moved = 0;
        for &(owner, start, size) in &occupied {
            if start != cursor {
                // Targets never lie above their source, so moving in address
                // order never overwrites a payload that is still to be moved.
                if let Some(region) = self.region_mut() {
                    let src = (start - os_reserved) * unit;
                    let dst = (cursor - os_reserved) * unit;
                    region
                        .as_mut_slice()
                        .copy_within(src..src + size * unit, dst);
                }
                moved_count += 1;
                bytes_moved += (start - cursor) * unit;
                debug!("compact: {owner} [{start}, {}] -> {cursor}", start + size - 1);
            }
            cursor += size;
        }
        let used_bytes = (cursor - os_reserved) * unit;
        if let Some(region) = self.region_mut() {
            region.as_mut_slice()[used_bytes..].fill(0);
        }

        self.lay_out_compacted(&occupied);
        self.total_compactions += 1;

        let report = CompactionReport {
            moved_count,
            bytes_moved,
            frag_before,
            frag_after: self.fragmentation(),
            holes_before,
            holes_after: self.hole_count(),
        };
        info!(
            "compact: moved {moved_count} blocks ({bytes_moved} bytes), fragmentation {frag_before:.2}% -> {:.2}%",
            report.frag_after
        );
        check_invariants!(self);
        Ok(report)
    }

    /// Compacts only when fragmentation exceeds `threshold` percent.
    pub fn auto_compact(&mut self, threshold: f64) -> Result<AutoCompaction> {
        self.expect_mode(Mode::Contiguous)?;
        let fragmentation = self.fragmentation();
        if fragmentation > threshold {
            return self.compact().map(AutoCompaction::Compacted);
        }
        debug!("compact: skipped, fragmentation {fragmentation:.2}% <= {threshold:.2}%");
        Ok(AutoCompaction::Skipped {
            fragmentation,
            threshold,
        })
    }

    pub fn auto_compact_default(&mut self) -> Result<AutoCompaction> {
        self.auto_compact(self.config.auto_compact_threshold)
    }

    fn lay_out_compacted(&mut self, occupied: &[(OwnerId, usize, usize)]) {
        self.blocks.clear();
        let mut cursor = self.config.os_reserved;
        for &(owner, _, size) in occupied {
            self.push_block(BlockKind::Occupied(owner), cursor, size);
            cursor += size;
        }
        let end = self.config.os_reserved + self.managed_size;
        if cursor < end {
            self.push_block(BlockKind::Hole, cursor, end - cursor);
        }
    }

    fn push_block(&mut self, kind: BlockKind, start: usize, size: usize) {
        debug_assert!(size > 0, "empty block at {start}");
        let id = self.alloc_block_id();
        let mut block = Block::new(kind, start, start + size - 1, id);
        block.backing = self.backing_for(start, size);
        self.blocks.push(block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegionConfig;
    use crate::placement::Strategy;
    use crate::store::HeapStore;
    use crate::store::NoBacking;

    fn table() -> RegionTable {
        RegionTable::new(RegionConfig::new(1024, 256), Box::new(HeapStore::new())).unwrap()
    }

    fn bytes_of(table: &RegionTable, owner: OwnerId) -> Vec<u8> {
        let block = table.block_of(owner).unwrap();
        table.backing_bytes(block).unwrap().to_vec()
    }

    #[test]
    fn empty_table_has_nothing_to_compact() {
        let mut table = table();
        assert!(matches!(table.compact(), Err(RegionError::NothingToCompact)));
        assert_eq!(table.total_compactions(), 0);
    }

    #[test]
    fn blocks_in_place_are_not_counted() {
        let mut table = table();
        table.allocate(100, Strategy::FirstFit).unwrap();
        table.allocate(100, Strategy::FirstFit).unwrap();
        let report = table.compact().unwrap();
        assert_eq!(report.moved_count, 0);
        assert_eq!(report.bytes_moved, 0);
        assert_eq!(table.hole_count(), 1);
        assert_eq!(table.total_compactions(), 1);
    }

    #[test]
    fn compaction_slides_payloads_down() {
        let mut table = table();
        let p1 = table.allocate(50, Strategy::FirstFit).unwrap();
        let p2 = table.allocate(60, Strategy::FirstFit).unwrap();
        let p3 = table.allocate(70, Strategy::FirstFit).unwrap();
        let p4 = table.allocate(80, Strategy::FirstFit).unwrap();
        table.deallocate(p1.owner).unwrap();
        table.deallocate(p3.owner).unwrap();
        assert_eq!(table.hole_count(), 3);

        let report = table.compact().unwrap();
        assert_eq!(report.moved_count, 2);
        // p2 slides 50 units, p4 slides 50 + 70 units.
        assert_eq!(report.bytes_moved, (50 + 120) * 1024);
        assert_eq!(report.holes_before, 3);
        assert_eq!(report.holes_after, 1);
        assert!(report.frag_before > 0.0);
        assert!(report.frag_after.abs() < f64::EPSILON);

        let b2 = table.block_of(p2.owner).unwrap();
        let b4 = table.block_of(p4.owner).unwrap();
        assert_eq!((b2.start(), b2.size()), (256, 60));
        assert_eq!((b4.start(), b4.size()), (316, 80));
        assert!(bytes_of(&table, p2.owner).iter().all(|&b| b == 2));
        assert!(bytes_of(&table, p4.owner).iter().all(|&b| b == 4));
        let hole = table.blocks().last().unwrap();
        assert_eq!((hole.start(), hole.end()), (396, 1023));
        assert!(table.backing_bytes(hole).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn full_table_compacts_without_trailing_hole() {
        let mut table = table();
        let a = table.allocate(300, Strategy::FirstFit).unwrap();
        table.allocate(468, Strategy::FirstFit).unwrap();
        table.deallocate(a.owner).unwrap();
        table.allocate(300, Strategy::FirstFit).unwrap();
        let report = table.compact().unwrap();
        assert_eq!(report.moved_count, 0);
        assert_eq!(table.hole_count(), 0);
        assert_eq!(table.free_size(), 0);
    }

    #[test]
    fn unbacked_compaction_rebuilds_layout() {
        let mut table = RegionTable::new(RegionConfig::default(), Box::new(NoBacking)).unwrap();
        let a = table.allocate(10, Strategy::FirstFit).unwrap();
        let b = table.allocate(10, Strategy::FirstFit).unwrap();
        table.deallocate(a.owner).unwrap();
        let report = table.compact().unwrap();
        assert_eq!(report.moved_count, 1);
        assert_eq!(report.bytes_moved, 10 * 1024);
        assert_eq!(table.block_of(b.owner).unwrap().start(), 256);
    }

    #[test]
    fn auto_compact_respects_threshold() {
        let mut table = table();
        let p1 = table.allocate(77, Strategy::FirstFit).unwrap();
        let p2 = table.allocate(50, Strategy::FirstFit).unwrap();
        let p3 = table.allocate(250, Strategy::FirstFit).unwrap();
        let p4 = table.allocate(50, Strategy::FirstFit).unwrap();

        table.deallocate(p1.owner).unwrap();
        let layout: Vec<_> = table.blocks().to_vec();
        let outcome = table.auto_compact(30.0).unwrap();
        let AutoCompaction::Skipped { fragmentation, .. } = outcome else {
            panic!("expected a skip, got {outcome:?}");
        };
        assert!((fragmentation - 77.0 / 768.0 * 100.0).abs() < 1e-9);
        assert_eq!(table.blocks(), layout.as_slice());
        assert_eq!(table.total_compactions(), 0);

        table.deallocate(p3.owner).unwrap();
        assert!(table.fragmentation() > 40.0);
        let outcome = table.auto_compact(30.0).unwrap();
        assert!(outcome.compacted());
        assert!(table.fragmentation().abs() < f64::EPSILON);
        assert_eq!(table.hole_count(), 1);
        assert_eq!(table.block_of(p2.owner).unwrap().start(), 256);
        assert_eq!(table.block_of(p4.owner).unwrap().start(), 306);
        assert_eq!(table.total_compactions(), 1);
    }

    #[test]
    fn default_threshold_comes_from_config() {
        let mut table = table();
        let a = table.allocate(100, Strategy::FirstFit).unwrap();
        table.allocate(100, Strategy::FirstFit).unwrap();
        table.deallocate(a.owner).unwrap();
        let outcome = table.auto_compact_default().unwrap();
        assert_eq!(
            outcome,
            AutoCompaction::Skipped {
                fragmentation: table.fragmentation(),
                threshold: 30.0
            }
        );
    }

    #[test]
    fn skipped_outcome_serializes_with_tag() {
        let outcome = AutoCompaction::Skipped {
            fragmentation: 10.0,
            threshold: 30.0,
        };
        let json = serde_json::to_value(outcome).unwrap();
        assert_eq!(json["outcome"], "skipped");
        assert_eq!(json["threshold"], 30.0);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "empty block")]
    fn zero_sized_block_is_refused() {
        let mut table = table();
        table.push_block(BlockKind::Hole, 300, 0);
    }
}
