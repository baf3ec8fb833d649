use serde::Serialize;

use crate::block::Block;
use crate::block::BlockId;
use crate::block::OwnerId;
use crate::table::Mode;
use crate::table::RegionTable;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackingInfo {
    pub base: usize,
    pub len: usize,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_memory: usize,
    pub os_reserved: usize,
    pub user_size: usize,
    pub managed_size: usize,
    pub used_size: usize,
    pub free_size: usize,
    pub occupied_count: usize,
    pub hole_count: usize,
    pub largest_hole: usize,
    pub fragmentation: f64,
    pub total_allocations: u64,
    pub total_deallocations: u64,
    pub total_compactions: u64,
    pub mode: Mode,
    pub backing: Option<BackingInfo>,
    pub page_size: usize,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockTag {
    Os,
    Hole,
    Occupied,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockView {
    pub tag: BlockTag,
    pub owner: Option<OwnerId>,
    pub start: usize,
    pub end: usize,
    pub size: usize,
    pub block_id: BlockId,
    pub buddy_id: Option<BlockId>,
    pub backing_addr: Option<usize>,
}

impl RegionTable {
    /// External fragmentation in percent of the user size:
    /// free memory that is not part of the largest hole.
    #[allow(clippy::cast_precision_loss)]
    pub fn fragmentation(&self) -> f64 {
        let free = self.free_size();
        if free == 0 {
            return 0.0;
        }
        (free - self.largest_hole()) as f64 / self.user_size() as f64 * 100.0
    }

    pub fn stats(&self) -> Stats {
        let free_size = self.free_size();
        Stats {
            total_memory: self.total_size(),
            os_reserved: self.os_reserved(),
            user_size: self.user_size(),
            managed_size: self.managed_size(),
            used_size: self.managed_size() - free_size,
            free_size,
            occupied_count: self.occupied_count(),
            hole_count: self.hole_count(),
            largest_hole: self.largest_hole(),
            fragmentation: self.fragmentation(),
            total_allocations: self.total_allocations(),
            total_deallocations: self.total_deallocations(),
            total_compactions: self.total_compactions(),
            mode: self.mode(),
            backing: self.backing().map(|region| BackingInfo {
                base: region.addr(),
                len: region.len(),
            }),
            page_size: self.page_size(),
        }
    }

    /// Every block in address order, preceded by the OS-reserved range
    /// `[0, os_reserved)` when it is not empty.
    pub fn list_blocks(&self) -> Vec<BlockView> {
        let os_reserved = self.os_reserved();
        let mut views = Vec::with_capacity(self.blocks().len() + 1);
        if os_reserved > 0 {
            views.push(BlockView {
                tag: BlockTag::Os,
                owner: None,
                start: 0,
                end: os_reserved - 1,
                size: os_reserved,
                block_id: BlockId(0),
                buddy_id: None,
                backing_addr: None,
            });
        }
        views.extend(self.blocks().iter().map(|block| self.view_of(block)));
        views
    }

    fn view_of(&self, block: &Block) -> BlockView {
        let backing_addr = block
            .backing()
            .zip(self.backing())
            .map(|(range, region)| region.addr() + range.offset);
        BlockView {
            tag: if block.is_hole() {
                BlockTag::Hole
            } else {
                BlockTag::Occupied
            },
            owner: block.owner(),
            start: block.start(),
            end: block.end(),
            size: block.size(),
            block_id: block.id(),
            buddy_id: block.buddy(),
            backing_addr,
        }
    }
}
