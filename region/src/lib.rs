//! A simulated single-address-space memory region.
//!
//! [`RegionTable`] keeps an ordered arena of [`Block`]s covering the user part
//! of the region and answers allocation requests with first/best/worst fit
//! placement, local coalescing, sliding compaction or a power-of-two buddy
//! mode. Every block mirrors a byte range of a buffer obtained from a
//! [`BackingStore`], and that buffer is kept in sync with the logical layout.

pub mod block;
pub mod buddy;
pub mod coalesce;
pub mod compact;
pub mod config;
pub mod error;
pub mod placement;
pub mod shared;
pub mod stats;
pub mod store;
pub mod table;

pub use block::BackingRange;
pub use block::Block;
pub use block::BlockId;
pub use block::BlockKind;
pub use block::OwnerId;
pub use buddy::BuddyAllocation;
pub use buddy::ConversionReport;
pub use buddy::buddy_capacity;
pub use coalesce::Freed;
pub use compact::AutoCompaction;
pub use compact::CompactionReport;
pub use config::RegionConfig;
pub use error::BackingError;
pub use error::RegionError;
pub use error::Result;
pub use placement::Allocation;
pub use placement::Strategy;
pub use shared::Granted;
pub use shared::SharedRegion;
pub use stats::BackingInfo;
pub use stats::BlockTag;
pub use stats::BlockView;
pub use stats::Stats;
pub use store::BackingRegion;
pub use store::BackingStore;
pub use store::HeapStore;
pub use store::NoBacking;
pub use table::Mode;
pub use table::RegionTable;

#[cfg(any(test, debug_assertions, feature = "debug-assertions"))]
#[macro_export]
macro_rules! check_invariants {
    ($table:expr) => {
        if let Err(err) = $table.validate() {
            panic!("{err}");
        }
    };
}

#[cfg(not(any(test, debug_assertions, feature = "debug-assertions")))]
#[macro_export]
macro_rules! check_invariants {
    ($table:expr) => {
        let _ = &$table;
    };
}
