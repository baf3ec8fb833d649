//! Host-side collaborators of a region: an `mmap` backed store and
//! detection of how large the simulated pool should be.

mod host;
mod mmap;

pub use host::MAX_POOL_KB;
pub use host::MIN_POOL_KB;
pub use host::POOL_DIVISOR;
pub use host::PoolSizes;
pub use host::SystemInfo;
pub use host::detect_pool_sizes;
pub use host::page_size;
pub use host::physical_memory;
pub use host::physical_pages;
pub use host::system_info;
pub use mmap::MmapStore;
pub use region::BackingError;
