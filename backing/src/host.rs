use std::env::consts;

use log::info;
use log::warn;
use region::RegionConfig;
use region::store::DEFAULT_PAGE_SIZE;
use serde::Serialize;

/// Managed pool bounds in KB.
pub const MIN_POOL_KB: usize = 512;
pub const MAX_POOL_KB: usize = 8192;
/// One KB of pool per this many KB of physical memory.
pub const POOL_DIVISOR: usize = 8192;

pub fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size)
        .ok()
        .filter(|&size| size > 0)
        .unwrap_or(DEFAULT_PAGE_SIZE)
}

pub fn physical_pages() -> Option<usize> {
    let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
    usize::try_from(pages).ok().filter(|&pages| pages > 0)
}

/// Total physical memory in bytes, if the host reports it.
pub fn physical_memory() -> Option<usize> {
    physical_pages().and_then(|pages| pages.checked_mul(page_size()))
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSizes {
    pub total_size: usize,
    pub os_reserved: usize,
}

impl PoolSizes {
    pub const FALLBACK: PoolSizes = PoolSizes {
        total_size: RegionConfig::DEFAULT_TOTAL_SIZE,
        os_reserved: RegionConfig::DEFAULT_OS_RESERVED,
    };

    /// Pool of 1/8192 of `physical_bytes`, clamped to `[512, 8192]` KB,
    /// a quarter of which is reserved for the OS.
    pub fn for_physical_memory(physical_bytes: Option<usize>) -> Self {
        let Some(bytes) = physical_bytes else {
            return Self::FALLBACK;
        };
        let total_size = (bytes / 1024 / POOL_DIVISOR).clamp(MIN_POOL_KB, MAX_POOL_KB);
        Self {
            total_size,
            os_reserved: total_size / 4,
        }
    }

    /// Region configuration with these sizes and default everything else.
    pub fn config(self) -> RegionConfig {
        RegionConfig::new(self.total_size, self.os_reserved)
    }
}

pub fn detect_pool_sizes() -> PoolSizes {
    let physical = physical_memory();
    if physical.is_none() {
        warn!(
            "host: could not read physical memory, using {} KB",
            PoolSizes::FALLBACK.total_size
        );
    }
    let sizes = PoolSizes::for_physical_memory(physical);
    info!(
        "host: pool {} KB, os reserved {} KB, user {} KB",
        sizes.total_size,
        sizes.os_reserved,
        sizes.total_size - sizes.os_reserved
    );
    sizes
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub page_size: usize,
    pub physical_pages: usize,
    pub total_physical_memory: usize,
    pub derived_pool_size: usize,
    pub derived_os_reserved: usize,
    pub backing_type: &'static str,
    pub arch: &'static str,
    pub os: &'static str,
}

pub fn system_info() -> SystemInfo {
    let sizes = detect_pool_sizes();
    SystemInfo {
        page_size: page_size(),
        physical_pages: physical_pages().unwrap_or(0),
        total_physical_memory: physical_memory().unwrap_or(0),
        derived_pool_size: sizes.total_size,
        derived_os_reserved: sizes.os_reserved,
        backing_type: "mmap/munmap",
        arch: consts::ARCH,
        os: consts::OS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: usize = 1024 * 1024 * 1024;

    #[test]
    fn page_size_is_a_power_of_two() {
        assert!(page_size().is_power_of_two());
    }

    #[test]
    fn pool_scales_with_physical_memory() {
        assert_eq!(
            PoolSizes::for_physical_memory(Some(8 * GIB)),
            PoolSizes {
                total_size: 1024,
                os_reserved: 256
            }
        );
        assert_eq!(
            PoolSizes::for_physical_memory(Some(32 * GIB)).total_size,
            4096
        );
    }

    #[test]
    fn pool_is_clamped() {
        let small = PoolSizes::for_physical_memory(Some(GIB));
        assert_eq!((small.total_size, small.os_reserved), (512, 128));
        let large = PoolSizes::for_physical_memory(Some(1024 * GIB));
        assert_eq!((large.total_size, large.os_reserved), (8192, 2048));
    }

    #[test]
    fn unknown_memory_falls_back() {
        let sizes = PoolSizes::for_physical_memory(None);
        assert_eq!(sizes, PoolSizes::FALLBACK);
        assert!(sizes.config().validate().is_ok());
    }

    #[test]
    fn detected_sizes_form_a_valid_config() {
        let sizes = detect_pool_sizes();
        assert!((MIN_POOL_KB..=MAX_POOL_KB).contains(&sizes.total_size));
        assert!(sizes.config().validate().is_ok());
    }

    #[test]
    fn system_info_reports_host() {
        let info = system_info();
        assert_eq!(info.page_size, page_size());
        assert_eq!(info.arch, consts::ARCH);
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["backingType"], "mmap/munmap");
    }
}
