use core::ffi::c_void;
use core::ptr;
use core::ptr::NonNull;
use std::io;

use libc::MAP_ANONYMOUS;
use libc::MAP_FAILED;
use libc::MAP_PRIVATE;
use libc::PROT_READ;
use libc::PROT_WRITE;
use log::debug;
use log::warn;
use region::BackingError;
use region::BackingRegion;
use region::BackingStore;
use region::store::round_up_to_page;

use crate::host::page_size;

/// Anonymous private mappings, zero-filled by the kernel.
#[derive(Debug)]
pub struct MmapStore {
    page_size: usize,
    mapped: usize,
}

impl MmapStore {
    pub fn new() -> Self {
        Self {
            page_size: page_size(),
            mapped: 0,
        }
    }

    /// Bytes currently mapped through this store.
    pub fn mapped(&self) -> usize {
        self.mapped
    }
}

impl Default for MmapStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BackingStore for MmapStore {
    fn acquire(&mut self, len: usize) -> Result<BackingRegion, BackingError> {
        if len == 0 {
            return Err(BackingError::ZeroLength);
        }
        let len = round_up_to_page(len, self.page_size).ok_or(BackingError::TooLarge(len))?;
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == MAP_FAILED {
            return Err(BackingError::Os(io::Error::last_os_error()));
        }
        let base = NonNull::new(addr.cast::<u8>()).ok_or(BackingError::Unavailable("mmap"))?;
        debug!("mmap: mapped {len} bytes at {addr:p}");
        self.mapped += len;
        // The mapping is private to this store until it is unmapped in `release`.
        Ok(unsafe { BackingRegion::from_raw_parts(base, len) })
    }

    fn release(&mut self, region: BackingRegion) {
        let rc = unsafe { libc::munmap(region.base().as_ptr().cast::<c_void>(), region.len()) };
        if rc == 0 {
            debug!("mmap: unmapped {region:?}");
            self.mapped -= region.len();
        } else {
            warn!(
                "mmap: munmap of {region:?} failed: {}",
                io::Error::last_os_error()
            );
        }
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn name(&self) -> &'static str {
        "mmap"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_is_page_rounded_and_zeroed() {
        let mut store = MmapStore::new();
        let page = store.page_size();
        let region = store.acquire(page + 1).unwrap();
        assert_eq!(region.len(), 2 * page);
        assert_eq!(region.addr() % page, 0);
        assert!(region.as_slice().iter().all(|&b| b == 0));
        assert_eq!(store.mapped(), 2 * page);
        store.release(region);
        assert_eq!(store.mapped(), 0);
    }

    #[test]
    fn mapping_is_writable() {
        let mut store = MmapStore::new();
        let mut region = store.acquire(64).unwrap();
        let bytes = region.as_mut_slice();
        bytes[..3].copy_from_slice(b"abc");
        let last = bytes.len() - 1;
        bytes[last] = 0xFF;
        assert_eq!(&region.as_slice()[..4], b"abc\0");
        assert_eq!(region.as_slice()[last], 0xFF);
        store.release(region);
    }

    #[test]
    fn empty_mapping_is_rejected() {
        let mut store = MmapStore::new();
        assert!(matches!(store.acquire(0), Err(BackingError::ZeroLength)));
    }

    #[test]
    fn unroundable_length_is_rejected() {
        let mut store = MmapStore::new();
        assert!(matches!(
            store.acquire(usize::MAX),
            Err(BackingError::TooLarge(usize::MAX))
        ));
        assert_eq!(store.mapped(), 0);
    }
}
