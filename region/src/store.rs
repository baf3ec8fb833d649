//! The physical side of a region: a contiguous byte buffer handed out by a
//! [`BackingStore`] and mirrored block-by-block by the region table.

use core::fmt;
use core::ptr::NonNull;
use core::slice;

use crate::error::BackingError;

pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Provider of page-granular backing buffers.
///
/// `acquire` must return a zero-filled buffer of at least `len` bytes,
/// rounded up to [`BackingStore::page_size`]. A region handed out by a store
/// must only ever be returned to the same store through `release`.
pub trait BackingStore: Send + Sync {
    fn acquire(&mut self, len: usize) -> Result<BackingRegion, BackingError>;
    fn release(&mut self, region: BackingRegion);
    fn page_size(&self) -> usize;
    fn name(&self) -> &'static str;
}

/// Exclusively owned handle to an acquired byte buffer.
pub struct BackingRegion {
    base: NonNull<u8>,
    len: usize,
}

// The region is the only handle to its buffer.
unsafe impl Send for BackingRegion {}
unsafe impl Sync for BackingRegion {}

impl BackingRegion {
    /// # Safety
    ///
    /// `base` must point to `len` readable and writable bytes that stay valid
    /// and unaliased until the region is released to the store that created it.
    pub unsafe fn from_raw_parts(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    pub fn addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.base.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.len) }
    }
}

impl fmt::Debug for BackingRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackingRegion")
            .field("base", &format_args!("0x{:x}", self.addr()))
            .field("len", &self.len)
            .finish()
    }
}

/// `len` rounded up to a multiple of `page_size`, or `None` on overflow.
pub fn round_up_to_page(len: usize, page_size: usize) -> Option<usize> {
    len.div_ceil(page_size).checked_mul(page_size)
}

/// Heap-allocated buffers with page-rounded lengths.
#[derive(Debug)]
pub struct HeapStore {
    page_size: usize,
    live: usize,
}

impl HeapStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        assert!(page_size.is_power_of_two());
        Self { page_size, live: 0 }
    }

    /// Number of regions acquired and not yet released.
    pub fn live(&self) -> usize {
        self.live
    }
}

impl Default for HeapStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BackingStore for HeapStore {
    fn acquire(&mut self, len: usize) -> Result<BackingRegion, BackingError> {
        if len == 0 {
            return Err(BackingError::ZeroLength);
        }
        let len = round_up_to_page(len, self.page_size).ok_or(BackingError::TooLarge(len))?;
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(len)
            .map_err(|_| BackingError::Unavailable("heap"))?;
        buffer.resize(len, 0u8);
        let buffer = buffer.into_boxed_slice();
        let base = NonNull::new(Box::into_raw(buffer).cast::<u8>())
            .ok_or(BackingError::Unavailable("heap"))?;
        self.live += 1;
        Ok(unsafe { BackingRegion::from_raw_parts(base, len) })
    }

    fn release(&mut self, region: BackingRegion) {
        let raw = core::ptr::slice_from_raw_parts_mut(region.base.as_ptr(), region.len);
        drop(unsafe { Box::from_raw(raw) });
        self.live -= 1;
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn name(&self) -> &'static str {
        "heap"
    }
}

/// A store that never hands out memory; tables built on it run unbacked.
#[derive(Debug, Default)]
pub struct NoBacking;

impl BackingStore for NoBacking {
    fn acquire(&mut self, _len: usize) -> Result<BackingRegion, BackingError> {
        Err(BackingError::Unavailable("none"))
    }

    fn release(&mut self, _region: BackingRegion) {}

    fn page_size(&self) -> usize {
        DEFAULT_PAGE_SIZE
    }

    fn name(&self) -> &'static str {
        "none"
    }
}
