//! Slot headers.
//!
//! Every staging buffer, pooled or ad hoc, is preceded by a [`SlotHeader`] at
//! a fixed distance before its payload. The header records who owns the slot,
//! which decides how the buffer is released: pool-owned slots go back on their
//! pool's free list, ownerless ones are freed outright.

use super::pool::SlotPool;
use std::ptr::{self, NonNull};

/// Alignment of slot payloads.
pub const SLOT_ALIGN: usize = 64;

/// Bytes reserved in front of each payload for its header.
pub const HEADER_SIZE: usize = align_up(std::mem::size_of::<SlotHeader>(), SLOT_ALIGN);

/// Round `n` up to a multiple of `align` (a power of two).
pub const fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

#[repr(C)]
pub(crate) struct SlotHeader {
    /// Owning pool, null for ad hoc buffers.
    pub(crate) pool: *const SlotPool,
    /// Free-list link, only meaningful while the slot is free.
    pub(crate) next: *mut SlotHeader,
    /// Size of the whole ad hoc region (header included); zero for pool slots.
    pub(crate) region_len: usize,
    /// Set while the slot is lent out.
    pub(crate) lent: bool,
}

impl SlotHeader {
    pub(crate) fn pooled(pool: *const SlotPool, next: *mut SlotHeader) -> Self {
        Self {
            pool,
            next,
            region_len: 0,
            lent: false,
        }
    }

    pub(crate) fn ad_hoc(region_len: usize) -> Self {
        Self {
            pool: ptr::null(),
            next: ptr::null_mut(),
            region_len,
            lent: true,
        }
    }

    pub(crate) fn is_ad_hoc(&self) -> bool {
        self.pool.is_null()
    }
}

/// Payload that follows `header`.
///
/// # Safety
/// `header` must point into a region with at least `HEADER_SIZE` bytes after it.
pub(crate) unsafe fn payload_of(header: NonNull<SlotHeader>) -> NonNull<u8> {
    unsafe { header.cast::<u8>().add(HEADER_SIZE) }
}

/// Header in front of `payload`.
///
/// # Safety
/// `payload` must have been produced by [`payload_of`].
pub(crate) unsafe fn header_of(payload: NonNull<u8>) -> NonNull<SlotHeader> {
    unsafe { payload.sub(HEADER_SIZE).cast::<SlotHeader>() }
}
