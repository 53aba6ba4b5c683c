//! Host memory providers for staging regions.
//!
//! Device copy engines can only reach host memory that has been registered
//! (page-locked) with the driver. Pool regions and oversized ad hoc buffers
//! are requested through a [`HostAllocator`] so the registration mechanism
//! stays swappable: CUDA page-locked memory with the `cuda` feature, ordinary
//! heap memory for host-only runs and tests.

use crate::error::{Result, StageError};
use std::alloc::Layout;
use std::ptr::NonNull;

/// Alignment of every region handed out by [`SystemAllocator`].
pub const REGION_ALIGN: usize = 4096;

/// Source of host memory for staging regions.
pub trait HostAllocator: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Allocate `size` bytes. `size` is never zero.
    fn allocate(&self, size: usize) -> Result<NonNull<u8>>;

    /// Release a region returned by [`HostAllocator::allocate`].
    ///
    /// # Safety
    /// `ptr` must come from `allocate` on this allocator with the same `size`,
    /// and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize);
}

/// Page-aligned memory from the global Rust allocator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAllocator;

impl SystemAllocator {
    fn layout(size: usize) -> Result<Layout> {
        Layout::from_size_align(size, REGION_ALIGN).map_err(|e| StageError::AllocationFailed {
            size,
            reason: e.to_string(),
        })
    }
}

impl HostAllocator for SystemAllocator {
    fn name(&self) -> &'static str {
        "system"
    }

    fn allocate(&self, size: usize) -> Result<NonNull<u8>> {
        let layout = Self::layout(size.max(1))?;
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or_else(|| StageError::AllocationFailed {
            size,
            reason: "global allocator returned null".into(),
        })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
        if let Ok(layout) = Self::layout(size.max(1)) {
            unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }
}
