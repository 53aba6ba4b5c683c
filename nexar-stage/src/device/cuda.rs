//! CUDA device adapter and page-locked host allocator.
//!
//! Uses cudarc 0.19 for device-to-host / host-to-device copies and for
//! `cuMemHostAlloc` pinned memory. Copies are synchronous, so every request
//! returned here is already complete.

#![cfg(feature = "cuda")]

use crate::device::adapter::{CopyRequest, DeviceAdapter};
use crate::error::{Result, StageError};
use crate::memory::HostAllocator;
use std::ptr::NonNull;
use std::sync::Arc;

fn new_context(device_ordinal: u32) -> Result<Arc<cudarc::driver::CudaContext>> {
    cudarc::driver::CudaContext::new(device_ordinal as usize).map_err(|e| {
        StageError::device_with_source(
            format!("failed to create CUDA context for GPU {device_ordinal}"),
            e,
        )
    })
}

fn bind(ctx: &cudarc::driver::CudaContext) -> Result<()> {
    ctx.bind_to_thread()
        .map_err(|e| StageError::device_with_source("CUDA bind_to_thread failed", e))
}

/// Device adapter for NVIDIA GPUs using cudarc.
pub struct CudaAdapter {
    ctx: Arc<cudarc::driver::CudaContext>,
}

impl CudaAdapter {
    /// Create a new CUDA adapter for the given GPU ordinal.
    pub fn new(device_ordinal: u32) -> Result<Self> {
        Ok(Self {
            ctx: new_context(device_ordinal)?,
        })
    }
}

impl DeviceAdapter for CudaAdapter {
    unsafe fn pack_async(&self, src: u64, dst: NonNull<u8>, len: usize) -> Result<CopyRequest> {
        if len == 0 {
            return Ok(CopyRequest::complete(0));
        }
        bind(&self.ctx)?;
        let host = unsafe { std::slice::from_raw_parts_mut(dst.as_ptr(), len) };
        unsafe {
            cudarc::driver::result::memcpy_dtoh_sync(host, src as cudarc::driver::sys::CUdeviceptr)
        }
        .map_err(|e| StageError::copy_failed("pack", format!("cuMemcpyDtoH failed: {e}")))?;
        Ok(CopyRequest::complete(len))
    }

    unsafe fn unpack_async(&self, src: NonNull<u8>, dst: u64, len: usize) -> Result<CopyRequest> {
        if len == 0 {
            return Ok(CopyRequest::complete(0));
        }
        bind(&self.ctx)?;
        let host = unsafe { std::slice::from_raw_parts(src.as_ptr(), len) };
        unsafe {
            cudarc::driver::result::memcpy_htod_sync(dst as cudarc::driver::sys::CUdeviceptr, host)
        }
        .map_err(|e| StageError::copy_failed("unpack", format!("cuMemcpyHtoD failed: {e}")))?;
        Ok(CopyRequest::complete(len))
    }
}

/// Page-locked host memory from `cuMemHostAlloc`, reachable by the copy engine.
pub struct CudaHostAllocator {
    ctx: Arc<cudarc::driver::CudaContext>,
}

impl CudaHostAllocator {
    pub fn new(device_ordinal: u32) -> Result<Self> {
        Ok(Self {
            ctx: new_context(device_ordinal)?,
        })
    }
}

impl HostAllocator for CudaHostAllocator {
    fn name(&self) -> &'static str {
        "cuda-pinned"
    }

    fn allocate(&self, size: usize) -> Result<NonNull<u8>> {
        bind(&self.ctx)?;
        let ptr = unsafe {
            cudarc::driver::result::malloc_host(size, cudarc::driver::sys::CU_MEMHOSTALLOC_PORTABLE)
        }
        .map_err(|e| StageError::AllocationFailed {
            size,
            reason: format!("cuMemHostAlloc failed: {e}"),
        })?;
        NonNull::new(ptr as *mut u8).ok_or_else(|| StageError::AllocationFailed {
            size,
            reason: "cuMemHostAlloc returned null".into(),
        })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, _size: usize) {
        if bind(&self.ctx).is_err() {
            tracing::warn!("cannot bind CUDA context, leaking pinned region");
            return;
        }
        if let Err(e) = unsafe { cudarc::driver::result::free_host(ptr.as_ptr().cast()) } {
            tracing::warn!("cuMemFreeHost failed: {e}");
        }
    }
}
