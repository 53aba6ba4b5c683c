use crate::device::adapter::{CopyRequest, DeviceAdapter};
use crate::error::Result;
use std::ptr::NonNull;

/// DeviceAdapter for host (CPU) memory. Copies complete synchronously.
#[derive(Debug, Clone, Default)]
pub struct CpuAdapter;

impl CpuAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceAdapter for CpuAdapter {
    unsafe fn pack_async(&self, src: u64, dst: NonNull<u8>, len: usize) -> Result<CopyRequest> {
        unsafe {
            std::ptr::copy_nonoverlapping(src as *const u8, dst.as_ptr(), len);
        }
        Ok(CopyRequest::complete(len))
    }

    unsafe fn unpack_async(&self, src: NonNull<u8>, dst: u64, len: usize) -> Result<CopyRequest> {
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), dst as *mut u8, len);
        }
        Ok(CopyRequest::complete(len))
    }
}
