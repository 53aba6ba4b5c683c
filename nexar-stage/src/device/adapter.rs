use crate::error::{Result, StageError};
use std::ptr::NonNull;

/// Bridges device memory with pinned staging buffers.
///
/// The staging protocol operates on raw `u64` pointers for user memory, which
/// may live on a device, and on `NonNull<u8>` for the pinned staging side.
/// The adapter moves bytes between the two.
///
/// - `CpuAdapter` (built-in): plain memcpy for host memory.
/// - `CudaAdapter` (feature `cuda`): device-to-host / host-to-device copies.
///
/// Both copies are byte-for-byte: the datatype layout is preserved by copying
/// the whole byte span starting at the true lower bound, gaps included.
pub trait DeviceAdapter: Send + Sync {
    /// Start copying `len` bytes from user memory at `src` into the staging
    /// buffer `dst`.
    ///
    /// # Safety
    /// `src` must be valid for reads of `len` bytes and `dst` valid for
    /// writes of `len` bytes until the returned request has been waited on.
    unsafe fn pack_async(&self, src: u64, dst: NonNull<u8>, len: usize) -> Result<CopyRequest>;

    /// Start copying `len` bytes from the staging buffer `src` into user
    /// memory at `dst`.
    ///
    /// # Safety
    /// `src` must be valid for reads of `len` bytes and `dst` valid for
    /// writes of `len` bytes until the returned request has been waited on.
    unsafe fn unpack_async(&self, src: NonNull<u8>, dst: u64, len: usize) -> Result<CopyRequest>;

    /// Block until `request` finishes. Returns the number of bytes moved.
    ///
    /// Default: requests that were already complete when issued succeed,
    /// anything else is reported as a failed copy. Adapters that issue truly
    /// asynchronous copies must override this.
    fn wait(&self, request: CopyRequest) -> Result<usize> {
        if request.is_complete() {
            Ok(request.bytes())
        } else {
            Err(StageError::copy_failed(
                "wait",
                format!("adapter cannot track pending request {}", request.token()),
            ))
        }
    }
}

/// Completion handle for a pack or unpack started on a [`DeviceAdapter`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "copy requests must be passed to DeviceAdapter::wait"]
pub struct CopyRequest {
    token: u64,
    bytes: usize,
    complete: bool,
}

impl CopyRequest {
    /// A copy that finished before the call returned.
    pub fn complete(bytes: usize) -> Self {
        Self {
            token: 0,
            bytes,
            complete: true,
        }
    }

    /// A copy still in flight, identified by an adapter-defined token.
    pub fn pending(token: u64, bytes: usize) -> Self {
        Self {
            token,
            bytes,
            complete: false,
        }
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    /// Bytes this request moves.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }
}
