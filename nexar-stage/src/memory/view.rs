//! Offset view over a staging buffer.
//!
//! A datatype whose true lower bound `L` is non-zero touches bytes starting
//! at `origin + L`. The staging buffer holds exactly those bytes, so the
//! transport-facing origin of a staged transfer is `buffer - L`: offsets
//! computed from the datatype against that origin land inside the buffer.
//! [`StageView`] keeps both ends of that relation explicit.
//!
//! The origin alone does not identify a staged transfer: a slot at `B` with
//! `true_lb = 0` and the next slot at `B + stride` with `true_lb = stride`
//! share an origin. Live transfers are tracked by buffer start instead.

use std::ptr::NonNull;

/// A staging buffer plus the true-lower-bound offset of the data it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageView {
    buffer: NonNull<u8>,
    true_lb: isize,
    len: usize,
}

// Safety: a view is a plain address triple; it never dereferences on its own.
unsafe impl Send for StageView {}
unsafe impl Sync for StageView {}

impl StageView {
    pub(crate) fn new(buffer: NonNull<u8>, true_lb: isize, len: usize) -> Self {
        Self {
            buffer,
            true_lb,
            len,
        }
    }

    /// Origin address matching the datatype layout: `buffer_start - true_lb`.
    ///
    /// The address the transport sends from or delivers relative to.
    pub fn payload_start(&self) -> u64 {
        origin_of(self.buffer, self.true_lb)
    }

    /// First byte of the staging buffer, where staged data begins.
    pub fn buffer_start(&self) -> NonNull<u8> {
        self.buffer
    }

    /// Key the staging context is recorded under: the buffer start, unique
    /// among live views.
    pub fn stage_key(&self) -> u64 {
        self.buffer.as_ptr() as u64
    }

    pub fn true_lb(&self) -> isize {
        self.true_lb
    }

    /// Staged bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The staged bytes.
    ///
    /// # Safety
    /// The view must still be staged (not yet unstaged or cancelled).
    pub unsafe fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.buffer.as_ptr(), self.len) }
    }

    /// The staged bytes, for a transport delivering incoming data.
    ///
    /// # Safety
    /// The view must still be staged, and no other reference to the buffer
    /// may be live.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.buffer.as_ptr(), self.len) }
    }
}

impl std::fmt::Display for StageView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "StageView(0x{:x}, lb={}, {}B)",
            self.payload_start(),
            self.true_lb,
            self.len
        )
    }
}

/// `buffer - true_lb` as a raw address.
fn origin_of(buffer: NonNull<u8>, true_lb: isize) -> u64 {
    (buffer.as_ptr() as u64).wrapping_sub(true_lb as i64 as u64)
}
