//! Fixed-size slot pool over one contiguous pinned region.
//!
//! The region is carved into `capacity` slots of `HEADER_SIZE + slot_size`
//! bytes (payload rounded up to [`SLOT_ALIGN`]). Free slots are threaded
//! through their headers into a singly linked list guarded by the pool mutex.
//! Every slot is either on that list or lent out to exactly one caller.

use super::pinned::{HostAllocator, SystemAllocator};
use super::slot::{HEADER_SIZE, SLOT_ALIGN, SlotHeader, header_of, payload_of};
use crate::error::{Result, StageError};
use crate::types::MemoryKind;
use std::ptr::{self, NonNull};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

/// Free list threaded through slot headers.
struct FreeList {
    head: *mut SlotHeader,
    len: usize,
}

// Safety: the headers the list points at live in the pool's region, which is
// only touched while the pool mutex is held.
unsafe impl Send for FreeList {}

impl FreeList {
    fn empty() -> Self {
        Self {
            head: ptr::null_mut(),
            len: 0,
        }
    }

    /// # Safety
    /// Every header on the list must be a live header inside the pool region.
    unsafe fn pop(&mut self) -> Option<NonNull<SlotHeader>> {
        let header = NonNull::new(self.head)?;
        unsafe {
            let h = &mut *header.as_ptr();
            self.head = h.next;
            h.next = ptr::null_mut();
            h.lent = true;
        }
        self.len -= 1;
        Some(header)
    }

    /// # Safety
    /// `header` must be a lent-out header inside the pool region.
    unsafe fn push(&mut self, header: NonNull<SlotHeader>) {
        unsafe {
            let h = &mut *header.as_ptr();
            h.next = self.head;
            h.lent = false;
        }
        self.head = header.as_ptr();
        self.len += 1;
    }
}

/// A fixed-capacity pool of equally sized staging slots.
pub struct SlotPool {
    capacity: usize,
    slot_size: usize,
    stride: usize,
    kind: MemoryKind,
    region: NonNull<u8>,
    region_len: usize,
    allocator: Arc<dyn HostAllocator>,
    free: Mutex<FreeList>,
    released: Condvar,
}

// Safety: the region is owned by the pool and all header mutation happens
// under `free`'s lock. Payload bytes belong to whoever holds the slot.
unsafe impl Send for SlotPool {}
unsafe impl Sync for SlotPool {}

impl SlotPool {
    /// Create a pool of `capacity` slots holding `slot_size` payload bytes each.
    ///
    /// `MemoryKind::Pinned` regions come from `pinned`; `MemoryKind::Plain`
    /// regions come from the global allocator.
    pub fn new(
        capacity: usize,
        slot_size: usize,
        kind: MemoryKind,
        pinned: &Arc<dyn HostAllocator>,
    ) -> Result<Arc<Self>> {
        if capacity == 0 || slot_size == 0 {
            return Err(StageError::InvalidConfig(format!(
                "slot pool needs a positive capacity and slot size (got {capacity}×{slot_size})"
            )));
        }
        let stride = slot_size
            .checked_next_multiple_of(SLOT_ALIGN)
            .and_then(|n| n.checked_add(HEADER_SIZE))
            .ok_or_else(|| StageError::InvalidConfig(format!("slot size {slot_size} too large")))?;
        let region_len = capacity.checked_mul(stride).ok_or_else(|| {
            StageError::InvalidConfig(format!("pool of {capacity}×{slot_size} overflows"))
        })?;

        let allocator: Arc<dyn HostAllocator> = match kind {
            MemoryKind::Pinned => Arc::clone(pinned),
            MemoryKind::Plain => Arc::new(SystemAllocator),
        };
        let region = allocator.allocate(region_len)?;

        let pool = Arc::new(Self {
            capacity,
            slot_size,
            stride,
            kind,
            region,
            region_len,
            allocator,
            free: Mutex::new(FreeList::empty()),
            released: Condvar::new(),
        });
        pool.thread_slots()?;

        tracing::debug!(
            capacity,
            slot_size,
            region_len,
            memory = %kind,
            allocator = pool.allocator.name(),
            "created staging slot pool"
        );
        Ok(pool)
    }

    /// Write every slot header and chain them, slot 0 at the head.
    fn thread_slots(&self) -> Result<()> {
        let owner: *const SlotPool = self;
        let mut list = self.lock()?;
        let mut head: *mut SlotHeader = ptr::null_mut();
        for i in (0..self.capacity).rev() {
            // SAFETY: i * stride + stride <= region_len.
            let header = unsafe { self.region.as_ptr().add(i * self.stride) }.cast::<SlotHeader>();
            unsafe { header.write(SlotHeader::pooled(owner, head)) };
            head = header;
        }
        *list = FreeList {
            head,
            len: self.capacity,
        };
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, FreeList>> {
        self.free
            .lock()
            .map_err(|_| StageError::LockPoisoned("slot pool free list"))
    }

    /// Take a free slot, blocking until one is released if the pool is empty.
    pub fn acquire(&self) -> Result<NonNull<u8>> {
        let mut list = self.lock()?;
        loop {
            // SAFETY: the list only ever holds headers of this pool's region.
            if let Some(header) = unsafe { list.pop() } {
                return Ok(unsafe { payload_of(header) });
            }
            tracing::debug!(
                slot_size = self.slot_size,
                capacity = self.capacity,
                "slot pool exhausted, waiting for a release"
            );
            list = self
                .released
                .wait(list)
                .map_err(|_| StageError::LockPoisoned("slot pool free list"))?;
        }
    }

    /// Take a free slot if one is available right now.
    pub fn try_acquire(&self) -> Result<Option<NonNull<u8>>> {
        let mut list = self.lock()?;
        Ok(unsafe { list.pop() }.map(|header| unsafe { payload_of(header) }))
    }

    /// Return a slot obtained from [`SlotPool::acquire`] to the free list.
    ///
    /// Pure bookkeeping: payload bytes are left as they are.
    pub fn release(&self, payload: NonNull<u8>) -> Result<()> {
        let addr = payload.as_ptr() as u64;
        if !self.owns(payload) {
            return Err(StageError::ForeignBuffer { addr });
        }
        // SAFETY: `owns` checked that a header of this pool precedes `payload`.
        let header = unsafe { header_of(payload) };
        let mut list = self.lock()?;
        let lent = unsafe { header.as_ref().lent };
        if !lent {
            return Err(StageError::DoubleRelease { addr });
        }
        unsafe { list.push(header) };
        drop(list);
        self.released.notify_one();
        Ok(())
    }

    /// Whether `payload` is the payload address of one of this pool's slots.
    pub fn owns(&self, payload: NonNull<u8>) -> bool {
        let base = self.region.as_ptr() as usize;
        let addr = payload.as_ptr() as usize;
        let Some(offset) = addr.checked_sub(base + HEADER_SIZE) else {
            return false;
        };
        offset < self.region_len && offset % self.stride == 0
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Payload bytes per slot.
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub fn memory_kind(&self) -> MemoryKind {
        self.kind
    }

    /// Slots currently on the free list.
    pub fn available(&self) -> usize {
        match self.free.lock() {
            Ok(list) => list.len,
            Err(poisoned) => poisoned.into_inner().len,
        }
    }

    /// Slots currently lent out.
    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }
}

impl Drop for SlotPool {
    fn drop(&mut self) {
        let outstanding = self.in_use();
        if outstanding > 0 {
            tracing::warn!(
                outstanding,
                slot_size = self.slot_size,
                "destroying slot pool with slots still lent out"
            );
        }
        // SAFETY: region came from `allocator` with `region_len` bytes.
        unsafe { self.allocator.deallocate(self.region, self.region_len) };
    }
}

impl std::fmt::Debug for SlotPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotPool")
            .field("capacity", &self.capacity)
            .field("slot_size", &self.slot_size)
            .field("memory", &self.kind)
            .field("available", &self.available())
            .finish()
    }
}
