use nexar_stage::{
    CopyRequest, CpuAdapter, DeviceAdapter, GpuStaging, HostAllocator, MemoryKind, Result,
    StageConfig, StageError, SystemAllocator, TierConfig,
};
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Host copy engine that counts calls and can be told to fail.
#[derive(Debug, Default)]
pub struct CountingAdapter {
    inner: CpuAdapter,
    pub packs: AtomicUsize,
    pub unpacks: AtomicUsize,
    pub fail_pack: AtomicBool,
    pub fail_unpack: AtomicBool,
}

impl CountingAdapter {
    pub fn packs(&self) -> usize {
        self.packs.load(Ordering::SeqCst)
    }

    pub fn unpacks(&self) -> usize {
        self.unpacks.load(Ordering::SeqCst)
    }
}

impl DeviceAdapter for CountingAdapter {
    unsafe fn pack_async(&self, src: u64, dst: NonNull<u8>, len: usize) -> Result<CopyRequest> {
        self.packs.fetch_add(1, Ordering::SeqCst);
        if self.fail_pack.load(Ordering::SeqCst) {
            return Err(StageError::copy_failed("pack", "injected engine failure"));
        }
        unsafe { self.inner.pack_async(src, dst, len) }
    }

    unsafe fn unpack_async(&self, src: NonNull<u8>, dst: u64, len: usize) -> Result<CopyRequest> {
        self.unpacks.fetch_add(1, Ordering::SeqCst);
        if self.fail_unpack.load(Ordering::SeqCst) {
            // Engine accepted the job but never finished it.
            return Ok(CopyRequest::pending(7, len));
        }
        unsafe { self.inner.unpack_async(src, dst, len) }
    }
}

/// System allocator that counts allocations and frees.
#[derive(Debug, Default)]
pub struct CountingAllocator {
    pub allocs: AtomicUsize,
    pub frees: AtomicUsize,
}

impl CountingAllocator {
    pub fn allocs(&self) -> usize {
        self.allocs.load(Ordering::SeqCst)
    }

    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::SeqCst)
    }
}

impl HostAllocator for CountingAllocator {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn allocate(&self, size: usize) -> Result<NonNull<u8>> {
        self.allocs.fetch_add(1, Ordering::SeqCst);
        SystemAllocator.allocate(size)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
        self.frees.fetch_add(1, Ordering::SeqCst);
        unsafe { SystemAllocator.deallocate(ptr, size) }
    }
}

/// Three explicit tiers over plain heap memory.
pub fn plain_config(small: (usize, usize), medium: (usize, usize), large: (usize, usize)) -> StageConfig {
    StageConfig::with_tiers(
        TierConfig::new(small.0, small.1),
        TierConfig::new(medium.0, medium.1),
        TierConfig::new(large.0, large.1),
    )
    .memory(MemoryKind::Plain)
}

/// Staging with counting test doubles; pools draw from the counting allocator.
pub fn counting_staging(
    config: StageConfig,
) -> (GpuStaging, Arc<CountingAdapter>, Arc<CountingAllocator>) {
    let adapter = Arc::new(CountingAdapter::default());
    let alloc = Arc::new(CountingAllocator::default());
    let staging = GpuStaging::init(
        config.memory(MemoryKind::Pinned),
        Arc::clone(&adapter) as Arc<dyn DeviceAdapter>,
        Arc::clone(&alloc) as Arc<dyn HostAllocator>,
    )
    .unwrap();
    (staging, adapter, alloc)
}

/// Every pooled tier is back to full capacity.
pub fn assert_pools_full(staging: &GpuStaging) {
    for s in staging.tiers().stats() {
        assert_eq!(s.available, s.capacity, "{} tier not fully returned", s.tier);
    }
}
