use super::pinned::HostAllocator;
use super::pool::SlotPool;
use super::slot::{HEADER_SIZE, SlotHeader, header_of, payload_of};
use crate::config::StageConfig;
use crate::error::{Result, StageError};
use std::ptr::NonNull;
use std::sync::Arc;

/// Which pool tier a staging buffer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolTier {
    Small,
    Medium,
    Large,
    /// Too big for every tier: allocated on demand and freed on release.
    AdHoc,
}

impl PoolTier {
    const POOLED: [PoolTier; 3] = [PoolTier::Small, PoolTier::Medium, PoolTier::Large];

    fn index(self) -> Option<usize> {
        match self {
            PoolTier::Small => Some(0),
            PoolTier::Medium => Some(1),
            PoolTier::Large => Some(2),
            PoolTier::AdHoc => None,
        }
    }
}

impl std::fmt::Display for PoolTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolTier::Small => f.write_str("small"),
            PoolTier::Medium => f.write_str("medium"),
            PoolTier::Large => f.write_str("large"),
            PoolTier::AdHoc => f.write_str("ad-hoc"),
        }
    }
}

/// Point-in-time occupancy of one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierStats {
    pub tier: PoolTier,
    pub slot_size: usize,
    pub capacity: usize,
    pub available: usize,
}

/// Three size-classed slot pools with ad hoc fallback.
///
/// Checkout picks the **first** tier whose slot size fits the request, even
/// if that tier is momentarily exhausted (the caller then waits for a slot).
/// Requests larger than the large tier's slot size get a dedicated region
/// from the pinned allocator, freed as soon as it is released.
pub struct PoolTiers {
    // Small, medium, large. Kept as a Vec so teardown can pop tail-first.
    tiers: Vec<Arc<SlotPool>>,
    pinned: Arc<dyn HostAllocator>,
}

impl PoolTiers {
    /// Create the three tiers described by `config`.
    pub fn new(config: &StageConfig, pinned: Arc<dyn HostAllocator>) -> Result<Self> {
        config.validate()?;
        let tiers = config
            .tiers()
            .iter()
            .map(|t| SlotPool::new(t.buf_count, t.buf_size, config.memory, &pinned))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { tiers, pinned })
    }

    /// Select the pool tier for a request of `len` bytes.
    pub fn tier_for_size(&self, len: usize) -> PoolTier {
        PoolTier::POOLED
            .into_iter()
            .zip(&self.tiers)
            .find(|(_, pool)| len <= pool.slot_size())
            .map_or(PoolTier::AdHoc, |(tier, _)| tier)
    }

    /// The slot pool backing `tier`, `None` for [`PoolTier::AdHoc`].
    pub fn pool(&self, tier: PoolTier) -> Option<&Arc<SlotPool>> {
        tier.index().and_then(|i| self.tiers.get(i))
    }

    /// Check out a buffer of at least `len` bytes.
    pub fn get_buffer(&self, len: usize) -> Result<NonNull<u8>> {
        match self.pool(self.tier_for_size(len)) {
            Some(pool) => pool.acquire(),
            None => self.alloc_ad_hoc(len),
        }
    }

    fn alloc_ad_hoc(&self, len: usize) -> Result<NonNull<u8>> {
        let region_len = len
            .checked_add(HEADER_SIZE)
            .ok_or_else(|| StageError::AllocationFailed {
                size: len,
                reason: "size overflows with slot header".into(),
            })?;
        tracing::debug!(
            len,
            largest_slot = self.tiers.last().map_or(0, |p| p.slot_size()),
            "staging request exceeds every tier, allocating ad hoc buffer"
        );
        let header = self.pinned.allocate(region_len)?.cast::<SlotHeader>();
        // SAFETY: fresh allocation of at least HEADER_SIZE bytes, page aligned.
        unsafe {
            header.as_ptr().write(SlotHeader::ad_hoc(region_len));
            Ok(payload_of(header))
        }
    }

    /// Return a buffer obtained from [`PoolTiers::get_buffer`].
    ///
    /// The header in front of `buf` names the owning pool. Pool-owned
    /// buffers go back on that pool's free list; ownerless (ad hoc) buffers
    /// are freed immediately.
    ///
    /// # Safety
    /// `buf` must be a payload pointer previously returned by `get_buffer` on
    /// these tiers.
    pub unsafe fn release_buffer(&self, buf: NonNull<u8>) -> Result<()> {
        let addr = buf.as_ptr() as u64;
        // SAFETY: every buffer handed out by get_buffer is preceded by a header.
        let header = unsafe { header_of(buf) };
        let (owner, lent, region_len) = {
            let h = unsafe { header.as_ref() };
            (h.pool, h.lent, h.region_len)
        };

        if owner.is_null() {
            if !lent {
                return Err(StageError::ForeignBuffer { addr });
            }
            unsafe { self.pinned.deallocate(header.cast::<u8>(), region_len) };
            return Ok(());
        }

        self.tiers
            .iter()
            .find(|pool| std::ptr::eq(Arc::as_ptr(*pool), owner))
            .ok_or(StageError::ForeignBuffer { addr })?
            .release(buf)
    }

    /// Tier that owns `buf`, [`PoolTier::AdHoc`] if none does.
    pub fn owner_of(&self, buf: NonNull<u8>) -> PoolTier {
        PoolTier::POOLED
            .into_iter()
            .zip(&self.tiers)
            .find(|(_, pool)| pool.owns(buf))
            .map_or(PoolTier::AdHoc, |(tier, _)| tier)
    }

    /// Occupancy of each pooled tier, smallest first.
    pub fn stats(&self) -> Vec<TierStats> {
        PoolTier::POOLED
            .into_iter()
            .zip(&self.tiers)
            .map(|(tier, pool)| TierStats {
                tier,
                slot_size: pool.slot_size(),
                capacity: pool.capacity(),
                available: pool.available(),
            })
            .collect()
    }
}

impl Drop for PoolTiers {
    fn drop(&mut self) {
        // Tail to head: large first.
        while let Some(pool) = self.tiers.pop() {
            drop(pool);
        }
    }
}
