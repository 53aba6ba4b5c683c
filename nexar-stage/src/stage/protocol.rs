//! Stage / unstage / cancel on top of the pool tiers and the context store.
//!
//! Staging copies the whole byte span a datatype touches, starting at its
//! true lower bound, so the staging buffer mirrors the user buffer's layout
//! from `true_lb` onwards. The address handed to the transport is shifted
//! back by `true_lb` (see [`StageView`]) so datatype offsets stay valid.

use super::context::{StageContext, StageContextStore};
use crate::config::StageConfig;
use crate::datatype::{DatatypeHandle, TypeLayout};
use crate::device::{CopyRequest, CpuAdapter, DeviceAdapter};
use crate::error::{Result, StageError};
use crate::memory::{HostAllocator, PoolTiers, StageView, SystemAllocator};
use std::ptr::NonNull;
use std::sync::Arc;

/// Byte span and true lower bound of `count` elements of `datatype`.
fn span_of(datatype: &dyn TypeLayout, count: usize) -> Result<(usize, isize)> {
    let info = datatype.extent_info(count);
    Ok((info.span()?, info.true_lb))
}

/// GPU staging subsystem: pool tiers, live staging contexts, copy engine.
///
/// One instance is owned by the communication runtime and shared by every
/// thread that stages transfers. Pools and the context store live exactly as
/// long as this value.
pub struct GpuStaging {
    config: StageConfig,
    tiers: PoolTiers,
    contexts: StageContextStore,
    adapter: Arc<dyn DeviceAdapter>,
}

impl GpuStaging {
    /// Create the pool tiers and an empty context store.
    pub fn init(
        config: StageConfig,
        adapter: Arc<dyn DeviceAdapter>,
        pinned: Arc<dyn HostAllocator>,
    ) -> Result<Self> {
        let tiers = PoolTiers::new(&config, pinned)?;
        tracing::debug!(
            small = config.small.buf_size,
            medium = config.medium.buf_size,
            large = config.large.buf_size,
            "staging subsystem initialized"
        );
        Ok(Self {
            config,
            tiers,
            contexts: StageContextStore::new(),
            adapter,
        })
    }

    /// Host-only staging: memcpy adapter over heap memory.
    pub fn host(config: StageConfig) -> Result<Self> {
        Self::init(config, Arc::new(CpuAdapter::new()), Arc::new(SystemAllocator))
    }

    /// CUDA staging on the given GPU: page-locked pools, driver copies.
    #[cfg(feature = "cuda")]
    pub fn cuda(config: StageConfig, device_ordinal: u32) -> Result<Self> {
        use crate::device::{CudaAdapter, CudaHostAllocator};
        Self::init(
            config,
            Arc::new(CudaAdapter::new(device_ordinal)?),
            Arc::new(CudaHostAllocator::new(device_ordinal)?),
        )
    }

    /// Tear down the pools, large tier first.
    ///
    /// Returns `LeakedStages` if some staged transfer was never unstaged or
    /// cancelled; the pools are destroyed either way.
    pub fn finalize(self) -> Result<()> {
        let leaked = self.contexts.len();
        if leaked > 0 {
            tracing::warn!(leaked, "finalizing staging with live staging contexts");
        }
        drop(self);
        if leaked > 0 {
            return Err(StageError::LeakedStages { count: leaked });
        }
        Ok(())
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn tiers(&self) -> &PoolTiers {
        &self.tiers
    }

    pub fn contexts(&self) -> &StageContextStore {
        &self.contexts
    }

    /// Raw staging buffer of at least `size` bytes, outside the typed protocol.
    pub fn get_buffer(&self, size: usize) -> Result<NonNull<u8>> {
        self.tiers.get_buffer(size)
    }

    /// Return a buffer from [`GpuStaging::get_buffer`].
    ///
    /// # Safety
    /// `buf` must come from `get_buffer` on this instance and not have been
    /// released since.
    pub unsafe fn release_buffer(&self, buf: NonNull<u8>) -> Result<()> {
        unsafe { self.tiers.release_buffer(buf) }
    }

    /// Stage `count` elements of `datatype` at `src` for sending.
    ///
    /// Packs the data into a pinned buffer and returns a view. The transport
    /// sends from its `payload_start()` and hands the view back to
    /// [`GpuStaging::unstage_send`] once the send is done.
    ///
    /// # Safety
    /// `src` shifted by the datatype's true lower bound must be readable for
    /// the full payload span.
    pub unsafe fn stage_send(
        &self,
        src: u64,
        count: usize,
        datatype: &dyn TypeLayout,
    ) -> Result<StageView> {
        let (span, true_lb) = span_of(datatype, count)?;
        let buf = self.tiers.get_buffer(span)?;

        let packed = unsafe {
            self.adapter
                .pack_async(src.wrapping_add_signed(true_lb as i64), buf, span)
        };
        if let Err(e) = self.finish_copy("pack", packed, span) {
            self.discard(buf);
            return Err(e);
        }

        let view = StageView::new(buf, true_lb, span);
        if let Err(e) = self
            .contexts
            .put(view.stage_key(), StageContext::Send { true_lb })
        {
            self.discard(buf);
            return Err(e);
        }
        tracing::trace!(addr = view.payload_start(), span, true_lb, "staged send");
        Ok(view)
    }

    /// Release the buffer behind a staged send. No data is copied.
    pub fn unstage_send(&self, view: StageView) -> Result<()> {
        let key = view.stage_key();
        let ctx = self.contexts.erase(key)?;
        let StageContext::Send { true_lb } = ctx else {
            self.contexts.put(key, ctx)?;
            return Err(StageError::StageKindMismatch {
                addr: key,
                expected: "send",
            });
        };
        self.check_view(&view, StageContext::Send { true_lb }, true_lb)?;
        self.release_staged(&view)?;
        tracing::trace!(addr = view.payload_start(), "unstaged send");
        Ok(())
    }

    /// Stage a receive of `count` elements of `datatype` into `dst`.
    ///
    /// Nothing is copied yet: the transport writes incoming bytes to
    /// `buffer_start()` of the returned view, then hands the view to
    /// [`GpuStaging::unstage_recv`].
    ///
    /// Unlike `stage_send`, this takes a shared handle: the layout is kept in
    /// the staging context until the unpack at `unstage_recv` time.
    ///
    /// # Safety
    /// `dst` shifted by the datatype's true lower bound must stay writable for
    /// the full payload span until the staged receive is unstaged or
    /// cancelled.
    pub unsafe fn stage_recv(
        &self,
        dst: u64,
        count: usize,
        datatype: &DatatypeHandle,
    ) -> Result<StageView> {
        let (span, true_lb) = span_of(datatype.as_ref(), count)?;
        let buf = self.tiers.get_buffer(span)?;
        let view = StageView::new(buf, true_lb, span);
        let ctx = StageContext::Recv {
            dst,
            count,
            datatype: Arc::clone(datatype),
        };
        if let Err(e) = self.contexts.put(view.stage_key(), ctx) {
            self.discard(buf);
            return Err(e);
        }
        tracing::trace!(addr = view.payload_start(), span, true_lb, "staged recv");
        Ok(view)
    }

    /// Unpack a completed staged receive into its destination and release
    /// the buffer.
    pub fn unstage_recv(&self, view: StageView) -> Result<()> {
        let key = view.stage_key();
        let ctx = self.contexts.erase(key)?;
        let StageContext::Recv {
            dst,
            count,
            datatype,
        } = ctx
        else {
            self.contexts.put(key, ctx)?;
            return Err(StageError::StageKindMismatch {
                addr: key,
                expected: "recv",
            });
        };

        // Recomputed: receive contexts don't carry the lower bound.
        let (span, true_lb) = span_of(datatype.as_ref(), count)?;
        let ctx = StageContext::Recv {
            dst,
            count,
            datatype,
        };
        self.check_view(&view, ctx, true_lb)?;

        let buf = view.buffer_start();
        // SAFETY: stage_recv's caller promised `dst` stays writable until now.
        let unpacked = unsafe {
            self.adapter
                .unpack_async(buf, dst.wrapping_add_signed(true_lb as i64), span)
        };
        let copied = self.finish_copy("unpack", unpacked, span);
        let released = self.release_staged(&view);
        copied?;
        released?;
        tracing::trace!(addr = view.payload_start(), span, "unstaged recv");
        Ok(())
    }

    /// Abandon a staged transfer without moving any data.
    ///
    /// For receives the destination is left in whatever state it was in.
    pub fn cancel(&self, view: StageView) -> Result<()> {
        let ctx = self.contexts.erase(view.stage_key())?;
        let true_lb = match &ctx {
            StageContext::Send { true_lb } => *true_lb,
            StageContext::Recv { datatype, .. } => datatype.true_lb(),
        };
        let send = ctx.is_send();
        self.check_view(&view, ctx, true_lb)?;
        self.release_staged(&view)?;
        tracing::debug!(addr = view.payload_start(), send, "cancelled staged transfer");
        Ok(())
    }

    /// Live staged transfers.
    pub fn outstanding(&self) -> usize {
        self.contexts.len()
    }

    /// Reject a view whose lower bound differs from the one its buffer was
    /// staged with. The erased context goes back into the store on mismatch.
    fn check_view(&self, view: &StageView, ctx: StageContext, true_lb: isize) -> Result<()> {
        if view.true_lb() == true_lb {
            return Ok(());
        }
        let addr = view.stage_key();
        self.contexts.put(addr, ctx)?;
        Err(StageError::StageViewMismatch {
            addr,
            expected: true_lb,
            found: view.true_lb(),
        })
    }

    fn release_staged(&self, view: &StageView) -> Result<()> {
        // SAFETY: the view's context was just taken out of the store, so its
        // buffer was checked out by this instance and not released since.
        unsafe { self.tiers.release_buffer(view.buffer_start()) }
    }

    fn finish_copy(
        &self,
        operation: &'static str,
        request: Result<CopyRequest>,
        expected: usize,
    ) -> Result<()> {
        let moved = self.adapter.wait(request?)?;
        if moved != expected {
            return Err(StageError::copy_failed(
                operation,
                format!("moved {moved} of {expected} bytes"),
            ));
        }
        Ok(())
    }

    /// Return `buf` on an error path, logging if even that fails.
    fn discard(&self, buf: NonNull<u8>) {
        // SAFETY: only called with buffers this instance just checked out.
        if let Err(e) = unsafe { self.tiers.release_buffer(buf) } {
            tracing::warn!("failed to return staging buffer after error: {e}");
        }
    }
}

impl std::fmt::Debug for GpuStaging {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuStaging")
            .field("config", &self.config)
            .field("tiers", &self.tiers.stats())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}
