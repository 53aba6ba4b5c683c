use super::protocol::GpuStaging;
use crate::error::Result;
use crate::memory::StageView;

/// Direction of a transfer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Send,
    Recv,
}

/// Staging state carried by a transfer request.
///
/// A request either bypassed staging (`stage_buf` is `None`) or holds the
/// view returned by `stage_send`/`stage_recv`. Finishing the request clears
/// it, so a second completion is a no-op rather than a double release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedRequest {
    kind: RequestKind,
    stage_buf: Option<StageView>,
}

impl StagedRequest {
    /// A request that does not use staging.
    pub fn new(kind: RequestKind) -> Self {
        Self {
            kind,
            stage_buf: None,
        }
    }

    /// A request whose data went through `view`.
    pub fn staged(kind: RequestKind, view: &StageView) -> Self {
        let mut req = Self::new(kind);
        req.attach(view);
        req
    }

    /// Record `view` as this request's staging buffer.
    pub fn attach(&mut self, view: &StageView) {
        self.stage_buf = Some(*view);
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn stage_buf(&self) -> Option<StageView> {
        self.stage_buf
    }

    pub fn is_staged(&self) -> bool {
        self.stage_buf.is_some()
    }

    /// Normal completion: unstage according to the request direction.
    pub fn try_complete(&mut self, staging: &GpuStaging) -> Result<()> {
        let Some(view) = self.stage_buf.take() else {
            return Ok(());
        };
        match self.kind {
            RequestKind::Send => staging.unstage_send(view),
            RequestKind::Recv => staging.unstage_recv(view),
        }
    }

    /// Abort path: drop the staged buffer without moving data.
    pub fn try_cancel(&mut self, staging: &GpuStaging) -> Result<()> {
        match self.stage_buf.take() {
            Some(view) => staging.cancel(view),
            None => Ok(()),
        }
    }

    /// [`StagedRequest::try_complete`], aborting the process on failure.
    pub fn complete(&mut self, staging: &GpuStaging) {
        self.try_complete(staging).unwrap_or_else(|e| e.abort());
    }

    /// [`StagedRequest::try_cancel`], aborting the process on failure.
    pub fn cancel(&mut self, staging: &GpuStaging) {
        self.try_cancel(staging).unwrap_or_else(|e| e.abort());
    }
}
