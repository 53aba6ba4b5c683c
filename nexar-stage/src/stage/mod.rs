mod context;
mod protocol;
mod request;

pub use context::{StageContext, StageContextStore};
pub use protocol::GpuStaging;
pub use request::{RequestKind, StagedRequest};
