pub mod config;
pub mod datatype;
pub mod device;
pub mod error;
pub mod memory;
pub mod stage;
pub mod types;

pub use config::{StageConfig, TierConfig};
pub use datatype::{Block, Datatype, DatatypeHandle, ExtentInfo, TypeLayout};
pub use device::{CopyRequest, CpuAdapter, DeviceAdapter};
pub use error::{Result, StageError};
pub use memory::{
    HostAllocator, PoolTier, PoolTiers, SlotPool, StageView, SystemAllocator, TierStats,
};
pub use stage::{GpuStaging, RequestKind, StageContext, StageContextStore, StagedRequest};
pub use types::{DataType, MemoryKind};

#[cfg(feature = "cuda")]
pub use device::{CudaAdapter, CudaHostAllocator};
