pub mod adapter;
pub mod cpu;
#[cfg(feature = "cuda")]
pub mod cuda;

pub use adapter::{CopyRequest, DeviceAdapter};
pub use cpu::CpuAdapter;
#[cfg(feature = "cuda")]
pub use cuda::{CudaAdapter, CudaHostAllocator};
