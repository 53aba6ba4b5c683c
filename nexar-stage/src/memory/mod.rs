mod pinned;
mod pool;
mod slot;
mod tiers;
mod view;

pub use pinned::{HostAllocator, REGION_ALIGN, SystemAllocator};
pub use pool::SlotPool;
pub use slot::{HEADER_SIZE, SLOT_ALIGN};
pub use tiers::{PoolTier, PoolTiers, TierStats};
pub use view::StageView;
