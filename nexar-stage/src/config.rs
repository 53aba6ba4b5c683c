//! Sizing of the staging buffer pools.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `NEXAR_GPU_`) or by constructing a custom `StageConfig`.
//! The configuration is read once at init and never changes afterwards.

use crate::error::{Result, StageError};
use crate::types::MemoryKind;

/// Slot size and slot count of one pool tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierConfig {
    /// Payload bytes per slot.
    pub buf_size: usize,
    /// Number of slots in the tier.
    pub buf_count: usize,
}

impl TierConfig {
    pub const fn new(buf_size: usize, buf_count: usize) -> Self {
        Self {
            buf_size,
            buf_count,
        }
    }
}

/// Tuning parameters for the staging pools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageConfig {
    /// Small tier, for control-sized payloads.
    pub small: TierConfig,

    /// Medium tier.
    pub medium: TierConfig,

    /// Large tier. Requests bigger than its slot size bypass the pools.
    pub large: TierConfig,

    /// Backing memory for the pool regions.
    pub memory: MemoryKind,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            small: TierConfig::new(64, 64),
            medium: TierConfig::new(32 * 1024, 32),      // 32 KiB
            large: TierConfig::new(4 * 1024 * 1024, 4), // 4 MiB
            memory: MemoryKind::Pinned,
        }
    }
}

impl StageConfig {
    /// Build a config from three explicit tiers, smallest first.
    pub fn with_tiers(small: TierConfig, medium: TierConfig, large: TierConfig) -> Self {
        Self {
            small,
            medium,
            large,
            ..Self::default()
        }
    }

    /// Use the given backing memory for the pool regions.
    pub fn memory(mut self, memory: MemoryKind) -> Self {
        self.memory = memory;
        self
    }

    /// The tiers in ascending order.
    pub fn tiers(&self) -> [TierConfig; 3] {
        [self.small, self.medium, self.large]
    }

    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `NEXAR_GPU_SMALL_BUF_POOL_SZ` / `NEXAR_GPU_SMALL_BUF_POOL_NUM`
    /// - `NEXAR_GPU_MEDIUM_BUF_POOL_SZ` / `NEXAR_GPU_MEDIUM_BUF_POOL_NUM`
    /// - `NEXAR_GPU_LARGE_BUF_POOL_SZ` / `NEXAR_GPU_LARGE_BUF_POOL_NUM`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup` on top of the defaults.
    ///
    /// `lookup` maps a variable name to its value. Missing or unparsable
    /// values leave the default in place.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        let parse = |key: String| lookup(&key).and_then(|v| v.trim().parse::<usize>().ok());

        for (name, tier) in [
            ("SMALL", &mut cfg.small),
            ("MEDIUM", &mut cfg.medium),
            ("LARGE", &mut cfg.large),
        ] {
            if let Some(n) = parse(format!("NEXAR_GPU_{name}_BUF_POOL_SZ")) {
                tier.buf_size = n;
            }
            if let Some(n) = parse(format!("NEXAR_GPU_{name}_BUF_POOL_NUM")) {
                tier.buf_count = n;
            }
        }

        cfg
    }

    /// Check that every tier is non-empty and that slot sizes never shrink
    /// from one tier to the next.
    pub fn validate(&self) -> Result<()> {
        let tiers = self.tiers();
        for (i, tier) in tiers.iter().enumerate() {
            if tier.buf_size == 0 || tier.buf_count == 0 {
                return Err(StageError::InvalidConfig(format!(
                    "tier {i} must have a positive size and count (got {}×{})",
                    tier.buf_count, tier.buf_size
                )));
            }
        }
        for pair in tiers.windows(2) {
            if pair[1].buf_size < pair[0].buf_size {
                return Err(StageError::InvalidConfig(format!(
                    "tier slot sizes must be ascending ({} after {})",
                    pair[1].buf_size, pair[0].buf_size
                )));
            }
        }
        Ok(())
    }
}
