use super::helpers::{assert_pools_full, counting_staging, plain_config};
use nexar_stage::{GpuStaging, PoolTier, StageConfig};
use std::collections::HashSet;

#[test]
fn test_tier_choice_is_monotonic_in_size() {
    let staging = GpuStaging::host(StageConfig::default()).unwrap();
    let tiers = staging.tiers();
    let sizes = [0, 1, 63, 64, 65, 4096, 32768, 32769, 1 << 20, 4 << 20, (4 << 20) + 1];
    let rank = |t: PoolTier| match t {
        PoolTier::Small => 0,
        PoolTier::Medium => 1,
        PoolTier::Large => 2,
        PoolTier::AdHoc => 3,
    };
    for pair in sizes.windows(2) {
        assert!(
            rank(tiers.tier_for_size(pair[0])) <= rank(tiers.tier_for_size(pair[1])),
            "{} bytes mapped above {} bytes",
            pair[0],
            pair[1]
        );
    }
}

#[test]
fn test_mixed_request_routing() {
    let staging =
        GpuStaging::host(plain_config((64, 2), (32768, 1), (131072, 1))).unwrap();

    let a = staging.get_buffer(10).unwrap();
    let b = staging.get_buffer(10).unwrap();
    let c = staging.get_buffer(100_000).unwrap();

    let tiers = staging.tiers();
    assert_eq!(tiers.owner_of(a), PoolTier::Small);
    assert_eq!(tiers.owner_of(b), PoolTier::Small);
    assert_eq!(tiers.owner_of(c), PoolTier::Large);

    let distinct: HashSet<_> = [a, b, c].into_iter().collect();
    assert_eq!(distinct.len(), 3);
    assert_eq!(tiers.pool(PoolTier::Small).unwrap().available(), 0);
    assert_eq!(tiers.pool(PoolTier::Medium).unwrap().available(), 1);

    for buf in [a, b, c] {
        unsafe { staging.release_buffer(buf).unwrap() };
    }
    assert_pools_full(&staging);
}

#[test]
fn test_oversized_request_is_ad_hoc_and_freed() {
    let (staging, _adapter, alloc) = counting_staging(StageConfig::default());
    // One region per tier.
    assert_eq!(alloc.allocs(), 3);

    let buf = staging.get_buffer(5_000_000).unwrap();
    assert_eq!(staging.tiers().owner_of(buf), PoolTier::AdHoc);
    assert_eq!(alloc.allocs(), 4);
    unsafe {
        buf.as_ptr().write_bytes(0x3C, 5_000_000);
        staging.release_buffer(buf).unwrap();
    }
    assert_eq!(alloc.frees(), 1);
    assert_pools_full(&staging);

    staging.finalize().unwrap();
    assert_eq!(alloc.frees(), 4);
}

#[test]
fn test_default_tier_sizes() {
    let staging = GpuStaging::host(StageConfig::default()).unwrap();
    let stats = staging.tiers().stats();
    let sizes: Vec<(usize, usize)> = stats.iter().map(|s| (s.slot_size, s.capacity)).collect();
    assert_eq!(sizes, vec![(64, 64), (32 * 1024, 32), (4 * 1024 * 1024, 4)]);
}

#[test]
fn test_release_of_unknown_pointer_rejected() {
    let staging = GpuStaging::host(plain_config((64, 1), (128, 1), (256, 1))).unwrap();
    let buf = staging.get_buffer(32).unwrap();
    unsafe { staging.release_buffer(buf).unwrap() };
    assert!(unsafe { staging.release_buffer(buf) }.is_err());
    assert_pools_full(&staging);
}
