use super::helpers::{assert_pools_full, counting_staging, plain_config};
use nexar_stage::{DataType, Datatype, GpuStaging, PoolTier, RequestKind, StagedRequest};
use std::collections::HashSet;
use std::sync::Mutex;

#[test]
fn test_concurrent_send_recv_pairs() {
    // Each thread holds two slots at once. One spare slot beyond the thread
    // count keeps the tier from deadlocking while still forcing waits.
    let (staging, adapter, _) = counting_staging(plain_config((64, 7), (1024, 7), (8192, 1)));
    let threads = 6;
    let rounds = 50;

    std::thread::scope(|s| {
        for t in 0..threads {
            let staging = &staging;
            s.spawn(move || {
                let dt = Datatype::primitive(DataType::U32);
                let handle = dt.clone().into_handle();
                for r in 0..rounds {
                    // Alternate between the small and medium tiers.
                    let count = if r % 2 == 0 { 8 } else { 100 };
                    let src: Vec<u32> = (0..count).map(|i| (t * 1000 + r * 10 + i) as u32).collect();
                    let mut dst = vec![0u32; count];

                    let sent = unsafe { staging.stage_send(src.as_ptr() as u64, count, &dt).unwrap() };
                    let mut send_req = StagedRequest::staged(RequestKind::Send, &sent);
                    let recv = unsafe {
                        staging
                            .stage_recv(dst.as_mut_ptr() as u64, count, &handle)
                            .unwrap()
                    };
                    let mut recv_req = StagedRequest::staged(RequestKind::Recv, &recv);

                    unsafe { recv.as_mut_slice().copy_from_slice(sent.as_slice()) };
                    send_req.complete(staging);
                    recv_req.complete(staging);
                    assert_eq!(dst, src);
                }
            });
        }
    });

    assert_eq!(adapter.packs(), threads * rounds);
    assert_eq!(adapter.unpacks(), threads * rounds);
    assert!(staging.contexts().is_empty());
    assert_pools_full(&staging);
}

#[test]
fn test_concurrent_checkouts_are_exclusive() {
    let staging = GpuStaging::host(plain_config((64, 4), (1024, 4), (8192, 2))).unwrap();
    let live: Mutex<HashSet<usize>> = Mutex::new(HashSet::new());

    std::thread::scope(|s| {
        for t in 0..8 {
            let (staging, live) = (&staging, &live);
            s.spawn(move || {
                for i in 0..100 {
                    let size = [16, 700, 5000][(t + i) % 3];
                    let buf = staging.get_buffer(size).unwrap();
                    let addr = buf.as_ptr() as usize;
                    assert!(live.lock().unwrap().insert(addr), "slot handed out twice");
                    unsafe { buf.as_ptr().write_bytes(t as u8, size) };
                    assert!(live.lock().unwrap().remove(&addr));
                    unsafe { staging.release_buffer(buf).unwrap() };
                }
            });
        }
    });
    assert_pools_full(&staging);
}

#[test]
fn test_cancel_races_with_staging() {
    let staging = GpuStaging::host(plain_config((64, 3), (1024, 1), (8192, 1))).unwrap();
    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                let dt = Datatype::bytes(32).into_handle();
                let mut dst = [0u8; 32];
                for _ in 0..100 {
                    let view = unsafe { staging.stage_recv(dst.as_mut_ptr() as u64, 1, &dt).unwrap() };
                    assert_eq!(staging.tiers().owner_of(view.buffer_start()), PoolTier::Small);
                    staging.cancel(view).unwrap();
                }
            });
        }
    });
    assert_eq!(staging.outstanding(), 0);
    assert_pools_full(&staging);
}
