use super::helpers::{assert_pools_full, counting_staging, plain_config};
use nexar_stage::{DataType, Datatype, RequestKind, StagedRequest};

#[test]
fn test_send_request_lifecycle() {
    let (staging, adapter, _) = counting_staging(plain_config((64, 1), (1024, 1), (4096, 1)));
    let src: Vec<u64> = (0..16).collect();
    let dt = Datatype::primitive(DataType::U64);

    let view = unsafe { staging.stage_send(src.as_ptr() as u64, 16, &dt).unwrap() };
    let mut req = StagedRequest::staged(RequestKind::Send, &view);
    req.complete(&staging);
    req.complete(&staging);

    assert_eq!(adapter.packs(), 1);
    assert_eq!(adapter.unpacks(), 0);
    assert!(staging.contexts().is_empty());
    assert_pools_full(&staging);
}

#[test]
fn test_recv_request_lifecycle() {
    let (staging, adapter, _) = counting_staging(plain_config((64, 1), (1024, 1), (4096, 1)));
    let mut dst = vec![0i32; 100];
    let dt = Datatype::primitive(DataType::I32).into_handle();

    let view = unsafe { staging.stage_recv(dst.as_mut_ptr() as u64, 100, &dt).unwrap() };
    let incoming: Vec<u8> = (0..100i32).flat_map(|v| (-v).to_ne_bytes()).collect();
    unsafe { view.as_mut_slice().copy_from_slice(&incoming) };

    let mut req = StagedRequest::staged(RequestKind::Recv, &view);
    req.complete(&staging);
    assert!(!req.is_staged());
    assert_eq!(adapter.unpacks(), 1);
    assert_eq!(dst[99], -99);
}

#[test]
fn test_aborted_request_cancels_once() {
    let (staging, adapter, _) = counting_staging(plain_config((64, 2), (1024, 1), (4096, 1)));
    let mut dst = [0u8; 48];
    let dt = Datatype::bytes(48).into_handle();

    let view = unsafe { staging.stage_recv(dst.as_mut_ptr() as u64, 1, &dt).unwrap() };
    let mut req = StagedRequest::staged(RequestKind::Recv, &view);
    req.cancel(&staging);
    assert!(req.stage_buf().is_none());
    // Completion arriving after the abort finds nothing to do.
    req.try_complete(&staging).unwrap();

    assert_eq!(adapter.unpacks(), 0);
    assert_pools_full(&staging);
}

#[test]
fn test_fast_path_request_bypasses_staging() {
    let (staging, adapter, _) = counting_staging(plain_config((64, 1), (1024, 1), (4096, 1)));
    let mut req = StagedRequest::new(RequestKind::Send);
    req.try_complete(&staging).unwrap();
    req.try_cancel(&staging).unwrap();
    assert_eq!(adapter.packs(), 0);
    assert_eq!(staging.outstanding(), 0);
}
