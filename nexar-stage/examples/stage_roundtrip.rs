//! Stage a strided send, hand the bytes to a receive, and unpack them.
//!
//! Uses the host adapter, so no GPU is needed. The "transport" here is a
//! plain copy between the two staging buffers.
//!
//! ```bash
//! cargo run -p nexar-stage --example stage_roundtrip
//! ```

use nexar_stage::{
    DataType, Datatype, GpuStaging, RequestKind, StageConfig, StagedRequest, TypeLayout,
};

fn main() -> nexar_stage::Result<()> {
    let staging = GpuStaging::host(StageConfig::from_env())?;

    // Every other f32 of a 16-element row.
    let column = Datatype::vector(8, 1, 2, &Datatype::primitive(DataType::F32));
    let src: Vec<f32> = (0..16).map(|i| i as f32).collect();
    let mut dst = vec![0f32; 16];

    let sent = unsafe { staging.stage_send(src.as_ptr() as u64, 1, &column)? };
    let mut send_req = StagedRequest::staged(RequestKind::Send, &sent);
    println!(
        "staged send {sent} in the {} tier (packed size {}B)",
        staging.tiers().owner_of(sent.buffer_start()),
        column.size()
    );

    let recv = unsafe {
        staging.stage_recv(dst.as_mut_ptr() as u64, 1, &column.clone().into_handle())?
    };
    let mut recv_req = StagedRequest::staged(RequestKind::Recv, &recv);

    unsafe { recv.as_mut_slice().copy_from_slice(sent.as_slice()) };
    send_req.try_complete(&staging)?;
    recv_req.try_complete(&staging)?;

    let picked: Vec<f32> = dst.iter().step_by(2).copied().collect();
    println!("received {picked:?}");

    staging.finalize()
}
