//! Creator/joiner shared-memory channel tests, two transports on one region.
#![cfg(unix)]

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use agentlink_transport::{
    DataTransport, ShmConfig, ShmRole, ShmSide, ShmTransport, TransportError,
};
use agentlink_wire::{TYPE_CTRL_REQ, TYPE_DATA_JSON_EVT};

fn channel_config(tag: &str, side: ShmSide, role: ShmRole) -> ShmConfig {
    let pid = std::process::id();
    ShmConfig {
        shm_name: format!("/agentlink_e2e_{tag}_{pid}"),
        notify_la: format!("/agentlink_e2e_{tag}_{pid}_la"),
        notify_al: format!("/agentlink_e2e_{tag}_{pid}_al"),
        ring_bytes: 4096,
        max_frame: 256,
        side,
        role,
        wait_ms: 100,
        ready_timeout_ms: 2000,
    }
}

#[test]
fn frame_crosses_region() {
    let mut creator = ShmTransport::new(channel_config("cross", ShmSide::Legacy, ShmRole::Creator));
    let mut joiner = ShmTransport::new(channel_config("cross", ShmSide::Agent, ShmRole::Joiner));

    creator.open().unwrap();

    let (tx, rx) = mpsc::channel::<(u16, u32, Vec<u8>)>();
    joiner.set_on_frame(Arc::new(move |header, payload| {
        let _ = tx.send((header.frame_type, header.corr_id, payload.to_vec()));
    }));
    joiner.open().unwrap();
    joiner.start().unwrap();

    let body: Vec<u8> = (0..100u8).collect();
    creator.send_frame(TYPE_CTRL_REQ, 9, &body).unwrap();

    let (frame_type, corr_id, payload) = rx
        .recv_timeout(Duration::from_secs(2))
        .expect("frame should arrive before the receive deadline");
    assert_eq!(frame_type, TYPE_CTRL_REQ);
    assert_eq!(corr_id, 9);
    assert_eq!(payload, body);

    joiner.stop();
    assert!(!joiner.is_running());
    joiner.close();
    creator.close();
}

#[test]
fn frames_keep_send_order() {
    let mut creator = ShmTransport::new(channel_config("order", ShmSide::Agent, ShmRole::Creator));
    let mut joiner = ShmTransport::new(channel_config("order", ShmSide::Legacy, ShmRole::Joiner));

    creator.open().unwrap();

    let (tx, rx) = mpsc::channel::<u32>();
    joiner.set_on_frame(Arc::new(move |header, _| {
        let _ = tx.send(header.corr_id);
    }));
    joiner.open().unwrap();
    joiner.start().unwrap();

    for corr_id in 1..=50u32 {
        loop {
            match creator.send_frame(TYPE_DATA_JSON_EVT, corr_id, &[0xEE; 32]) {
                Ok(()) => break,
                Err(TransportError::ChannelFull) => std::thread::yield_now(),
                Err(e) => panic!("send failed: {e}"),
            }
        }
    }

    for expected in 1..=50u32 {
        let got = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(got, expected, "delivery order broken");
    }

    joiner.close();
    creator.close();
}

#[test]
fn joiner_rejects_mismatched_config() {
    let mut creator =
        ShmTransport::new(channel_config("mismatch", ShmSide::Legacy, ShmRole::Creator));
    creator.open().unwrap();

    let mut wrong = channel_config("mismatch", ShmSide::Agent, ShmRole::Joiner);
    wrong.max_frame = 128;
    let mut joiner = ShmTransport::new(wrong);
    assert!(matches!(
        joiner.open(),
        Err(TransportError::Shm(agentlink_shm::ShmError::ConfigMismatch { .. }))
    ));

    creator.close();
}

#[test]
fn recreate_bumps_epoch() {
    let cfg = channel_config("epoch", ShmSide::Legacy, ShmRole::Creator);

    let mut first = ShmTransport::new(cfg.clone());
    first.open().unwrap();
    let first_epoch = first.stats().epoch;
    assert_eq!(first_epoch, 1);
    // Skip close() so the names stay linked, as after a crash.
    std::mem::forget(first);

    let mut second = ShmTransport::new(cfg.clone());
    second.open().unwrap();
    assert_eq!(second.stats().epoch, first_epoch + 1);
    second.close();
}

#[test]
fn missing_region_fails_join() {
    let mut joiner = ShmTransport::new(channel_config("absent", ShmSide::Agent, ShmRole::Joiner));
    assert!(joiner.open().is_err());
}
