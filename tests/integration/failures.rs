use crate::*;

use otalink_core::integrity::image_digest;
use otalink_core::wire::{Control, DataChunk, Offer};
use otalink_services::SenderConfig;

// ══════════════════════════════════════════════════════════════════════════════
//  Verification & Storage Failures
// ══════════════════════════════════════════════════════════════════════════════

fn cancel() -> Packet {
    Packet::Control(Control::Cancel)
}

/// Every chunk arrives intact, but the image is not the one offered.
#[test]
fn test_digest_mismatch_never_commits() {
    let slot = TempSlot::new();
    let mut rx = Receiver::new(FlakySink::new(slot.sink(1 << 16)));
    let image = b"hello-123";

    let offer = Packet::Offer(Offer {
        size: 9,
        digest: image_digest(b"hello-124"),
        version: 1,
    });
    exchange(&mut rx, PUSHER, offer);
    exchange(&mut rx, PUSHER, Packet::Data(DataChunk::seal(0, image).unwrap()));

    let reply = rx
        .handle_datagram(&PUSHER, &Packet::Control(Control::Finish).encode())
        .unwrap();
    assert_eq!(reply.packet, cancel());
    assert!(!reply.restart);
    assert_eq!(rx.state(), TransferState::Aborted);
    assert!(!rx.is_hashing());

    assert!(!rx.sink().ends.contains(&true), "end(true) must never run");
    assert!(!slot.staging_exists(), "unverified image left staged");
    assert_eq!(slot.active(), None);

    // A stray Finish afterwards has nothing to commit.
    assert_eq!(
        exchange(&mut rx, PUSHER, Packet::Control(Control::Finish)),
        Some(cancel())
    );
    assert_eq!(slot.active(), None);
}

#[test]
fn test_short_write_cancels_transfer() {
    let slot = TempSlot::new();
    let mut sink = FlakySink::new(slot.sink(1 << 20));
    sink.short_write_at = Some(2);
    let mut rx = Receiver::new(sink);

    let image = test_image(1000);
    let mut tx = Sender::new(&image, &SenderConfig::default()).unwrap();
    let mut link = SimLink::new(LinkProfile::clean(), 30);
    let outcome = run_transfer(&mut tx, &mut rx, &mut link, 100);

    assert_eq!(outcome.result, Some(Err(TransferError::Cancelled)));
    assert!(!outcome.restarted);
    assert_eq!(rx.state(), TransferState::Aborted);
    assert_eq!(rx.expected_sequence(), None);
    assert_eq!(rx.sink().ends, vec![false]);
    assert!(!slot.staging_exists());
    assert_eq!(slot.active(), None);
}

#[test]
fn test_commit_failure_cancels_transfer() {
    let slot = TempSlot::new();
    let mut sink = FlakySink::new(slot.sink(1 << 20));
    sink.fail_commit = true;
    let mut rx = Receiver::new(sink);

    let image = test_image(640);
    let mut tx = Sender::new(&image, &SenderConfig::default()).unwrap();
    let mut link = SimLink::new(LinkProfile::clean(), 31);
    let outcome = run_transfer(&mut tx, &mut rx, &mut link, 100);

    assert_eq!(outcome.result, Some(Err(TransferError::Cancelled)));
    assert!(!outcome.restarted);
    assert_eq!(rx.state(), TransferState::Aborted);
    assert_eq!(rx.sink().ends, vec![true]);
    assert_eq!(slot.active(), None);
}

#[test]
fn test_oversized_image_is_rejected() {
    let slot = TempSlot::new();
    let mut rx = Receiver::new(slot.sink(512));

    let image = test_image(513);
    let mut tx = Sender::new(&image, &SenderConfig::default()).unwrap();
    let mut link = SimLink::new(LinkProfile::clean(), 32);
    let outcome = run_transfer(&mut tx, &mut rx, &mut link, 100);

    assert_eq!(outcome.result, Some(Err(TransferError::Rejected)));
    assert_eq!(outcome.rounds, 1);
    assert_eq!(rx.state(), TransferState::Idle);
    assert!(!rx.is_hashing());
    assert!(!slot.staging_exists());
}

/// A failed transfer leaves the previously committed image in place.
#[test]
fn test_failed_transfer_keeps_active_image() {
    let slot = TempSlot::new();
    let first = test_image(700);

    let mut rx = Receiver::new(slot.sink(1 << 20));
    let mut tx = Sender::new(&first, &SenderConfig::default()).unwrap();
    let outcome = run_transfer(&mut tx, &mut rx, &mut SimLink::new(LinkProfile::clean(), 40), 100);
    assert_done(&outcome, &tx);

    // The device rebooted; a fresh receiver owns the same slots.
    let mut sink = FlakySink::new(slot.sink(1 << 20));
    sink.short_write_at = Some(1);
    let mut rx = Receiver::new(sink);
    let second = test_image(900).into_iter().rev().collect::<Vec<_>>();
    let mut tx = Sender::new(&second, &SenderConfig::default()).unwrap();
    let outcome = run_transfer(&mut tx, &mut rx, &mut SimLink::new(LinkProfile::clean(), 41), 100);

    assert_eq!(outcome.result, Some(Err(TransferError::Cancelled)));
    assert_eq!(slot.active(), Some(first));
}
