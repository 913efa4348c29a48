use crate::*;

use otalink_core::integrity::image_digest;
use otalink_core::wire::{Control, DataChunk, Offer};
use otalink_services::SenderConfig;

// ══════════════════════════════════════════════════════════════════════════════
//  End-to-end transfers over a perfect link
// ══════════════════════════════════════════════════════════════════════════════

fn finish() -> Packet {
    Packet::Control(Control::Finish)
}

/// The reference exchange, packet by packet.
#[test]
fn test_single_chunk_image_commits() {
    let slot = TempSlot::new();
    let mut rx = Receiver::new(slot.sink(1 << 16));
    let image = b"hello-123";

    let offer = Packet::Offer(Offer {
        size: 9,
        digest: image_digest(image),
        version: 1,
    });
    assert_eq!(exchange(&mut rx, PUSHER, offer), Some(finish()));
    assert_eq!(rx.state(), TransferState::Receiving);
    assert!(rx.is_hashing());

    let chunk = Packet::Data(DataChunk::seal(0, image).unwrap());
    assert_eq!(
        exchange(&mut rx, PUSHER, chunk),
        Some(Packet::Ack { next_expected: 1 })
    );

    let reply = rx.handle_datagram(&PUSHER, &finish().encode()).unwrap();
    assert_eq!(reply.packet, finish());
    assert!(reply.restart, "commit must request a restart");

    assert_committed(&rx);
    assert_eq!(slot.active().as_deref(), Some(&image[..]));
    assert!(!slot.staging_exists());
}

#[test]
fn test_corrupted_chunk_is_reacked_then_accepted() {
    let slot = TempSlot::new();
    let mut rx = Receiver::new(slot.sink(1 << 16));
    let image = b"hello-123";

    exchange(
        &mut rx,
        PUSHER,
        Packet::Offer(Offer {
            size: 9,
            digest: image_digest(image),
            version: 1,
        }),
    );

    let mut bad = DataChunk::seal(0, image).unwrap();
    bad.crc16 ^= 0x0100;
    assert_eq!(
        exchange(&mut rx, PUSHER, Packet::Data(bad)),
        Some(Packet::Ack { next_expected: 0 })
    );
    assert_eq!(rx.sink().staged_bytes(), Some(0), "corrupt chunk must not be stored");

    let good = Packet::Data(DataChunk::seal(0, image).unwrap());
    assert_eq!(
        exchange(&mut rx, PUSHER, good),
        Some(Packet::Ack { next_expected: 1 })
    );
    assert_eq!(exchange(&mut rx, PUSHER, finish()), Some(finish()));
    assert_eq!(slot.active().as_deref(), Some(&image[..]));
}

#[test]
fn test_duplicate_chunk_is_not_written_twice() {
    let slot = TempSlot::new();
    let mut rx = Receiver::new(slot.sink(1 << 16));
    let image = test_image(300);

    exchange(
        &mut rx,
        PUSHER,
        Packet::Offer(Offer {
            size: 300,
            digest: image_digest(&image),
            version: 1,
        }),
    );

    let first = Packet::Data(DataChunk::seal(0, &image[..200]).unwrap());
    assert_eq!(
        exchange(&mut rx, PUSHER, first),
        Some(Packet::Ack { next_expected: 1 })
    );
    assert_eq!(
        exchange(&mut rx, PUSHER, first),
        Some(Packet::Ack { next_expected: 1 })
    );
    assert_eq!(rx.sink().staged_bytes(), Some(200));

    // Jumping ahead is refused the same way.
    let ahead = Packet::Data(DataChunk::seal(5, &image[..10]).unwrap());
    assert_eq!(
        exchange(&mut rx, PUSHER, ahead),
        Some(Packet::Ack { next_expected: 1 })
    );
    assert_eq!(rx.sink().staged_bytes(), Some(200));

    let second = Packet::Data(DataChunk::seal(1, &image[200..]).unwrap());
    assert_eq!(
        exchange(&mut rx, PUSHER, second),
        Some(Packet::Ack { next_expected: 2 })
    );
    assert_eq!(exchange(&mut rx, PUSHER, finish()), Some(finish()));
    assert_eq!(slot.active(), Some(image));
}

#[test]
fn test_multi_chunk_image_over_clean_link() {
    let slot = TempSlot::new();
    let mut rx = Receiver::new(slot.sink(1 << 20));
    let image = test_image(4 * 200 + 37);

    let mut tx = Sender::new(&image, &SenderConfig::default()).unwrap();
    assert_eq!(tx.total_chunks(), 5);

    let mut link = SimLink::new(LinkProfile::clean(), 1);
    let outcome = run_transfer(&mut tx, &mut rx, &mut link, 100);

    assert_done(&outcome, &tx);
    assert_committed(&rx);
    assert_eq!(outcome.retransmissions, 0);
    // Offer, five chunks, Finish: one round each.
    assert_eq!(outcome.rounds, 7);
    assert_eq!(slot.active(), Some(image));
}

#[test]
fn test_small_chunk_size() {
    let slot = TempSlot::new();
    let mut rx = Receiver::new(slot.sink(1 << 20));
    let image = test_image(1000);

    let config = SenderConfig {
        chunk_size: 17,
        ..SenderConfig::default()
    };
    let mut tx = Sender::new(&image, &config).unwrap();
    assert_eq!(tx.total_chunks(), 59);

    let mut link = SimLink::new(LinkProfile::clean(), 2);
    let outcome = run_transfer(&mut tx, &mut rx, &mut link, 200);

    assert_done(&outcome, &tx);
    assert_eq!(slot.active(), Some(image));
}

#[test]
fn test_empty_image_commits() {
    let slot = TempSlot::new();
    let mut rx = Receiver::new(slot.sink(1 << 20));

    let mut tx = Sender::new(&[], &SenderConfig::default()).unwrap();
    let mut link = SimLink::new(LinkProfile::clean(), 3);
    let outcome = run_transfer(&mut tx, &mut rx, &mut link, 10);

    assert_done(&outcome, &tx);
    assert_committed(&rx);
    assert_eq!(slot.active(), Some(Vec::new()));
}

#[test]
fn test_offer_version_is_informational() {
    let slot = TempSlot::new();
    let mut rx = Receiver::new(slot.sink(1 << 20));
    let image = test_image(450);

    let config = SenderConfig {
        version: 0xdead_beef,
        ..SenderConfig::default()
    };
    let mut tx = Sender::new(&image, &config).unwrap();
    let mut link = SimLink::new(LinkProfile::clean(), 4);
    let outcome = run_transfer(&mut tx, &mut rx, &mut link, 100);

    assert_done(&outcome, &tx);
    assert_eq!(slot.active(), Some(image));
}
