//! Scenario 4 (Byzantine primary equivocation): a primary that signs
//! two different `PRE-PREPARE`s for the same `(view, seq)` must not be
//! able to walk a backup past the first one it accepted.
//!
//! This drives `bft::log::Log` directly rather than over TCP: the
//! equivocation check happens entirely inside `accept_pre_prepare`,
//! before any `PREPARE` is ever broadcast, so this is the layer where
//! the guarantee actually lives.

mod common;

use synod::bft::communication::message::{Header, RequestMessage};
use synod::bft::communication::NodeId;
use synod::bft::crypto::hash::Digest;
use synod::bft::crypto::signature::Signature;
use synod::bft::error::ErrorKind;
use synod::bft::log::Log;
use synod::bft::ordering::SeqNo;

use common::Add;

fn header_from(id: u32) -> Header {
    Header::new(NodeId::from(id), NodeId::from(1u32), 0, Signature::zeroed())
}

#[test]
fn second_pre_prepare_for_the_same_slot_is_rejected() {
    let mut log: Log<Add, u64> = Log::new();
    let seq = SeqNo::from(0);
    let primary = header_from(0);

    let honest = RequestMessage::new(1u32.into(), 0u64.into(), Add(1));
    let honest_digest = Digest::from_data(b"honest");
    log.accept_pre_prepare(seq, primary.clone(), honest, honest_digest)
        .expect("the first PRE-PREPARE for a fresh slot is always accepted");

    let forged = RequestMessage::new(1u32.into(), 0u64.into(), Add(999));
    let forged_digest = Digest::from_data(b"forged");
    let err = log
        .accept_pre_prepare(seq, primary, forged, forged_digest)
        .expect_err("a second, conflicting PRE-PREPARE for the same slot must be rejected");
    assert_eq!(err.kind(), ErrorKind::Equivocation);
}

#[test]
fn re_sending_the_identical_pre_prepare_is_idempotent() {
    let mut log: Log<Add, u64> = Log::new();
    let seq = SeqNo::from(0);
    let primary = header_from(0);
    let digest = Digest::from_data(b"same");

    log.accept_pre_prepare(seq, primary.clone(), RequestMessage::new(1u32.into(), 0u64.into(), Add(1)), digest)
        .unwrap();
    // a retransmission of the exact same PRE-PREPARE (network
    // duplication, not equivocation) must not be rejected
    log.accept_pre_prepare(seq, primary, RequestMessage::new(1u32.into(), 0u64.into(), Add(1)), digest)
        .expect("an identical retransmission is not equivocation");
}

#[test]
fn a_prepare_disagreeing_with_the_accepted_digest_is_rejected() {
    let mut log: Log<Add, u64> = Log::new();
    let seq = SeqNo::from(0);
    let primary = header_from(0);
    let accepted_digest = Digest::from_data(b"accepted");

    log.accept_pre_prepare(
        seq,
        primary,
        RequestMessage::new(1u32.into(), 0u64.into(), Add(1)),
        accepted_digest,
    )
    .unwrap();

    // a byzantine backup tries to vote PREPARE for a digest that was
    // never pre-prepared
    let other_digest = Digest::from_data(b"other");
    let err = log
        .add_prepare(seq, NodeId::from(2u32), other_digest)
        .expect_err("a PREPARE for an unaccepted digest must be rejected");
    assert_eq!(err.kind(), ErrorKind::Equivocation);

    // the honest digest still collects votes normally
    let count = log
        .add_prepare(seq, NodeId::from(2u32), accepted_digest)
        .expect("a PREPARE matching the accepted digest is never equivocation");
    assert_eq!(count, 1);
}

#[test]
fn a_commit_disagreeing_with_the_accepted_digest_is_rejected() {
    let mut log: Log<Add, u64> = Log::new();
    let seq = SeqNo::from(0);
    let primary = header_from(0);
    let accepted_digest = Digest::from_data(b"accepted");

    log.accept_pre_prepare(
        seq,
        primary,
        RequestMessage::new(1u32.into(), 0u64.into(), Add(1)),
        accepted_digest,
    )
    .unwrap();

    let other_digest = Digest::from_data(b"other");
    let err = log
        .add_commit(seq, NodeId::from(2u32), other_digest)
        .expect_err("a COMMIT for an unaccepted digest must be rejected");
    assert_eq!(err.kind(), ErrorKind::Equivocation);
}
