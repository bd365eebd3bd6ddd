//! The replica's log: pending client requests awaiting a sequence
//! number, and the per-`(seq)` consensus slots tracking each request's
//! progress through the three-phase protocol (spec §4.2, §4.3).

use crate::bft::collections::{self, HashMap, HashSet, OrderedMap};
use crate::bft::communication::message::{ClientId, Header, ReplyMessage, RequestMessage, Timestamp};
use crate::bft::communication::NodeId;
use crate::bft::crypto::hash::Digest;
use crate::bft::error::*;
use crate::bft::ordering::SeqNo;

/// Checkpoint period: informational only in this simulator, since
/// persistent/durable logs and state transfer are out of scope (spec
/// §1 Non-goals), but still used to size the decided-operations
/// history and by `SeqNo`'s time-buffered-queue windowing.
pub const PERIOD: u32 = 1000;

/// Contains a system message as well as its respective header.
#[derive(Debug, Clone)]
pub struct StoredMessage<M> {
    header: Header,
    message: M,
}

impl<M> StoredMessage<M> {
    pub fn new(header: Header, message: M) -> Self {
        Self { header, message }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn message(&self) -> &M {
        &self.message
    }

    pub fn into_inner(self) -> (Header, M) {
        (self.header, self.message)
    }
}

/// The three-phase progress of a single consensus slot (spec §4.3.6's
/// state machine: `empty -> pre-prepared -> prepared -> committed-local
/// -> executed`).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Phase {
    Empty,
    PrePrepared,
    Prepared,
    CommittedLocal,
    Executed,
}

/// Tracks one `(seq)` consensus slot: the accepted `PRE-PREPARE` and
/// the distinct senders who have issued a matching `PREPARE`/`COMMIT`.
///
/// Senders are tracked as a set, not a count, specifically so that a
/// replica that sends two `PREPARE`s for the same slot is not counted
/// twice towards the quorum (spec §9's double-counting invariant).
pub struct Slot<O> {
    pre_prepare: Option<StoredMessage<RequestMessage<O>>>,
    digest: Option<Digest>,
    prepares: HashSet<NodeId>,
    commits: HashSet<NodeId>,
    phase: Phase,
}

impl<O> Slot<O> {
    fn empty() -> Self {
        Slot {
            pre_prepare: None,
            digest: None,
            prepares: collections::hash_set(),
            commits: collections::hash_set(),
            phase: Phase::Empty,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn digest(&self) -> Option<Digest> {
        self.digest
    }

    pub fn pre_prepare(&self) -> Option<&StoredMessage<RequestMessage<O>>> {
        self.pre_prepare.as_ref()
    }

    /// Number of distinct replicas that have sent a matching `PREPARE`.
    pub fn prepare_count(&self) -> usize {
        self.prepares.len()
    }

    /// Number of distinct replicas that have sent a matching `COMMIT`.
    pub fn commit_count(&self) -> usize {
        self.commits.len()
    }
}

/// The request/consensus log for a single replica.
///
/// `S` checkpoints and CST-based recovery are explicitly out of scope
/// (spec §1 Non-goals: no dynamic membership, no persistent durable
/// log across restarts), so unlike the log this crate started from,
/// there is no checkpoint/application-state machinery here: only the
/// bookkeeping the three-phase protocol and the client-facing
/// at-most-once guarantee actually need.
pub struct Log<O, P> {
    pending: OrderedMap<Digest, StoredMessage<RequestMessage<O>>>,
    slots: HashMap<SeqNo, Slot<O>>,
    decided: Vec<O>,
    /// Cached replies keyed by `(client, client_ts)`, used to answer a
    /// client's resubmitted request without redoing state-machine work
    /// (spec §4.3.7 "Client reply caching").
    reply_cache: HashMap<(ClientId, Timestamp), ReplyMessage<P>>,
}

impl<O, P> Log<O, P>
where
    O: Clone,
{
    pub fn new() -> Self {
        Self {
            pending: collections::ordered_map(),
            slots: collections::hash_map(),
            decided: Vec::new(),
            reply_cache: collections::hash_map(),
        }
    }

    /// Enqueues a client request that has not yet been assigned a
    /// sequence number, keyed by the digest of its signed header.
    ///
    /// Returns `false` if an identical request (same digest) is
    /// already pending or has already been decided, so the caller can
    /// avoid redundant forwarding (spec §4.3.1.2).
    pub fn enqueue_request(&mut self, header: Header, message: RequestMessage<O>) -> bool {
        let digest = header.unique_digest();
        if self.pending.contains_key(&digest) {
            return false;
        }
        self.pending.insert(digest, StoredMessage::new(header, message));
        true
    }

    /// Whether a request digest is pending or already assigned to a
    /// slot (used to detect duplicate client submissions, spec §4.2).
    pub fn has_request(&self, digest: &Digest) -> bool {
        self.pending.contains_key(digest)
    }

    /// Pops the oldest pending request, if the primary has one ready
    /// to propose (spec §4.2's FIFO forwarding order).
    pub fn next_pending(&mut self) -> Option<(Digest, StoredMessage<RequestMessage<O>>)> {
        self.pending.pop_front()
    }

    fn slot_mut(&mut self, seq: SeqNo) -> &mut Slot<O> {
        self.slots.entry(seq).or_insert_with(Slot::empty)
    }

    /// Returns the slot for `seq`, if one has been created.
    pub fn slot(&self, seq: SeqNo) -> Option<&Slot<O>> {
        self.slots.get(&seq)
    }

    /// Accepts a `PRE-PREPARE` for `seq`, carrying `digest` and the
    /// original client request.
    ///
    /// If a different `PRE-PREPARE` (different digest) was already
    /// accepted for the same `(view, seq)`, this is primary
    /// equivocation and the call returns
    /// `Err(ErrorKind::Equivocation)` instead of silently overwriting
    /// the slot (spec §4.3.6, §9 "Equivocating primary").
    pub fn accept_pre_prepare(
        &mut self,
        seq: SeqNo,
        header: Header,
        request: RequestMessage<O>,
        digest: Digest,
    ) -> Result<()> {
        let slot = self.slot_mut(seq);
        match slot.digest {
            Some(existing) if existing != digest => {
                return Err("Primary sent conflicting PRE-PREPAREs for the same slot")
                    .wrapped(ErrorKind::Equivocation);
            }
            Some(_) => return Ok(()),
            None => {}
        }
        slot.digest = Some(digest);
        slot.pre_prepare = Some(StoredMessage::new(header, request));
        slot.phase = Phase::PrePrepared;
        Ok(())
    }

    /// Records a `PREPARE` from `sender` for `seq` matching `digest`.
    ///
    /// Returns the distinct-sender prepare count after insertion, or
    /// `Err` if `sender` already voted for a different digest on this
    /// slot (treated the same as equivocation: distinct digests for
    /// the same `(view, seq)` from any quorum member are never both
    /// accepted).
    pub fn add_prepare(&mut self, seq: SeqNo, sender: NodeId, digest: Digest) -> Result<usize> {
        let slot = self.slot_mut(seq);
        if let Some(existing) = slot.digest {
            if existing != digest {
                return Err("PREPARE digest does not match the accepted PRE-PREPARE")
                    .wrapped(ErrorKind::Equivocation);
            }
        } else {
            slot.digest = Some(digest);
        }
        slot.prepares.insert(sender);
        Ok(slot.prepares.len())
    }

    /// Records a `COMMIT` from `sender` for `seq` matching `digest`.
    /// Mirrors `add_prepare`'s equivocation handling.
    pub fn add_commit(&mut self, seq: SeqNo, sender: NodeId, digest: Digest) -> Result<usize> {
        let slot = self.slot_mut(seq);
        if let Some(existing) = slot.digest {
            if existing != digest {
                return Err("COMMIT digest does not match the accepted PRE-PREPARE")
                    .wrapped(ErrorKind::Equivocation);
            }
        } else {
            slot.digest = Some(digest);
        }
        slot.commits.insert(sender);
        Ok(slot.commits.len())
    }

    /// Marks slot `seq` as `Prepared` (2f matching `PREPARE`s
    /// collected, spec §4.3.6).
    pub fn mark_prepared(&mut self, seq: SeqNo) {
        let slot = self.slot_mut(seq);
        if slot.phase == Phase::PrePrepared {
            slot.phase = Phase::Prepared;
        }
    }

    /// Marks slot `seq` as `CommittedLocal` (2f+1 matching `COMMIT`s
    /// collected, spec §4.3.6).
    pub fn mark_committed_local(&mut self, seq: SeqNo) {
        let slot = self.slot_mut(seq);
        if slot.phase == Phase::Prepared {
            slot.phase = Phase::CommittedLocal;
        }
    }

    /// Marks `seq` as executed, recording the applied operation in
    /// execution order, and caches the reply for at-most-once
    /// semantics.
    ///
    /// Precondition (spec §4.3.6's out-of-order execute invariant):
    /// slots below `seq` must already be `Executed`, which callers
    /// enforce by draining slots strictly in sequence order.
    pub fn mark_executed(&mut self, seq: SeqNo, reply: ReplyMessage<P>) {
        if let Some(slot) = self.slots.get_mut(&seq) {
            if let Some(stored) = &slot.pre_prepare {
                self.decided.push(stored.message().operation().clone());
            }
            slot.phase = Phase::Executed;
        }
        self.reply_cache
            .insert((reply.client_id(), reply.client_ts()), reply);
    }

    /// Returns the cached reply for `(client_id, ts)`, if this request
    /// has already been executed (spec §4.3.7).
    pub fn cached_reply(&self, client_id: ClientId, ts: Timestamp) -> Option<&ReplyMessage<P>> {
        self.reply_cache.get(&(client_id, ts))
    }

    /// The sequence of operations executed so far, in commit order.
    pub fn decided(&self) -> &[O] {
        &self.decided[..]
    }
}

impl<O> Slot<O> {
    /// The `PrePrepare`/`Prepare`/`Commit` message kind this slot
    /// would currently expect next, for logging/diagnostics only.
    pub fn expected_kind_label(&self) -> &'static str {
        match self.phase {
            Phase::Empty => "PRE-PREPARE",
            Phase::PrePrepared => "PREPARE",
            Phase::Prepared => "COMMIT",
            Phase::CommittedLocal | Phase::Executed => "none",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bft::communication::message::{ClientId as Cid, RequestMessage, Timestamp as Ts};
    use crate::bft::crypto::signature::Signature;

    fn header(from: u32, to: u32) -> Header {
        Header::new(NodeId::from(from), NodeId::from(to), 0, Signature::zeroed())
    }

    #[test]
    fn equivocating_pre_prepare_is_rejected() {
        let mut log: Log<Vec<u8>, Vec<u8>> = Log::new();
        let seq = SeqNo::ZERO;
        let req = RequestMessage::new(Cid::from(1), Ts::from(1), vec![1]);
        let d1 = Digest::from_data(b"one");
        let d2 = Digest::from_data(b"two");

        log.accept_pre_prepare(seq, header(0, 1), req.clone(), d1)
            .unwrap();
        let err = log.accept_pre_prepare(seq, header(0, 1), req, d2);
        assert_eq!(err.unwrap_err().kind(), ErrorKind::Equivocation);
    }

    #[test]
    fn prepare_quorum_counts_distinct_senders_only() {
        let mut log: Log<Vec<u8>, Vec<u8>> = Log::new();
        let seq = SeqNo::ZERO;
        let d = Digest::from_data(b"req");

        log.add_prepare(seq, NodeId::from(1u32), d).unwrap();
        let count = log.add_prepare(seq, NodeId::from(1u32), d).unwrap();
        assert_eq!(count, 1, "repeated PREPARE from the same sender must not double-count");

        let count = log.add_prepare(seq, NodeId::from(2u32), d).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn cached_reply_round_trips() {
        let mut log: Log<Vec<u8>, Vec<u8>> = Log::new();
        let reply = ReplyMessage::new(Cid::from(7), Ts::from(3), NodeId::from(0u32), vec![9]);
        log.mark_executed(SeqNo::ZERO, reply);
        let cached = log.cached_reply(Cid::from(7), Ts::from(3));
        assert!(cached.is_some());
        assert_eq!(cached.unwrap().result(), &vec![9]);
    }
}
