//! The three-phase agreement protocol (spec §4.3): `PRE-PREPARE`,
//! `PREPARE`, `COMMIT`.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};

use either::{Left, Right};

use crate::bft::communication::message::{
    ConsensusMessage, ConsensusMessageKind, Header, RequestMessage, SystemMessage,
};
use crate::bft::communication::{Node, NodeId};
use crate::bft::core::server::ViewInfo;
use crate::bft::crypto::hash::Digest;
use crate::bft::error::*;
use crate::bft::executable::{Reply, Request, Service};
use crate::bft::log::Log;
use crate::bft::ordering::{Orderable, SeqNo, View};

/// What a replica's core loop should do next, as reported by
/// `Consensus::poll`.
pub enum ConsensusPollStatus {
    /// Poll the main channel for more messages.
    Recv,
    /// If we are the leader, try proposing a pending client request;
    /// either way, poll the main channel afterwards.
    TryProposeAndRecv,
    /// A buffered consensus message is ready to be processed.
    NextMessage(Header, ConsensusMessage),
}

/// A time-buffered-ordering (tbo) queue of consensus messages that
/// arrived ahead of the instance currently being decided (spec
/// §4.1's "small bounded reorder buffer, not an asynchronous oracle").
pub struct TboQueue {
    curr_seq: SeqNo,
    get_queue: bool,
    pre_prepares: VecDeque<VecDeque<(Header, ConsensusMessage)>>,
    prepares: VecDeque<VecDeque<(Header, ConsensusMessage)>>,
    commits: VecDeque<VecDeque<(Header, ConsensusMessage)>>,
}

impl TboQueue {
    fn new(curr_seq: SeqNo) -> Self {
        Self {
            curr_seq,
            get_queue: false,
            pre_prepares: VecDeque::new(),
            prepares: VecDeque::new(),
            commits: VecDeque::new(),
        }
    }

    fn pop_message(
        tbo: &mut VecDeque<VecDeque<(Header, ConsensusMessage)>>,
    ) -> Option<(Header, ConsensusMessage)> {
        if tbo.is_empty() {
            None
        } else {
            tbo[0].pop_front()
        }
    }

    fn queue_message(
        curr_seq: SeqNo,
        tbo: &mut VecDeque<VecDeque<(Header, ConsensusMessage)>>,
        h: Header,
        m: ConsensusMessage,
    ) {
        let index = match m.sequence_number().index(curr_seq) {
            Right(i) => i,
            Left(_) => return,
        };
        if index >= tbo.len() {
            let len = index - tbo.len() + 1;
            tbo.extend(std::iter::repeat_with(VecDeque::new).take(len));
        }
        tbo[index].push_back((h, m));
    }

    fn advance_message_queue(tbo: &mut VecDeque<VecDeque<(Header, ConsensusMessage)>>) {
        if let Some(mut vec) = tbo.pop_front() {
            vec.clear();
            tbo.push_back(vec);
        }
    }

    /// Signal this queue that it may be able to extract new messages.
    pub fn signal(&mut self) {
        self.get_queue = true;
    }

    /// The sequence number currently being decided.
    pub fn sequence_number(&self) -> SeqNo {
        self.curr_seq
    }

    fn next_instance_queue(&mut self) {
        self.curr_seq = self.curr_seq.next();
        Self::advance_message_queue(&mut self.pre_prepares);
        Self::advance_message_queue(&mut self.prepares);
        Self::advance_message_queue(&mut self.commits);
    }

    /// Queues a consensus message for later processing, dropping it if
    /// it pertains to an instance we have already moved past.
    pub fn queue(&mut self, h: Header, m: ConsensusMessage) {
        match m.kind() {
            ConsensusMessageKind::PrePrepare(..) => self.queue_pre_prepare(h, m),
            ConsensusMessageKind::Prepare(_) => self.queue_prepare(h, m),
            ConsensusMessageKind::Commit(_) => self.queue_commit(h, m),
        }
    }

    fn queue_pre_prepare(&mut self, h: Header, m: ConsensusMessage) {
        Self::queue_message(self.curr_seq, &mut self.pre_prepares, h, m)
    }

    fn queue_prepare(&mut self, h: Header, m: ConsensusMessage) {
        Self::queue_message(self.curr_seq, &mut self.prepares, h, m)
    }

    fn queue_commit(&mut self, h: Header, m: ConsensusMessage) {
        Self::queue_message(self.curr_seq, &mut self.commits, h, m)
    }
}

/// The phase of the consensus instance currently being decided.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ProtoPhase {
    Init,
    PrePreparing,
    Preparing,
    Committing,
}

/// Tracks the active consensus instance, plus messages buffered ahead
/// of it.
pub struct Consensus<S: Service> {
    phase: ProtoPhase,
    tbo: TboQueue,
    current_digest: Option<Digest>,
    _phantom: std::marker::PhantomData<S>,
}

/// Outcome of processing one consensus message.
pub enum ConsensusStatus {
    /// `sender` voted twice for the same `(view, seq)` with a
    /// different digest; primary or peer equivocation.
    Equivocated(NodeId),
    /// The quorum has not yet reached a decision.
    Deciding,
    /// The quorum decided on `digest` at the current sequence number.
    Decided(Digest),
}

macro_rules! extract_msg {
    ($g:expr, $q:expr) => {
        extract_msg!({}, $g, $q)
    };
    ($opt:block, $g:expr, $q:expr) => {
        if let Some((header, message)) = TboQueue::pop_message($q) {
            $opt
            ConsensusPollStatus::NextMessage(header, message)
        } else {
            *$g = false;
            ConsensusPollStatus::Recv
        }
    };
}

impl<S> Consensus<S>
where
    S: Service + Send + 'static,
    Request<S>: Send + Clone + 'static,
    Reply<S>: Send + Clone + 'static,
{
    /// Starts a new consensus protocol tracker at `initial_seq_no`.
    pub fn new(initial_seq_no: SeqNo) -> Self {
        Self {
            phase: ProtoPhase::Init,
            tbo: TboQueue::new(initial_seq_no),
            current_digest: None,
            _phantom: std::marker::PhantomData,
        }
    }

    /// Returns the current protocol phase.
    pub fn phase(&self) -> ProtoPhase {
        self.phase
    }

    /// Proposes the pending request `(digest, header, request)`, if
    /// `node` is the leader of `view` and we are between instances
    /// (spec §4.3.1.1).
    pub fn propose(
        &mut self,
        digest: Digest,
        header: Header,
        request: RequestMessage<Request<S>>,
        view: View,
        log: &mut Log<Request<S>, Reply<S>>,
        node: &mut Node<Request<S>, Reply<S>>,
    ) {
        if self.phase != ProtoPhase::Init {
            return;
        }
        if !view.is_primary(node.id(), node.n()) {
            return;
        }
        let seq = self.sequence_number();
        self.current_digest = Some(digest);

        let message = SystemMessage::Consensus(ConsensusMessage::new(
            view,
            seq,
            ConsensusMessageKind::PrePrepare(digest, request_to_bytes(&request)),
        ));
        let targets = NodeId::targets(0..node.n() as u32).filter(|id| *id != node.id());
        node.broadcast(message, targets);

        // the primary must feed its own PRE-PREPARE to its state store
        // too (spec §4.3.1 point 3) — broadcast excludes `self`, so
        // without this the primary's own slot never gets a
        // `pre_prepare()` and it never executes what it proposes
        let _ = log.accept_pre_prepare(seq, header, request, digest);
        self.phase = ProtoPhase::Preparing;
    }

    /// Checks whether new consensus messages can be processed right
    /// now, per the tbo reorder buffer.
    pub fn poll(&mut self) -> ConsensusPollStatus {
        match self.phase {
            ProtoPhase::Init if self.tbo.get_queue => {
                extract_msg!(
                    { self.phase = ProtoPhase::PrePreparing; },
                    &mut self.tbo.get_queue,
                    &mut self.tbo.pre_prepares
                )
            }
            ProtoPhase::Init => ConsensusPollStatus::TryProposeAndRecv,
            ProtoPhase::PrePreparing if self.tbo.get_queue => {
                extract_msg!(&mut self.tbo.get_queue, &mut self.tbo.pre_prepares)
            }
            ProtoPhase::Preparing if self.tbo.get_queue => {
                extract_msg!(&mut self.tbo.get_queue, &mut self.tbo.prepares)
            }
            ProtoPhase::Committing if self.tbo.get_queue => {
                extract_msg!(&mut self.tbo.get_queue, &mut self.tbo.commits)
            }
            _ => ConsensusPollStatus::Recv,
        }
    }

    /// Moves on to the next consensus instance.
    pub fn next_instance(&mut self) {
        self.tbo.next_instance_queue();
        self.phase = ProtoPhase::Init;
        self.current_digest = None;
    }

    /// Processes one consensus message for the instance `log` is
    /// currently tracking.
    ///
    /// Quorum sizes follow spec §3: `view_info.prepare_quorum()` (`2f`)
    /// distinct `PREPARE`s move a slot to `Prepared`; `view_info.
    /// commit_quorum()` (`2f+1`) distinct `COMMIT`s move it to
    /// `CommittedLocal`. The two tallies count differently: a `PREPARE`
    /// tally only ever credits votes from *other* replicas — the
    /// primary never sends a literal `PREPARE`, its `PRE-PREPARE`
    /// stands in for its own implicit vote instead (spec §4.3.7) — so a
    /// backup's own vote is never folded into its own tally. A `COMMIT`
    /// tally, by contrast, does count the local replica's own vote the
    /// instant it is sent, since a replica can't be Byzantine to itself
    /// and its own `COMMIT` never travels back over the loopback
    /// channel.
    pub fn process_message(
        &mut self,
        header: Header,
        message: ConsensusMessage,
        view_info: ViewInfo,
        log: &mut Log<Request<S>, Reply<S>>,
        node: &mut Node<Request<S>, Reply<S>>,
    ) -> Result<ConsensusStatus> {
        let view = view_info.view();

        if message.view() < view {
            // behind our view: the sender will catch up via a view
            // change, never a reason to fail a well-formed request
            return Ok(ConsensusStatus::Deciding);
        }
        if message.view() > view {
            // ahead of our view: buffer it the same way a message
            // ahead of our sequence number is buffered, in case we are
            // about to view-change into it
            self.tbo.queue(header, message);
            return Ok(ConsensusStatus::Deciding);
        }

        let seq = message.sequence_number();
        if seq != self.sequence_number() {
            self.tbo.queue(header, message);
            return Ok(ConsensusStatus::Deciding);
        }

        match message.kind().clone() {
            ConsensusMessageKind::PrePrepare(digest, payload) => {
                if header.from() != view.primary(node.n()) {
                    return Err("PRE-PREPARE from a non-primary replica")
                        .wrapped(ErrorKind::Equivocation);
                }
                let request = request_from_bytes::<Request<S>>(&payload)?;
                if log
                    .accept_pre_prepare(seq, header.clone(), request, digest)
                    .is_err()
                {
                    return Ok(ConsensusStatus::Equivocated(header.from()));
                }
                self.current_digest = Some(digest);
                self.phase = ProtoPhase::Preparing;

                // the primary never delivers this message to itself
                // (broadcast excludes `self`, and the primary feeds its
                // own log directly from `propose`), so reaching this
                // branch at all means we are a backup
                let reply = SystemMessage::Consensus(ConsensusMessage::new(
                    view,
                    seq,
                    ConsensusMessageKind::Prepare(digest),
                ));
                let targets = NodeId::targets(0..node.n() as u32).filter(|id| *id != node.id());
                node.broadcast(reply, targets);

                // the primary's PRE-PREPARE doubles as its own implicit
                // PREPARE vote (spec §4.3.7): credit it here so a
                // backup can still reach `prepare_quorum` distinct
                // *other* senders without the primary ever sending a
                // literal PREPARE of its own
                let count = log.add_prepare(seq, header.from(), digest).unwrap_or(0);
                if count >= view_info.prepare_quorum() {
                    if let Some(status) = self.enter_commit_phase(seq, view, digest, view_info, log, node) {
                        return Ok(status);
                    }
                }
                Ok(ConsensusStatus::Deciding)
            }
            ConsensusMessageKind::Prepare(digest) => {
                let count = match log.add_prepare(seq, header.from(), digest) {
                    Ok(c) => c,
                    Err(_) => return Ok(ConsensusStatus::Equivocated(header.from())),
                };
                if count >= view_info.prepare_quorum() {
                    if let Some(status) = self.enter_commit_phase(seq, view, digest, view_info, log, node) {
                        return Ok(status);
                    }
                }
                Ok(ConsensusStatus::Deciding)
            }
            ConsensusMessageKind::Commit(digest) => {
                let count = match log.add_commit(seq, header.from(), digest) {
                    Ok(c) => c,
                    Err(_) => return Ok(ConsensusStatus::Equivocated(header.from())),
                };
                if count >= view_info.commit_quorum() {
                    log.mark_committed_local(seq);
                    self.phase = ProtoPhase::Init;
                    return Ok(ConsensusStatus::Decided(digest));
                }
                Ok(ConsensusStatus::Deciding)
            }
        }
    }

    /// Moves a slot from `Preparing` to `Committing`, broadcasting our
    /// own `COMMIT` and counting our own vote towards the commit
    /// quorum immediately. Returns `Some(Decided(..))` if that
    /// self-vote alone closed the commit quorum (possible for very
    /// small clusters), `None` otherwise.
    fn enter_commit_phase(
        &mut self,
        seq: SeqNo,
        view: View,
        digest: Digest,
        view_info: ViewInfo,
        log: &mut Log<Request<S>, Reply<S>>,
        node: &mut Node<Request<S>, Reply<S>>,
    ) -> Option<ConsensusStatus> {
        log.mark_prepared(seq);
        if self.phase != ProtoPhase::Preparing {
            return None;
        }
        self.phase = ProtoPhase::Committing;

        let commit = SystemMessage::Consensus(ConsensusMessage::new(
            view,
            seq,
            ConsensusMessageKind::Commit(digest),
        ));
        let targets = NodeId::targets(0..node.n() as u32).filter(|id| *id != node.id());
        node.broadcast(commit, targets);

        let count = log.add_commit(seq, node.id(), digest).unwrap_or(0);
        if count >= view_info.commit_quorum() {
            log.mark_committed_local(seq);
            self.phase = ProtoPhase::Init;
            return Some(ConsensusStatus::Decided(digest));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bft::crypto::hash::Digest;
    use crate::bft::crypto::signature::Signature;

    fn header(from: u32) -> Header {
        Header::new(NodeId::from(from), NodeId::from(0u32), 0, Signature::zeroed())
    }

    fn commit(seq: u32) -> ConsensusMessage {
        ConsensusMessage::new(
            View::INITIAL,
            SeqNo::from(seq),
            ConsensusMessageKind::Commit(Digest::from_data(b"x")),
        )
    }

    #[test]
    fn a_commit_ahead_of_the_current_instance_is_buffered_not_dropped() {
        let mut tbo = TboQueue::new(SeqNo::ZERO);
        // a COMMIT for seq=1 arrives while we're still deciding seq=0
        tbo.queue_commit(header(1), commit(1));
        // it must not be immediately extractable...
        assert!(TboQueue::pop_message(&mut tbo.commits).is_none());

        // ...only once we've moved on to seq=1 does it surface
        tbo.next_instance_queue();
        let (h, m) = TboQueue::pop_message(&mut tbo.commits).expect("buffered commit should surface");
        assert_eq!(h.from(), NodeId::from(1u32));
        assert_eq!(m.sequence_number(), SeqNo::from(1));
    }

    #[test]
    fn a_commit_for_a_past_instance_is_dropped() {
        let mut tbo = TboQueue::new(SeqNo::from(5));
        tbo.queue_commit(header(1), commit(1));
        assert!(TboQueue::pop_message(&mut tbo.commits).is_none());
    }
}

fn request_to_bytes<O: serde::Serialize>(request: &RequestMessage<O>) -> Vec<u8> {
    bincode::serialize(request).unwrap_or_default()
}

fn request_from_bytes<O: for<'de> serde::Deserialize<'de>>(
    bytes: &[u8],
) -> Result<RequestMessage<O>> {
    bincode::deserialize(bytes).wrapped(ErrorKind::CommunicationMessage)
}

impl<S> Deref for Consensus<S>
where
    S: Service + Send + 'static,
    Request<S>: Send + Clone + 'static,
    Reply<S>: Send + Clone + 'static,
{
    type Target = TboQueue;

    fn deref(&self) -> &TboQueue {
        &self.tbo
    }
}

impl<S> DerefMut for Consensus<S>
where
    S: Service + Send + 'static,
    Request<S>: Send + Clone + 'static,
    Reply<S>: Send + Clone + 'static,
{
    fn deref_mut(&mut self) -> &mut TboQueue {
        &mut self.tbo
    }
}

