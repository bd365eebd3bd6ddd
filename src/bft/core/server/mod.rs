//! The `Replica`: ties together the transport, log, consensus engine,
//! execution layer and timeout scheduler into the single event loop
//! spec §5 describes.

use futures::channel::oneshot;

use crate::bft::communication::message::{
    ConsensusMessage, Header, Message, RequestMessage, SystemMessage,
};
use crate::bft::communication::{Node, NodeConfig, NodeId};
use crate::bft::config::ClusterConfig;
use crate::bft::consensus::{Consensus, ConsensusPollStatus, ConsensusStatus};
use crate::bft::executable::{Executor, ExecutorHandle, Reply, Request, Service};
use crate::bft::error::*;
use crate::bft::log::Log;
use crate::bft::observer::{ObserverCommand, ObserverHandle, ObserverResponse, StatusMessage};
use crate::bft::ordering::{Orderable, SeqNo, View};
use crate::bft::sync::Synchronizer;
use crate::bft::timeouts::{TimeoutKind, Timeouts};

/// A read-only snapshot of the view a replica is operating under,
/// handed out to the observer surface (spec §4.5 `GetStatus`).
#[derive(Debug, Copy, Clone)]
pub struct ViewInfo {
    view: View,
    n: usize,
    f: usize,
}

impl ViewInfo {
    pub fn new(view: View, n: usize, f: usize) -> Self {
        Self { view, n, f }
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn leader(&self) -> NodeId {
        self.view.primary(self.n)
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn f(&self) -> usize {
        self.f
    }

    /// Distinct `PREPARE`s required to move a slot to `Prepared`.
    pub fn prepare_quorum(&self) -> usize {
        2 * self.f
    }

    /// Distinct `COMMIT`s required to move a slot to `CommittedLocal`.
    pub fn commit_quorum(&self) -> usize {
        2 * self.f + 1
    }
}

/// The replicated state machine process (spec §4).
pub struct Replica<S: Service> {
    id: NodeId,
    f: usize,
    client_timeout: std::time::Duration,
    node: Node<Request<S>, Reply<S>>,
    log: Log<Request<S>, Reply<S>>,
    consensus: Consensus<S>,
    sync: Synchronizer,
    executor: ExecutorHandle<S>,
    timeouts: Timeouts<Request<S>, Reply<S>>,
    last_executed: Option<SeqNo>,
}

impl<S> Replica<S>
where
    S: Service + Send + 'static,
    Request<S>: Send + Clone + 'static,
    Reply<S>: Send + Clone + 'static,
{
    /// Bootstraps a fresh replica from `cfg`, running `service` as the
    /// replicated state machine.
    pub async fn bootstrap(cfg: ClusterConfig, service: S) -> Result<Self> {
        cfg.validate()?;

        let id = cfg.id;
        let f = cfg.f;
        let n = cfg.n();
        let client_timeout = cfg.client_timeout;

        let node = Node::bootstrap(NodeConfig {
            f,
            id,
            addrs: cfg.addrs,
            pk: cfg.pk,
            sk: cfg.sk,
        })
        .await?;

        let exec_tx = node.loopback_tx();
        let executor = Executor::new(id, exec_tx.clone(), service)?;
        let timeouts = Timeouts::new(exec_tx);

        tracing::info!(replica = %id, n, f, "replica ready");

        Ok(Replica {
            id,
            f,
            client_timeout,
            node,
            log: Log::new(),
            consensus: Consensus::new(SeqNo::ZERO),
            sync: Synchronizer::new(n),
            executor,
            timeouts,
            last_executed: None,
        })
    }

    /// Exposes the current view, for the observer surface.
    pub fn view_info(&self) -> ViewInfo {
        ViewInfo::new(self.sync.view(), self.node.n(), self.f)
    }

    /// A cloneable handle a test harness or CLI subcommand can use to
    /// query or drive this replica without going through the wire
    /// protocol (spec §4.5).
    pub fn observer_handle(&self) -> ObserverHandle<Request<S>, Reply<S>> {
        ObserverHandle::new(self.node.loopback_tx())
    }

    /// Runs the replica's event loop forever, or until a fatal
    /// invariant violation is observed (spec §6 exit code 3).
    pub async fn run(mut self) -> Result<()> {
        loop {
            match self.consensus.poll() {
                ConsensusPollStatus::Recv => {
                    let message = self.node.receive().await?;
                    self.process_message(message)?;
                }
                ConsensusPollStatus::TryProposeAndRecv => {
                    self.try_propose();
                    let message = self.node.receive().await?;
                    self.process_message(message)?;
                }
                ConsensusPollStatus::NextMessage(header, message) => {
                    self.process_consensus(header, message)?;
                }
            }
        }
    }

    fn try_propose(&mut self) {
        if !self.sync.view().is_primary(self.id, self.node.n()) {
            return;
        }
        if let Some((digest, stored)) = self.log.next_pending() {
            let (header, request) = stored.into_inner();
            self.consensus.propose(
                digest,
                header,
                request,
                self.sync.view(),
                &mut self.log,
                &mut self.node,
            );
        }
    }

    fn process_message(&mut self, message: Message<Request<S>, Reply<S>>) -> Result<()> {
        match message {
            Message::System(header, sysmsg) => self.process_system(header, sysmsg)?,
            Message::ConnectedRx(peer) | Message::ConnectedTx(peer) => {
                tracing::debug!(peer = %peer, "connection established");
            }
            Message::Timeout(kind) => self.process_timeout(kind),
            Message::Error(peer, e) => {
                tracing::warn!(peer = %peer, error = %e, "transport error");
            }
            Message::ExecutionFinished(origin, seq, reply) => {
                self.log.mark_executed(seq, reply.clone());
                self.last_executed = Some(seq);
                self.node.send(SystemMessage::Reply(reply), origin);
            }
            Message::Observer(cmd, reply_tx) => self.process_observer(cmd, reply_tx),
        }
        Ok(())
    }

    fn process_observer(&mut self, cmd: ObserverCommand, reply_tx: oneshot::Sender<ObserverResponse>) {
        match cmd {
            ObserverCommand::GetStatus => {
                let status = StatusMessage::new(self.id, self.view_info(), self.last_executed);
                let _ = reply_tx.send(ObserverResponse::Status(status));
            }
            ObserverCommand::Ping => {
                let _ = reply_tx.send(ObserverResponse::Pong);
            }
            ObserverCommand::KillNode => {
                tracing::warn!(replica = %self.id, "observer requested immediate termination");
                std::process::exit(0);
            }
        }
    }

    fn process_system(
        &mut self,
        header: Header,
        message: SystemMessage<Request<S>, Reply<S>>,
    ) -> Result<()> {
        match message {
            SystemMessage::Request(req) => self.process_request(header, req),
            SystemMessage::Consensus(cm) => {
                self.consensus.queue(header, cm);
                self.consensus.signal();
                Ok(())
            }
            // replicas never need to act on a REPLY; only a client
            // would (out of scope for the replica event loop).
            SystemMessage::Reply(_) => Ok(()),
        }
    }

    fn process_request(&mut self, header: Header, req: RequestMessage<Request<S>>) -> Result<()> {
        let client_id = req.client_id();
        let ts = req.client_ts();

        if let Some(cached) = self.log.cached_reply(client_id, ts) {
            let target = client_node_id(client_id);
            self.node.send(SystemMessage::Reply(cached.clone()), target);
            return Ok(());
        }

        if !self.log.enqueue_request(header.clone(), req.clone()) {
            // already pending, nothing further to do
            return Ok(());
        }

        if !self.sync.view().is_primary(self.id, self.node.n()) && !req.is_forwarded() {
            let leader = self.sync.view().primary(self.node.n());
            self.node.send(SystemMessage::Request(req.into_forwarded()), leader);
            self.timeouts
                .timeout(self.client_timeout, TimeoutKind::ClientRequest(client_id, ts));
        }
        Ok(())
    }

    fn process_consensus(&mut self, header: Header, message: ConsensusMessage) -> Result<()> {
        let seq = message.sequence_number();
        let status = self.consensus.process_message(
            header,
            message,
            self.view_info(),
            &mut self.log,
            &mut self.node,
        )?;

        match status {
            ConsensusStatus::Decided(_digest) => {
                if let Some(slot) = self.log.slot(seq) {
                    if let Some(stored) = slot.pre_prepare() {
                        let request = stored.message().clone();
                        let (client_id, client_ts, operation) = request.into_inner();
                        let origin = client_node_id(client_id);
                        self.executor
                            .queue_update(origin, seq, client_id, client_ts, operation)?;
                    }
                }
                self.consensus.next_instance();
            }
            ConsensusStatus::Equivocated(sender) => {
                tracing::error!(sender = %sender, seq = ?seq, "equivocation detected, dropping slot");
            }
            ConsensusStatus::Deciding => {}
        }
        Ok(())
    }

    fn process_timeout(&mut self, kind: TimeoutKind) {
        match kind {
            TimeoutKind::ClientRequest(client_id, ts) => {
                tracing::debug!(client = ?client_id, ts = ?ts, "client request timeout fired");
            }
            TimeoutKind::ReplicaProgress(seq) => {
                tracing::debug!(seq = ?seq, "replica progress timeout fired");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_quorum_is_exactly_2f() {
        let info = ViewInfo::new(View::INITIAL, 4, 1);
        assert_eq!(info.prepare_quorum(), 2);

        let info = ViewInfo::new(View::INITIAL, 7, 2);
        assert_eq!(info.prepare_quorum(), 4);
    }

    #[test]
    fn commit_quorum_is_exactly_2f_plus_1() {
        let info = ViewInfo::new(View::INITIAL, 4, 1);
        assert_eq!(info.commit_quorum(), 3);

        let info = ViewInfo::new(View::INITIAL, 7, 2);
        assert_eq!(info.commit_quorum(), 5);
    }

    #[test]
    fn leader_follows_view_primary_rule() {
        let info = ViewInfo::new(View::from(1), 4, 1);
        assert_eq!(info.leader(), NodeId::from(1u32));
    }
}

/// Maps a `ClientId` onto the `NodeId` space used for wire routing.
///
/// Clients are processes in the same id space as replicas (spec §3);
/// this simulator keeps the mapping trivial (`ClientId(k)` routes to
/// `NodeId(k)`) rather than maintaining a second address table.
fn client_node_id(client_id: crate::bft::communication::message::ClientId) -> NodeId {
    NodeId::from(u32::from(client_id))
}
