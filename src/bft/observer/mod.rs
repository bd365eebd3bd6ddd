//! The observer surface (spec §4.5): an out-of-band, read-only (plus
//! `KillNode`) channel for inspecting or driving a running replica
//! without going through the wire protocol, used by tests and by a
//! replica's own `ObserverHandle`.

use futures::channel::oneshot;

use crate::bft::communication::channel::MessageChannelTx;
use crate::bft::communication::message::Message;
use crate::bft::communication::NodeId;
use crate::bft::core::server::ViewInfo;
use crate::bft::error::*;
use crate::bft::ordering::SeqNo;

/// A command accepted by a replica's observer channel.
pub enum ObserverCommand {
    /// Request a `StatusMessage` snapshot.
    GetStatus,
    /// Checks whether the replica process is still alive.
    Ping,
    /// Asks the replica process to exit immediately, simulating a
    /// crash fault for Byzantine/fault-injection tests (spec §9).
    KillNode,
}

/// The reply to one dispatched `ObserverCommand`. `KillNode` has no
/// variant here: the process exits before it could ever send one.
pub enum ObserverResponse {
    Status(StatusMessage),
    Pong,
}

/// A snapshot of a replica's externally visible state.
#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub id: NodeId,
    pub view: u32,
    pub leader: NodeId,
    pub n: usize,
    pub f: usize,
    pub last_executed: Option<SeqNo>,
}

impl StatusMessage {
    pub fn new(id: NodeId, view: ViewInfo, last_executed: Option<SeqNo>) -> Self {
        StatusMessage {
            id,
            view: view.view().into(),
            leader: view.leader(),
            n: view.n(),
            f: view.f(),
            last_executed,
        }
    }
}

/// A cloneable handle onto a running replica's observer channel,
/// submitted over the same loopback queue the execution layer and
/// timeout scheduler already use to reach the core event loop. The
/// observer surface is never itself subject to consensus (spec §4.5).
pub struct ObserverHandle<O, P> {
    tx: MessageChannelTx<O, P>,
}

impl<O, P> ObserverHandle<O, P> {
    pub fn new(tx: MessageChannelTx<O, P>) -> Self {
        Self { tx }
    }

    /// Submits `cmd` and awaits its response. Never resolves for
    /// `KillNode`: the replica process exits before replying, so the
    /// response channel is simply dropped.
    pub async fn submit(&mut self, cmd: ObserverCommand) -> Result<ObserverResponse> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(Message::Observer(cmd, reply_tx)).await?;
        reply_rx.await.simple(ErrorKind::Observer)
    }
}

impl<O, P> Clone for ObserverHandle<O, P> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}
