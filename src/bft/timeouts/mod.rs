//! Timeout scheduling (spec §5/§6: `client_timeout_ms`,
//! `replica_progress_timeout_ms`).
//!
//! A `Timeouts` handle arms a delay on the async runtime; when it
//! elapses, a `Message::Timeout` is pushed onto the owning replica's
//! event queue, exactly like any other event (spec §5: "timeouts are
//! just another event source feeding the same queue").

use std::time::Duration;

use crate::bft::async_runtime as rt;
use crate::bft::communication::channel::MessageChannelTx;
use crate::bft::communication::message::{ClientId, Message, Timestamp};
use crate::bft::ordering::SeqNo;

/// Identifies what a fired timeout was waiting on.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TimeoutKind {
    /// A client's request at `(client_id, client_ts)` has not been
    /// replied to within `client_timeout_ms` (spec §6); the client
    /// should resubmit, broadcasting to every replica.
    ClientRequest(ClientId, Timestamp),
    /// No progress (no new sequence number committed) has been
    /// observed for `replica_progress_timeout_ms`; a full
    /// implementation would use this to trigger a view change
    /// (spec §9's declared extension point, see `bft::sync`).
    ReplicaProgress(SeqNo),
}

/// A handle used to arm timeouts that deliver onto a replica's (or
/// client's) own event queue.
pub struct Timeouts<O, P> {
    tx: MessageChannelTx<O, P>,
}

impl<O, P> Timeouts<O, P>
where
    O: Send + 'static,
    P: Send + 'static,
{
    pub fn new(tx: MessageChannelTx<O, P>) -> Self {
        Self { tx }
    }

    /// Arms a timeout of `duration`, delivering `kind` onto the event
    /// queue if it is not cancelled first.
    ///
    /// There is no cancellation handle in this simulator: the
    /// protocol engine treats a stale timeout as a no-op once it
    /// observes the condition it was guarding against no longer
    /// holds (spec §5).
    pub fn timeout(&self, duration: Duration, kind: TimeoutKind) {
        let mut tx = self.tx.clone();
        rt::spawn(async move {
            futures_timer::Delay::new(duration).await;
            tx.send(Message::Timeout(kind)).await.unwrap_or(());
        });
    }
}

impl<O, P> Clone for Timeouts<O, P> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}
