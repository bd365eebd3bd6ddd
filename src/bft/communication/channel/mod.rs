//! A thin wrapper around the channel implementation backing a
//! replica's inbound event queue (spec §5: "one worker thread draining
//! an inbound event queue ... plus independent I/O workers that only
//! enqueue").

use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};

use crate::bft::communication::message::Message;
use crate::bft::error::*;

/// The sending half of a replica's message channel.
pub struct MessageChannelTx<O, P> {
    inner: mpsc::Sender<Message<O, P>>,
}

/// The receiving half of a replica's message channel.
pub struct MessageChannelRx<O, P> {
    inner: mpsc::Receiver<Message<O, P>>,
}

/// Creates a new bounded message channel, with capacity for `bound`
/// in-flight messages.
pub fn new_message_channel<O, P>(bound: usize) -> (MessageChannelTx<O, P>, MessageChannelRx<O, P>) {
    let (tx, rx) = mpsc::channel(bound);
    (MessageChannelTx { inner: tx }, MessageChannelRx { inner: rx })
}

impl<O, P> MessageChannelTx<O, P> {
    /// Enqueues a message, blocking cooperatively if the channel is
    /// currently full (spec §5: "transport send (bounded queue, may
    /// block if full)").
    pub async fn send(&mut self, message: Message<O, P>) -> Result<()> {
        self.inner.send(message).await.simple(ErrorKind::Communication)
    }
}

impl<O, P> Clone for MessageChannelTx<O, P> {
    fn clone(&self) -> Self {
        MessageChannelTx {
            inner: self.inner.clone(),
        }
    }
}

impl<O, P> MessageChannelRx<O, P> {
    /// Cooperatively blocks until the next message is available, or
    /// the channel is closed (spec §5: "transport receive
    /// (cooperatively blocks until next message)").
    pub async fn recv(&mut self) -> Result<Message<O, P>> {
        self.inner.next().await.ok_or(()).simple(ErrorKind::Communication)
    }
}
