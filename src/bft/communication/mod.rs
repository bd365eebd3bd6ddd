//! The transport adapter (spec §4.4): reliable, ordered, authenticated
//! point-to-point delivery between replica ids, plus the wire message
//! formats it ships (spec §3).

#[cfg(not(feature = "expose_impl"))]
mod socket;

#[cfg(feature = "expose_impl")]
pub mod socket;

pub mod channel;
pub mod message;
pub mod serialize;

#[cfg(feature = "serialize_serde")]
use serde::{Deserialize, Serialize};

use std::collections::HashMap as StdHashMap;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;

use crate::bft::async_runtime as rt;
use crate::bft::collections::HashMap;
use crate::bft::communication::channel::{new_message_channel, MessageChannelRx, MessageChannelTx};
use crate::bft::communication::message::{Header, Message, SystemMessage, WireMessage};
use crate::bft::communication::socket::{Listener, Socket};
use crate::bft::crypto::signature::{Authenticator, KeyPair, PublicKey};
use crate::bft::error::*;

/// A peer's outbound write channel: a full-duplex socket for peers we
/// dialed ourselves, or just the write half of a socket that peer
/// dialed us on (a client never appears in `NodeConfig::addrs`, so we
/// never dial one back; its accepted connection is the only path a
/// reply can travel).
enum PeerSocket {
    Full(Socket),
    WriteHalf(OwnedWriteHalf),
}

impl AsyncWrite for PeerSocket {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            PeerSocket::Full(s) => Pin::new(s).poll_write(cx, buf),
            PeerSocket::WriteHalf(w) => Pin::new(w).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            PeerSocket::Full(s) => Pin::new(s).poll_flush(cx),
            PeerSocket::WriteHalf(w) => Pin::new(w).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            PeerSocket::Full(s) => Pin::new(s).poll_shutdown(cx),
            PeerSocket::WriteHalf(w) => Pin::new(w).poll_shutdown(cx),
        }
    }
}


/// A `NodeId` represents the id of a process in the BFT system: a
/// client or a replica (spec §3 "Replica identity": `id in [0, n)`).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// Returns an iterator of `NodeId`s spanning `into_iterator`.
    pub fn targets<I>(into_iterator: I) -> impl Iterator<Item = Self>
    where
        I: IntoIterator<Item = u32>,
    {
        into_iterator.into_iter().map(Self)
    }
}

impl From<u32> for NodeId {
    #[inline]
    fn from(id: u32) -> NodeId {
        NodeId(id)
    }
}

impl From<NodeId> for usize {
    #[inline]
    fn from(id: NodeId) -> usize {
        id.0 as usize
    }
}

impl From<NodeId> for u32 {
    #[inline]
    fn from(id: NodeId) -> u32 {
        id.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Represents a configuration used to bootstrap a `Node`.
pub struct NodeConfig {
    /// The number of replicas allowed to fail in the system
    /// (spec §3: `n = 3f + 1`).
    pub f: usize,
    /// The id of this `Node`.
    pub id: NodeId,
    /// The addresses of all replicas in the system (static
    /// membership, spec §3).
    pub addrs: StdHashMap<NodeId, SocketAddr>,
    /// The public keys of every replica in the system.
    pub pk: HashMap<NodeId, PublicKey>,
    /// This replica's secret key.
    pub sk: KeyPair,
}

/// A `Node` contains handles to other processes in the system, and is
/// the transport adapter (spec §4.4) used in the wire communication
/// between processes.
///
/// It exposes exactly the contract spec §4.4 asks for: `send`
/// (non-blocking, enqueues), `receive` (blocks cooperatively),
/// `peer_up` (liveness probe used by quorum bookkeeping elsewhere, not
/// by the transport itself, which tolerates missing peers).
pub struct Node<O, P> {
    id: NodeId,
    n: usize,
    authenticator: Arc<Authenticator>,
    my_tx: MessageChannelTx<O, P>,
    my_rx: MessageChannelRx<O, P>,
    peer_addrs: StdHashMap<NodeId, SocketAddr>,
    peer_tx: Arc<RwLock<StdHashMap<NodeId, tokio::sync::Mutex<PeerSocket>>>>,
}

impl<O, P> Node<O, P>
where
    O: Send + 'static,
    P: Send + 'static,
{
    // max no. of messages allowed in the inbound channel
    const CHAN_BOUND: usize = 128;

    /// Bootstrap a `Node`, i.e. create connections between itself and
    /// its peer nodes.
    pub async fn bootstrap(cfg: NodeConfig) -> Result<Self>
    where
        O: serde::Serialize + for<'de> serde::Deserialize<'de>,
        P: serde::Serialize + for<'de> serde::Deserialize<'de>,
    {
        let id = cfg.id;
        let n = cfg.addrs.len();

        if n < 3 * cfg.f + 1 {
            return Err("Invalid number of replicas: n must be >= 3f+1")
                .wrapped(ErrorKind::Config);
        }
        if usize::from(id) >= n {
            return Err("Invalid node id").wrapped(ErrorKind::Config);
        }

        let listener = socket::bind(cfg.addrs[&id]).await?;

        let (tx, rx) = new_message_channel::<O, P>(Self::CHAN_BOUND);
        let authenticator = Arc::new(Authenticator::new(id, cfg.sk, cfg.pk));

        let peer_tx = Arc::new(RwLock::new(StdHashMap::new()));

        rt::spawn(Self::rx_side_accept(
            id,
            listener,
            tx.clone(),
            authenticator.clone(),
            peer_tx.clone(),
        ));

        Self::tx_side_connect(id, tx.clone(), &cfg.addrs, peer_tx.clone());

        tracing::info!(replica = %id, n, "replica bootstrapped");

        Ok(Node {
            id,
            n,
            authenticator,
            my_tx: tx,
            my_rx: rx,
            peer_addrs: cfg.addrs,
            peer_tx,
        })
    }

    /// This replica's own id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The total number of replicas in the cluster.
    pub fn n(&self) -> usize {
        self.n
    }

    #[inline]
    fn tx_side_connect(
        my_id: NodeId,
        tx: MessageChannelTx<O, P>,
        addrs: &StdHashMap<NodeId, SocketAddr>,
        peer_tx: Arc<RwLock<StdHashMap<NodeId, tokio::sync::Mutex<PeerSocket>>>>,
    ) {
        for (&peer_id, &addr) in addrs.iter() {
            if peer_id == my_id {
                continue;
            }
            let tx = tx.clone();
            let peer_tx = peer_tx.clone();
            rt::spawn(Self::tx_side_connect_task(my_id, peer_id, addr, tx, peer_tx));
        }
    }

    async fn tx_side_connect_task(
        my_id: NodeId,
        peer_id: NodeId,
        addr: SocketAddr,
        mut tx: MessageChannelTx<O, P>,
        peer_tx: Arc<RwLock<StdHashMap<NodeId, tokio::sync::Mutex<PeerSocket>>>>,
    ) {
        const RETRY: usize = 10;
        for _ in 0..RETRY {
            if let Ok(mut sock) = socket::connect(addr).await {
                // identify ourselves to the peer
                let mut buf = Vec::new();
                buf.extend_from_slice(&u32::from(my_id).to_le_bytes());
                if sock.write_all(&buf[..]).await.is_err() {
                    return;
                }
                peer_tx
                    .write()
                    .insert(peer_id, tokio::sync::Mutex::new(PeerSocket::Full(sock)));
                tx.send(Message::ConnectedTx(peer_id)).await.unwrap_or(());
                return;
            }
            futures_timer::Delay::new(std::time::Duration::from_secs(1)).await;
        }
        let e = Error::simple(ErrorKind::TransportTransient);
        tx.send(Message::Error(peer_id, e)).await.unwrap_or(());
    }

    async fn rx_side_accept(
        my_id: NodeId,
        listener: Listener,
        tx: MessageChannelTx<O, P>,
        authenticator: Arc<Authenticator>,
        peer_tx: Arc<RwLock<StdHashMap<NodeId, tokio::sync::Mutex<PeerSocket>>>>,
    ) where
        O: serde::Serialize + for<'de> serde::Deserialize<'de>,
        P: serde::Serialize + for<'de> serde::Deserialize<'de>,
    {
        loop {
            if let Ok(sock) = listener.accept().await {
                let tx = tx.clone();
                let authenticator = authenticator.clone();
                let peer_tx = peer_tx.clone();
                rt::spawn(Self::rx_side_accept_task(my_id, sock, tx, authenticator, peer_tx));
            }
        }
    }

    async fn rx_side_accept_task(
        my_id: NodeId,
        sock: Socket,
        mut tx: MessageChannelTx<O, P>,
        authenticator: Arc<Authenticator>,
        peer_tx: Arc<RwLock<StdHashMap<NodeId, tokio::sync::Mutex<PeerSocket>>>>,
    ) where
        O: serde::Serialize + for<'de> serde::Deserialize<'de>,
        P: serde::Serialize + for<'de> serde::Deserialize<'de>,
    {
        let (mut read_half, write_half) = sock.into_split();

        let mut id_buf = [0u8; 4];
        if read_half.read_exact(&mut id_buf).await.is_err() {
            return;
        }
        let peer_id = NodeId::from(u32::from_le_bytes(id_buf));

        // a peer we never dial ourselves (a client, or a replica we
        // haven't finished connecting out to yet) has no other way to
        // receive a reply; this accepted connection's write half is it.
        peer_tx
            .write()
            .entry(peer_id)
            .or_insert_with(|| tokio::sync::Mutex::new(PeerSocket::WriteHalf(write_half)));

        tx.send(Message::ConnectedRx(peer_id)).await.unwrap_or(());

        loop {
            match Self::read_frame(&mut read_half).await {
                Ok((header, payload)) => {
                    if header.from() != peer_id {
                        // claimed identity doesn't match the handshake
                        break;
                    }
                    if authenticator
                        .verify(peer_id, &payload[..], header.signature())
                        .is_err()
                    {
                        // spec §4.1: drop silently, don't tear down the connection
                        continue;
                    }
                    let message: SystemMessage<O, P> = match bincode::deserialize(&payload[..]) {
                        Ok(message) => message,
                        Err(_) => continue,
                    };
                    if tx.send(Message::System(header, message)).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        let e = Error::simple(ErrorKind::TransportTransient);
        tx.send(Message::Error(peer_id, e)).await.unwrap_or(());
        let _ = my_id;
    }

    async fn read_frame<R>(sock: &mut R) -> Result<(Header, Vec<u8>)>
    where
        R: AsyncRead + Unpin,
    {
        let mut header_len_buf = [0u8; 4];
        sock.read_exact(&mut header_len_buf)
            .await
            .wrapped(ErrorKind::TransportTransient)?;
        let header_len = u32::from_le_bytes(header_len_buf) as usize;

        let mut header_bytes = vec![0u8; header_len];
        sock.read_exact(&mut header_bytes[..])
            .await
            .wrapped(ErrorKind::TransportTransient)?;
        let header: Header =
            bincode::deserialize(&header_bytes[..]).wrapped(ErrorKind::CommunicationMessage)?;

        let mut payload_len_buf = [0u8; 8];
        sock.read_exact(&mut payload_len_buf)
            .await
            .wrapped(ErrorKind::TransportTransient)?;
        let payload_len = u64::from_le_bytes(payload_len_buf) as usize;

        let mut payload = vec![0u8; payload_len];
        sock.read_exact(&mut payload[..])
            .await
            .wrapped(ErrorKind::TransportTransient)?;

        Ok((header, payload))
    }

    /// Sends `message` to the replica `target`, authenticated with
    /// this replica's signature over the serialized payload.
    ///
    /// Non-blocking with respect to the caller: the write itself is
    /// best-effort and failures are reported asynchronously through
    /// the peer's `peer_up` status, never as a synchronous error (spec
    /// §4.4: "the protocol engine simply observes missing messages").
    pub fn send(&mut self, message: SystemMessage<O, P>, target: NodeId)
    where
        O: serde::Serialize + for<'de> serde::Deserialize<'de> + Clone,
        P: serde::Serialize + for<'de> serde::Deserialize<'de> + Clone,
    {
        if target == self.id {
            // loopback, skip the network entirely
            let mut my_tx = self.my_tx.clone();
            let header = Header::new(self.id, target, 0, self.authenticator.sign(&[]));
            rt::spawn(async move {
                my_tx.send(Message::System(header, message)).await.unwrap_or(());
            });
            return;
        }
        let peer_tx = self.peer_tx.clone();
        let authenticator = self.authenticator.clone();
        let my_id = self.id;
        rt::spawn(async move {
            let _ = Self::write_message(my_id, target, &message, &peer_tx, &authenticator).await;
        });
    }

    async fn write_message(
        my_id: NodeId,
        target: NodeId,
        message: &SystemMessage<O, P>,
        peer_tx: &RwLock<StdHashMap<NodeId, tokio::sync::Mutex<PeerSocket>>>,
        authenticator: &Authenticator,
    ) -> Result<()>
    where
        O: serde::Serialize,
        P: serde::Serialize,
    {
        let payload = bincode::serialize(message).wrapped(ErrorKind::CommunicationMessage)?;
        let sig = authenticator.sign(&payload[..]);
        let wm = WireMessage::new(my_id, target, &payload[..], sig);
        let (header, payload) = wm.into_inner();
        let header_bytes = bincode::serialize(&header).wrapped(ErrorKind::CommunicationMessage)?;

        let guard = peer_tx.read();
        let sock_mutex = guard
            .get(&target)
            .ok_or("peer not yet connected")
            .simple(ErrorKind::TransportTransient)?;
        let mut sock = sock_mutex.lock().await;
        sock.write_all(&(header_bytes.len() as u32).to_le_bytes())
            .await
            .wrapped(ErrorKind::TransportTransient)?;
        sock.write_all(&header_bytes[..])
            .await
            .wrapped(ErrorKind::TransportTransient)?;
        sock.write_all(&(payload.len() as u64).to_le_bytes())
            .await
            .wrapped(ErrorKind::TransportTransient)?;
        sock.write_all(payload).await.wrapped(ErrorKind::TransportTransient)?;
        Ok(())
    }

    /// Broadcasts `message` to every target in `targets`.
    pub fn broadcast<I>(&mut self, message: SystemMessage<O, P>, targets: I)
    where
        O: serde::Serialize + for<'de> serde::Deserialize<'de> + Clone,
        P: serde::Serialize + for<'de> serde::Deserialize<'de> + Clone,
        I: IntoIterator<Item = NodeId>,
    {
        for target in targets {
            self.send(message.clone(), target);
        }
    }

    /// Cooperatively blocks until the next message is available.
    pub async fn receive(&mut self) -> Result<Message<O, P>> {
        self.my_rx.recv().await
    }

    /// Returns a cloned sender onto this node's own event queue, used
    /// by the execution layer and timeout scheduler to deliver
    /// `Message::ExecutionFinished`/`Message::Timeout` as regular
    /// events (spec §5).
    pub fn loopback_tx(&self) -> MessageChannelTx<O, P> {
        self.my_tx.clone()
    }

    /// Whether we currently hold an open connection to `peer`.
    ///
    /// Used by fault-injection tests and the observer surface; the
    /// protocol engine itself never consults this, since quorum
    /// counting already tolerates missing peers (spec §4.4).
    pub fn peer_up(&self, peer: NodeId) -> bool {
        if peer == self.id {
            return true;
        }
        self.peer_tx.read().contains_key(&peer)
    }

    /// Returns the configured addresses of every replica, including
    /// this one.
    pub fn peer_addrs(&self) -> &StdHashMap<NodeId, SocketAddr> {
        &self.peer_addrs
    }
}
