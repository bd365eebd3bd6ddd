//! This module contains types associated with messages traded
//! between the system processes (spec §3 "Message kinds").

#[cfg(feature = "serialize_serde")]
use serde::{Deserialize, Serialize};

use crate::bft::communication::NodeId;
use crate::bft::crypto::hash::Digest;
use crate::bft::crypto::signature::Signature;
use crate::bft::error::*;
use crate::bft::ordering::{Orderable, SeqNo, View};

/// A header that is sent before a message in transit on the wire.
///
/// Unlike the raw `(version, from, to, length)` quartet alone, this
/// also carries the authenticator (spec §4.1), so a replica can verify
/// `(sender_id, authenticator)` before it even looks at the payload.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
pub struct Header {
    version: u32,
    from: u32,
    to: u32,
    length: u64,
    signature: Signature,
}

/// A message to be sent over the wire. The payload should be a
/// serialized `SystemMessage`, for correctness.
#[derive(Debug)]
pub struct WireMessage<'a> {
    header: Header,
    payload: &'a [u8],
}

/// The client identifier embedded in a `RequestMessage` (spec §3
/// "Client request").
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
pub struct ClientId(u32);

impl From<u32> for ClientId {
    fn from(id: u32) -> Self {
        ClientId(id)
    }
}

impl From<ClientId> for u32 {
    fn from(id: ClientId) -> Self {
        id.0
    }
}

/// A client-local monotonic timestamp (spec §3 "client-local
/// timestamp (monotonic per client)").
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
pub struct Timestamp(u64);

impl From<u64> for Timestamp {
    fn from(ts: u64) -> Self {
        Timestamp(ts)
    }
}

impl From<Timestamp> for u64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

/// The `Message` type encompasses all messages traded between
/// different asynchronous tasks within a single replica process.
pub enum Message<O, P> {
    /// A message received from, or to be sent to, a peer or client.
    System(Header, SystemMessage<O, P>),
    /// A peer connection finished handshaking on the tx side.
    ConnectedTx(NodeId),
    /// A peer connection finished handshaking on the rx side.
    ConnectedRx(NodeId),
    /// A previously armed timeout elapsed.
    Timeout(crate::bft::timeouts::TimeoutKind),
    /// An asynchronous task reported an error pertaining to `NodeId`.
    Error(NodeId, Error),
    /// The execution layer finished applying the request at `seq`,
    /// originally submitted by the peer `NodeId`; the core loop turns
    /// this into an outbound `REPLY`.
    ExecutionFinished(NodeId, SeqNo, ReplyMessage<P>),
    /// An out-of-band command submitted through a replica's observer
    /// handle, paired with the channel to deliver its response on
    /// (spec §4.5).
    Observer(
        crate::bft::observer::ObserverCommand,
        futures::channel::oneshot::Sender<crate::bft::observer::ObserverResponse>,
    ),
}

/// A `SystemMessage` corresponds to a message regarding one of the
/// SMR sub-protocols named in spec §3's message-kind table.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone)]
pub enum SystemMessage<O, P> {
    Request(RequestMessage<O>),
    Consensus(ConsensusMessage),
    Reply(ReplyMessage<P>),
}

/// Represents a request from a client (spec §3 "REQUEST").
///
/// The `O` type argument symbolizes the client operation to be
/// performed over the replicated state.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone)]
pub struct RequestMessage<O> {
    client_id: ClientId,
    client_ts: Timestamp,
    operation: O,
    /// Set when a backup forwards a client request to the primary
    /// (spec §4.3.1.2: "forwards carry a flag that suppresses
    /// re-forward").
    forwarded: bool,
}

/// Represents a reply to a client request (spec §3 "REPLY").
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone)]
pub struct ReplyMessage<P> {
    client_id: ClientId,
    client_ts: Timestamp,
    replica_id: NodeId,
    result: P,
}

/// Represents a message from the consensus sub-protocol (spec §3
/// "PRE-PREPARE" / "PREPARE" / "COMMIT").
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone)]
pub struct ConsensusMessage {
    view: View,
    seq: SeqNo,
    kind: ConsensusMessageKind,
}

/// Represents one of the three consensus phases.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone)]
pub enum ConsensusMessageKind {
    /// `PRE-PREPARE(v, seq, d(m), m)`, issued by the primary only.
    PrePrepare(Digest, Vec<u8>),
    /// `PREPARE(v, seq, d(m))`.
    Prepare(Digest),
    /// `COMMIT(v, seq, d(m))`.
    Commit(Digest),
}

impl<O> RequestMessage<O> {
    /// Creates a new `RequestMessage`.
    pub fn new(client_id: ClientId, client_ts: Timestamp, operation: O) -> Self {
        Self {
            client_id,
            client_ts,
            operation,
            forwarded: false,
        }
    }

    /// Marks this request as a forward, so the receiving primary's
    /// peers won't re-forward it again (spec §4.3.1.2).
    pub fn into_forwarded(mut self) -> Self {
        self.forwarded = true;
        self
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn client_ts(&self) -> Timestamp {
        self.client_ts
    }

    pub fn is_forwarded(&self) -> bool {
        self.forwarded
    }

    /// Returns a reference to the operation of type `O`.
    pub fn operation(&self) -> &O {
        &self.operation
    }

    pub fn into_inner(self) -> (ClientId, Timestamp, O) {
        (self.client_id, self.client_ts, self.operation)
    }
}

impl<P> ReplyMessage<P> {
    pub fn new(client_id: ClientId, client_ts: Timestamp, replica_id: NodeId, result: P) -> Self {
        Self {
            client_id,
            client_ts,
            replica_id,
            result,
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn client_ts(&self) -> Timestamp {
        self.client_ts
    }

    pub fn replica_id(&self) -> NodeId {
        self.replica_id
    }

    pub fn result(&self) -> &P {
        &self.result
    }
}

impl ConsensusMessage {
    /// Creates a new `ConsensusMessage` for view `view` and sequence
    /// number `seq`, of the kind `kind`.
    pub fn new(view: View, seq: SeqNo, kind: ConsensusMessageKind) -> Self {
        Self { view, seq, kind }
    }

    pub fn view(&self) -> View {
        self.view
    }

    /// Returns a reference to the consensus message kind.
    pub fn kind(&self) -> &ConsensusMessageKind {
        &self.kind
    }
}

impl Orderable for ConsensusMessage {
    fn sequence_number(&self) -> SeqNo {
        self.seq
    }
}

impl Header {
    /// Constructs a new header for a message from `from` to `to`,
    /// authenticated with `signature`.
    pub fn new(from: NodeId, to: NodeId, length: u64, signature: Signature) -> Self {
        Header {
            version: WireMessage::CURRENT_VERSION,
            from: from.into(),
            to: to.into(),
            length,
            signature,
        }
    }

    /// Reports the current version of the wire protocol.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// The id of the replica that sent this message.
    pub fn from(&self) -> NodeId {
        NodeId::from(self.from)
    }

    /// The id of the intended recipient of this message.
    pub fn to(&self) -> NodeId {
        NodeId::from(self.to)
    }

    /// The authenticator attached to this message.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// A digest uniquely identifying the payload this header was
    /// paired with, derived from the signature bytes. Used by the log
    /// to key stored client requests, per spec §3's digest
    /// requirement ("two requests are equal iff their digests
    /// match").
    pub fn unique_digest(&self) -> Digest {
        Digest::from_data(self.signature.as_bytes())
    }
}

impl<'a> WireMessage<'a> {
    /// The current version of the wire protocol.
    pub const CURRENT_VERSION: u32 = 0;

    /// Constructs a new message to be sent over the wire.
    pub fn new(from: NodeId, to: NodeId, payload: &'a [u8], sig: Signature) -> Self {
        let header = Header::new(from, to, payload.len() as u64, sig);
        Self { header, payload }
    }

    /// Builds a `WireMessage` from an already-received `Header`.
    pub fn from_parts(header: Header, payload: &'a [u8]) -> Result<Self> {
        if header.version != Self::CURRENT_VERSION {
            return Err("Unsupported wire protocol version")
                .wrapped(ErrorKind::CommunicationMessage);
        }
        Ok(Self { header, payload })
    }

    /// Retrieve the inner `Header` and payload byte buffer stored
    /// inside the `WireMessage`.
    pub fn into_inner(self) -> (Header, &'a [u8]) {
        (self.header, self.payload)
    }

    /// Returns a reference to the `Header` of the `WireMessage`.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Returns a reference to the payload bytes of the `WireMessage`.
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrips_identity_fields() {
        let sig = Signature::zeroed();
        let (header, _) = WireMessage::new(
            NodeId::from(0u32),
            NodeId::from(3u32),
            b"I am a cool payload!",
            sig,
        )
        .into_inner();
        assert_eq!(header.from(), NodeId::from(0u32));
        assert_eq!(header.to(), NodeId::from(3u32));
        assert_eq!(header.version(), WireMessage::CURRENT_VERSION);
    }
}
