//! Shared support code for the demo binaries under `demos/`.
//!
//! Not part of the library: each demo pulls this in via `mod common;`
//! and a deterministic key derivation scheme, since none of these
//! demos have an out-of-band key distribution mechanism either.

use std::collections::HashMap as StdHashMap;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use synod::bft::communication::message::{
    ClientId, Header, ReplyMessage, RequestMessage, SystemMessage, Timestamp, WireMessage,
};
use synod::bft::communication::serialize::BincodeData;
use synod::bft::communication::NodeId;
use synod::bft::crypto::signature::{KeyPair, PublicKey};
use synod::bft::executable::Service;
use synod::{ClusterConfig, Result};

/// A toy replicated calculator: clients submit an `Action`, the
/// cluster applies it to a shared accumulator and echoes the result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Action {
    Sqrt,
    MultiplyByTwo,
}

/// Clients in these demos reuse the replica `NodeId` space, the same
/// convention the `synod-cluster` CLI uses; this is the reserved range
/// a replica pre-registers client keys for.
pub const CLIENT_ID_BASE: u32 = 1000;
pub const CLIENT_ID_SPAN: u32 = 64;

pub fn client_ids() -> impl Iterator<Item = NodeId> {
    (CLIENT_ID_BASE..CLIENT_ID_BASE + CLIENT_ID_SPAN).map(NodeId::from)
}

pub struct CalcService;

pub type CalcData = BincodeData<f64, Action, f64>;

impl Service for CalcService {
    type Data = CalcData;

    fn initial_state(&mut self) -> Result<f64> {
        Ok(2.0)
    }

    fn update(&mut self, state: &mut f64, request: Action) -> f64 {
        *state = match request {
            Action::Sqrt => state.sqrt(),
            Action::MultiplyByTwo => *state * 2.0,
        };
        *state
    }
}

/// Derives a deterministic Ed25519 key pair for `id`.
pub fn derive_key(id: NodeId) -> KeyPair {
    let seed = blake3::hash(format!("synod-demo-{}", u32::from(id)).as_bytes());
    KeyPair::from_seed(seed.as_bytes()).expect("seed is always 32 bytes")
}

/// Builds the public key table covering every id in `ids`.
pub fn derive_public_keys(
    ids: impl IntoIterator<Item = NodeId>,
) -> synod::bft::collections::HashMap<NodeId, PublicKey> {
    ids.into_iter()
        .map(|id| (id, derive_key(id).public_key()))
        .collect()
}

/// Assembles a `ClusterConfig` for replica `id`, deriving keys for
/// everyone listed in `addrs` plus `clients` (registered for
/// authentication only; `clients` never get a peer connection dialed).
pub fn cluster_config(
    id: NodeId,
    f: usize,
    addrs: StdHashMap<NodeId, SocketAddr>,
    clients: &[NodeId],
) -> ClusterConfig {
    let mut pk = derive_public_keys(addrs.keys().copied());
    for &client in clients {
        pk.insert(client, derive_key(client).public_key());
    }
    ClusterConfig {
        id,
        f,
        addrs,
        pk,
        sk: derive_key(id),
        client_timeout: Duration::from_secs(5),
        replica_progress_timeout: Duration::from_secs(10),
    }
}

/// A bare-bones client, good enough for a demo: connects to a single
/// replica, submits one request at a time and waits for its reply.
///
/// Real clients would fan requests out to every replica and wait for
/// `f+1` matching ones (spec §4.2); this demo only talks to one, which
/// is enough to exercise the happy path.
pub struct DemoClient {
    id: NodeId,
    sk: KeyPair,
    sock: tokio::net::TcpStream,
    next_ts: u64,
}

impl DemoClient {
    pub async fn connect(id: NodeId, target: SocketAddr) -> std::io::Result<Self> {
        let mut sock = tokio::net::TcpStream::connect(target).await?;
        sock.write_all(&u32::from(id).to_le_bytes()).await?;
        Ok(Self {
            id,
            sk: derive_key(id),
            sock,
            next_ts: 0,
        })
    }

    pub async fn update(&mut self, action: Action) -> std::io::Result<f64> {
        let ts = self.next_ts;
        self.next_ts += 1;

        let request = RequestMessage::new(ClientId::from(u32::from(self.id)), Timestamp::from(ts), action);
        let message: SystemMessage<Action, f64> = SystemMessage::Request(request);
        let payload = bincode::serialize(&message).expect("Action/f64 always serialize");

        let sig = self.sk.sign(&payload[..]);
        let wm = WireMessage::new(self.id, NodeId::from(0u32), &payload[..], sig);
        let (header, payload) = wm.into_inner();
        let header_bytes = bincode::serialize(&header).expect("Header always serializes");

        self.sock
            .write_all(&(header_bytes.len() as u32).to_le_bytes())
            .await?;
        self.sock.write_all(&header_bytes[..]).await?;
        self.sock
            .write_all(&(payload.len() as u64).to_le_bytes())
            .await?;
        self.sock.write_all(payload).await?;

        let (_, reply) = self.read_reply().await?;
        Ok(*reply.result())
    }

    async fn read_reply(&mut self) -> std::io::Result<(Header, ReplyMessage<f64>)> {
        loop {
            let mut header_len_buf = [0u8; 4];
            self.sock.read_exact(&mut header_len_buf).await?;
            let header_len = u32::from_le_bytes(header_len_buf) as usize;
            let mut header_bytes = vec![0u8; header_len];
            self.sock.read_exact(&mut header_bytes[..]).await?;
            let header: Header = bincode::deserialize(&header_bytes[..])
                .expect("replica always sends well-formed headers");

            let mut payload_len_buf = [0u8; 8];
            self.sock.read_exact(&mut payload_len_buf).await?;
            let payload_len = u64::from_le_bytes(payload_len_buf) as usize;
            let mut payload = vec![0u8; payload_len];
            self.sock.read_exact(&mut payload[..]).await?;

            let message: SystemMessage<Action, f64> = match bincode::deserialize(&payload[..]) {
                Ok(message) => message,
                Err(_) => continue,
            };
            if let SystemMessage::Reply(reply) = message {
                return Ok((header, reply));
            }
        }
    }
}
