//! Shared support code for the seed-scenario integration tests: a
//! tiny replicated counter service, deterministic key derivation (the
//! same convention `demos/common.rs` and `synod-cluster` use) and a
//! bare client that speaks the transport's wire framing directly.

use std::collections::HashMap as StdHashMap;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use synod::bft::communication::message::{
    ClientId, Header, ReplyMessage, RequestMessage, SystemMessage, Timestamp, WireMessage,
};
use synod::bft::communication::NodeId;
use synod::bft::crypto::signature::KeyPair;
use synod::bft::executable::Service;
use synod::{ClusterConfig, Replica, Result};

pub const BASE_PORT: u16 = 24000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Add(pub u64);

pub type CounterData = synod::BincodeData<u64, Add, u64>;

/// A replicated running sum: every `Add(n)` accumulates onto a single
/// `u64`, the simplest possible deterministic state machine, good
/// enough to tell committed order apart from execution order.
pub struct CounterService;

impl Service for CounterService {
    type Data = CounterData;

    fn initial_state(&mut self) -> Result<u64> {
        Ok(0)
    }

    fn update(&mut self, state: &mut u64, op: Add) -> u64 {
        *state += op.0;
        *state
    }
}

pub fn derive_key(id: NodeId) -> KeyPair {
    let seed = blake3::hash(format!("synod-test-{}", u32::from(id)).as_bytes());
    KeyPair::from_seed(seed.as_bytes()).expect("seed is always 32 bytes")
}

pub fn addrs_for(base_port: u16, n: u32) -> StdHashMap<NodeId, SocketAddr> {
    (0..n)
        .map(|i| {
            let addr = format!("127.0.0.1:{}", base_port + i as u16).parse().unwrap();
            (NodeId::from(i), addr)
        })
        .collect()
}

pub fn cluster_config(
    id: NodeId,
    f: usize,
    addrs: StdHashMap<NodeId, SocketAddr>,
    clients: &[NodeId],
) -> ClusterConfig {
    let mut pk = synod::bft::collections::hash_map();
    for &peer in addrs.keys() {
        pk.insert(peer, derive_key(peer).public_key());
    }
    for &client in clients {
        pk.insert(client, derive_key(client).public_key());
    }
    ClusterConfig {
        id,
        f,
        addrs,
        pk,
        sk: derive_key(id),
        client_timeout: Duration::from_millis(500),
        replica_progress_timeout: Duration::from_secs(5),
    }
}

/// Boots one `Replica` per id in `live` (a subset of `addrs`'s full
/// membership, to simulate crashed replicas) and leaves them running
/// in the background for the rest of the test.
pub async fn spawn_cluster(addrs: StdHashMap<NodeId, SocketAddr>, f: usize, live: &[u32], clients: &[NodeId]) {
    for &i in live {
        let id = NodeId::from(i);
        let cfg = cluster_config(id, f, addrs.clone(), clients);
        tokio::spawn(async move {
            let replica = Replica::bootstrap(cfg, CounterService)
                .await
                .expect("replica should bootstrap with a valid config");
            let _ = replica.run().await;
        });
    }
    // let every listener finish binding before a client dials in
    tokio::time::sleep(Duration::from_millis(200)).await;
}

/// A bare client: connects to one replica and speaks the same framing
/// `Node::write_message`/`read_frame` do.
pub struct TestClient {
    id: NodeId,
    to: NodeId,
    sk: KeyPair,
    sock: tokio::net::TcpStream,
    next_ts: u64,
}

impl TestClient {
    pub async fn connect(id: NodeId, to: NodeId, target: SocketAddr) -> std::io::Result<Self> {
        let mut sock = tokio::net::TcpStream::connect(target).await?;
        sock.write_all(&u32::from(id).to_le_bytes()).await?;
        Ok(Self {
            id,
            to,
            sk: derive_key(id),
            sock,
            next_ts: 0,
        })
    }

    pub async fn submit(&mut self, op: Add) -> std::io::Result<u64> {
        let ts = self.next_ts;
        self.next_ts += 1;
        self.submit_with_ts(op, ts).await
    }

    /// Submits with an explicit client timestamp, so a test can
    /// resubmit the exact same `(client, ts)` pair and exercise the
    /// at-most-once reply cache.
    pub async fn submit_with_ts(&mut self, op: Add, ts: u64) -> std::io::Result<u64> {
        let request = RequestMessage::new(ClientId::from(u32::from(self.id)), Timestamp::from(ts), op);
        let message: SystemMessage<Add, u64> = SystemMessage::Request(request);
        let payload = bincode::serialize(&message).expect("Add/u64 always serialize");

        let sig = self.sk.sign(&payload[..]);
        let wm = WireMessage::new(self.id, self.to, &payload[..], sig);
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

        let reply = self.read_reply().await?;
        Ok(*reply.result())
    }

    pub async fn read_reply(&mut self) -> std::io::Result<ReplyMessage<u64>> {
        loop {
            let mut header_len_buf = [0u8; 4];
            self.sock.read_exact(&mut header_len_buf).await?;
            let header_len = u32::from_le_bytes(header_len_buf) as usize;
            let mut header_bytes = vec![0u8; header_len];
            self.sock.read_exact(&mut header_bytes[..]).await?;
            let _header: Header =
                bincode::deserialize(&header_bytes[..]).expect("replica always sends well-formed headers");

            let mut payload_len_buf = [0u8; 8];
            self.sock.read_exact(&mut payload_len_buf).await?;
            let payload_len = u64::from_le_bytes(payload_len_buf) as usize;
            let mut payload = vec![0u8; payload_len];
            self.sock.read_exact(&mut payload[..]).await?;

            let message: SystemMessage<Add, u64> = match bincode::deserialize(&payload[..]) {
                Ok(message) => message,
                Err(_) => continue,
            };
            if let SystemMessage::Reply(reply) = message {
                return Ok(reply);
            }
        }
    }
}

/// Runs `fut` and panics if it doesn't resolve within `dur`, so a
/// stalled consensus round fails the test instead of hanging forever.
pub async fn with_timeout<F, T>(dur: Duration, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(dur, fut)
        .await
        .expect("operation did not complete within the timeout")
}
