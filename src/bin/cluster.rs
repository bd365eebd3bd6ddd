//! CLI surface for the replica cluster simulator (spec §6).
//!
//! Two operations: start a replica process (`start`), or submit a
//! single client request to a running cluster (`submit`). Exit codes
//! follow spec §6: 0 normal shutdown, 1 configuration error, 2
//! transport failure, 3 internal invariant violation.

use std::collections::HashMap as StdHashMap;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use synod::bft::async_runtime as rt;
use synod::bft::collections::HashMap;
use synod::bft::communication::message::{
    ClientId, RequestMessage, SystemMessage, Timestamp, WireMessage,
};
use synod::bft::communication::serialize::BincodeData;
use synod::bft::communication::NodeId;
use synod::bft::crypto::signature::KeyPair;
use synod::bft::executable::Service;
use synod::bft::{init, InitConfig};
use synod::{ClusterConfig, Replica};

#[derive(Parser)]
#[command(name = "synod-cluster", about = "PBFT replica cluster simulator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a replica process and run it until it exits.
    Start(StartArgs),
    /// Submit a single client request to a running cluster.
    Submit(SubmitArgs),
}

#[derive(Args)]
struct StartArgs {
    /// This replica's id, in `[0, n)`.
    #[arg(long)]
    id: u32,
    /// The local port to bind this replica's listener on.
    #[arg(long)]
    port: u16,
    /// The other replicas in the cluster, as `id@host:port` pairs.
    #[arg(long, value_delimiter = ',')]
    peers: Vec<String>,
    /// Maximum tolerated Byzantine faults. Defaults to the largest
    /// `f` consistent with the peer count (`n = 3f + 1`).
    #[arg(long)]
    f: Option<usize>,
    /// Client re-submission interval, in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    client_timeout_ms: u64,
    /// Trigger for the (future) view change, in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    replica_progress_timeout_ms: u64,
}

#[derive(Args)]
struct SubmitArgs {
    /// Address of the replica to submit the request to.
    #[arg(long)]
    addr: String,
    /// The (opaque, UTF-8) operation to submit.
    #[arg(long)]
    payload: String,
    /// The id this submission should be attributed to.
    #[arg(long, default_value_t = 1000)]
    client_id: u32,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conf = InitConfig {
        async_threads: num_cpus::get(),
    };
    let _guard = match unsafe { init(conf) } {
        Ok(guard) => guard,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize runtime");
            return ExitCode::from(2);
        }
    };

    match cli.command {
        Command::Start(args) => rt::block_on(run_replica(args)),
        Command::Submit(args) => rt::block_on(submit_request(args)),
    }
}

/// The demo state machine driven by `synod-cluster start`: an
/// append-only log of every operation decided by the cluster, each
/// reply echoing the string it was handed back with its assigned
/// position.
struct EchoService;

type EchoData = BincodeData<Vec<String>, String, String>;

impl Service for EchoService {
    type Data = EchoData;

    fn initial_state(&mut self) -> synod::Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn update(&mut self, state: &mut Vec<String>, request: String) -> String {
        state.push(request.clone());
        format!("{}:{}", state.len() - 1, request)
    }
}

/// Clients share the replica `NodeId` space (spec §6: no separate
/// client address table); this simulator reserves this range of ids
/// for clients, so a replica can pre-register their derived public
/// keys the same way it does its peers'.
const CLIENT_ID_BASE: u32 = 1000;
const CLIENT_ID_SPAN: u32 = 64;

async fn run_replica(args: StartArgs) -> ExitCode {
    let id = NodeId::from(args.id);

    let mut addrs: StdHashMap<NodeId, SocketAddr> = StdHashMap::new();
    for peer in &args.peers {
        match parse_peer(peer) {
            Ok((peer_id, addr)) => {
                addrs.insert(peer_id, addr);
            }
            Err(e) => {
                tracing::error!(peer = %peer, error = %e, "invalid peer entry");
                return ExitCode::from(1);
            }
        }
    }
    let self_addr: SocketAddr = match format!("0.0.0.0:{}", args.port).parse() {
        Ok(addr) => addr,
        Err(_) => return ExitCode::from(1),
    };
    addrs.insert(id, self_addr);

    let n = addrs.len();
    let f = args.f.unwrap_or_else(|| n.saturating_sub(1) / 3);

    let mut pk: HashMap<NodeId, _> = synod::bft::collections::hash_map();
    let mut sk = None;
    for &peer_id in addrs.keys() {
        let kp = match replica_key(peer_id) {
            Ok(kp) => kp,
            Err(e) => {
                tracing::error!(error = %e, "failed to derive key pair");
                return ExitCode::from(1);
            }
        };
        pk.insert(peer_id, kp.public_key());
        if peer_id == id {
            sk = Some(kp);
        }
    }
    let sk = match sk {
        Some(sk) => sk,
        None => return ExitCode::from(1),
    };

    for raw_id in CLIENT_ID_BASE..CLIENT_ID_BASE + CLIENT_ID_SPAN {
        let client = NodeId::from(raw_id);
        match replica_key(client) {
            Ok(kp) => {
                pk.insert(client, kp.public_key());
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to derive client key pair");
                return ExitCode::from(1);
            }
        }
    }

    let cfg = ClusterConfig {
        id,
        f,
        addrs,
        pk,
        sk,
        client_timeout: Duration::from_millis(args.client_timeout_ms),
        replica_progress_timeout: Duration::from_millis(args.replica_progress_timeout_ms),
    };

    let replica = match Replica::bootstrap(cfg, EchoService).await {
        Ok(replica) => replica,
        Err(e) => return exit_code_for(&e),
    };

    match replica.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => exit_code_for(&e),
    }
}

fn exit_code_for(e: &synod::Error) -> ExitCode {
    tracing::error!(error = %e, "replica terminated");
    if e.is_invariant_violation() {
        ExitCode::from(3)
    } else if e.kind() == synod::ErrorKind::Config {
        ExitCode::from(1)
    } else {
        ExitCode::from(2)
    }
}

fn parse_peer(entry: &str) -> Result<(NodeId, SocketAddr), String> {
    let (id_str, addr_str) = entry
        .split_once('@')
        .ok_or_else(|| format!("expected `id@host:port`, got `{}`", entry))?;
    let id: u32 = id_str.parse().map_err(|_| format!("bad peer id `{}`", id_str))?;
    let addr: SocketAddr = addr_str
        .parse()
        .map_err(|_| format!("bad peer address `{}`", addr_str))?;
    Ok((NodeId::from(id), addr))
}

/// Derives a deterministic identity key pair for `id`.
///
/// The simulator has no out-of-band key distribution mechanism (spec
/// §6 lists no key material in the CLI surface), so every process
/// derives every replica's key pair the same way, from its id alone.
fn replica_key(id: NodeId) -> synod::Result<KeyPair> {
    let seed = blake3::hash(format!("synod-replica-{}", u32::from(id)).as_bytes());
    KeyPair::from_seed(seed.as_bytes())
}

async fn submit_request(args: SubmitArgs) -> ExitCode {
    if args.client_id < CLIENT_ID_BASE || args.client_id >= CLIENT_ID_BASE + CLIENT_ID_SPAN {
        tracing::error!(
            client_id = args.client_id,
            low = CLIENT_ID_BASE,
            high = CLIENT_ID_BASE + CLIENT_ID_SPAN,
            "client id outside the reserved range"
        );
        return ExitCode::from(1);
    }
    let addr: SocketAddr = match args.addr.parse() {
        Ok(addr) => addr,
        Err(_) => {
            tracing::error!(addr = %args.addr, "invalid address");
            return ExitCode::from(1);
        }
    };

    let mut sock = match tokio::net::TcpStream::connect(addr).await {
        Ok(sock) => sock,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect");
            return ExitCode::from(2);
        }
    };

    let client_id = ClientId::from(args.client_id);
    let client = NodeId::from(args.client_id);

    // identify ourselves, same framing `Node`'s tx side uses
    if sock
        .write_all(&u32::from(client).to_le_bytes())
        .await
        .is_err()
    {
        return ExitCode::from(2);
    }

    let request = RequestMessage::new(client_id, Timestamp::from(now_millis()), args.payload);
    let message: SystemMessage<String, String> = SystemMessage::Request(request);
    let payload = match bincode::serialize(&message) {
        Ok(bytes) => bytes,
        Err(_) => return ExitCode::from(2),
    };

    let sk = match replica_key(client) {
        Ok(sk) => sk,
        Err(_) => return ExitCode::from(2),
    };
    let sig = sk.sign(&payload[..]);
    let wm = WireMessage::new(client, NodeId::from(0u32), &payload[..], sig);
    let (header, payload) = wm.into_inner();
    let header_bytes = match bincode::serialize(&header) {
        Ok(bytes) => bytes,
        Err(_) => return ExitCode::from(2),
    };

    let write_result: std::io::Result<()> = async {
        sock.write_all(&(header_bytes.len() as u32).to_le_bytes()).await?;
        sock.write_all(&header_bytes[..]).await?;
        sock.write_all(&(payload.len() as u64).to_le_bytes()).await?;
        sock.write_all(payload).await?;
        Ok(())
    }
    .await;

    if write_result.is_err() {
        return ExitCode::from(2);
    }

    tracing::info!(client = %client, "request submitted");
    ExitCode::SUCCESS
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
