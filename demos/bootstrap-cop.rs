//! Boots a single replica of an `n=4, f=1` cluster, to be run as four
//! separate processes (`bootstrap-cop 0`, `bootstrap-cop 1`, ...).

mod common;

use std::collections::HashMap as StdHashMap;

use synod::bft::async_runtime as rt;
use synod::bft::communication::NodeId;
use synod::{init, InitConfig, Replica};

fn main() {
    let arg = std::env::args_os().nth(1).expect("usage: bootstrap-cop <id>");
    let id: u32 = arg.to_str().unwrap().parse().expect("id must be a number");

    let conf = InitConfig {
        async_threads: num_cpus::get(),
    };
    let _guard = unsafe { init(conf).unwrap() };
    rt::block_on(async_main(NodeId::from(id)));
}

fn peer_addr(self_id: NodeId, peer: NodeId) -> std::net::SocketAddr {
    let port = 10000 + u32::from(peer);
    let addr = if self_id == peer {
        format!("0.0.0.0:{}", port)
    } else {
        format!("192.168.70.{}:{}", 16 + u32::from(peer), port)
    };
    addr.parse().unwrap()
}

async fn async_main(id: NodeId) {
    let addrs: StdHashMap<NodeId, std::net::SocketAddr> = NodeId::targets(0..4)
        .map(|peer| (peer, peer_addr(id, peer)))
        .collect();

    let clients: Vec<NodeId> = common::client_ids().collect();
    let cfg = common::cluster_config(id, 1, addrs, &clients);

    println!("Bootstrapping node #{}", u32::from(id));
    let replica = Replica::bootstrap(cfg, common::CalcService).await.unwrap();
    println!("Spawned node #{}", u32::from(id));

    if let Err(e) = replica.run().await {
        println!("Node #{} terminated: {}", u32::from(id), e);
    }
}
