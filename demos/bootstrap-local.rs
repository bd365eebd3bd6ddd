//! Boots a full `n=4, f=1` cluster in a single process, all four
//! replicas talking to each other over loopback TCP, then lets it idle.

mod common;

use std::collections::HashMap as StdHashMap;
use std::time::Duration;

use futures_timer::Delay;

use synod::bft::async_runtime as rt;
use synod::bft::communication::NodeId;
use synod::{init, InitConfig, Replica};

fn main() {
    let conf = InitConfig {
        async_threads: num_cpus::get(),
    };
    let _guard = unsafe { init(conf).unwrap() };
    rt::block_on(async_main());
}

async fn async_main() {
    let addrs: StdHashMap<NodeId, std::net::SocketAddr> = [
        (NodeId::from(0u32), "127.0.0.1:10001".parse().unwrap()),
        (NodeId::from(1u32), "127.0.0.1:10002".parse().unwrap()),
        (NodeId::from(2u32), "127.0.0.1:10003".parse().unwrap()),
        (NodeId::from(3u32), "127.0.0.1:10004".parse().unwrap()),
    ]
    .into_iter()
    .collect();

    for id in NodeId::targets(0..4) {
        let clients: Vec<NodeId> = common::client_ids().collect();
        let cfg = common::cluster_config(id, 1, addrs.clone(), &clients);
        rt::spawn(async move {
            println!("Bootstrapping node #{}", u32::from(id));
            let replica = Replica::bootstrap(cfg, common::CalcService).await.unwrap();
            println!("Spawned node #{}", u32::from(id));
            if let Err(e) = replica.run().await {
                println!("Node #{} terminated: {}", u32::from(id), e);
            }
        });
    }

    // wait a bit, then exit
    Delay::new(Duration::from_secs(3)).await;
}
