//! Spins up a flood of clients against a cluster already started with
//! `bootstrap-local` or `bootstrap-cop`, each submitting requests back
//! to back forever.

mod common;

use synod::bft::async_runtime as rt;
use synod::bft::communication::NodeId;
use synod::bft::prng;
use synod::{init, InitConfig};

fn main() {
    let conf = InitConfig {
        async_threads: num_cpus::get(),
    };
    let _guard = unsafe { init(conf).unwrap() };
    rt::block_on(async_main());
}

async fn async_main() {
    let replica_addr: std::net::SocketAddr = "127.0.0.1:10001".parse().unwrap();

    for client_id in common::client_ids() {
        rt::spawn(async move {
            let mut client = common::DemoClient::connect(client_id, replica_addr)
                .await
                .expect("replica should be reachable");
            let mut rng = prng::State::new();
            loop {
                let action = if rng.next_state() & 1 == 0 {
                    common::Action::Sqrt
                } else {
                    common::Action::MultiplyByTwo
                };
                match client.update(action).await {
                    Ok(reply) => println!("Client #{}: state = {}", u32::from(client_id), reply),
                    Err(e) => {
                        println!("Client #{} lost its connection: {}", u32::from(client_id), e);
                        return;
                    }
                }
            }
        });
    }

    std::future::pending::<()>().await
}
