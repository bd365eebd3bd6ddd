//! Arms a handful of staggered timeouts and prints one line per fired
//! timeout, demonstrating that timeouts surface through the same
//! message channel every other event does (spec §5).

use std::time::Duration;

use synod::bft::async_runtime as rt;
use synod::bft::communication::channel;
use synod::bft::communication::message::{ClientId, Message, Timestamp};
use synod::bft::timeouts::{TimeoutKind, Timeouts};
use synod::{init, InitConfig};

type O = ();
type P = ();

fn main() {
    let conf = InitConfig {
        async_threads: num_cpus::get(),
    };
    let _guard = unsafe { init(conf).unwrap() };
    rt::block_on(async_main());
}

async fn async_main() {
    let (tx, mut rx) = channel::new_message_channel::<O, P>(8);
    let timeouts = Timeouts::new(tx);

    for i in 1..=5u64 {
        println!("Created timeout of {} seconds", i * 2);
        let dur = Duration::from_secs(i * 2);
        let kind = TimeoutKind::ClientRequest(ClientId::from(0u32), Timestamp::from(i));
        timeouts.timeout(dur, kind);
    }

    for _ in 0..5 {
        if let Ok(Message::Timeout(kind)) = rx.recv().await {
            println!("Received a timeout: {:?}", kind);
        }
    }
}
