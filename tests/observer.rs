//! The observer surface (spec §4.5): a side channel a harness can use
//! to inspect a running replica without going over the wire protocol.

mod common;

use std::time::Duration;

use common::{addrs_for, cluster_config, CounterService, BASE_PORT};
use synod::{NodeId, ObserverCommand, ObserverResponse, Replica};

#[tokio::test]
async fn ping_is_answered_with_a_pong() {
    let addrs = addrs_for(BASE_PORT + 50, 4);
    let cfg = cluster_config(NodeId::from(0u32), 1, addrs, &[]);
    let replica = Replica::bootstrap(cfg, CounterService).await.unwrap();
    let mut observer = replica.observer_handle();
    tokio::spawn(async move {
        let _ = replica.run().await;
    });

    let response = common::with_timeout(Duration::from_secs(5), observer.submit(ObserverCommand::Ping))
        .await
        .unwrap();
    assert!(matches!(response, ObserverResponse::Pong));
}

#[tokio::test]
async fn get_status_reports_the_live_view_before_anything_is_executed() {
    let addrs = addrs_for(BASE_PORT + 60, 4);
    let cfg = cluster_config(NodeId::from(2u32), 1, addrs, &[]);
    let replica = Replica::bootstrap(cfg, CounterService).await.unwrap();
    let mut observer = replica.observer_handle();
    tokio::spawn(async move {
        let _ = replica.run().await;
    });

    let response = common::with_timeout(Duration::from_secs(5), observer.submit(ObserverCommand::GetStatus))
        .await
        .unwrap();
    match response {
        ObserverResponse::Status(status) => {
            assert_eq!(status.id, NodeId::from(2u32));
            assert_eq!(status.n, 4);
            assert_eq!(status.f, 1);
            assert_eq!(status.leader, NodeId::from(0u32));
            assert_eq!(status.last_executed, None);
        }
        ObserverResponse::Pong => panic!("expected a status response"),
    }
}
