mod common;

use common::{contend, eventually, local_cluster, local_cluster_with, Occupancy};
use lamport_mutex::transport::Transport;
use lamport_mutex::{Error, LocalNetwork, Message, Node, NodeId, Phase, ProtocolViolation};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn lower_identity_enters_first_on_timestamp_tie() {
    let (_network, nodes) = local_cluster(&["A", "B", "C"]).await;
    let (a, b) = (&nodes[0], &nodes[1]);

    // Both requests are stamped before either node hears from the other.
    let (ta, tb) = tokio::join!(a.request_access(), b.request_access());
    assert_eq!((ta.unwrap(), tb.unwrap()), (1, 1));

    a.wait_for_critical_section().await.unwrap();
    eventually(|| a.status().deferred == 1).await;
    eventually(|| b.status().reply_count == 1).await;
    assert_eq!(b.status().phase, Phase::Requesting);

    a.release_access().await.unwrap();
    b.wait_for_critical_section().await.unwrap();
    assert!(!a.in_critical_section());
    b.release_access().await.unwrap();
}

#[tokio::test]
async fn request_arriving_during_section_waits_for_release() {
    let (_network, nodes) = local_cluster(&["A", "B"]).await;
    let (a, b) = (&nodes[0], &nodes[1]);

    a.acquire().await.unwrap();
    b.request_access().await.unwrap();

    eventually(|| a.status().deferred == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!b.in_critical_section());

    a.release_access().await.unwrap();
    b.wait_for_critical_section().await.unwrap();
    assert_eq!(a.status().deferred, 0);
    assert_eq!(a.status().outstanding_timestamp, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn at_most_one_node_inside_under_contention() {
    let names = ["A", "B", "C", "D"];
    let (_network, nodes) = local_cluster(&names).await;
    let occupancy = Occupancy::default();
    let rounds = 5;

    let workers: Vec<_> = nodes
        .into_iter()
        .map(|node| tokio::spawn(contend(Arc::new(node), occupancy.clone(), rounds)))
        .collect();

    tokio::time::timeout(Duration::from_secs(20), async {
        for worker in workers {
            worker.await.unwrap();
        }
    })
    .await
    .expect("every request should eventually be granted");

    assert_eq!(occupancy.peak(), 1);
    assert_eq!(occupancy.entries(), names.len() * rounds);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tiny_queues_apply_backpressure_without_losing_messages() {
    let names = ["A", "B", "C"];
    let (_network, nodes) = local_cluster_with(&names, |node| node.with_queue_capacity(1)).await;
    let occupancy = Occupancy::default();

    let workers: Vec<_> = nodes
        .into_iter()
        .map(|node| tokio::spawn(contend(Arc::new(node), occupancy.clone(), 3)))
        .collect();

    tokio::time::timeout(Duration::from_secs(20), async {
        for worker in workers {
            worker.await.unwrap();
        }
    })
    .await
    .expect("backpressure must not stall the protocol");

    assert_eq!(occupancy.peak(), 1);
    assert_eq!(occupancy.entries(), 9);
}

#[tokio::test]
async fn unreachable_peer_stalls_entry() {
    let (network, nodes) = local_cluster(&["A", "B", "C"]).await;
    let a = &nodes[0];

    network.disconnect(&NodeId::from("C")).await;
    a.request_access().await.unwrap();
    eventually(|| a.status().reply_count == 1).await;

    // The lost request is not re-sent once C is back.
    network.reconnect(&NodeId::from("C")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(a.status().phase, Phase::Requesting);
    assert_eq!(a.status().reply_count, 1);
}

#[tokio::test]
async fn release_notice_only_moves_the_clock() {
    let (network, nodes) = local_cluster(&["A", "B"]).await;
    let a = &nodes[0];
    let b = network.endpoint("B".into());

    b.send(
        &"A".into(),
        Message::Release {
            from: "B".into(),
            timestamp: 41,
        },
    )
    .await
    .unwrap();

    eventually(|| a.status().clock >= 42).await;
    assert_eq!(a.status().phase, Phase::Idle);
    assert_eq!(a.status().reply_count, 0);
}

#[tokio::test]
async fn stray_reply_is_ignored() {
    let (network, nodes) = local_cluster(&["A", "B"]).await;
    let a = &nodes[0];

    let b = network.endpoint("B".into());
    let stray = Message::Reply {
        from: "B".into(),
        timestamp: 10,
    };
    b.send(&"A".into(), stray).await.unwrap();
    // A release behind it proves the reply was processed first.
    b.send(
        &"A".into(),
        Message::Release {
            from: "B".into(),
            timestamp: 1,
        },
    )
    .await
    .unwrap();

    // observe(1) on a fresh clock gives 2; the stray reply left it at 0.
    eventually(|| a.status().clock == 2).await;
    assert_eq!(a.status().reply_count, 0);
    assert_eq!(a.status().phase, Phase::Idle);
}

#[tokio::test]
async fn local_protocol_violations_are_returned() {
    let network = LocalNetwork::new();
    let node = Node::create("solo", "127.0.0.1:7100")
        .unwrap()
        .start_local(&network)
        .await
        .unwrap();

    assert!(matches!(
        node.release_access().await,
        Err(Error::Protocol(ProtocolViolation::NotInCriticalSection(Phase::Idle)))
    ));

    // Without peers there is nobody to wait for.
    node.acquire().await.unwrap();
    assert!(matches!(
        node.request_access().await,
        Err(Error::Protocol(ProtocolViolation::NotIdle(Phase::InCriticalSection)))
    ));
    assert!(node.in_critical_section());

    node.release_access().await.unwrap();
    assert_eq!(node.status().phase, Phase::Idle);
}

#[tokio::test]
async fn shutdown_stops_the_node() {
    let (_network, mut nodes) = local_cluster(&["A", "B"]).await;
    let a = nodes.remove(0);
    let flag = a.status_flag();

    a.shutdown().await.unwrap();
    assert!(matches!(
        flag.wait_for_critical_section().await,
        Err(Error::NodeStopped)
    ));
}
