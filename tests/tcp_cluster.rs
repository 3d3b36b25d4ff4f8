mod common;

use common::{contend, eventually, Occupancy};
use futures::{SinkExt, StreamExt};
use lamport_mutex::message::Confirm;
use lamport_mutex::{Error, Node, NodeHandle, Phase};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

/// Loopback addresses that were free a moment ago.
fn free_addresses(n: usize) -> Vec<String> {
    let listeners: Vec<_> = (0..n)
        .map(|_| std::net::TcpListener::bind("127.0.0.1:0").unwrap())
        .collect();
    listeners
        .iter()
        .map(|l| l.local_addr().unwrap().to_string())
        .collect()
}

async fn tcp_cluster(names: &[&str]) -> Vec<NodeHandle> {
    let addresses = free_addresses(names.len());
    let mut handles = Vec::new();

    for (i, name) in names.iter().enumerate() {
        let mut node = Node::create(*name, addresses[i].as_str()).unwrap();
        for (j, peer) in names.iter().enumerate() {
            if i != j {
                node.add_peer(*peer, addresses[j].as_str()).unwrap();
            }
        }
        handles.push(node.start().await.unwrap());
    }
    handles
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_nodes_share_the_section_over_tcp() {
    let nodes = tcp_cluster(&["A", "B", "C"]).await;
    assert!(nodes.iter().all(|n| n.local_addr().is_some()));
    let occupancy = Occupancy::default();

    let workers: Vec<_> = nodes
        .into_iter()
        .map(|node| {
            let node = Arc::new(node);
            let occupancy = occupancy.clone();
            tokio::spawn(async move {
                contend(Arc::clone(&node), occupancy, 3).await;
                node
            })
        })
        .collect();

    let nodes = tokio::time::timeout(Duration::from_secs(30), async {
        let mut nodes = Vec::new();
        for worker in workers {
            nodes.push(worker.await.unwrap());
        }
        nodes
    })
    .await
    .expect("every node should get through its rounds");

    assert_eq!(occupancy.peak(), 1);
    assert_eq!(occupancy.entries(), 9);

    for node in nodes {
        let node = Arc::try_unwrap(node).expect("worker finished");
        node.shutdown().await.unwrap();
    }
}

#[tokio::test]
async fn server_confirms_and_rejects_lines() {
    let mut node = Node::create("A", "127.0.0.1:0").unwrap();
    node.add_peer("B", "127.0.0.1:9").unwrap();
    let node = node.start().await.unwrap();
    let address = node.local_addr().unwrap();

    let stream = TcpStream::connect(address).await.unwrap();
    let mut lines = Framed::new(stream, LinesCodec::new());

    lines
        .send(r#"{"kind":"release","from":"B","timestamp":20}"#.to_string())
        .await
        .unwrap();
    let answer = lines.next().await.unwrap().unwrap();
    assert_eq!(Confirm::from_json_string(&answer).unwrap(), Confirm::Ack);
    eventually(|| node.status().clock == 21).await;

    lines.send("not json".to_string()).await.unwrap();
    let answer = lines.next().await.unwrap().unwrap();
    assert!(matches!(
        Confirm::from_json_string(&answer).unwrap(),
        Confirm::Rejected { .. }
    ));
    assert_eq!(node.status().phase, Phase::Idle);

    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn out_of_range_timestamp_does_not_stop_the_node() {
    let mut node = Node::create("A", "127.0.0.1:0").unwrap();
    node.add_peer("B", "127.0.0.1:9").unwrap();
    let node = node.start().await.unwrap();

    let stream = TcpStream::connect(node.local_addr().unwrap()).await.unwrap();
    let mut lines = Framed::new(stream, LinesCodec::new());

    lines
        .send(r#"{"kind":"release","from":"B","timestamp":18446744073709551615}"#.to_string())
        .await
        .unwrap();
    let answer = lines.next().await.unwrap().unwrap();
    assert_eq!(Confirm::from_json_string(&answer).unwrap(), Confirm::Ack);

    // A well-formed message behind it is still processed.
    lines
        .send(r#"{"kind":"release","from":"B","timestamp":20}"#.to_string())
        .await
        .unwrap();
    lines.next().await.unwrap().unwrap();
    eventually(|| node.status().clock == 21).await;

    // With no peers answering, the request stays pending but is accepted.
    assert_eq!(node.request_access().await.unwrap(), 22);
    assert_eq!(node.status().phase, Phase::Requesting);

    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn occupied_listen_address_fails_to_start() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = taken.local_addr().unwrap().to_string();

    let result = Node::create("A", address).unwrap().start().await;
    assert!(matches!(result, Err(Error::Bind { .. })));
}
