//! Integration tests for a single node over TCP

use raftkv::command::MemberOp;
use raftkv::{Client, Config, Node, NodeHandle};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_test::{assert_err, assert_ok};

fn start_single(data_dir: &Path) -> NodeHandle {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let mut config = Config::for_node(1, addr, data_dir);
    config.raft.bootstrap = true;
    Node::with_listener(config, listener).unwrap()
}

async fn wait_for_leader(node: &NodeHandle) {
    for _ in 0..100 {
        if node.is_leader() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("node {} never became leader", node.id());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_set_get_del() {
    let dir = TempDir::new().unwrap();
    let node = start_single(dir.path());
    wait_for_leader(&node).await;

    let mut client = Client::connect(node.addr()).await.unwrap();
    assert_ok!(client.set("name", "mars").await);
    assert_eq!(client.get("name").await.unwrap().as_deref(), Some("mars"));

    assert_eq!(client.del("name").await.unwrap(), 1);
    assert_eq!(client.del("name").await.unwrap(), 0);
    assert_eq!(client.get("name").await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_raw_wire_exchange() {
    let dir = TempDir::new().unwrap();
    let node = start_single(dir.path());
    wait_for_leader(&node).await;

    let mut stream = TcpStream::connect(node.addr()).await.unwrap();
    stream
        .write_all(b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\nmars\r\n")
        .await
        .unwrap();
    let mut response = [0u8; 5];
    stream.read_exact(&mut response).await.unwrap();
    assert_eq!(&response, b"+OK\r\n");

    // a request split across writes
    stream.write_all(b"*2\r\n$3\r\nGET\r\n$4\r\nna").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    stream.write_all(b"me\r\n").await.unwrap();
    let mut response = [0u8; 10];
    stream.read_exact(&mut response).await.unwrap();
    assert_eq!(&response, b"$4\r\nmars\r\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_command_closes_connection() {
    let dir = TempDir::new().unwrap();
    let node = start_single(dir.path());

    let mut stream = TcpStream::connect(node.addr()).await.unwrap();
    stream
        .write_all(b"*2\r\n$4\r\nPING\r\n$1\r\nx\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    assert!(response.starts_with(b"-"), "got {:?}", response);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_member_list_single_node() {
    let dir = TempDir::new().unwrap();
    let node = start_single(dir.path());
    wait_for_leader(&node).await;

    let mut client = Client::connect(node.addr()).await.unwrap();
    let listing = client.member(MemberOp::List, "", "").await.unwrap();
    assert_eq!(
        listing,
        format!("id=1 address={} suffrage=voter isLeader=true", node.addr())
    );

    let err = assert_err!(client.member(MemberOp::Remove, "not-a-number", "").await);
    assert!(matches!(err, raftkv::Error::Remote(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_data_survives_restart() {
    let dir = TempDir::new().unwrap();

    {
        let node = start_single(dir.path());
        wait_for_leader(&node).await;
        let mut client = Client::connect(node.addr()).await.unwrap();
        client.set("durable", "yes").await.unwrap();
        node.shutdown();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let node = start_single(dir.path());
    let mut client = Client::connect(node.addr()).await.unwrap();
    assert_eq!(client.get("durable").await.unwrap().as_deref(), Some("yes"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_frame_closes_connection() {
    let dir = TempDir::new().unwrap();
    let node = start_single(dir.path());

    let mut stream = TcpStream::connect(node.addr()).await.unwrap();
    stream.write_all(b"!bogus\r\n").await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    assert!(response.starts_with(b"-"), "got {:?}", response);
}
