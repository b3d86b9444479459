//! Cluster tests: three members on loopback

use raftkv::command::MemberOp;
use raftkv::common::PeerConfig;
use raftkv::{Client, Config, Node, NodeHandle};
use std::time::Duration;
use tempfile::TempDir;

struct TestCluster {
    nodes: Vec<NodeHandle>,
    _dir: TempDir,
}

impl TestCluster {
    fn start(n: u64) -> Self {
        let dir = TempDir::new().unwrap();
        let listeners: Vec<_> = (0..n)
            .map(|_| std::net::TcpListener::bind("127.0.0.1:0").unwrap())
            .collect();
        let peers: Vec<PeerConfig> = listeners
            .iter()
            .enumerate()
            .map(|(i, l)| PeerConfig {
                id: i as u64 + 1,
                addr: l.local_addr().unwrap().to_string(),
            })
            .collect();

        let nodes = listeners
            .into_iter()
            .zip(peers.iter())
            .map(|(listener, me)| {
                let mut config = Config::for_node(
                    me.id,
                    me.addr.clone(),
                    dir.path().join(format!("node{}", me.id)),
                );
                config.raft.peers = peers.iter().filter(|p| p.id != me.id).cloned().collect();
                config.raft.bootstrap = me.id == 1;
                config.raft.provision_dir = dir.path().to_path_buf();
                Node::with_listener(config, listener).unwrap()
            })
            .collect();

        TestCluster { nodes, _dir: dir }
    }

    async fn leader(&self) -> &NodeHandle {
        for _ in 0..200 {
            let leaders: Vec<_> = self.nodes.iter().filter(|n| n.is_leader()).collect();
            if leaders.len() == 1 {
                return leaders[0];
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("no single leader elected");
    }

    fn follower(&self, leader: &NodeHandle) -> &NodeHandle {
        self.nodes.iter().find(|n| n.id() != leader.id()).unwrap()
    }
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_leader_elected_and_writes_replicate() {
    let cluster = TestCluster::start(3);
    let leader = cluster.leader().await;

    let mut client = Client::connect(leader.addr()).await.unwrap();
    client.set("name", "mars").await.unwrap();

    for node in &cluster.nodes {
        let mut client = Client::connect(node.addr()).await.unwrap();
        let mut value = None;
        for _ in 0..100 {
            value = client.get("name").await.unwrap();
            if value.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(value.as_deref(), Some("mars"), "node {}", node.id());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_forwarding_is_transparent() {
    let cluster = TestCluster::start(3);
    let leader = cluster.leader().await;
    let follower = cluster.follower(leader);

    // wait until the follower knows who leads
    eventually("follower to learn the leader", || {
        follower.consensus().status().leader_id == leader.id()
    })
    .await;

    let mut via_follower = Client::connect(follower.addr()).await.unwrap();
    let mut via_leader = Client::connect(leader.addr()).await.unwrap();

    via_follower.set("k1", "v1").await.unwrap();
    via_leader.set("k2", "v2").await.unwrap();
    assert_eq!(via_leader.get("k1").await.unwrap().as_deref(), Some("v1"));

    assert_eq!(via_follower.del("k2").await.unwrap(), 1);
    assert_eq!(via_leader.del("k2").await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_member_list_reports_leader() {
    let cluster = TestCluster::start(3);
    let leader = cluster.leader().await;

    let mut client = Client::connect(leader.addr()).await.unwrap();
    let listing = client.member(MemberOp::List, "", "").await.unwrap();
    let lines: Vec<&str> = listing.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines.contains(&format!(
        "id={} address={} suffrage=voter isLeader=true",
        leader.id(),
        leader.addr()
    )
    .as_str()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_member_add_provisions_local_node() {
    let cluster = TestCluster::start(3);
    let leader = cluster.leader().await;

    let mut client = Client::connect(leader.addr()).await.unwrap();
    client.set("before", "1").await.unwrap();

    let free = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let new_addr = free.local_addr().unwrap().to_string();
    drop(free);

    let reply = client.member(MemberOp::Add, "4", &new_addr).await.unwrap();
    assert_eq!(reply, "OK");

    let listing = client.member(MemberOp::List, "", "").await.unwrap();
    assert!(listing.contains(&format!("id=4 address={}", new_addr)));

    // the provisioned member catches up from the log
    let mut member = Client::connect(&new_addr).await.unwrap();
    let mut value = None;
    for _ in 0..100 {
        value = member.get("before").await.unwrap();
        if value.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(value.as_deref(), Some("1"));

    let reply = client.member(MemberOp::Remove, "4", "").await.unwrap();
    assert_eq!(reply, "OK");
    let listing = client.member(MemberOp::List, "", "").await.unwrap();
    assert_eq!(listing.lines().count(), 3);

    // the removed member is stopped, not left running in the background
    let mut stopped = false;
    for _ in 0..100 {
        if tokio::net::TcpStream::connect(&new_addr).await.is_err() {
            stopped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(stopped, "removed member still listens on {}", new_addr);
}
