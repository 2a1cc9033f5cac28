// tests/integration_test.rs

//! End-to-end scenarios against in-process fake sentinel and store nodes.

mod support;

use sentinel_pool::config::ClientConfig;
use sentinel_pool::errors::SentinelPoolError;
use sentinel_pool::protocol::RespFrame;
use sentinel_pool::state::ClientState;
use sentinel_pool::SentinelPool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use support::{reported, FakeNode, NodeRole};

const MASTER_NAME: &str = "mymaster";

fn config_for(sentinel: &FakeNode, pool_size: usize) -> ClientConfig {
    let mut config = ClientConfig::new(sentinel.addr.clone(), MASTER_NAME);
    config.pool_size = pool_size;
    config.retry_delay = Duration::from_millis(50);
    config.resync_delay = Duration::from_millis(10);
    config
}

async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn test_bootstrap_resolves_master_and_fills_pool() {
    let master = FakeNode::spawn(NodeRole::Master, None, vec![]).await;
    let sentinel =
        FakeNode::spawn(NodeRole::Sentinel, Some(reported(&master.addr)), vec![]).await;

    let client = SentinelPool::new(config_for(&sentinel, 3)).await.unwrap();

    assert_eq!(client.state(), ClientState::Healthy);
    assert_eq!(client.master_addr(), Some(master.addr.clone()));
    assert_eq!(client.idle_connections(), 3);
    assert!(client.known_sentinels().contains(&sentinel.addr));

    // The candidate was verified with ROLE before installation.
    assert!(master.command_count("ROLE") >= 1);

    let reply = client.execute(&["GET", "b"]).await.unwrap();
    match reply {
        RespFrame::BulkString(b) => assert_eq!(&b[..], b"b"),
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn test_bootstrap_learns_peer_sentinels() {
    let master = FakeNode::spawn(NodeRole::Master, None, vec![]).await;
    // The peer is unreachable; it is still recorded, just never preferred.
    let peers = vec![("127.0.0.1".to_string(), "1".to_string())];
    let sentinel =
        FakeNode::spawn(NodeRole::Sentinel, Some(reported(&master.addr)), peers).await;

    let client = SentinelPool::new(config_for(&sentinel, 1)).await.unwrap();

    assert_eq!(
        client.known_sentinels(),
        vec![sentinel.addr.clone(), "127.0.0.1:1".to_string()]
    );
    assert_eq!(client.preferred_sentinel(), sentinel.addr);
    assert!(sentinel.command_count("SENTINEL sentinels") >= 1);
}

#[tokio::test]
async fn test_bootstrap_rejects_non_sentinel_endpoint() {
    let master = FakeNode::spawn(NodeRole::Master, None, vec![]).await;

    match SentinelPool::new(config_for(&master, 1)).await.err() {
        Some(SentinelPoolError::Bootstrap(message)) => {
            assert!(message.contains("master"), "message: {message}")
        }
        other => panic!("expected a bootstrap error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_refused_master_triggers_failover_and_replays_subscriptions() {
    let master1 = FakeNode::spawn(NodeRole::Master, None, vec![]).await;
    let master2 = FakeNode::spawn(NodeRole::Master, None, vec![]).await;
    let current = reported(&master1.addr);
    let sentinel =
        FakeNode::spawn(NodeRole::Sentinel, Some(current.clone()), vec![]).await;

    let client = SentinelPool::new(config_for(&sentinel, 1)).await.unwrap();
    assert_eq!(client.master_addr(), Some(master1.addr.clone()));

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    client
        .register_subscription(
            "SUBSCRIBE",
            Arc::new(move |_raw, _key, payload| {
                if let Ok(payload) = payload {
                    let _ = tx.send(payload.to_string());
                }
            }),
            &["news"],
        )
        .await
        .unwrap();

    // The failover: the old master goes away and the sentinel set reports
    // the replacement.
    *current.lock() = {
        let (host, port) = master2.addr.rsplit_once(':').unwrap();
        (host.to_string(), port.to_string())
    };
    master1.shutdown();

    // Stale pooled connections fail first; the refused redial then forces a
    // resolution cycle and commands start landing on the replacement.
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if client.execute(&["GET", "b"]).await.is_ok() {
            break;
        }
        if Instant::now() > deadline {
            panic!("client never recovered onto the new master");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(client.master_addr(), Some(master2.addr.clone()));
    assert_eq!(client.state(), ClientState::Healthy);

    // The subscription followed the failover.
    wait_for("subscription replay onto the new master", || {
        master2.command_count("SUBSCRIBE news") >= 1
    })
    .await;
    master2.publish("news", "after failover");
    let delivered = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("delivery timed out")
        .unwrap();
    assert_eq!(delivered, "after failover");
}

#[tokio::test]
async fn test_resolution_installs_only_a_verified_master() {
    let master1 = FakeNode::spawn(NodeRole::Master, None, vec![]).await;
    let master2 = FakeNode::spawn(NodeRole::Master, None, vec![]).await;
    let replica = FakeNode::spawn(NodeRole::Replica, None, vec![]).await;
    let current = reported(&master1.addr);
    let sentinel =
        FakeNode::spawn(NodeRole::Sentinel, Some(current.clone()), vec![]).await;

    let client = SentinelPool::new(config_for(&sentinel, 1)).await.unwrap();

    // The sentinel's answer lags the failover: it reports a node that is
    // still a replica, then catches up.
    *current.lock() = {
        let (host, port) = replica.addr.rsplit_once(':').unwrap();
        (host.to_string(), port.to_string())
    };
    let catch_up = {
        let current = current.clone();
        let addr = master2.addr.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let (host, port) = addr.rsplit_once(':').unwrap();
            *current.lock() = (host.to_string(), port.to_string());
        })
    };

    client.force_reset().await;
    catch_up.await.unwrap();

    // The replica was probed and rejected; only the real master went in.
    assert!(replica.command_count("ROLE") >= 1);
    assert_eq!(client.master_addr(), Some(master2.addr.clone()));
    assert_eq!(client.state(), ClientState::Healthy);
}

#[tokio::test]
async fn test_odown_events_gate_connection_reuse() {
    let master = FakeNode::spawn(NodeRole::Master, None, vec![]).await;
    let sentinel =
        FakeNode::spawn(NodeRole::Sentinel, Some(reported(&master.addr)), vec![]).await;

    let client = SentinelPool::new(config_for(&sentinel, 2)).await.unwrap();
    assert!(client.is_up());

    wait_for("the monitor subscription", || {
        master.command_count("SUBSCRIBE +odown") >= 1
    })
    .await;

    master.publish("+odown", &format!("master {MASTER_NAME} 127.0.0.1 6379"));
    wait_for("the down flag", || !client.is_up()).await;

    // Commands still work while down, but their connections are discarded
    // instead of returned.
    assert_eq!(client.idle_connections(), 2);
    client.execute(&["GET", "b"]).await.unwrap();
    assert_eq!(client.idle_connections(), 1);

    master.publish("-odown", &format!("master {MASTER_NAME} 127.0.0.1 6379"));
    wait_for("the up flag", || client.is_up()).await;

    client.execute(&["GET", "b"]).await.unwrap();
    assert_eq!(client.idle_connections(), 1);
}

#[tokio::test]
async fn test_concurrent_force_resets_collapse_to_one_cycle() {
    let master = FakeNode::spawn(NodeRole::Master, None, vec![]).await;
    let sentinel =
        FakeNode::spawn(NodeRole::Sentinel, Some(reported(&master.addr)), vec![]).await;

    let client = SentinelPool::new(config_for(&sentinel, 1)).await.unwrap();
    let before = sentinel.command_count("SENTINEL get-master-addr-by-name");

    tokio::join!(client.force_reset(), client.force_reset());

    assert_eq!(
        sentinel.command_count("SENTINEL get-master-addr-by-name"),
        before + 1
    );
    assert_eq!(client.state(), ClientState::Healthy);
}

#[tokio::test]
async fn test_server_error_replies_return_the_connection() {
    let master = FakeNode::spawn(NodeRole::Master, None, vec![]).await;
    let sentinel =
        FakeNode::spawn(NodeRole::Sentinel, Some(reported(&master.addr)), vec![]).await;

    let client = SentinelPool::new(config_for(&sentinel, 1)).await.unwrap();

    let result = client.execute(&["NOSUCHCOMMAND"]).await;
    assert!(matches!(result, Err(SentinelPoolError::ServerError(_))));
    // An error reply is a healthy exchange; the connection goes back.
    assert_eq!(client.idle_connections(), 1);
}
