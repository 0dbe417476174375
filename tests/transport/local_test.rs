// LocalConnector Tests
// Tests for in-process routing of digests, requests and responses

use datafan::model::{never, DataRequest, IndexMap, Key, KeyIdPair, MemberId, Record};
use datafan::storage::MapStore;
use datafan::sync::{Member, Shutdown};
use datafan::transport::{Connector, ConnectorConfig, ConnectorError, LocalConnector};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

fn connector(id: &str) -> Arc<LocalConnector<Record>> {
    let member = Member::new(id, Arc::new(MapStore::<Record>::new()));
    LocalConnector::new(member, ConnectorConfig::default())
}

fn pair(owner: &str, key: &str) -> KeyIdPair {
    KeyIdPair::new(MemberId::from(owner), Key::from(key))
}

// ============================================================================
// PEERS
// ============================================================================

#[tokio::test]
async fn test_connect_twice_keeps_one_edge() {
    let a = connector("A");
    let b = connector("B");

    a.connect(Arc::clone(&b)).await.unwrap();
    b.connect(Arc::clone(&a)).await.unwrap();

    assert_eq!(a.peers(), vec![MemberId::from("B")]);
    assert_eq!(b.peers(), vec![MemberId::from("A")]);
}

#[tokio::test]
async fn test_disconnect_is_one_sided() {
    let a = connector("A");
    let b = connector("B");
    a.connect(Arc::clone(&b)).await.unwrap();

    assert!(a.disconnect(&MemberId::from("B")));
    assert!(!a.disconnect(&MemberId::from("B")));
    assert!(a.peers().is_empty());
    assert_eq!(b.peers(), vec![MemberId::from("A")]);
}

#[tokio::test]
async fn test_self_connect_is_rejected() {
    let a = connector("A");
    let result = a.connect_one_way(Arc::clone(&a));
    assert!(matches!(result, Err(ConnectorError::SelfConnect(id)) if id == MemberId::from("A")));
}

#[tokio::test]
async fn test_connected_pair_is_freed_when_dropped() {
    let a = connector("A");
    let b = connector("B");
    a.connect(Arc::clone(&b)).await.unwrap();
    let a_weak = Arc::downgrade(&a);
    let b_weak = Arc::downgrade(&b);

    drop(a);
    drop(b);

    assert!(a_weak.upgrade().is_none());
    assert!(b_weak.upgrade().is_none());
}

#[tokio::test]
async fn test_dropped_peer_receives_nothing() {
    let a = connector("A");
    let b = connector("B");
    let c = connector("C");
    a.connect(Arc::clone(&b)).await.unwrap();
    a.connect(Arc::clone(&c)).await.unwrap();
    let mut c_rx = c.mailboxes().take_engine_receivers().unwrap();

    drop(b);
    assert_eq!(a.peers(), vec![MemberId::from("C")]);

    a.process_index_map(IndexMap::new(MemberId::from("A"))).await;
    assert_eq!(c_rx.receive_index.recv().await.unwrap().source, MemberId::from("A"));
}

// ============================================================================
// DIRECT DELIVERY
// ============================================================================

#[tokio::test]
async fn test_index_map_reaches_every_peer() {
    let a = connector("A");
    let b = connector("B");
    let c = connector("C");
    a.connect(Arc::clone(&b)).await.unwrap();
    a.connect(Arc::clone(&c)).await.unwrap();

    let mut b_rx = b.mailboxes().take_engine_receivers().unwrap();
    let mut c_rx = c.mailboxes().take_engine_receivers().unwrap();

    a.process_index_map(IndexMap::new(MemberId::from("A"))).await;

    assert_eq!(b_rx.receive_index.recv().await.unwrap().source, MemberId::from("A"));
    assert_eq!(c_rx.receive_index.recv().await.unwrap().source, MemberId::from("A"));
}

#[tokio::test]
async fn test_data_request_is_answered_to_requester() {
    let a = connector("A");
    let b = connector("B");
    a.connect(Arc::clone(&b)).await.unwrap();
    b.local_member().write_value("k", "v").unwrap();
    let mut a_rx = a.mailboxes().take_engine_receivers().unwrap();

    let request = DataRequest::new(
        MemberId::from("A"),
        MemberId::from("B"),
        vec![pair("B", "k"), pair("B", "missing")],
    )
    .with_build_time(MemberId::from("B"), never());
    b.process_data_request(request).await;

    let response = a_rx.receive_data.recv().await.unwrap();
    assert_eq!(response.items.len(), 1);
    assert_eq!(response.items[0].value(), "v");
    assert_eq!(response.associated_build_time[&MemberId::from("B")], never());
}

#[tokio::test]
async fn test_request_from_unknown_member_is_dropped() {
    let b = connector("B");
    b.local_member().write_value("k", "v").unwrap();
    let mut b_rx = b.mailboxes().take_engine_receivers().unwrap();

    let request = DataRequest::new(MemberId::from("Z"), MemberId::from("B"), vec![pair("B", "k")]);
    b.process_data_request(request).await;

    assert!(b_rx.receive_data.try_recv().is_err());
}

// ============================================================================
// ROUTING
// ============================================================================

#[tokio::test]
async fn test_forwarded_request_is_served_by_destination_router() {
    let a = connector("A");
    let b = connector("B");
    a.connect(Arc::clone(&b)).await.unwrap();
    b.local_member().write_value("k", "v").unwrap();
    let mut a_rx = a.mailboxes().take_engine_receivers().unwrap();

    let shutdown = Shutdown::new();
    let a_run = tokio::spawn(Arc::clone(&a).run(shutdown.signal()));
    let b_run = tokio::spawn(Arc::clone(&b).run(shutdown.signal()));

    a.mailboxes()
        .request_keys(DataRequest::new(
            MemberId::from("A"),
            MemberId::from("B"),
            vec![pair("B", "k")],
        ))
        .await
        .unwrap();

    let response = timeout(WAIT, a_rx.receive_data.recv()).await.unwrap().unwrap();
    assert_eq!(response.items.len(), 1);

    shutdown.trigger();
    a_run.await.unwrap().unwrap();
    b_run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_forward_to_unconnected_destination_is_dropped() {
    let a = connector("A");
    let b = connector("B");
    a.connect(Arc::clone(&b)).await.unwrap();
    let mut a_rx = a.mailboxes().take_engine_receivers().unwrap();
    let mut b_rx = b.mailboxes().take_engine_receivers().unwrap();
    let mut b_router = b.mailboxes().take_router_receivers().unwrap();

    a.forward_data_request(DataRequest::new(
        MemberId::from("A"),
        MemberId::from("Z"),
        vec![pair("Z", "k")],
    ))
    .await;

    assert!(a_rx.receive_data.try_recv().is_err());
    assert!(b_rx.receive_data.try_recv().is_err());
    assert!(b_router.request_keys.try_recv().is_err());
    assert_eq!(a.peers(), vec![MemberId::from("B")]);
}

#[tokio::test]
async fn test_router_fans_out_queued_digest() {
    let a = connector("A");
    let b = connector("B");
    a.connect(Arc::clone(&b)).await.unwrap();
    let mut b_rx = b.mailboxes().take_engine_receivers().unwrap();

    let shutdown = Shutdown::new();
    let a_run = tokio::spawn(Arc::clone(&a).run(shutdown.signal()));

    a.mailboxes()
        .send_index_map(IndexMap::new(MemberId::from("A")))
        .await
        .unwrap();
    let received = timeout(WAIT, b_rx.receive_index.recv()).await.unwrap().unwrap();
    assert_eq!(received.source, MemberId::from("A"));

    shutdown.trigger();
    a_run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_router_runs_once() {
    let a = connector("A");
    let shutdown = Shutdown::new();
    shutdown.trigger();

    Arc::clone(&a).run(shutdown.signal()).await.unwrap();
    let second = Arc::clone(&a).run(shutdown.signal()).await;
    assert!(matches!(second, Err(ConnectorError::AlreadyRunning)));
}
