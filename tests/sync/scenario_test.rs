// Scenario Tests
// Small hand-wired meshes exercising propagation, relaying and stopped members

use datafan::model::{Key, KeyIdPair, MemberId};
use datafan::sim::{run_demo, LocalMesh};
use datafan::sync::EngineConfig;
use datafan::transport::Connector;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(10);

fn config() -> EngineConfig {
    EngineConfig::default().with_sync_period(Duration::from_millis(20))
}

// ============================================================================
// PROPAGATION
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_three_members_end_to_end() {
    let mut mesh = LocalMesh::with_ids(&["M1", "M2", "M3"], config()).unwrap();
    mesh.connect(0, 1).await.unwrap();
    mesh.connect(2, 1).await.unwrap();
    mesh.start();

    mesh.member(0).write_value("david", "benque").unwrap();
    assert!(mesh.wait_for_count(1, TIMEOUT).await);

    mesh.member(1).write_value("eric", "mountain").unwrap();
    mesh.member(2).write_value("cedric", "lamoriniere").unwrap();
    assert!(mesh.wait_for_count(3, TIMEOUT).await);

    mesh.member(1).write_value("eric", "super mountain").unwrap();
    mesh.member(0).remove("david").unwrap();
    let eric = KeyIdPair::new(MemberId::from("M2"), Key::from("eric"));
    assert!(mesh.wait_for_value(&eric, "super mountain", TIMEOUT).await);
    assert!(mesh.wait_for_count(2, TIMEOUT).await);
    assert!(mesh.converged());

    assert_eq!(
        mesh.owners(0),
        vec![MemberId::from("M2"), MemberId::from("M3")]
    );
    mesh.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_items_travel_through_intermediate_member() {
    let mut mesh = LocalMesh::with_ids(&["A", "B", "C"], config()).unwrap();
    mesh.connect(0, 1).await.unwrap();
    mesh.connect(1, 2).await.unwrap();
    mesh.start();

    mesh.member(0).write_value("k", "from A").unwrap();
    let pair = KeyIdPair::new(MemberId::from("A"), Key::from("k"));

    assert!(mesh.wait_for_value(&pair, "from A", TIMEOUT).await);
    assert_eq!(mesh.engine(0).connector().peers().len(), 1);
    mesh.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unconnected_members_stay_apart() {
    let mut mesh = LocalMesh::with_ids(&["A", "B"], config()).unwrap();
    mesh.start();

    mesh.member(0).write_value("k", "v").unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(mesh.counts(), vec![1, 0]);
    mesh.stop().await.unwrap();
}

// ============================================================================
// STOPPED MEMBERS
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stopped_relay_blocks_propagation() {
    let mut mesh = LocalMesh::with_ids(&["A", "B", "C"], config()).unwrap();
    mesh.connect(0, 1).await.unwrap();
    mesh.connect(1, 2).await.unwrap();
    mesh.start();
    mesh.stop_member(1).await.unwrap();

    mesh.member(0).write_value("k", "v").unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(mesh.counts()[2], 0);
    mesh.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_late_starter_catches_up() {
    let mut mesh = LocalMesh::with_ids(&["A", "B"], config()).unwrap();
    mesh.connect(0, 1).await.unwrap();
    mesh.start_only(&[0]);

    mesh.member(0).write_value("k1", "v").unwrap();
    mesh.member(0).write_value("k2", "v").unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    mesh.start_only(&[1]);
    assert!(mesh.wait_for_count(2, TIMEOUT).await);
    mesh.stop().await.unwrap();
}

// ============================================================================
// DEMO
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_demo_converges() {
    let converged = run_demo(config(), TIMEOUT).await.unwrap();
    assert!(converged);
}
