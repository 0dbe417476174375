// Reconciliation Tests
// Tests for how one engine reacts to peer digests and fetched data

use chrono::Duration;
use datafan::model::{
    never, DataResponse, Index, IndexMap, Key, KeyIdPair, MemberId, Record, StampedKey,
    StampedKeys, Timestamp,
};
use datafan::storage::{MapStore, Store};
use datafan::sync::{Engine, EngineConfig, Member};
use datafan::transport::{ConnectorConfig, LocalConnector};
use std::sync::Arc;

type TestEngine = Engine<Record, LocalConnector<Record>>;

fn at(ms: i64) -> Timestamp {
    never() + Duration::milliseconds(ms)
}

fn engine(id: &str) -> (TestEngine, Arc<MapStore<Record>>) {
    let store = Arc::new(MapStore::<Record>::new());
    let member = Member::new(id, Arc::clone(&store) as Arc<dyn Store<Record>>);
    let connector = LocalConnector::new(member, ConnectorConfig::default());
    (Engine::new(connector, EngineConfig::default()).unwrap(), store)
}

fn digest(source: &str, owner: &str, build_ms: i64, keys: &[(&str, i64)]) -> IndexMap {
    let stamped = keys
        .iter()
        .map(|(key, ms)| StampedKey::new(Key::from(*key), at(*ms)))
        .collect();
    IndexMap::new(MemberId::from(source)).with_index(
        MemberId::from(owner),
        Index::new(at(build_ms), StampedKeys::sorted(stamped)),
    )
}

fn record(owner: &str, key: &str, value: &str, ms: i64) -> Record {
    Record::with_timestamp(MemberId::from(owner), key, value, at(ms))
}

// ============================================================================
// FETCHING
// ============================================================================

#[tokio::test]
async fn test_missing_keys_are_requested_from_sender() {
    let (e, _) = engine("A");

    let report = e
        .check_and_get_updates(&digest("B", "C", 10, &[("x", 1), ("y", 2)]))
        .await;

    assert_eq!(report.requested.len(), 1);
    let request = &report.requested[0];
    assert_eq!(request.source, MemberId::from("A"));
    assert_eq!(request.destination, MemberId::from("B"));
    assert_eq!(request.associated_build_time[&MemberId::from("C")], at(10));
    assert_eq!(
        request.key_id_pairs,
        vec![
            KeyIdPair::new(MemberId::from("C"), Key::from("x")),
            KeyIdPair::new(MemberId::from("C"), Key::from("y")),
        ]
    );
    assert!(report.deleted.is_empty());
}

#[tokio::test]
async fn test_equal_timestamps_keep_local_copy() {
    let (e, store) = engine("A");
    store.set(record("C", "x", "local", 5)).unwrap();

    let report = e.check_and_get_updates(&digest("B", "C", 10, &[("x", 5)])).await;

    assert!(report.is_empty());
    assert_eq!(e.freshness(&MemberId::from("C")), at(10));
}

#[tokio::test]
async fn test_same_digest_twice_is_idempotent() {
    let (e, store) = engine("A");
    store.set(record("C", "gone", "v", 1)).unwrap();
    let remote = digest("B", "C", 10, &[]);

    let first = e.check_and_get_updates(&remote).await;
    let second = e.check_and_get_updates(&remote).await;

    assert_eq!(first.deleted.len(), 1);
    assert!(second.is_empty());
}

#[tokio::test]
async fn test_pending_fetch_is_not_repeated() {
    let (e, _) = engine("A");
    let remote = digest("B", "C", 10, &[("x", 1)]);

    let first = e.check_and_get_updates(&remote).await;
    let again = e.check_and_get_updates(&digest("D", "C", 10, &[("x", 1)])).await;

    assert_eq!(first.requested.len(), 1);
    assert!(again.requested.is_empty());
}

// ============================================================================
// DELETION
// ============================================================================

#[tokio::test]
async fn test_unlisted_keys_are_deleted() {
    let (e, store) = engine("A");
    store
        .multi_set(vec![record("C", "keep", "v", 1), record("C", "drop", "v", 1)])
        .unwrap();

    let report = e.check_and_get_updates(&digest("B", "C", 10, &[("keep", 1)])).await;

    assert_eq!(
        report.deleted,
        vec![KeyIdPair::new(MemberId::from("C"), Key::from("drop"))]
    );
    assert_eq!(store.count().unwrap(), 1);
    assert_eq!(e.freshness(&MemberId::from("C")), at(10));
}

#[tokio::test]
async fn test_owner_absent_from_digest_is_left_alone() {
    let (e, store) = engine("A");
    store.set(record("C", "x", "v", 1)).unwrap();

    let report = e.check_and_get_updates(&digest("B", "D", 10, &[])).await;

    assert!(report.deleted.is_empty());
    assert_eq!(store.count().unwrap(), 1);
}

#[tokio::test]
async fn test_own_entry_is_never_reconciled() {
    let (e, store) = engine("A");
    store.set(record("A", "mine", "v", 1)).unwrap();

    let report = e.check_and_get_updates(&digest("B", "A", 999, &[])).await;

    assert!(report.is_empty());
    assert_eq!(store.count().unwrap(), 1);
}

#[tokio::test]
async fn test_own_digest_is_ignored() {
    let (e, _) = engine("A");

    let report = e.check_and_get_updates(&digest("A", "C", 10, &[("x", 1)])).await;

    assert!(report.is_empty());
}

// ============================================================================
// FRESHNESS
// ============================================================================

#[tokio::test]
async fn test_older_digest_is_skipped() {
    let (e, store) = engine("A");
    e.check_and_get_updates(&digest("B", "C", 20, &[])).await;
    store.set(record("C", "x", "v", 1)).unwrap();

    let report = e.check_and_get_updates(&digest("D", "C", 10, &[])).await;

    assert!(report.is_empty());
    assert_eq!(store.count().unwrap(), 1);
}

#[tokio::test]
async fn test_freshness_never_moves_backwards() {
    let (e, _) = engine("A");
    let owner = MemberId::from("C");

    let newer = e.check_and_get_updates(&digest("B", "C", 20, &[("x", 2)])).await;
    let older = e.check_and_get_updates(&digest("D", "C", 10, &[("x", 1)])).await;
    assert!(older.requested.is_empty());

    let newer_response = DataResponse::for_request(&newer.requested[0], vec![record("C", "x", "new", 2)]);
    assert_eq!(e.apply_data_response(newer_response), 1);
    assert_eq!(e.freshness(&owner), at(20));

    let late = DataResponse {
        associated_build_time: [(owner.clone(), at(10))].into_iter().collect(),
        items: vec![record("C", "x", "old", 1)],
    };
    assert_eq!(e.apply_data_response(late), 0);
    assert_eq!(e.freshness(&owner), at(20));
}

#[tokio::test]
async fn test_response_never_overwrites_newer_item() {
    let (e, store) = engine("A");
    store.set(record("C", "x", "newer", 9)).unwrap();

    let response = DataResponse {
        associated_build_time: Default::default(),
        items: vec![record("C", "x", "older", 3)],
    };

    assert_eq!(e.apply_data_response(response), 0);
    let kept = store
        .get(&KeyIdPair::new(MemberId::from("C"), Key::from("x")))
        .unwrap()
        .unwrap();
    assert_eq!(kept.value(), "newer");
}

// ============================================================================
// OUTBOUND DIGEST
// ============================================================================

#[test]
fn test_local_digest_lists_every_owner() {
    let (e, store) = engine("A");
    e.member().write_value("k", "v").unwrap();
    store.set(record("C", "x", "v", 1)).unwrap();

    let map = e.local_index_map().unwrap();

    assert_eq!(map.source, MemberId::from("A"));
    assert_eq!(map.indexes.len(), 2);
    assert!(map.indexes[&MemberId::from("A")].build_time > never());
    assert_eq!(map.indexes[&MemberId::from("C")].build_time, never());
}
