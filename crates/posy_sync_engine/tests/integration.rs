//! End-to-end sync scenarios against in-process remotes.

use posy_core::{Clock, RecordStore, Snapshot, StoreState};
use posy_sync_engine::{
    CredentialProvider, CycleOutcome, CycleTrigger, DirectoryRemote, EngineState, MemoryRemote,
    NoCredentials, ReconciliationEngine, RemoteFault, RemoteStore, RemoteSyncClient, Resolution,
    RetryConfig, StaticCredentials, SyncConfig, SyncStateStore, DEFAULT_FOLDER,
    DEFAULT_REMOTE_FILE,
};
use posy_testkit::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn engine_with(
    shop: &TestStore,
    remote: Arc<dyn RemoteStore>,
    credentials: Arc<dyn CredentialProvider>,
) -> ReconciliationEngine {
    let config = SyncConfig::new().with_retry(RetryConfig::no_retry());
    ReconciliationEngine::new(
        shop.store.clone(),
        shop.backups.clone(),
        SyncStateStore::open(shop.backend.clone()).unwrap(),
        config,
    )
    .with_client(RemoteSyncClient::new(
        remote,
        credentials,
        RetryConfig::no_retry(),
    ))
}

fn engine(shop: &TestStore, remote: &Arc<MemoryRemote>) -> ReconciliationEngine {
    engine_with(shop, remote.clone(), Arc::new(NoCredentials))
}

fn rose() -> RecordId {
    RecordId::new("rose-red").unwrap()
}

fn remote_state(remote: &MemoryRemote) -> StoreState {
    remote.snapshot().unwrap().expect("remote holds a snapshot").state
}

fn price(store: &RecordStore, id: &RecordId) -> serde_json::Value {
    store
        .get(Collection::Flowers, id)
        .unwrap()
        .as_catalog()
        .unwrap()
        .attributes["price"]
        .clone()
}

/// Makes the remote look as if another device changed it.
fn publish_remote(remote: &MemoryRemote, state: StoreState, shop: &TestStore) {
    shop.clock.advance(Duration::from_secs(1));
    let snapshot = Snapshot::new(state, shop.clock.now()).unwrap();
    remote.put_snapshot(&snapshot).unwrap();
}

#[test]
fn newer_local_record_wins_and_is_pushed() {
    let shop = TestStore::memory();
    put_flower(&shop.store, "rose-red", 100);
    shop.clock.advance(Duration::from_secs(10));
    update_flower(&shop.store, "rose-red", 200);
    shop.clock.advance(Duration::from_secs(10));
    update_flower(&shop.store, "rose-red", 300);

    // Another device holds v2, modified earlier.
    let remote = Arc::new(MemoryRemote::new());
    let mut theirs = StoreState::new();
    theirs.insert(
        Collection::Flowers,
        stamped_flower("rose-red", 250, 2, TEST_EPOCH),
    );
    remote
        .put_snapshot(&Snapshot::new(theirs, TEST_EPOCH).unwrap())
        .unwrap();
    let before = remote.marker();

    let engine = engine(&shop, &remote);
    let report = engine.run_cycle(CycleTrigger::Manual).unwrap();

    assert_eq!(report.outcome, CycleOutcome::Synced);
    assert!(report.pushed);
    assert_eq!(report.applied_remote, 0);
    assert_eq!(price(&shop.store, &rose()), 300);

    let pushed = remote_state(&remote);
    let key = RecordKey::new(Collection::Flowers, rose());
    assert_eq!(pushed.get(&key).unwrap().version(), Version::new(3));
    assert_ne!(remote.marker(), before);
    assert_eq!(engine.sync_state().remote_marker, remote.marker());
    assert!(engine.pending_conflicts().is_empty());
}

#[test]
fn remote_changes_are_applied_locally() {
    let shop = TestStore::memory();
    put_flower(&shop.store, "rose-red", 100);
    let remote = Arc::new(MemoryRemote::new());
    let engine = engine(&shop, &remote);
    assert_eq!(
        engine.run_cycle(CycleTrigger::Manual).unwrap().outcome,
        CycleOutcome::Synced
    );

    let mut theirs = remote_state(&remote);
    theirs.insert(
        Collection::Flowers,
        stamped_flower("tulip", 80, 1, shop.clock.now()),
    );
    publish_remote(&remote, theirs, &shop);
    let uploads = remote.upload_count();

    // The store is clean and the interval has not elapsed.
    let report = engine.run_cycle(CycleTrigger::Scheduled).unwrap();
    assert_eq!(report.outcome, CycleOutcome::Skipped);

    let report = engine.run_cycle(CycleTrigger::Manual).unwrap();

    assert_eq!(report.outcome, CycleOutcome::Synced);
    assert_eq!(report.applied_remote, 1);
    assert!(!report.pushed);
    assert_eq!(remote.upload_count(), uploads);
    assert_eq!(
        price(&shop.store, &RecordId::new("tulip").unwrap()),
        80
    );
    assert_eq!(engine.sync_state().remote_marker, remote.marker());
    assert!(!shop.store.is_dirty());
}

#[test]
fn both_sides_changed_keeps_both_until_resolved() {
    let shop = TestStore::memory();
    put_flower(&shop.store, "rose-red", 100);
    let remote = Arc::new(MemoryRemote::new());
    let engine = engine(&shop, &remote);
    engine.run_cycle(CycleTrigger::Manual).unwrap();
    let synced_marker = engine.sync_state().remote_marker;

    // Local edit...
    shop.clock.advance(Duration::from_secs(5));
    update_flower(&shop.store, "rose-red", 120);
    // ...and a different remote edit.
    let mut theirs = remote_state(&remote);
    theirs.insert(
        Collection::Flowers,
        stamped_flower("rose-red", 150, 2, shop.clock.now()),
    );
    publish_remote(&remote, theirs, &shop);
    let remote_marker = remote.marker();

    let report = engine.run_cycle(CycleTrigger::Manual).unwrap();
    let CycleOutcome::ConflictPending(conflicts) = &report.outcome else {
        panic!("expected a conflict, got {:?}", report.outcome);
    };
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].key, RecordKey::new(Collection::Flowers, rose()));
    assert_eq!(engine.state(), EngineState::ConflictPending);

    // Local stays active, the remote version is retained, nothing pushed.
    assert_eq!(price(&shop.store, &rose()), 120);
    let copies = shop.store.conflicts();
    let copy = copies
        .get(&RecordKey::new(Collection::Flowers, rose()))
        .expect("conflict copy kept");
    assert_eq!(
        copy.remote.as_catalog().unwrap().attributes["price"],
        150
    );
    assert_eq!(remote.marker(), remote_marker);
    assert_eq!(engine.sync_state().remote_marker, synced_marker);

    // A second cycle does not duplicate the conflict.
    let report = engine.run_cycle(CycleTrigger::Manual).unwrap();
    assert!(matches!(report.outcome, CycleOutcome::ConflictPending(ref c) if c.len() == 1));
    assert_eq!(shop.store.conflicts().len(), 1);

    let resolved = engine
        .resolve_conflict(
            &RecordKey::new(Collection::Flowers, rose()),
            Resolution::AcceptRemote,
        )
        .unwrap();
    assert!(resolved.version() > Version::new(2));
    assert!(shop.store.conflicts().is_empty());
    assert_eq!(engine.state(), EngineState::Idle);

    let report = engine.run_cycle(CycleTrigger::Manual).unwrap();
    assert_eq!(report.outcome, CycleOutcome::Synced);
    assert!(report.pushed);
    let pushed = remote_state(&remote);
    let record = pushed
        .get(&RecordKey::new(Collection::Flowers, rose()))
        .unwrap();
    assert_eq!(record.as_catalog().unwrap().attributes["price"], 150);
    assert_eq!(record.version(), resolved.version());
}

#[test]
fn records_taken_before_a_failed_push_are_not_conflicts_later() {
    let shop = TestStore::memory();
    put_flower(&shop.store, "rose-red", 100);
    let remote = Arc::new(MemoryRemote::new());
    let engine = engine(&shop, &remote);
    engine.run_cycle(CycleTrigger::Manual).unwrap();

    // Another device moves the rose to v2 while we add a tulip.
    let mut theirs = remote_state(&remote);
    theirs.insert(
        Collection::Flowers,
        stamped_flower("rose-red", 150, 2, shop.clock.now()),
    );
    publish_remote(&remote, theirs, &shop);
    put_flower(&shop.store, "tulip", 80);

    remote.set_fault(RemoteFault::QuotaExceeded);
    let report = engine.run_cycle(CycleTrigger::Manual).unwrap();
    assert!(matches!(report.outcome, CycleOutcome::QuotaExceeded(_)));
    assert_eq!(report.applied_remote, 1);
    let key = RecordKey::new(Collection::Flowers, rose());
    assert_eq!(shop.store.get(Collection::Flowers, &rose()).unwrap().version(), Version::new(2));
    assert_eq!(
        engine.sync_state().base.get(&key).map(|m| m.version),
        Some(Version::new(2))
    );

    // Editing on top of the remote's version is a plain local change.
    remote.clear_fault();
    shop.clock.advance(Duration::from_secs(5));
    update_flower(&shop.store, "rose-red", 175);
    let report = engine.run_cycle(CycleTrigger::Manual).unwrap();
    assert_eq!(report.outcome, CycleOutcome::Synced);
    assert!(shop.store.conflicts().is_empty());
    let pushed = remote_state(&remote);
    assert_eq!(pushed.get(&key).unwrap().as_catalog().unwrap().attributes["price"], 175);
    assert_eq!(pushed.live_count(Collection::Flowers), 2);
}

#[test]
fn keep_local_resolution_wins_on_the_remote() {
    let shop = TestStore::memory();
    put_flower(&shop.store, "rose-red", 100);
    let remote = Arc::new(MemoryRemote::new());
    let engine = engine(&shop, &remote);
    engine.run_cycle(CycleTrigger::Manual).unwrap();

    update_flower(&shop.store, "rose-red", 120);
    let mut theirs = remote_state(&remote);
    theirs.insert(
        Collection::Flowers,
        stamped_flower("rose-red", 150, 2, shop.clock.now()),
    );
    publish_remote(&remote, theirs, &shop);
    engine.run_cycle(CycleTrigger::Manual).unwrap();

    engine
        .resolve_conflict(
            &RecordKey::new(Collection::Flowers, rose()),
            Resolution::KeepLocal,
        )
        .unwrap();
    let report = engine.run_cycle(CycleTrigger::Manual).unwrap();
    assert_eq!(report.outcome, CycleOutcome::Synced);
    let pushed = remote_state(&remote);
    let record = pushed
        .get(&RecordKey::new(Collection::Flowers, rose()))
        .unwrap();
    assert_eq!(record.as_catalog().unwrap().attributes["price"], 120);
}

#[test]
fn unreachable_remote_never_blocks_local_writes() {
    let shop = TestStore::memory();
    put_flower(&shop.store, "rose-red", 100);
    let remote = Arc::new(MemoryRemote::new());
    remote.set_fault(RemoteFault::Unreachable);
    let engine = engine(&shop, &remote);

    let report = engine.run_cycle(CycleTrigger::Manual).unwrap();
    assert!(matches!(report.outcome, CycleOutcome::Deferred(_)));
    assert!(report.snapshot.is_some(), "local backup still taken");
    assert!(engine.sync_state().is_initial());
    assert_eq!(engine.state(), EngineState::Idle);

    // Writes keep working while the remote is down.
    put_flower(&shop.store, "tulip", 90);
    assert_eq!(shop.store.list(Collection::Flowers).count(), 2);
    assert!(shop.store.is_dirty());

    remote.clear_fault();
    let report = engine.run_cycle(CycleTrigger::LocalChange).unwrap();
    assert_eq!(report.outcome, CycleOutcome::Synced);
    assert_eq!(remote_state(&remote).live_count(Collection::Flowers), 2);
}

#[test]
fn timeouts_are_retried() {
    let shop = TestStore::memory();
    put_flower(&shop.store, "rose-red", 100);
    let remote = Arc::new(MemoryRemote::new());
    remote.fail_next(RemoteFault::Timeout, 2);

    let retry = RetryConfig::new(3)
        .with_initial_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(2))
        .with_jitter(false);
    let engine = ReconciliationEngine::new(
        shop.store.clone(),
        shop.backups.clone(),
        SyncStateStore::open(shop.backend.clone()).unwrap(),
        SyncConfig::new(),
    )
    .with_client(RemoteSyncClient::new(
        remote.clone(),
        Arc::new(NoCredentials),
        retry,
    ));

    let report = engine.run_cycle(CycleTrigger::Manual).unwrap();
    assert_eq!(report.outcome, CycleOutcome::Synced);
    assert_eq!(remote.upload_count(), 1);
}

#[test]
fn revoked_credentials_report_auth_failure() {
    let shop = TestStore::memory();
    put_flower(&shop.store, "rose-red", 100);
    let remote = Arc::new(MemoryRemote::new());
    let credentials = Arc::new(StaticCredentials::new("token"));
    credentials.set_revoked(true);
    let engine = engine_with(&shop, remote.clone(), credentials.clone());

    let report = engine.run_cycle(CycleTrigger::Manual).unwrap();
    assert!(matches!(report.outcome, CycleOutcome::AuthFailed(_)));
    assert_eq!(engine.state(), EngineState::AuthFailed);
    assert_eq!(remote.call_count(), 0);
    assert_eq!(price(&shop.store, &rose()), 100);
    assert!(engine.sync_state().is_initial());

    credentials.set_revoked(false);
    let report = engine.run_cycle(CycleTrigger::Manual).unwrap();
    assert_eq!(report.outcome, CycleOutcome::Synced);
    assert_eq!(engine.state(), EngineState::Idle);
}

#[test]
fn expired_token_is_refreshed_exactly_once() {
    let shop = TestStore::memory();
    put_flower(&shop.store, "rose-red", 100);
    let remote = Arc::new(MemoryRemote::new());
    remote.require_token("fresh");
    let credentials = Arc::new(StaticCredentials::rotating(vec![
        "stale".to_string(),
        "fresh".to_string(),
    ]));
    let engine = engine_with(&shop, remote.clone(), credentials.clone());

    let report = engine.run_cycle(CycleTrigger::Manual).unwrap();
    assert_eq!(report.outcome, CycleOutcome::Synced);
    assert_eq!(credentials.refresh_count(), 1);
}

#[test]
fn token_rejected_after_refresh_is_an_auth_failure() {
    let shop = TestStore::memory();
    put_flower(&shop.store, "rose-red", 100);
    let remote = Arc::new(MemoryRemote::new());
    remote.require_token("never-issued");
    let credentials = Arc::new(StaticCredentials::new("mine"));
    let engine = engine_with(&shop, remote.clone(), credentials.clone());

    let report = engine.run_cycle(CycleTrigger::Manual).unwrap();
    assert!(matches!(report.outcome, CycleOutcome::AuthFailed(_)));
    assert_eq!(credentials.refresh_count(), 1);
}

#[test]
fn quota_errors_leave_sync_state_alone() {
    let shop = TestStore::memory();
    put_flower(&shop.store, "rose-red", 100);
    let remote = Arc::new(MemoryRemote::new());
    remote.set_fault(RemoteFault::QuotaExceeded);
    let engine = engine(&shop, &remote);

    let report = engine.run_cycle(CycleTrigger::Manual).unwrap();
    assert!(matches!(report.outcome, CycleOutcome::QuotaExceeded(_)));
    assert!(!report.pushed);
    assert!(remote.marker().is_none());
    assert!(engine.sync_state().is_initial());
    assert_eq!(engine.stats().failures, 1);
}

#[test]
fn reset_sync_state_forces_a_full_exchange() {
    let shop = TestStore::memory();
    put_flower(&shop.store, "rose-red", 100);
    let remote = Arc::new(MemoryRemote::new());
    let engine = engine(&shop, &remote);
    engine.run_cycle(CycleTrigger::Manual).unwrap();
    let downloads = remote.download_count();

    engine.reset_sync_state().unwrap();
    assert!(engine.sync_state().is_initial());

    let report = engine.run_cycle(CycleTrigger::Manual).unwrap();
    assert!(report.outcome.is_in_sync());
    assert_eq!(remote.download_count(), downloads + 1);
    assert!(engine.pending_conflicts().is_empty());
}

#[test]
fn two_devices_share_a_directory_remote() {
    let shared = tempfile::tempdir().unwrap();
    let remote = || -> Arc<dyn RemoteStore> {
        Arc::new(DirectoryRemote::new(
            shared.path(),
            DEFAULT_FOLDER,
            DEFAULT_REMOTE_FILE,
        ))
    };

    let counter = TestStore::file();
    let laptop = TestStore::file();
    let counter_engine = engine_with(&counter, remote(), Arc::new(NoCredentials));
    let laptop_engine = engine_with(&laptop, remote(), Arc::new(NoCredentials));

    put_flower(&counter.store, "rose-red", 100);
    draft_order(&counter.store, "spring", 2, 1500);
    assert_eq!(
        counter_engine.run_cycle(CycleTrigger::Manual).unwrap().outcome,
        CycleOutcome::Synced
    );
    assert!(shared
        .path()
        .join(DEFAULT_FOLDER)
        .join(DEFAULT_REMOTE_FILE)
        .is_file());

    let report = laptop_engine.run_cycle(CycleTrigger::Startup).unwrap();
    assert_eq!(report.outcome, CycleOutcome::Synced);
    assert_eq!(report.applied_remote, 2);
    assert_eq!(laptop.store.list(Collection::Orders).count(), 1);
    assert_eq!(price(&laptop.store, &rose()), 100);

    // The laptop edits; the counter picks it up.
    laptop.clock.advance(Duration::from_secs(60));
    update_flower(&laptop.store, "rose-red", 110);
    assert_eq!(
        laptop_engine.run_cycle(CycleTrigger::LocalChange).unwrap().outcome,
        CycleOutcome::Synced
    );
    let report = counter_engine.run_cycle(CycleTrigger::Manual).unwrap();
    assert_eq!(report.outcome, CycleOutcome::Synced);
    assert_eq!(price(&counter.store, &rose()), 110);

    // Sync state survives a restart.
    let reopened = SyncStateStore::open(counter.backend.clone()).unwrap();
    assert_eq!(reopened.get(), counter_engine.sync_state());
}
