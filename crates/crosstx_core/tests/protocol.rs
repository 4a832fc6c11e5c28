//! End-to-end tests of the commit protocol and reader-driven recovery.

use crosstx_core::{
    Lock, LogState, Operation, Session, TransactionId, TxError, LOCK_KIND, TRANSACTION_KIND,
};
use crosstx_store::{InMemoryStore, Key, Record, Store};
use std::sync::Arc;

fn session() -> (Session<InMemoryStore>, Arc<InMemoryStore>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let store = Arc::new(InMemoryStore::new());
    (Session::new(Arc::clone(&store)), store)
}

fn root(name: &str) -> Key {
    Key::root("account", name).unwrap()
}

fn assert_no_system_records(store: &InMemoryStore, group: &Key) {
    let leftovers: Vec<String> = store
        .query(group)
        .unwrap()
        .iter()
        .filter(|record| record.is_system())
        .map(|record| record.key.encode())
        .collect();
    assert!(leftovers.is_empty(), "system records left behind: {leftovers:?}");
}

#[test]
fn single_group_commit_uses_fast_path() {
    let (session, store) = session();
    let alice = root("alice");

    let mut txn = session.begin();
    txn.put(Record::new(alice.clone(), vec![100])).unwrap();
    txn.commit().unwrap();

    assert_eq!(session.get(&alice).unwrap().unwrap().payload, vec![100]);
    // The fast path never materializes a lock or a write-ahead log, so the
    // store holds exactly the one application record.
    assert_eq!(store.record_count(), 1);
    assert_no_system_records(&store, &alice);
}

#[test]
fn multi_group_commit_applies_all_and_cleans_up() {
    let (session, store) = session();
    let groups = [root("alice"), root("bob"), root("carol")];

    let mut txn = session.begin();
    for (i, group) in groups.iter().enumerate() {
        txn.put(Record::new(group.clone(), vec![i as u8])).unwrap();
    }
    txn.commit().unwrap();
    assert!(txn.log().iter().all(|e| e.state() == LogState::Committed));

    for (i, group) in groups.iter().enumerate() {
        assert_eq!(session.get(group).unwrap().unwrap().payload, vec![i as u8]);
        assert_no_system_records(&store, group);
    }
    assert_eq!(store.record_count(), groups.len());
}

#[test]
fn read_update_across_groups() {
    let (session, _store) = session();
    let alice = root("alice");
    let bob = root("bob");

    let mut setup = session.begin();
    setup.put(Record::new(alice.clone(), vec![100])).unwrap();
    setup.put(Record::new(bob.clone(), vec![50])).unwrap();
    setup.commit().unwrap();

    // Transfer 30 from alice to bob.
    let mut txn = session.begin();
    let a = txn.get(&alice).unwrap().unwrap();
    let b = txn.get(&bob).unwrap().unwrap();
    txn.update(Record::new(alice.clone(), vec![a.payload[0] - 30]))
        .unwrap();
    txn.update(Record::new(bob.clone(), vec![b.payload[0] + 30]))
        .unwrap();
    txn.commit().unwrap();

    assert_eq!(session.get(&alice).unwrap().unwrap().payload, vec![70]);
    assert_eq!(session.get(&bob).unwrap().unwrap().payload, vec![80]);
}

#[test]
fn delete_requires_prior_read_and_applies() {
    let (session, store) = session();
    let alice = root("alice");
    let bob = root("bob");

    let mut setup = session.begin();
    setup.put(Record::new(alice.clone(), vec![1])).unwrap();
    setup.put(Record::new(bob.clone(), vec![2])).unwrap();
    setup.commit().unwrap();

    let mut blind = session.begin();
    let err = blind.delete(Record::marker(alice.clone())).unwrap_err();
    assert!(matches!(err, TxError::IllegalSequence { .. }));
    blind.rollback();

    let mut txn = session.begin();
    let found = txn.get(&alice).unwrap().unwrap();
    txn.delete(found).unwrap();
    let b = txn.get(&bob).unwrap().unwrap();
    txn.update(Record::new(bob.clone(), vec![b.payload[0] + 1]))
        .unwrap();
    txn.commit().unwrap();

    assert!(session.get(&alice).unwrap().is_none());
    assert_eq!(session.get(&bob).unwrap().unwrap().payload, vec![3]);
    assert_no_system_records(&store, &alice);
}

#[test]
fn create_on_occupied_key_fails_before_commit() {
    let (session, _store) = session();
    let alice = root("alice");

    let mut setup = session.begin();
    setup.put(Record::new(alice.clone(), vec![1])).unwrap();
    setup.commit().unwrap();

    let mut txn = session.begin();
    let err = txn.put(Record::new(alice.clone(), vec![2])).unwrap_err();
    assert!(matches!(err, TxError::RecordExists { .. }));
    txn.rollback();

    assert_eq!(session.get(&alice).unwrap().unwrap().payload, vec![1]);
}

#[test]
fn prepare_failure_aborts_without_real_writes() {
    let (session, store) = session();
    let alice = root("alice");
    let bob = root("bob");

    // The first prepared group's local commit fails; nothing must land.
    store.inject_commit_fault(&alice);

    let mut txn = session.begin();
    txn.put(Record::new(alice.clone(), vec![1])).unwrap();
    txn.put(Record::new(bob.clone(), vec![2])).unwrap();
    assert!(txn.commit().is_err());
    txn.rollback();

    assert_eq!(store.record_count(), 0);
    assert!(session.get(&alice).unwrap().is_none());
    assert!(session.get(&bob).unwrap().is_none());
}

#[test]
fn interrupted_commit_is_rolled_forward_by_next_reader() {
    let (session, store) = session();
    let alice = root("alice");
    let bob = root("bob");

    // Both groups prepare (alice's first commit is her lock); applying
    // alice then fails, leaving both groups locked with the write-ahead
    // log durable under bob.
    store.inject_commit_fault_after(&alice, 1);
    let mut txn = session.begin();
    txn.put(Record::new(alice.clone(), vec![1])).unwrap();
    txn.put(Record::new(bob.clone(), vec![2])).unwrap();
    txn.commit().unwrap();

    let locked: Vec<Record> = store.query(&alice).unwrap();
    assert!(locked.iter().any(|r| r.kind() == LOCK_KIND));

    // The next consistent read completes the whole transaction.
    assert_eq!(session.get(&alice).unwrap().unwrap().payload, vec![1]);
    assert_eq!(session.get(&bob).unwrap().unwrap().payload, vec![2]);
    assert_no_system_records(&store, &alice);
    assert_no_system_records(&store, &bob);
}

#[test]
fn read_modify_write_after_roll_forward_commits() {
    let (session, store) = session();
    let alice = root("alice");
    let bob = root("bob");

    store.inject_commit_fault_after(&alice, 1);
    let mut txn = session.begin();
    txn.put(Record::new(alice.clone(), vec![1])).unwrap();
    txn.put(Record::new(bob.clone(), vec![2])).unwrap();
    txn.commit().unwrap();

    // The next transaction's read repairs the group; the repair must not
    // poison that transaction's own commit.
    let mut rmw = session.begin();
    let found = rmw.get(&alice).unwrap().unwrap();
    assert_eq!(found.payload, vec![1]);
    rmw.update(Record::new(alice.clone(), vec![found.payload[0] + 1]))
        .unwrap();
    rmw.commit().unwrap();

    assert_eq!(session.get(&alice).unwrap().unwrap().payload, vec![2]);
    assert_no_system_records(&store, &alice);
    assert_no_system_records(&store, &bob);
}

#[test]
fn create_only_writer_clears_stale_orphan_lock() {
    let (session, store) = session();
    let alice = root("alice");
    let bob = root("bob");

    // An orphaned lock without a write-ahead log, well past the operation
    // deadline. A writer that never reads the group must still get through.
    let id = TransactionId::new();
    let marker = bob.child(TRANSACTION_KIND, id.to_string()).unwrap();
    let txn = store.begin(&alice).unwrap();
    store
        .put(
            txn,
            Lock::new(id, marker, store.now_millis())
                .to_record(&alice)
                .unwrap(),
        )
        .unwrap();
    store.commit(txn).unwrap();
    store.advance_clock(store.operation_deadline_millis() + 1);

    let mut writer = session.begin();
    writer.put(Record::new(alice.clone(), vec![1])).unwrap();
    writer.put(Record::new(bob.clone(), vec![2])).unwrap();
    writer.commit().unwrap();

    assert_eq!(session.get(&alice).unwrap().unwrap().payload, vec![1]);
    assert_eq!(session.get(&bob).unwrap().unwrap().payload, vec![2]);
    assert_no_system_records(&store, &alice);
    assert_no_system_records(&store, &bob);
}

#[test]
fn reading_the_anchor_group_also_rolls_forward() {
    let (session, store) = session();
    let alice = root("alice");
    let bob = root("bob");

    store.inject_commit_fault_after(&alice, 1);
    let mut txn = session.begin();
    txn.put(Record::new(alice.clone(), vec![1])).unwrap();
    txn.put(Record::new(bob.clone(), vec![2])).unwrap();
    txn.commit().unwrap();

    // Bob anchors the log; reading it repairs alice too.
    assert_eq!(session.get(&bob).unwrap().unwrap().payload, vec![2]);
    assert_eq!(session.get(&alice).unwrap().unwrap().payload, vec![1]);
    assert_no_system_records(&store, &alice);
    assert_no_system_records(&store, &bob);
}

#[test]
fn young_lock_without_wal_makes_reads_retry() {
    let (session, store) = session();
    let alice = root("alice");

    let txn = store.begin(&alice).unwrap();
    store.put(txn, Record::new(alice.clone(), vec![1])).unwrap();
    store.commit(txn).unwrap();

    // A lock whose write-ahead log never landed, younger than the
    // operation deadline: the owner may still be preparing.
    let id = TransactionId::new();
    let marker = root("bob").child(TRANSACTION_KIND, id.to_string()).unwrap();
    let lock = Lock::new(id, marker, store.now_millis());
    let txn = store.begin(&alice).unwrap();
    store.put(txn, lock.to_record(&alice).unwrap()).unwrap();
    store.commit(txn).unwrap();

    assert!(session.get(&alice).unwrap_err().is_retryable());
}

#[test]
fn stale_lock_without_wal_is_cleared_by_reader() {
    let (session, store) = session();
    let alice = root("alice");

    let txn = store.begin(&alice).unwrap();
    store.put(txn, Record::new(alice.clone(), vec![1])).unwrap();
    store.commit(txn).unwrap();

    let id = TransactionId::new();
    let marker = root("bob").child(TRANSACTION_KIND, id.to_string()).unwrap();
    let lock = Lock::new(id, marker, store.now_millis());
    let txn = store.begin(&alice).unwrap();
    store.put(txn, lock.to_record(&alice).unwrap()).unwrap();
    store.commit(txn).unwrap();

    // Past the operation deadline the owner is presumed dead; the read
    // clears the orphan and returns the pre-transaction value.
    store.advance_clock(store.operation_deadline_millis() + 1);
    assert_eq!(session.get(&alice).unwrap().unwrap().payload, vec![1]);
    assert_no_system_records(&store, &alice);
}

#[test]
fn writer_blocked_by_live_lock_fails_retryable() {
    let (session, store) = session();
    let alice = root("alice");
    let carol = root("carol");

    // A young lock whose write-ahead log has not landed yet: the owner is
    // presumed mid-prepare, so a competing writer must back off.
    let id = TransactionId::new();
    let marker = root("bob").child(TRANSACTION_KIND, id.to_string()).unwrap();
    let txn = store.begin(&alice).unwrap();
    store
        .put(
            txn,
            Lock::new(id, marker, store.now_millis())
                .to_record(&alice)
                .unwrap(),
        )
        .unwrap();
    store.commit(txn).unwrap();

    let post = alice.child("post", "1").unwrap();
    let mut second = session.begin();
    second.put(Record::new(post, vec![9])).unwrap();
    second.put(Record::new(carol.clone(), vec![3])).unwrap();
    let err = second.commit().unwrap_err();
    assert!(err.is_retryable());
    second.rollback();

    // The owner's lock survives the backed-off attempt.
    assert!(store
        .query(&alice)
        .unwrap()
        .iter()
        .any(|r| r.kind() == LOCK_KIND));
    assert!(store.get(&carol).unwrap().is_none());
}

#[test]
fn writer_resolves_abandoned_transaction_at_prepare() {
    let (session, store) = session();
    let alice = root("alice");
    let bob = root("bob");
    let carol = root("carol");

    // First writer stalls mid-commit, holding locks on alice and bob with
    // the write-ahead log durable.
    store.inject_commit_fault_after(&alice, 1);
    let mut first = session.begin();
    first.put(Record::new(alice.clone(), vec![1])).unwrap();
    first.put(Record::new(bob.clone(), vec![2])).unwrap();
    first.commit().unwrap();

    // The second writer's prepare rolls the abandoned transaction forward
    // and then wins the group outright.
    let post = alice.child("post", "1").unwrap();
    let mut second = session.begin();
    second.put(Record::new(post.clone(), vec![9])).unwrap();
    second.put(Record::new(carol.clone(), vec![3])).unwrap();
    second.commit().unwrap();

    assert_eq!(session.get(&alice).unwrap().unwrap().payload, vec![1]);
    assert_eq!(session.get(&bob).unwrap().unwrap().payload, vec![2]);
    assert_eq!(session.get(&post).unwrap().unwrap().payload, vec![9]);
    assert_eq!(session.get(&carol).unwrap().unwrap().payload, vec![3]);
    for group in [&alice, &bob, &carol] {
        assert_no_system_records(&store, group);
    }
}

#[test]
fn failed_roll_forward_escalates_with_full_report() {
    let (session, store) = session();
    let alice = root("alice");
    let bob = root("bob");
    let carol = root("carol");

    // Three groups prepare; the commit phase dies on its first group.
    store.inject_commit_fault_after(&alice, 1);
    let mut txn = session.begin();
    txn.put(Record::new(alice.clone(), vec![1])).unwrap();
    txn.put(Record::new(bob.clone(), vec![2])).unwrap();
    txn.put(Record::new(carol.clone(), vec![3])).unwrap();
    txn.commit().unwrap();
    let id = txn.id();

    // Recovery replays alice, then fails on bob.
    store.inject_commit_fault(&bob);
    let err = session.get(&alice).unwrap_err();
    let TxError::Indoubt(report) = err else {
        panic!("expected an indoubt report, got: {err}");
    };
    assert_eq!(report.id, id);
    assert_eq!(report.committed, 1);
    assert_eq!(report.log.len(), 3);
    assert_eq!(report.log[0].state(), LogState::Committed);
    assert!(report.log.iter().all(|e| e.operation() == Operation::Create));

    // The report is advisory; a later read simply finishes the job.
    assert_eq!(session.get(&alice).unwrap().unwrap().payload, vec![1]);
    assert_eq!(session.get(&bob).unwrap().unwrap().payload, vec![2]);
    assert_eq!(session.get(&carol).unwrap().unwrap().payload, vec![3]);
    for group in [&alice, &bob, &carol] {
        assert_no_system_records(&store, group);
    }
}

#[test]
fn recovery_is_idempotent_under_racing_readers() {
    let (session, store) = session();
    let alice = root("alice");
    let bob = root("bob");

    store.inject_commit_fault_after(&alice, 1);
    let mut txn = session.begin();
    txn.put(Record::new(alice.clone(), vec![1])).unwrap();
    txn.put(Record::new(bob.clone(), vec![2])).unwrap();
    txn.commit().unwrap();

    // Repeated reads after the first repair find nothing left to do.
    for _ in 0..3 {
        assert_eq!(session.get(&alice).unwrap().unwrap().payload, vec![1]);
        assert_eq!(session.get(&bob).unwrap().unwrap().payload, vec![2]);
    }
    assert_eq!(store.record_count(), 2);
}

#[test]
fn transactional_read_respects_foreign_locks() {
    let (session, store) = session();
    let alice = root("alice");

    let id = TransactionId::new();
    let marker = root("bob").child(TRANSACTION_KIND, id.to_string()).unwrap();
    let lock = Lock::new(id, marker, store.now_millis());
    let txn = store.begin(&alice).unwrap();
    store.put(txn, lock.to_record(&alice).unwrap()).unwrap();
    store.commit(txn).unwrap();

    let mut reader = session.begin();
    assert!(reader.get(&alice).unwrap_err().is_retryable());
    reader.rollback();
}

#[test]
fn rollback_before_commit_leaves_store_untouched() {
    let (session, store) = session();
    let alice = root("alice");
    let bob = root("bob");

    let mut txn = session.begin();
    txn.put(Record::new(alice.clone(), vec![1])).unwrap();
    txn.put(Record::new(bob.clone(), vec![2])).unwrap();
    txn.rollback();

    assert_eq!(store.record_count(), 0);
    assert!(session.get(&alice).unwrap().is_none());
}
