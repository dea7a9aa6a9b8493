//! End-to-end timelines through the public transaction manager API.

use std::sync::{Arc, Barrier};
use std::thread;
use tessera_core::{
    CommitId, Config, GcMode, IndirectionId, ItemPointer, Transaction, TransactionManager, TxnId,
    TxnResult,
};

fn manager_at(current_commit_id: u64) -> TransactionManager {
    TransactionManager::with_state(
        Config::new().gc_mode(GcMode::Off),
        TxnId::FIRST.as_u64(),
        current_commit_id,
    )
}

/// Burns commit ids with empty transactions until the counter reaches `cid`.
fn advance_to(manager: &TransactionManager, cid: u64) {
    while manager.current_commit_id() < CommitId::new(cid) {
        let mut txn = manager.begin();
        manager.abort(&mut txn).unwrap();
    }
}

fn insert(manager: &TransactionManager, txn: &mut Transaction) -> (ItemPointer, IndirectionId) {
    let store = manager.store();
    let location = store.allocate_slot().unwrap();
    let indirection = store.allocate_indirection(location).unwrap();
    manager.perform_insert(txn, location, indirection).unwrap();
    (location, indirection)
}

fn update(manager: &TransactionManager, txn: &mut Transaction, indirection: IndirectionId) -> ItemPointer {
    let old = manager.visible_version(txn, indirection).unwrap().unwrap();
    assert!(manager.perform_read(txn, old, true).unwrap());
    let new = manager.store().allocate_slot().unwrap();
    assert!(manager.perform_update(txn, old, new).unwrap());
    new
}

#[test]
fn insert_is_published_at_end_commit_id() {
    let manager = manager_at(10);
    let mut t1 = manager.begin();
    assert_eq!(t1.begin_commit_id(), CommitId::new(10));

    let (x, _) = insert(&manager, &mut t1);
    let slot = manager.store().slot(x).unwrap();
    assert_eq!(slot.owner(), t1.id());
    assert_eq!(slot.begin_commit_id(), CommitId::INFINITY);
    assert_eq!(slot.end_commit_id(), CommitId::INFINITY);

    assert_eq!(manager.commit(&mut t1).unwrap(), TxnResult::Success);
    assert_eq!(slot.begin_commit_id(), CommitId::new(11));
    assert_eq!(slot.end_commit_id(), CommitId::INFINITY);
    assert_eq!(slot.owner(), TxnId::UNLOCKED);
}

#[test]
fn readers_pick_version_by_snapshot() {
    let manager = manager_at(10);
    let mut t1 = manager.begin();
    let (x, indirection) = insert(&manager, &mut t1);
    manager.commit(&mut t1).unwrap();

    advance_to(&manager, 15);
    let mut t3 = manager.begin();
    assert_eq!(t3.begin_commit_id(), CommitId::new(15));
    let x2 = update(&manager, &mut t3, indirection);

    advance_to(&manager, 18);
    let t4 = manager.begin();
    advance_to(&manager, 19);
    manager.commit(&mut t3).unwrap();
    assert_eq!(t3.end_commit_id(), Some(CommitId::new(20)));
    advance_to(&manager, 21);
    let t5 = manager.begin();

    let old = manager.store().slot(x).unwrap();
    assert_eq!((old.begin_commit_id(), old.end_commit_id()), (CommitId::new(11), CommitId::new(20)));
    let new = manager.store().slot(x2).unwrap();
    assert_eq!((new.begin_commit_id(), new.end_commit_id()), (CommitId::new(20), CommitId::INFINITY));

    assert_eq!(manager.visible_version(&t4, indirection).unwrap(), Some(x));
    assert_eq!(manager.visible_version(&t5, indirection).unwrap(), Some(x2));
}

#[test]
fn ownership_race_has_one_winner() {
    for _ in 0..50 {
        let manager = Arc::new(manager_at(1));
        let mut setup = manager.begin();
        let (x, _) = insert(&manager, &mut setup);
        manager.commit(&mut setup).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let mut txn = manager.begin();
                    barrier.wait();
                    let won = manager.acquire_ownership(&mut txn, x).unwrap();
                    barrier.wait();
                    let result = manager.commit(&mut txn).unwrap();
                    (won, result)
                })
            })
            .collect();

        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(outcomes.iter().filter(|(won, _)| *won).count(), 1);
        for (won, result) in outcomes {
            let expected = if won { TxnResult::Success } else { TxnResult::Aborted };
            assert_eq!(result, expected);
        }
        assert_eq!(manager.store().slot(x).unwrap().owner(), TxnId::UNLOCKED);
    }
}

#[test]
fn abort_restores_old_version() {
    let manager = manager_at(1);
    let mut setup = manager.begin();
    let (y, indirection) = insert(&manager, &mut setup);
    manager.commit(&mut setup).unwrap();

    let mut t8 = manager.begin();
    let y2 = update(&manager, &mut t8, indirection);
    assert_eq!(manager.abort(&mut t8).unwrap(), TxnResult::Aborted);

    let old = manager.store().slot(y).unwrap();
    assert_eq!(old.end_commit_id(), CommitId::INFINITY);
    assert_eq!(old.owner(), TxnId::UNLOCKED);
    assert_eq!(manager.store().slot(y2).unwrap().owner(), TxnId::INVALID);
    assert_eq!(manager.store().indirection_head(indirection).unwrap().pointer(), y);

    // The row is writable again.
    let mut t9 = manager.begin();
    update(&manager, &mut t9, indirection);
    assert_eq!(manager.commit(&mut t9).unwrap(), TxnResult::Success);
}

#[test]
fn stale_writer_cannot_take_superseded_head() {
    let manager = manager_at(1);
    let mut setup = manager.begin();
    let (x, indirection) = insert(&manager, &mut setup);
    manager.commit(&mut setup).unwrap();

    // A writer whose snapshot predates another commit cannot take the old head.
    let mut slow = manager.begin();
    let mut fast = manager.begin();
    update(&manager, &mut fast, indirection);
    manager.commit(&mut fast).unwrap();

    assert_eq!(manager.visible_version(&slow, indirection).unwrap(), Some(x));
    assert!(!manager.perform_read(&mut slow, x, true).unwrap());
    assert_eq!(slow.result(), TxnResult::Failure);
    assert_eq!(manager.commit(&mut slow).unwrap(), TxnResult::Aborted);
}
