//! Timeline command implementation.
//!
//! Replays one row's history: an insert at commit id 11, an update that
//! commits at 20, and two readers whose snapshots straddle the update.

use tessera_core::{
    CommitId, Config, GcMode, IndirectionId, ItemPointer, Transaction, TransactionManager, TxnId,
    TxnResult,
};
use tracing::debug;

/// Runs the timeline command.
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let manager = TransactionManager::with_state(
        Config::new().gc_mode(GcMode::Off),
        TxnId::FIRST.as_u64(),
        10,
    );
    let store = manager.store();

    let mut writer = manager.begin();
    let x = store.allocate_slot()?;
    let row = store.allocate_indirection(x)?;
    manager.perform_insert(&mut writer, x, row)?;
    expect_success(&manager, &mut writer)?;
    print_chain(&manager, row, "after insert")?;

    advance_to(&manager, 15)?;
    let mut updater = manager.begin();
    let x2 = store.allocate_slot()?;
    if !manager.perform_read(&mut updater, x, true)? || !manager.perform_update(&mut updater, x, x2)? {
        return Err("update lost its ownership race".into());
    }
    print_chain(&manager, row, "during update")?;

    advance_to(&manager, 18)?;
    let early = manager.begin();
    advance_to(&manager, 19)?;
    expect_success(&manager, &mut updater)?;
    advance_to(&manager, 21)?;
    let late = manager.begin();
    print_chain(&manager, row, "after update")?;

    for reader in [&early, &late] {
        let seen = manager.visible_version(reader, row)?;
        println!(
            "{} (snapshot {}) reads {}",
            reader.id(),
            reader.begin_commit_id(),
            seen.map_or_else(|| "nothing".to_string(), |location| location.to_string())
        );
    }
    Ok(())
}

fn expect_success(
    manager: &TransactionManager,
    txn: &mut Transaction,
) -> Result<(), Box<dyn std::error::Error>> {
    match manager.commit(txn)? {
        TxnResult::Success => Ok(()),
        other => Err(format!("{} finished with {other}", txn.id()).into()),
    }
}

/// Burns commit ids with empty transactions until the counter reaches `cid`.
fn advance_to(manager: &TransactionManager, cid: u64) -> Result<(), Box<dyn std::error::Error>> {
    while manager.current_commit_id() < CommitId::new(cid) {
        let mut txn = manager.begin();
        manager.abort(&mut txn)?;
    }
    debug!(cid, "advanced commit counter");
    Ok(())
}

fn print_chain(
    manager: &TransactionManager,
    row: IndirectionId,
    label: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("-- {label} --");
    let chain: Vec<ItemPointer> = manager.store().versions(row)?;
    for location in chain {
        let slot = manager.store().slot(location)?;
        println!(
            "  {location}: owner={} [{}, {})",
            slot.owner(),
            slot.begin_commit_id(),
            slot.end_commit_id()
        );
    }
    Ok(())
}
