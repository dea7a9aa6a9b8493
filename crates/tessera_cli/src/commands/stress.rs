//! Stress command implementation.

use serde::Serialize;
use std::sync::Arc;
use tessera_core::{Config, GcMode, GcWorker, IsolationLevel, StatsSnapshot};
use tessera_testkit::{scenarios, stress_transfers, StressConfig, StressTestResult};
use tracing::info;

/// Starting balance of every row.
const INITIAL_BALANCE: u64 = 1_000;

/// Options of the stress command.
#[derive(Debug, Clone)]
pub struct StressOptions {
    /// Number of worker threads.
    pub threads: usize,
    /// Number of rows.
    pub rows: u64,
    /// Number of transfers.
    pub operations: usize,
    /// Isolation level of every transaction.
    pub isolation: IsolationLevel,
    /// Run the vacuum collector on a background thread.
    pub background_gc: bool,
}

/// Stress run report.
#[derive(Debug, Serialize)]
pub struct StressReport {
    /// Isolation level used.
    pub isolation: String,
    /// Worker threads.
    pub threads: usize,
    /// Rows in the table.
    pub rows: u64,
    /// Workload outcome.
    pub workload: StressTestResult,
    /// Sum of balances before the run.
    pub balance_before: u64,
    /// Sum of balances after the run.
    pub balance_after: u64,
    /// Tile groups allocated by the version store.
    pub tile_groups: u32,
    /// Slots still queued in the collector.
    pub gc_pending: usize,
    /// Transaction manager counters.
    pub stats: StatsSnapshot,
}

/// Runs the stress command.
pub fn run(options: &StressOptions, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if options.rows < 2 {
        return Err("stress needs at least two rows".into());
    }
    if options.threads == 0 {
        return Err("stress needs at least one thread".into());
    }

    let gc_mode = if options.background_gc {
        GcMode::Vacuum
    } else {
        GcMode::Off
    };
    let config = Config::new().isolation(options.isolation).gc_mode(gc_mode);
    let gc_interval = config.gc_interval;

    info!(rows = options.rows, "populating table");
    let table = Arc::new(scenarios::populated_table(config, options.rows, INITIAL_BALANCE));
    let balance_before = scenarios::total_balance(&table)?;

    let worker = options
        .background_gc
        .then(|| GcWorker::spawn(Arc::clone(table.manager()), gc_interval));

    info!(
        threads = options.threads,
        operations = options.operations,
        isolation = ?options.isolation,
        "running transfers"
    );
    let workload = stress_transfers(
        Arc::clone(&table),
        &StressConfig {
            operations: options.operations,
            threads: options.threads,
            rows: options.rows,
            initial_balance: INITIAL_BALANCE,
            ..Default::default()
        },
    )?;

    if let Some(worker) = worker {
        worker.stop();
    }

    let manager = table.manager();
    let report = StressReport {
        isolation: format!("{:?}", options.isolation),
        threads: options.threads,
        rows: options.rows,
        workload,
        balance_before,
        balance_after: scenarios::total_balance(&table)?,
        tile_groups: manager.store().tile_group_count(),
        gc_pending: manager.garbage_collector().pending(),
        stats: manager.stats().snapshot(),
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_text(&report),
    }

    if report.balance_before != report.balance_after {
        return Err(format!(
            "balance changed from {} to {}",
            report.balance_before, report.balance_after
        )
        .into());
    }
    Ok(())
}

fn print_text(report: &StressReport) {
    report.workload.print_summary("transfers");
    println!("Isolation: {}", report.isolation);
    println!("Threads: {}", report.threads);
    println!("Rows: {}", report.rows);
    println!("Balance before: {}", report.balance_before);
    println!("Balance after: {}", report.balance_after);
    println!("Tile groups: {}", report.tile_groups);
    println!("GC pending: {}", report.gc_pending);

    let stats = &report.stats;
    println!("\n=== transaction manager ===");
    println!("Started: {}", stats.transactions_started);
    println!("Committed: {} ({} read-only)", stats.transactions_committed, stats.read_only_commits);
    println!("Aborted: {}", stats.transactions_aborted);
    println!("Ownership conflicts: {}", stats.ownership_conflicts);
    println!("Read aborts: {}", stats.read_aborts);
    println!("Validation aborts: {}", stats.validation_aborts);
    println!("Cascading aborts: {}", stats.cascading_aborts);
    println!("Versions reclaimed: {}", stats.versions_reclaimed);
}
