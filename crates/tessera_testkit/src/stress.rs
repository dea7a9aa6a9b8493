//! Stress workloads for tessera.
//!
//! These workloads run many short transactions against a [`Table`], most of
//! them concurrently, and report how many committed.

use crate::fixtures::{decode_balance, encode_balance, Key, Table, WriteOutcome};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tessera_core::CoreResult;

/// Result of a stress test run.
#[derive(Debug, Clone, Serialize)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Operations that eventually committed.
    pub successful_ops: usize,
    /// Operations that gave up after every attempt aborted.
    pub failed_ops: usize,
    /// Attempts aborted along the way, including retried ones.
    pub aborted_attempts: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, aborted_attempts: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            aborted_attempts,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Aborted attempts: {}", self.aborted_attempts);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent threads (for concurrent tests).
    pub threads: usize,
    /// Number of distinct rows.
    pub rows: u64,
    /// Starting balance of every row in transfer workloads.
    pub initial_balance: u64,
    /// Attempts per operation before it counts as failed.
    pub max_attempts: usize,
    /// Seed for the per-thread random generators.
    pub seed: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            rows: 1_000,
            initial_balance: 1_000,
            max_attempts: 64,
            seed: 0x7e55_e7a,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    successful: AtomicUsize,
    failed: AtomicUsize,
    aborted: AtomicUsize,
}

impl Counters {
    fn record(&self, committed: bool, aborted: usize) {
        if committed {
            self.successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.aborted.fetch_add(aborted, Ordering::Relaxed);
    }

    fn result(&self, duration: Duration) -> StressTestResult {
        StressTestResult::new(
            self.successful.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            self.aborted.load(Ordering::Relaxed),
            duration,
        )
    }
}

/// Moves `amount` from one row to another inside one transaction.
///
/// Both rows are read for update. Returns `Ok(None)` on any conflict.
pub fn transfer(table: &Table, from: Key, to: Key, amount: u64) -> CoreResult<Option<()>> {
    table.execute(|table, txn| {
        let from_balance = match table.get_for_update(txn, from)? {
            Ok(value) => decode_balance(&value),
            Err(_) => return Ok(None),
        };
        let to_balance = match table.get_for_update(txn, to)? {
            Ok(value) => decode_balance(&value),
            Err(_) => return Ok(None),
        };
        let moved = amount.min(from_balance);

        if table.update(txn, from, encode_balance(from_balance - moved))? != WriteOutcome::Applied
            || table.update(txn, to, encode_balance(to_balance + moved))? != WriteOutcome::Applied
        {
            return Ok(None);
        }
        Ok(Some(()))
    })
}

/// Runs concurrent random transfers between rows `0..config.rows`.
///
/// The table must already hold those rows; the sum of all balances is
/// unchanged by the workload.
pub fn stress_transfers(table: Arc<Table>, config: &StressConfig) -> CoreResult<StressTestResult> {
    let counters = Arc::new(Counters::default());
    let ops_per_thread = config.operations / config.threads.max(1);
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let table = Arc::clone(&table);
            let counters = Arc::clone(&counters);
            let config = config.clone();

            thread::spawn(move || -> CoreResult<()> {
                let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(t as u64));
                for _ in 0..ops_per_thread {
                    let from = rng.gen_range(0..config.rows);
                    let mut to = rng.gen_range(0..config.rows);
                    if to == from {
                        to = (from + 1) % config.rows;
                    }
                    let amount = rng.gen_range(1..=10);

                    let mut aborted = 0;
                    let mut committed = false;
                    for _ in 0..config.max_attempts {
                        if transfer(&table, from, to, amount)?.is_some() {
                            committed = true;
                            break;
                        }
                        aborted += 1;
                    }
                    counters.record(committed, aborted);
                }
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked")?;
    }

    Ok(counters.result(start.elapsed()))
}

/// Runs concurrent declared read-only transactions over random rows.
pub fn stress_concurrent_reads(table: Arc<Table>, config: &StressConfig) -> CoreResult<StressTestResult> {
    let counters = Arc::new(Counters::default());
    let ops_per_thread = config.operations / config.threads.max(1);
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let table = Arc::clone(&table);
            let counters = Arc::clone(&counters);
            let config = config.clone();

            thread::spawn(move || -> CoreResult<()> {
                let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(t as u64));
                let manager = table.manager();
                for _ in 0..ops_per_thread {
                    let key = rng.gen_range(0..config.rows);
                    let mut txn = manager.begin_read_only();
                    table.get(&mut txn, key)?;
                    let committed = manager.commit(&mut txn)?.is_success();
                    counters.record(committed, usize::from(!committed));
                }
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked")?;
    }

    Ok(counters.result(start.elapsed()))
}

/// Runs a sequential mix of inserts, updates, deletes and reads.
///
/// Without concurrency nothing conflicts, so every operation commits.
pub fn stress_mixed_operations(table: &Table, config: &StressConfig) -> CoreResult<StressTestResult> {
    let counters = Counters::default();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let start = Instant::now();

    for i in 0..config.operations {
        let key = rng.gen_range(0..config.rows);
        let value = encode_balance(i as u64);
        let outcome = table.execute(|table, txn| {
            let outcome = match i % 4 {
                0 => table.insert(txn, key, value)?,
                1 => table.update(txn, key, value)?,
                2 => table.delete(txn, key)?,
                _ => {
                    table.get(txn, key)?;
                    WriteOutcome::Applied
                }
            };
            Ok((!outcome.is_conflict()).then_some(()))
        })?;
        counters.record(outcome.is_some(), usize::from(outcome.is_none()));
    }

    Ok(counters.result(start.elapsed()))
}

/// Runs transactions of which every other one aborts on purpose.
pub fn stress_transaction_aborts(table: &Table, config: &StressConfig) -> CoreResult<StressTestResult> {
    let counters = Counters::default();
    let start = Instant::now();

    for i in 0..config.operations {
        let key = i as u64 % config.rows;
        let should_fail = i % 2 == 0;
        let outcome = table.execute(|table, txn| {
            table.insert(txn, config.rows + i as u64, encode_balance(key))?;
            Ok((!should_fail).then_some(()))
        })?;
        counters.record(outcome.is_some(), usize::from(outcome.is_none()));
    }

    Ok(counters.result(start.elapsed()))
}
