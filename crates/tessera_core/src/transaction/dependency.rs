//! Commit dependencies between transactions.
//!
//! Under [`IsolationLevel::OptimisticWithDependencyTracking`] a transaction
//! that reads a version owned by another live transaction becomes a
//! dependent of that owner. The owner keeps the set of its dependents; each
//! dependent keeps a count of owners that have not finished yet. When the
//! owner commits it decrements every dependent's count, when it aborts it
//! flags every dependent for cascading abort.
//!
//! [`IsolationLevel::OptimisticWithDependencyTracking`]: crate::IsolationLevel::OptimisticWithDependencyTracking

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tessera_storage::TxnId;

#[derive(Debug, Default)]
struct Dependents {
    members: HashMap<TxnId, Arc<DependencyState>>,
    finished: bool,
}

/// Shared dependency state of one transaction.
#[derive(Debug, Default)]
pub struct DependencyState {
    dependents: Mutex<Dependents>,
    pending: AtomicU32,
    cascading_abort: AtomicBool,
}

impl DependencyState {
    /// Creates an empty dependency state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `dependent` depends on this transaction.
    ///
    /// Returns false if this transaction already finished or `dependent_id`
    /// is already registered; the dependent's pending count only grows on
    /// `true`.
    pub fn register_dependency(&self, dependent_id: TxnId, dependent: &Arc<DependencyState>) -> bool {
        let mut dependents = self.dependents.lock();
        if dependents.finished || dependents.members.contains_key(&dependent_id) {
            return false;
        }
        dependent.pending.fetch_add(1, Ordering::AcqRel);
        dependents
            .members
            .insert(dependent_id, Arc::clone(dependent));
        true
    }

    /// Called on a dependent when one of the transactions it depends on finishes.
    pub fn release_dependency(&self, is_abort: bool) {
        if is_abort {
            self.cascading_abort.store(true, Ordering::Release);
        }
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }

    /// Marks this transaction finished and releases every dependent.
    ///
    /// Returns the number of dependents released.
    pub fn finish(&self, is_abort: bool) -> usize {
        let members = {
            let mut dependents = self.dependents.lock();
            dependents.finished = true;
            std::mem::take(&mut dependents.members)
        };
        for dependent in members.values() {
            dependent.release_dependency(is_abort);
        }
        members.len()
    }

    /// Returns the number of unfinished transactions this one depends on.
    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::Acquire)
    }

    /// Returns true if a transaction this one depends on aborted.
    pub fn is_cascading_abort(&self) -> bool {
        self.cascading_abort.load(Ordering::Acquire)
    }

    /// Returns true if every dependency committed.
    pub fn is_resolved(&self) -> bool {
        !self.is_cascading_abort() && self.pending() == 0
    }

    /// Returns the number of registered dependents.
    pub fn dependent_count(&self) -> usize {
        self.dependents.lock().members.len()
    }
}
