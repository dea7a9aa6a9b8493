//! In-memory log manager.

use super::{LogManager, LogRecord};
use parking_lot::Mutex;
use tessera_storage::TxnId;

/// Keeps every record in arrival order.
#[derive(Debug, Default)]
pub struct MemoryLogManager {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLogManager {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all records.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Returns the records of one transaction.
    pub fn records_for(&self, txn_id: TxnId) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.txn_id() == txn_id)
            .cloned()
            .collect()
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if nothing was logged.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogManager for MemoryLogManager {
    fn log(&self, record: LogRecord) {
        self.records.lock().push(record);
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_storage::{CommitId, ItemPointer};

    #[test]
    fn keeps_arrival_order() {
        let log = MemoryLogManager::new();
        let txn_id = TxnId::new(4);
        log.log(LogRecord::BeginTransaction {
            txn_id,
            commit_id: CommitId::new(7),
        });
        log.log(LogRecord::Insert {
            txn_id,
            location: ItemPointer::new(0, 1),
        });
        log.log(LogRecord::CommitTransaction {
            txn_id: TxnId::new(5),
            commit_id: CommitId::new(8),
        });

        assert_eq!(log.len(), 3);
        assert!(matches!(
            log.records()[0],
            LogRecord::BeginTransaction { .. }
        ));
        assert_eq!(log.records_for(txn_id).len(), 2);
    }
}
