//! Log manager that keeps nothing.

use super::{LogManager, LogRecord};

/// A log manager that drops every record (null object).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpLogManager;

impl NoOpLogManager {
    /// Creates a new no-op log manager.
    pub fn new() -> Self {
        Self
    }
}

impl LogManager for NoOpLogManager {
    fn log(&self, _record: LogRecord) {}

    fn is_enabled(&self) -> bool {
        false
    }
}
