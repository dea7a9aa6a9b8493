//! Background garbage collection thread.

use crate::transaction::TransactionManager;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wakeup: Condvar,
}

/// Runs [`TransactionManager::collect_garbage`] periodically off the
/// transaction path.
///
/// The worker stops when [`GcWorker::stop`] is called or the handle is
/// dropped.
#[derive(Debug)]
pub struct GcWorker {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl GcWorker {
    /// Starts a worker collecting every `interval`.
    pub fn spawn(manager: Arc<TransactionManager>, interval: Duration) -> Self {
        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);

        let handle = thread::spawn(move || {
            debug!(?interval, "gc worker started");
            loop {
                {
                    let mut stopped = thread_signal.stopped.lock();
                    if !*stopped {
                        thread_signal.wakeup.wait_for(&mut stopped, interval);
                    }
                    if *stopped {
                        break;
                    }
                }
                if let Err(err) = manager.collect_garbage() {
                    warn!(%err, "gc pass failed");
                }
            }
            // Drain what became reclaimable while we slept.
            if let Err(err) = manager.collect_garbage() {
                warn!(%err, "final gc pass failed");
            }
            debug!("gc worker stopped");
        });

        Self {
            signal,
            handle: Some(handle),
        }
    }

    /// Returns true while the worker thread is running.
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the worker and waits for its thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        *self.signal.stopped.lock() = true;
        self.signal.wakeup.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("gc worker panicked");
            }
        }
    }
}

impl Drop for GcWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
