//! Thin spawn/timer facade over the tokio runtime (spec.md §2 "Runtime"
//! row). Kept as a seam rather than calling `tokio::spawn` directly
//! throughout `ice-rpc` so that a connection's background tasks (I/O pump,
//! ACM ticker) are all tracked in one place and can be aborted together
//! when the connection finishes (spec.md §4.5 `Finished` state).

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A handle to every background task a single connection or object
/// adapter spawned, so they can all be aborted together on teardown
/// rather than leaking until they notice their owner is gone.
#[derive(Default)]
pub struct TaskGroup {
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&self, future: impl Future<Output = ()> + Send + 'static) {
        let handle = tokio::spawn(future);
        self.handles.lock().push(handle);
    }

    /// Aborts every task spawned through this group. Safe to call more
    /// than once; aborting an already-finished task is a no-op.
    pub fn abort_all(&self) {
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        self.abort_all();
    }
}

/// Runs `tick` on `interval`, stopping when `tick` returns `false`. Used
/// for the ACM timer and the retry-queue's delayed-retry scheduling
/// (spec.md §4.5, §4.6).
pub async fn run_periodic(interval: Duration, mut tick: impl FnMut() -> bool) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if !tick() {
            break;
        }
    }
}
