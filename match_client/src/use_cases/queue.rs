// Hand-off from the connection's delivery task to the simulation loop.

use crate::domain::BoxError;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{error, warn};

pub type ActionResult = Result<(), BoxError>;

/// Deferred work that runs on the simulation thread against its context.
pub type PendingAction<C> = Box<dyn FnOnce(&mut C) -> ActionResult + Send>;

/// Outcome of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub executed: usize,
    pub failed: usize,
}

/// Lock-protected FIFO of pending actions.
///
/// `enqueue` may be called from any thread. `drain_and_execute_all` belongs to
/// the simulation thread: it swaps the pending list out under the lock and runs
/// it outside the lock, so actions are free to enqueue more work.
pub struct MainThreadQueue<C> {
    pending: Mutex<Vec<PendingAction<C>>>,
}

impl<C> Default for MainThreadQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> MainThreadQueue<C> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn enqueue<F>(&self, action: F)
    where
        F: FnOnce(&mut C) -> ActionResult + Send + 'static,
    {
        self.lock().push(Box::new(action));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Runs every action queued so far, in enqueue order, exactly once.
    /// Work enqueued while draining waits for the next drain.
    pub fn drain_and_execute_all(&self, ctx: &mut C) -> DrainReport {
        let actions = std::mem::take(&mut *self.lock());
        let mut report = DrainReport::default();

        for action in actions {
            report.executed += 1;
            match catch_unwind(AssertUnwindSafe(|| action(ctx))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    report.failed += 1;
                    warn!(error = %err, "queued action failed");
                }
                Err(_) => {
                    report.failed += 1;
                    error!("queued action panicked");
                }
            }
        }

        report
    }

    // Only push and take happen under the lock, so a poisoned guard still
    // holds a consistent list.
    fn lock(&self) -> MutexGuard<'_, Vec<PendingAction<C>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
