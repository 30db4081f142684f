//! Per-connection run state: a cancel flag, a single-inflight permit, and a
//! handle to the in-flight orchestration task.
//!
//! Unlike a queued mutex, the run permit is a capacity-1 semaphore acquired
//! with `try_acquire` — a second caller that arrives while a run is active
//! is rejected immediately with [`Error::Busy`]; it is never made to wait.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use relay_domain::{CancelToken, Error, Result};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

const DISCONNECT_AWAIT: Duration = Duration::from_secs(1);
const INTERRUPT_AWAIT: Duration = Duration::from_secs(2);

pub struct Session {
    pub cancel: CancelToken,
    run_permit: Arc<Semaphore>,
    current_task: Mutex<Option<JoinHandle<()>>>,
}

/// Held for the lifetime of a run. Releasing it (by drop, on any exit path
/// including panic) frees the session for its next run.
pub struct RunGuard {
    _permit: OwnedSemaphorePermit,
}

impl Session {
    pub fn new() -> Self {
        Self {
            cancel: CancelToken::new(),
            run_permit: Arc::new(Semaphore::new(1)),
            current_task: Mutex::new(None),
        }
    }

    /// Rejects with `Busy` immediately if a run is already active. On
    /// success, resets the cancel flag for the new run.
    pub fn try_begin_run(&self) -> Result<RunGuard> {
        let permit = Arc::clone(&self.run_permit)
            .try_acquire_owned()
            .map_err(|_| Error::Busy)?;
        self.cancel.reset();
        Ok(RunGuard { _permit: permit })
    }

    pub fn set_current_task(&self, handle: JoinHandle<()>) {
        *self.current_task.lock() = Some(handle);
    }

    pub fn clear_current_task(&self) {
        *self.current_task.lock() = None;
    }

    /// Sets the cancel flag and awaits the in-flight task for up to 1s,
    /// force-aborting it past the deadline. Used on disconnect.
    pub async fn disconnect(&self) {
        self.cancel.cancel();
        let handle = self.current_task.lock().take();
        if let Some(handle) = handle {
            let abort_handle = handle.abort_handle();
            if tokio::time::timeout(DISCONNECT_AWAIT, handle).await.is_err() {
                abort_handle.abort();
            }
        }
    }

    /// Sets the cancel flag and awaits the in-flight task for up to 2s,
    /// swallowing any error or timeout. Used on an explicit `Interrupt`.
    pub async fn interrupt(&self) {
        self.cancel.cancel();
        let handle = self.current_task.lock().take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(INTERRUPT_AWAIT, handle).await;
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_run_is_rejected_immediately() {
        let session = Session::new();
        let _guard = session.try_begin_run().unwrap();
        let second = session.try_begin_run();
        assert!(matches!(second, Err(Error::Busy)));
    }

    #[tokio::test]
    async fn run_permit_releases_on_drop() {
        let session = Session::new();
        {
            let _guard = session.try_begin_run().unwrap();
        }
        assert!(session.try_begin_run().is_ok());
    }

    #[tokio::test]
    async fn disconnect_sets_cancel_flag() {
        let session = Session::new();
        session.disconnect().await;
        assert!(session.cancel.is_cancelled());
    }
}
