//! Rents out loaded model engines under backpressure.
//!
//! Construction synchronously builds N [`Worker`]s and enqueues them on a
//! bounded channel of size N. `acquire()` waits for one to become
//! available and returns an RAII guard; the guard's `Drop` re-enqueues the
//! worker on every exit path, including panics and cancellation of the
//! renting task. Fairness is FIFO by acquisition order — the channel
//! itself provides that ordering. The pool never resizes.

use std::sync::Arc;

use relay_engine::EngineBackend;
use relay_domain::{Error, Result};

/// A loaded engine bound to a numeric id. Owned by exactly one [`WorkerPool`].
pub struct Worker {
    pub id: u64,
    pub engine: Arc<dyn EngineBackend>,
}

pub struct WorkerPool {
    tx: tokio::sync::mpsc::Sender<Worker>,
    rx: tokio::sync::Mutex<tokio::sync::mpsc::Receiver<Worker>>,
    size: usize,
}

impl WorkerPool {
    /// `factory` is called exactly `size` times, synchronously, to build
    /// the pool's workers up front.
    pub fn new<F>(size: usize, mut factory: F) -> Result<Self>
    where
        F: FnMut(u64) -> Result<Arc<dyn EngineBackend>>,
    {
        if size == 0 {
            return Err(Error::EngineInit("pool size must be >= 1".into()));
        }

        let (tx, rx) = tokio::sync::mpsc::channel(size);
        for id in 0..size as u64 {
            let engine = factory(id)?;
            tx.try_send(Worker { id, engine })
                .expect("channel sized to `size`, cannot be full during construction");
        }

        Ok(Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Waits for a worker to become available. The returned guard
    /// re-enqueues it when dropped, regardless of how the caller's scope
    /// exits.
    pub async fn acquire(&self) -> WorkerGuard<'_> {
        let worker = {
            let mut rx = self.rx.lock().await;
            rx.recv()
                .await
                .expect("pool's sender half is held by `self` for its entire lifetime")
        };
        WorkerGuard {
            worker: Some(worker),
            tx: self.tx.clone(),
        }
    }
}

/// RAII rental. Dereferences to the rented [`Worker`]; releases it back to
/// the pool on drop.
pub struct WorkerGuard<'a> {
    worker: Option<Worker>,
    tx: tokio::sync::mpsc::Sender<Worker>,
}

impl<'a> std::ops::Deref for WorkerGuard<'a> {
    type Target = Worker;
    fn deref(&self) -> &Worker {
        self.worker.as_ref().expect("worker taken only on drop")
    }
}

impl<'a> Drop for WorkerGuard<'a> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            // `try_send` cannot fail: the channel's capacity equals the
            // pool size and every worker was dequeued before being rented.
            if self.tx.try_send(worker).is_err() {
                tracing::error!("worker pool release failed — pool receiver dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_engine::MockEngine;

    fn test_pool(size: usize) -> WorkerPool {
        WorkerPool::new(size, |_id| {
            Ok(Arc::new(MockEngine::new(vec!["x".into()])) as Arc<dyn EngineBackend>)
        })
        .unwrap()
    }

    #[tokio::test]
    async fn acquire_releases_on_drop() {
        let pool = test_pool(1);
        {
            let _guard = pool.acquire().await;
        }
        // Second acquire must not hang: the guard released on scope exit.
        let _guard2 = tokio::time::timeout(std::time::Duration::from_secs(1), pool.acquire())
            .await
            .expect("acquire should not block after release");
    }

    #[tokio::test]
    async fn at_most_size_outstanding_at_once() {
        let pool = test_pool(1);
        let guard = pool.acquire().await;
        let second = tokio::time::timeout(std::time::Duration::from_millis(50), pool.acquire()).await;
        assert!(second.is_err(), "second acquire should block while pool size is 1");
        drop(guard);
    }

    #[test]
    fn zero_size_rejected() {
        let err = WorkerPool::new(0, |_| {
            Ok(Arc::new(MockEngine::new(vec![])) as Arc<dyn EngineBackend>)
        });
        assert!(err.is_err());
    }
}
