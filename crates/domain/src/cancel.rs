//! A level-triggered cancellation flag shared across the sync/async boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cheaply cloneable; every clone observes the same underlying flag.
#[derive(Debug, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// A token nobody will ever call `cancel()` on. Used by the router
    /// dispatcher so a user interrupt can't poison an in-flight
    /// classification run.
    pub fn never() -> Self {
        Self::new()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clears the flag for reuse at the start of a new run.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let a = CancelToken::new();
        let b = a.clone();
        assert!(!b.is_cancelled());
        a.cancel();
        assert!(b.is_cancelled());
    }

    #[test]
    fn reset_clears_flag() {
        let a = CancelToken::new();
        a.cancel();
        a.reset();
        assert!(!a.is_cancelled());
    }
}
