//! The session concurrency guard (C5): enforces at-most-one in-flight
//! task, with guaranteed release on every exit path including panics.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// A gate admitting at most one concurrent task.
#[derive(Clone, Default)]
pub struct ConcurrencyGuard {
    in_flight: Arc<AtomicBool>,
}

/// Proof of admission through a [`ConcurrencyGuard`]. Releases the gate
/// when dropped — including during an unwinding panic — so a caller never
/// has to remember to release it explicitly.
pub struct GuardPermit {
    flag: Arc<AtomicBool>,
}

impl Drop for GuardPermit {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl ConcurrencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to admit one task. Returns [`Error::Busy`] immediately if
    /// another task already holds the gate. The returned permit releases
    /// the gate when it is dropped — callers that need the slot held for
    /// longer than one request's lifetime (§4.5's second gate variant)
    /// simply keep the permit alive (e.g. stored in the session) until
    /// the transfer concludes, rather than dropping it at the end of the
    /// admitting request handler.
    pub fn acquire(&self) -> Result<GuardPermit> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| GuardPermit {
                flag: self.in_flight.clone(),
            })
            .map_err(|_| Error::Busy)
    }

    /// Runs `task` to completion while holding the gate, releasing it
    /// immediately afterward (or on panic). Returns [`Error::Busy`]
    /// without running `task` at all if another task is in flight.
    pub async fn execute<F, Fut, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.acquire()?;
        Ok(task().await)
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }
}
