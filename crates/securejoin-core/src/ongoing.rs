//! Single-flight guard for long-running operations
//!
//! At most one guarded operation runs per context. It can be asked to stop;
//! the operation notices at its next poll of [`OngoingToken::shall_stop`].
//! The guard is released when the token is dropped, which also swallows any
//! stop request that arrived too late so it cannot hit the next operation.

use core::sync::atomic::{AtomicU8, Ordering};

#[cfg(feature = "tracing")]
use tracing::{info, warn};

#[cfg(not(feature = "tracing"))]
use log::{info, warn};

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOP_REQUESTED: u8 = 2;

/// Guard allowing one ongoing operation at a time
#[derive(Debug, Default)]
pub struct OngoingGuard {
    state: AtomicU8,
}

impl OngoingGuard {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
        }
    }

    /// Start an operation
    ///
    /// Fails while another operation runs, including one that was asked to
    /// stop but has not finished yet.
    pub fn acquire(&self) -> Option<OngoingToken<'_>> {
        match self
            .state
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Some(OngoingToken { guard: self }),
            Err(_) => {
                warn!("There is already another ongoing process running");
                None
            }
        }
    }

    /// Ask the running operation to stop; no-op when idle
    ///
    /// Returns whether a running operation was signalled.
    pub fn request_stop(&self) -> bool {
        match self
            .state
            .compare_exchange(RUNNING, STOP_REQUESTED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                info!("Signaling the ongoing process to stop");
                true
            }
            Err(_) => {
                info!("No ongoing process to stop");
                false
            }
        }
    }

    /// Whether an operation holds the guard
    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) != IDLE
    }

    /// Whether the current operation, if any, should stop
    ///
    /// Also true while idle, so a late signal has nothing to act on.
    pub fn shall_stop(&self) -> bool {
        self.state.load(Ordering::Acquire) != RUNNING
    }

    fn release(&self) {
        self.state.store(IDLE, Ordering::Release);
    }
}

/// Proof of holding the [`OngoingGuard`]; releases it on drop
#[derive(Debug)]
pub struct OngoingToken<'a> {
    guard: &'a OngoingGuard,
}

impl OngoingToken<'_> {
    /// Whether the operation was asked to stop
    pub fn shall_stop(&self) -> bool {
        self.guard.shall_stop()
    }
}

impl Drop for OngoingToken<'_> {
    fn drop(&mut self) {
        self.guard.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_single_flight() {
        let guard = OngoingGuard::new();
        assert!(guard.shall_stop());

        let token = guard.acquire().unwrap();
        assert!(guard.is_running());
        assert!(!token.shall_stop());
        assert!(guard.acquire().is_none());

        drop(token);
        assert!(!guard.is_running());
        assert!(guard.acquire().is_some());
    }

    #[test]
    fn test_stop_request() {
        let guard = OngoingGuard::new();
        assert!(!guard.request_stop());

        let token = guard.acquire().unwrap();
        assert!(guard.request_stop());
        assert!(token.shall_stop());
        // still held until the operation finishes
        assert!(guard.acquire().is_none());
        assert!(!guard.request_stop());

        drop(token);
        let token = guard.acquire().unwrap();
        assert!(!token.shall_stop());
    }

    #[test]
    fn test_stop_after_release_does_not_leak() {
        let guard = OngoingGuard::new();
        drop(guard.acquire().unwrap());
        assert!(!guard.request_stop());

        let token = guard.acquire().unwrap();
        assert!(!token.shall_stop());
    }

    #[test]
    fn test_concurrent_acquire() {
        let guard = Arc::new(OngoingGuard::new());
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = Arc::clone(&guard);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let token = guard.acquire();
                    let acquired = token.is_some();
                    // keep the token until everyone tried
                    barrier.wait();
                    drop(token);
                    acquired
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|acquired| *acquired)
            .count();
        assert_eq!(winners, 1);
    }
}
