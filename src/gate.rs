//! Process-wide exclusivity gate serializing index builds and searches.
//!
//! `try_acquire` never blocks or queues: it either hands out a guard or
//! reports that another operation is running. The guard releases the gate on
//! drop, so every exit path of the guarded operation (success, `?` early
//! return, panic unwind) frees it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::models::IndexStatus;

#[derive(Debug, Clone, Default)]
pub struct ExclusivityGate {
    busy: Arc<AtomicBool>,
}

/// Held for the duration of one build or search.
#[derive(Debug)]
#[must_use = "the gate is released as soon as the guard is dropped"]
pub struct GateGuard {
    busy: Arc<AtomicBool>,
}

impl ExclusivityGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the gate if it is free. Returns immediately either way.
    pub fn try_acquire(&self) -> Option<GateGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| GateGuard {
                busy: Arc::clone(&self.busy),
            })
    }

    /// Best-effort status check. Reads the flag without touching it.
    pub fn status(&self) -> IndexStatus {
        if self.busy.load(Ordering::Relaxed) {
            IndexStatus::Busy
        } else {
            IndexStatus::Idle
        }
    }
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
