use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{EngineError, Result};

/// Tasks submitted by this process that have not yet been confirmed executed.
#[derive(Debug, Default)]
pub struct CompletionCounter(AtomicUsize);

impl CompletionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new count.
    pub fn increment(&self) -> usize {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Retire one task. Going below zero means a completion notice arrived for
    /// a task this process never submitted.
    pub fn decrement(&self) -> Result<usize> {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map(|prev| prev - 1)
            .map_err(|_| EngineError::CounterUnderflow)
    }

    /// Undo an `increment` whose task was never queued.
    pub(crate) fn rollback(&self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    pub fn is_zero(&self) -> bool {
        self.get() == 0
    }
}
