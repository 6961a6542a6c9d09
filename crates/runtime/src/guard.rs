//! Reentrancy guard for calculation entry points
//!
//! The task queue already keeps a listener from running twice in one pass.
//! Entry points that can also be called directly (hand-sequenced passes,
//! tests, collaborators) carry a guard so a nested call made while the body
//! is still executing is skipped instead of recursing.

use std::cell::Cell;

use tracing::debug;

#[derive(Debug)]
pub struct ReentrancyGuard {
    name: String,
    active: Cell<bool>,
    suppressed: Cell<u64>,
}

/// Held for the duration of a guarded body
#[must_use = "the guard is released as soon as the token is dropped"]
pub struct GuardToken<'a> {
    guard: &'a ReentrancyGuard,
}

impl ReentrancyGuard {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: Cell::new(false),
            suppressed: Cell::new(0),
        }
    }

    /// Enter the guarded body, or `None` if it is already running.
    pub fn enter(&self) -> Option<GuardToken<'_>> {
        if self.active.get() {
            self.suppressed.set(self.suppressed.get() + 1);
            debug!(guard = %self.name, "already running, nested call skipped");
            return None;
        }
        self.active.set(true);
        Some(GuardToken { guard: self })
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Number of nested calls skipped so far.
    pub fn suppressed(&self) -> u64 {
        self.suppressed.get()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for GuardToken<'_> {
    fn drop(&mut self) {
        self.guard.active.set(false);
    }
}
