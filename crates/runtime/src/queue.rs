//! Listener task queue
//!
//! Writes never call listeners recursively. Each write enqueues one task per
//! registered listener and the store drains the queue until it is empty
//! (one "pass"). Every task carries its cause: the chain of listeners whose
//! writes led to it. Within a pass:
//!
//! - a listener that is already pending is coalesced into the pending task
//! - a listener found in the cause of its own trigger is feedback and is suppressed
//! - a listener that already ran is queued again when an independent write
//!   changes one of its inputs, so it never settles on a stale read
//!
//! A cause only grows along a chain, so every chain ends after at most one
//! step per listener. [`MAX_RUNS_PER_PASS`] bounds the re-runs of a single
//! listener on top of that.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, trace, warn};

use crate::store::{Change, ListenerId};

/// Runs of one listener allowed in a single pass
pub const MAX_RUNS_PER_PASS: u32 = 32;

/// A pending listener invocation
#[derive(Debug, Clone)]
pub struct Task {
    pub listener: ListenerId,
    /// The write that first scheduled this task in the current pass
    pub change: Change,
    /// Listeners upstream of this task in the current pass
    pub cause: Vec<ListenerId>,
}

impl Task {
    /// Cause carried by writes this task makes.
    pub fn descendant_cause(&self) -> Vec<ListenerId> {
        let mut cause = self.cause.clone();
        cause.push(self.listener);
        cause
    }
}

/// Outcome of offering a task to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Queued,
    /// Queued again after already running this pass
    Requeued,
    Coalesced,
    Suppressed,
}

/// A listener that returned an error during a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerFailure {
    pub listener: ListenerId,
    pub key: String,
    pub message: String,
}

/// Summary of one run-to-quiescence pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub tasks_run: usize,
    pub coalesced: usize,
    pub requeued: usize,
    pub suppressed: usize,
    pub failures: Vec<ListenerFailure>,
}

impl PassReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct TaskQueue {
    pending: VecDeque<Task>,
    /// Runs per listener in the current pass
    runs: HashMap<ListenerId, u32>,
    report: PassReport,
}

impl TaskQueue {
    pub fn push(&mut self, listener: ListenerId, change: &Change, cause: &[ListenerId]) -> Enqueue {
        if cause.contains(&listener) {
            debug!(%listener, key = %change.key, "listener re-triggered by its own cascade, suppressed");
            self.report.suppressed += 1;
            return Enqueue::Suppressed;
        }
        if let Some(task) = self.pending.iter_mut().find(|t| t.listener == listener) {
            for id in cause {
                if !task.cause.contains(id) {
                    task.cause.push(*id);
                }
            }
            trace!(%listener, key = %change.key, "listener already pending, coalesced");
            self.report.coalesced += 1;
            return Enqueue::Coalesced;
        }

        let runs = self.runs.get(&listener).copied().unwrap_or(0);
        if runs >= MAX_RUNS_PER_PASS {
            warn!(%listener, key = %change.key, runs, "listener run limit reached for this pass, suppressed");
            self.report.suppressed += 1;
            return Enqueue::Suppressed;
        }

        self.pending.push_back(Task {
            listener,
            change: change.clone(),
            cause: cause.to_vec(),
        });
        if runs > 0 {
            debug!(%listener, key = %change.key, "input changed after listener ran, queued again");
            self.report.requeued += 1;
            Enqueue::Requeued
        } else {
            Enqueue::Queued
        }
    }

    /// Take the next task and count its run for this pass.
    pub fn pop(&mut self) -> Option<Task> {
        let task = self.pending.pop_front()?;
        *self.runs.entry(task.listener).or_default() += 1;
        self.report.tasks_run += 1;
        Some(task)
    }

    pub fn record_failure(&mut self, listener: ListenerId, key: &str, message: String) {
        self.report.failures.push(ListenerFailure {
            listener,
            key: key.to_string(),
            message,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Close the current pass, returning its report.
    pub fn finish_pass(&mut self) -> PassReport {
        self.runs.clear();
        self.pending.clear();
        std::mem::take(&mut self.report)
    }
}
