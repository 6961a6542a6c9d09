//! Keyed value store
//!
//! The single shared mutable resource of a model. Holds one current string
//! value per key with its provenance, dispatches change notifications to
//! listeners, and carries the documentation-only dependency registry and the
//! stage event bus.
//!
//! Writes are last-write-wins with no transactional grouping: a listener
//! triggered by a write to one key may observe another key that has not been
//! updated yet in the same cascade. Calculations therefore re-read every
//! input from the store on each invocation instead of caching prior reads.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace, warn};

use tandem_foundation::{Provenance, ScenarioKey, parse_or};

use crate::dependency::DependencyRegistry;
use crate::diagnostics::StoreObserver;
use crate::error::Result;
use crate::events::{EventBus, StageEvent, SubscriptionId};
use crate::queue::{PassReport, TaskQueue};

/// Callback invoked after a write to a watched key.
///
/// Listeners receive the store itself so they can read fresh inputs and
/// publish results; writes they make are queued, not dispatched recursively.
pub type ListenerFn = Rc<dyn Fn(&mut ValueStore, &Change) -> Result<()>>;

/// Handle returned by [`ValueStore::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Current value of a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub value: String,
    pub provenance: Provenance,
}

/// A write, as seen by listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub key: String,
    pub value: String,
    pub provenance: Provenance,
}

/// Keyed value store with change notification
#[derive(Default)]
pub struct ValueStore {
    records: IndexMap<String, Record>,
    /// Listener ids per key, in registration order
    listeners: IndexMap<String, Vec<ListenerId>>,
    callbacks: HashMap<ListenerId, ListenerFn>,
    next_listener: u64,
    dependencies: DependencyRegistry,
    events: EventBus,
    observer: Option<Rc<dyn StoreObserver>>,
    queue: TaskQueue,
    /// Cause of writes made by the listener currently running
    active_cause: Vec<ListenerId>,
    draining: bool,
    batch_depth: usize,
    last_pass: PassReport,
    passes: u64,
    /// Reports of non-empty passes, when recording is enabled
    history: Option<Vec<PassReport>>,
}

impl fmt::Debug for ValueStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueStore")
            .field("records", &self.records.len())
            .field("listeners", &self.callbacks.len())
            .field("dependencies", &self.dependencies.len())
            .field("passes", &self.passes)
            .finish()
    }
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current value of a key. Unknown keys return `None`.
    pub fn get(&self, key: &str) -> Option<&str> {
        let value = self.records.get(key).map(|r| r.value.as_str());
        if let Some(observer) = &self.observer {
            observer.on_read(key, value.is_some());
        }
        value
    }

    /// Get the value of a scenario-qualified key.
    pub fn get_key(&self, key: &ScenarioKey) -> Option<&str> {
        self.get(&key.to_store_key())
    }

    /// Get a value parsed as a number, substituting `default` when absent.
    ///
    /// Present but non-numeric values parse to zero.
    pub fn get_number(&self, key: &str, default: f64) -> f64 {
        parse_or(self.get(key), default)
    }

    /// Get the full record (value and provenance) of a key.
    pub fn record(&self, key: &str) -> Option<&Record> {
        self.records.get(key)
    }

    pub fn provenance(&self, key: &str) -> Option<Provenance> {
        self.records.get(key).map(|r| r.provenance)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    /// Store a value and notify every listener registered on `key`.
    ///
    /// Listeners run even when the value is unchanged; callers that care
    /// about change detection compare values themselves. A listener whose
    /// own cascade produced the write is not notified again. Unless a pass is
    /// already draining or a batch is open, the cascade runs to quiescence
    /// before this returns.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>, provenance: Provenance) {
        let change = Change {
            key: key.into(),
            value: value.into(),
            provenance,
        };
        trace!(key = %change.key, value = %change.value, %provenance, "set");

        if let Some(observer) = &self.observer {
            observer.on_write(&change.key, &change.value, provenance);
        }
        self.records.insert(
            change.key.clone(),
            Record {
                value: change.value.clone(),
                provenance,
            },
        );

        if let Some(ids) = self.listeners.get(&change.key) {
            for id in ids {
                self.queue.push(*id, &change, &self.active_cause);
            }
        }

        if self.batch_depth == 0 && !self.draining {
            self.drain();
        }
    }

    /// Store an optional value; `None` is coerced to the empty string.
    pub fn set_optional(
        &mut self,
        key: impl Into<String>,
        value: Option<String>,
        provenance: Provenance,
    ) {
        self.set(key, value.unwrap_or_default(), provenance);
    }

    /// Store a value under a scenario-qualified key.
    pub fn set_key(&mut self, key: &ScenarioKey, value: impl Into<String>, provenance: Provenance) {
        self.set(key.to_store_key(), value, provenance);
    }

    /// Register a listener on one key.
    pub fn add_listener<F>(&mut self, key: impl Into<String>, callback: F) -> ListenerId
    where
        F: Fn(&mut ValueStore, &Change) -> Result<()> + 'static,
    {
        self.add_listener_many([key.into()], callback)
    }

    /// Register one listener on several keys.
    ///
    /// Writes to any of the keys schedule the same task, so a burst of
    /// writes within one pass runs the callback once.
    pub fn add_listener_many<I, K, F>(&mut self, keys: I, callback: F) -> ListenerId
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
        F: Fn(&mut ValueStore, &Change) -> Result<()> + 'static,
    {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.callbacks.insert(id, Rc::new(callback));

        for key in keys {
            let key = key.into();
            trace!(%id, key = %key, "listener added");
            self.listeners.entry(key).or_default().push(id);
        }
        id
    }

    /// Remove a listener from one key. Returns false if it was not registered there.
    pub fn remove_listener(&mut self, key: &str, id: ListenerId) -> bool {
        let Some(ids) = self.listeners.get_mut(key) else {
            return false;
        };
        let before = ids.len();
        ids.retain(|existing| *existing != id);
        let removed = ids.len() != before;
        if ids.is_empty() {
            self.listeners.shift_remove(key);
        }

        if removed && !self.listeners.values().any(|ids| ids.contains(&id)) {
            self.callbacks.remove(&id);
        }
        removed
    }

    pub fn listener_count(&self, key: &str) -> usize {
        self.listeners.get(key).map_or(0, Vec::len)
    }

    /// Record a documentation edge. Does not affect dispatch order.
    pub fn register_dependency(&mut self, precedent: impl Into<String>, dependent: impl Into<String>) {
        self.dependencies.register(precedent, dependent);
    }

    pub fn dependencies(&self) -> &DependencyRegistry {
        &self.dependencies
    }

    /// All keys in insertion order.
    pub fn all_keys(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    /// Snapshot of every key and value, in insertion order.
    pub fn all_values(&self) -> IndexMap<String, String> {
        self.records
            .iter()
            .map(|(k, r)| (k.clone(), r.value.clone()))
            .collect()
    }

    pub fn records(&self) -> impl Iterator<Item = (&str, &Record)> {
        self.records.iter().map(|(k, r)| (k.as_str(), r))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Defer dispatch until the matching [`end_batch`](Self::end_batch).
    ///
    /// Batches nest; listeners scheduled inside run once the outermost batch closes.
    pub fn begin_batch(&mut self) {
        self.batch_depth += 1;
    }

    pub fn end_batch(&mut self) {
        if self.batch_depth == 0 {
            warn!("end_batch without matching begin_batch");
            return;
        }
        self.batch_depth -= 1;
        if self.batch_depth == 0 && !self.draining && !self.queue.is_empty() {
            self.drain();
        }
    }

    /// Run `f` with dispatch deferred, then run the resulting cascade.
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut ValueStore) -> R) -> R {
        self.begin_batch();
        let result = f(self);
        self.end_batch();
        result
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// Report of the most recently completed pass.
    pub fn last_pass(&self) -> &PassReport {
        &self.last_pass
    }

    /// Number of passes completed so far.
    pub fn pass_count(&self) -> u64 {
        self.passes
    }

    /// Start or stop keeping a report of every pass that ran at least one task.
    pub fn record_history(&mut self, enabled: bool) {
        match (enabled, self.history.is_some()) {
            (true, false) => self.history = Some(Vec::new()),
            (false, true) => self.history = None,
            _ => {}
        }
    }

    /// Recorded pass reports, oldest first. Empty unless recording is enabled.
    pub fn pass_history(&self) -> &[PassReport] {
        self.history.as_deref().unwrap_or_default()
    }

    /// Attach a passive observer of reads and writes.
    pub fn set_observer(&mut self, observer: Rc<dyn StoreObserver>) {
        self.observer = Some(observer);
    }

    pub fn clear_observer(&mut self) {
        self.observer = None;
    }

    /// Broadcast a stage-completion event to subscribers.
    pub fn emit_stage_event(&mut self, event: StageEvent) {
        self.events.emit(&event);
    }

    /// Subscribe to stage events, optionally filtered by event name (e.g. `"heating-stage1"`).
    pub fn subscribe_stage_events<F>(&mut self, name: Option<&str>, callback: F) -> SubscriptionId
    where
        F: Fn(&StageEvent) + 'static,
    {
        self.events.subscribe(name, callback)
    }

    pub fn unsubscribe_stage_events(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Run queued listeners until the queue is empty.
    #[instrument(level = "trace", skip_all, fields(pass = self.passes))]
    fn drain(&mut self) {
        self.draining = true;

        while let Some(task) = self.queue.pop() {
            let Some(callback) = self.callbacks.get(&task.listener).cloned() else {
                trace!(listener = %task.listener, "listener removed before dispatch");
                continue;
            };

            trace!(listener = %task.listener, key = %task.change.key, "dispatch");
            self.active_cause = task.descendant_cause();
            let result = callback(self, &task.change);
            self.active_cause.clear();
            if let Err(err) = result {
                warn!(
                    listener = %task.listener,
                    key = %task.change.key,
                    error = %err,
                    "listener failed"
                );
                self.queue
                    .record_failure(task.listener, &task.change.key, err.to_string());
            }
        }

        self.draining = false;
        self.passes += 1;
        self.last_pass = self.queue.finish_pass();
        if self.last_pass.tasks_run > 0
            && let Some(history) = &mut self.history
        {
            history.push(self.last_pass.clone());
        }
        if self.last_pass.tasks_run > 0 {
            debug!(
                tasks = self.last_pass.tasks_run,
                coalesced = self.last_pass.coalesced,
                requeued = self.last_pass.requeued,
                suppressed = self.last_pass.suppressed,
                failures = self.last_pass.failures.len(),
                "cascade quiescent"
            );
        }
    }
}
