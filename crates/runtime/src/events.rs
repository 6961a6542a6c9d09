//! Stage completion events
//!
//! Fire-and-forget broadcasts emitted when a staged module finishes a stage.
//! They exist for external collaborators (renderers, QC tooling); no module
//! depends on them for its own ordering.

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::trace;

use tandem_foundation::ModuleId;

/// A calculation phase of a staged module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Stage1,
    Stage2,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Stage1 => "stage1",
            Stage::Stage2 => "stage2",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broadcast after a stage completes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageEvent {
    /// `<module>-<stage>`, e.g. `heating-stage1`
    pub name: String,
    pub module: ModuleId,
    pub stage: Stage,
    /// Store keys published by the stage and their values
    pub snapshot: IndexMap<String, String>,
}

impl StageEvent {
    pub fn new(module: ModuleId, stage: Stage, snapshot: IndexMap<String, String>) -> Self {
        Self {
            name: event_name(&module, stage),
            module,
            stage,
            snapshot,
        }
    }
}

/// Event name for a module's stage.
pub fn event_name(module: &ModuleId, stage: Stage) -> String {
    format!("{module}-{stage}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

type EventFn = Box<dyn Fn(&StageEvent)>;

struct Subscription {
    id: SubscriptionId,
    filter: Option<String>,
    callback: EventFn,
}

#[derive(Default)]
pub struct EventBus {
    subscriptions: Vec<Subscription>,
    next_id: u64,
    emitted: u64,
}

impl EventBus {
    pub fn subscribe<F>(&mut self, name: Option<&str>, callback: F) -> SubscriptionId
    where
        F: Fn(&StageEvent) + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscriptions.push(Subscription {
            id,
            filter: name.map(str::to_string),
            callback: Box::new(callback),
        });
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    pub fn emit(&mut self, event: &StageEvent) {
        self.emitted += 1;
        trace!(event = %event.name, keys = event.snapshot.len(), "stage event");
        for subscription in &self.subscriptions {
            let matches = subscription
                .filter
                .as_deref()
                .is_none_or(|name| name == event.name);
            if matches {
                (subscription.callback)(event);
            }
        }
    }

    /// Number of events emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}
