//! Read/write diagnostics
//!
//! A passive [`StoreObserver`] that counts reads, misses, and writes per
//! key, plus a consistency check over the scenario namespaces. Attaching
//! an observer never changes store behavior.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::Serialize;

use tandem_foundation::{Provenance, Scenario, ScenarioKey};

use crate::store::ValueStore;

/// Hooks called by [`ValueStore`] on every read and write
pub trait StoreObserver {
    fn on_read(&self, _key: &str, _hit: bool) {}

    fn on_write(&self, _key: &str, _value: &str, _provenance: Provenance) {}
}

/// Access counters for one key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KeyStats {
    pub reads: u64,
    /// Reads of a key that had no value
    pub misses: u64,
    pub writes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    keys: IndexMap<String, KeyStats>,
    by_provenance: IndexMap<Provenance, u64>,
}

/// Collector of store access statistics
#[derive(Debug, Default)]
pub struct Diagnostics {
    counters: RefCell<Counters>,
}

/// Summary produced by [`Diagnostics::report`]
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub total_reads: u64,
    pub total_misses: u64,
    pub total_writes: u64,
    pub writes_by_provenance: IndexMap<Provenance, u64>,
    /// Keys ordered by write count, busiest first
    pub hottest: Vec<(String, KeyStats)>,
}

/// Inconsistency found by [`Diagnostics::check_invariants`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "key", rename_all = "kebab-case")]
pub enum Violation {
    /// A Target field with no Reference counterpart
    MissingReference(String),
    /// A Reference field with no Target counterpart
    OrphanReference(String),
    /// A key whose base is not a `<column>_<row>` field id
    MalformedKey(String),
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::MissingReference(key) => write!(f, "{key} has no reference counterpart"),
            Violation::OrphanReference(key) => write!(f, "{key} has no target counterpart"),
            Violation::MalformedKey(key) => write!(f, "{key} is not a field key"),
        }
    }
}

impl Diagnostics {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn stats(&self, key: &str) -> KeyStats {
        self.counters
            .borrow()
            .keys
            .get(key)
            .copied()
            .unwrap_or_default()
    }

    pub fn reads(&self, key: &str) -> u64 {
        self.stats(key).reads
    }

    pub fn writes(&self, key: &str) -> u64 {
        self.stats(key).writes
    }

    pub fn writes_with(&self, provenance: Provenance) -> u64 {
        self.counters
            .borrow()
            .by_provenance
            .get(&provenance)
            .copied()
            .unwrap_or(0)
    }

    pub fn reset(&self) {
        *self.counters.borrow_mut() = Counters::default();
    }

    /// Summarize everything observed so far, listing at most `top` keys.
    pub fn report(&self, top: usize) -> DiagnosticReport {
        let counters = self.counters.borrow();
        let mut hottest: Vec<(String, KeyStats)> = counters
            .keys
            .iter()
            .map(|(k, s)| (k.clone(), *s))
            .collect();
        hottest.sort_by(|a, b| b.1.writes.cmp(&a.1.writes).then_with(|| a.0.cmp(&b.0)));
        hottest.truncate(top);

        DiagnosticReport {
            total_reads: counters.keys.values().map(|s| s.reads).sum(),
            total_misses: counters.keys.values().map(|s| s.misses).sum(),
            total_writes: counters.keys.values().map(|s| s.writes).sum(),
            writes_by_provenance: counters.by_provenance.clone(),
            hottest,
        }
    }

    /// Check that every field key has both scenario namespaces populated.
    pub fn check_invariants(store: &ValueStore) -> Vec<Violation> {
        let mut violations = Vec::new();
        for (key, _) in store.records() {
            let parsed = match ScenarioKey::parse(key) {
                Ok(parsed) => parsed,
                Err(_) => {
                    violations.push(Violation::MalformedKey(key.to_string()));
                    continue;
                }
            };
            if store.contains(&parsed.counterpart().to_store_key()) {
                continue;
            }
            violations.push(match parsed.scenario {
                Scenario::Target => Violation::MissingReference(key.to_string()),
                Scenario::Reference => Violation::OrphanReference(key.to_string()),
            });
        }
        violations
    }
}

impl StoreObserver for Diagnostics {
    fn on_read(&self, key: &str, hit: bool) {
        let mut counters = self.counters.borrow_mut();
        let stats = counters.keys.entry(key.to_string()).or_default();
        stats.reads += 1;
        if !hit {
            stats.misses += 1;
        }
    }

    fn on_write(&self, key: &str, _value: &str, provenance: Provenance) {
        let mut counters = self.counters.borrow_mut();
        counters.keys.entry(key.to_string()).or_default().writes += 1;
        *counters.by_provenance.entry(provenance).or_insert(0) += 1;
    }
}
