//! Calculation context
//!
//! What a module sees while computing one scenario: its own private inputs
//! for that scenario, fresh store reads under that scenario's namespace,
//! and a way to publish results into the same namespace.

use indexmap::IndexMap;

use tandem_foundation::{
    FieldId, NEUTRAL, Provenance, Scenario, ScenarioKey, format_numeric, parse_or, safe_divide,
};

use crate::facade::ScenarioFacade;
use crate::store::ValueStore;

/// Context available to a module while it computes one scenario
pub struct CalcContext<'a> {
    store: &'a mut ValueStore,
    facade: &'a ScenarioFacade,
    scenario: Scenario,
    published: IndexMap<String, String>,
}

impl<'a> CalcContext<'a> {
    pub fn new(store: &'a mut ValueStore, facade: &'a ScenarioFacade, scenario: Scenario) -> Self {
        Self {
            store,
            facade,
            scenario,
            published: IndexMap::new(),
        }
    }

    /// The scenario being computed (not necessarily the displayed one).
    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    fn key(&self, id: &str) -> String {
        ScenarioKey::new(id, self.scenario).to_store_key()
    }

    /// The module's own private input for this scenario.
    pub fn own(&self, id: &str) -> Option<&str> {
        self.facade.value_in(self.scenario, id)
    }

    /// The module's own input parsed as a number.
    pub fn own_number(&self, id: &str, default: f64) -> f64 {
        parse_or(self.own(id), default)
    }

    /// A store value under this scenario's namespace, read fresh.
    pub fn external(&self, id: &str) -> Option<&str> {
        self.store.get(&self.key(id))
    }

    /// A store value under this scenario's namespace, parsed as a number.
    pub fn number(&self, id: &str, default: f64) -> f64 {
        parse_or(self.external(id), default)
    }

    /// Publish a numeric result as `calculated` under this scenario's namespace.
    pub fn publish(&mut self, id: &str, value: f64) {
        self.publish_text(id, format_numeric(value));
    }

    /// Publish a textual result as `calculated` under this scenario's namespace.
    pub fn publish_text(&mut self, id: &str, value: impl Into<String>) {
        let key = self.key(id);
        let value = value.into();
        self.published.insert(key.clone(), value.clone());
        self.store.set(key, value, Provenance::Calculated);
    }

    /// Divide with an explicit zero check; see [`safe_divide`].
    pub fn divide(&self, numerator: f64, denominator: f64, fallback: f64, label: &str) -> f64 {
        safe_divide(numerator, denominator, fallback, label)
    }

    /// Publish the neutral value for every listed field.
    pub fn publish_neutral<'f>(&mut self, fields: impl IntoIterator<Item = &'f FieldId>) {
        for id in fields {
            self.publish(id.as_str(), NEUTRAL);
        }
    }

    /// Keys published so far and their values.
    pub fn published(&self) -> &IndexMap<String, String> {
        &self.published
    }

    pub fn into_published(self) -> IndexMap<String, String> {
        self.published
    }

    pub fn store(&self) -> &ValueStore {
        &*self.store
    }
}
