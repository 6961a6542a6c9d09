//! Dual-scenario facade
//!
//! Each module owns one [`ScenarioFacade`]: two private flat maps (Target and
//! Reference) plus the display mode. Writes land in one scenario's map and
//! are bridged into the shared store under that scenario's key; reads come
//! from one scenario's map only.
//!
//! A read never falls back to the other scenario. If a Reference value is
//! missing, the answer is "missing", not the Target value.

use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use tandem_foundation::{FieldId, ModuleId, Provenance, Scenario, ScenarioKey};

use crate::persistence::{PersistedScenarios, ScenarioStorage, storage_key};
use crate::store::ValueStore;

/// Declaration of a field a module owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub id: FieldId,
    /// Seeded into both scenarios at initialization
    pub default: Option<String>,
    /// Inputs are editable and persisted; outputs are published by calculations
    pub editable: bool,
}

impl FieldSpec {
    pub fn input(id: impl Into<FieldId>, default: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            default: Some(default.into()),
            editable: true,
        }
    }

    pub fn output(id: impl Into<FieldId>) -> Self {
        Self {
            id: id.into(),
            default: None,
            editable: false,
        }
    }
}

/// Per-module Target/Reference state
pub struct ScenarioFacade {
    module: ModuleId,
    fields: IndexMap<FieldId, FieldSpec>,
    target: IndexMap<FieldId, String>,
    reference: IndexMap<FieldId, String>,
    mode: Scenario,
    storage: Option<Rc<dyn ScenarioStorage>>,
}

impl std::fmt::Debug for ScenarioFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioFacade")
            .field("module", &self.module)
            .field("mode", &self.mode)
            .field("target", &self.target)
            .field("reference", &self.reference)
            .field("persistent", &self.storage.is_some())
            .finish()
    }
}

impl ScenarioFacade {
    pub fn new(module: impl Into<ModuleId>, fields: impl IntoIterator<Item = FieldSpec>) -> Self {
        Self {
            module: module.into(),
            fields: fields.into_iter().map(|f| (f.id.clone(), f)).collect(),
            target: IndexMap::new(),
            reference: IndexMap::new(),
            mode: Scenario::Target,
            storage: None,
        }
    }

    pub fn with_storage(mut self, storage: Rc<dyn ScenarioStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn set_storage(&mut self, storage: Option<Rc<dyn ScenarioStorage>>) {
        self.storage = storage;
    }

    pub fn module(&self) -> &ModuleId {
        &self.module
    }

    pub fn mode(&self) -> Scenario {
        self.mode
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.values()
    }

    pub fn field(&self, id: &str) -> Option<&FieldSpec> {
        self.fields.get(id)
    }

    pub fn owns(&self, id: &str) -> bool {
        self.fields.contains_key(id)
    }

    /// Editable fields, in declaration order.
    pub fn input_fields(&self) -> impl Iterator<Item = &FieldId> {
        self.fields.values().filter(|f| f.editable).map(|f| &f.id)
    }

    /// Published fields, in declaration order.
    pub fn output_fields(&self) -> impl Iterator<Item = &FieldId> {
        self.fields.values().filter(|f| !f.editable).map(|f| &f.id)
    }

    fn map(&self, scenario: Scenario) -> &IndexMap<FieldId, String> {
        match scenario {
            Scenario::Target => &self.target,
            Scenario::Reference => &self.reference,
        }
    }

    fn map_mut(&mut self, scenario: Scenario) -> &mut IndexMap<FieldId, String> {
        match scenario {
            Scenario::Target => &mut self.target,
            Scenario::Reference => &mut self.reference,
        }
    }

    /// Write into the active scenario and bridge into the store.
    ///
    /// For a module installed on `store`, write through
    /// [`ModuleDriver::set_value`](crate::module::ModuleDriver::set_value) instead.
    pub fn set_value(
        &mut self,
        store: &mut ValueStore,
        id: impl Into<FieldId>,
        value: impl Into<String>,
        provenance: Provenance,
    ) {
        self.set_value_in(store, self.mode, id, value, provenance);
    }

    /// Write into an explicit scenario and bridge into the store.
    ///
    /// Target writes use the bare key, Reference writes the prefixed key.
    /// User edits are persisted.
    pub fn set_value_in(
        &mut self,
        store: &mut ValueStore,
        scenario: Scenario,
        id: impl Into<FieldId>,
        value: impl Into<String>,
        provenance: Provenance,
    ) {
        let id = id.into();
        let value = value.into();
        let key = ScenarioKey::new(id.clone(), scenario);

        trace!(module = %self.module, key = %key, %provenance, "facade write");
        self.map_mut(scenario).insert(id, value.clone());
        store.set_key(&key, value, provenance);

        if provenance == Provenance::UserModified {
            self.persist();
        }
    }

    /// Read from the active scenario only.
    pub fn get_value(&self, id: &str) -> Option<&str> {
        self.value_in(self.mode, id)
    }

    /// Read from an explicit scenario only.
    pub fn value_in(&self, scenario: Scenario, id: &str) -> Option<&str> {
        self.map(scenario).get(id).map(String::as_str)
    }

    /// Change which scenario is displayed. Never recomputes and never writes.
    pub fn switch_mode(&mut self, mode: Scenario) {
        if self.mode != mode {
            debug!(module = %self.module, from = %self.mode, to = %mode, "mode switched");
        }
        self.mode = mode;
    }

    /// Current values of every declared field under the displayed scenario.
    pub fn display_values(&self, store: &ValueStore) -> IndexMap<FieldId, Option<String>> {
        self.fields
            .keys()
            .map(|id| {
                let key = ScenarioKey::new(id.clone(), self.mode);
                (id.clone(), store.get_key(&key).map(str::to_string))
            })
            .collect()
    }

    /// Seed both scenarios from declared defaults.
    pub fn seed_defaults(&mut self, store: &mut ValueStore) -> usize {
        let defaults: Vec<(FieldId, String)> = self
            .fields
            .values()
            .filter_map(|f| f.default.clone().map(|d| (f.id.clone(), d)))
            .collect();

        for scenario in Scenario::ALL {
            for (id, value) in &defaults {
                self.map_mut(scenario).insert(id.clone(), value.clone());
                store.set_key(&ScenarioKey::new(id.clone(), scenario), value.clone(), Provenance::Default);
            }
        }
        defaults.len()
    }

    /// Load persisted user edits over the seeded defaults.
    ///
    /// Fields missing from storage keep their defaults. A storage or parse
    /// failure is logged and leaves the defaults in place.
    pub fn restore(&mut self, store: &mut ValueStore) -> usize {
        let Some(storage) = self.storage.clone() else {
            return 0;
        };
        let key = storage_key(&self.module);

        let persisted = match storage.load(&key) {
            Ok(Some(json)) => match PersistedScenarios::from_json(&json) {
                Ok(p) => p,
                Err(e) => {
                    warn!(module = %self.module, error = %e, "persisted scenarios unreadable, using defaults");
                    return 0;
                }
            },
            Ok(None) => return 0,
            Err(e) => {
                warn!(module = %self.module, error = %e, "failed to load persisted scenarios, using defaults");
                return 0;
            }
        };

        let mut restored = 0;
        for scenario in Scenario::ALL {
            for (id, value) in persisted.get(scenario) {
                if !self.fields.get(id).is_some_and(|f| f.editable) {
                    debug!(module = %self.module, field = %id, "ignoring persisted value for undeclared field");
                    continue;
                }
                self.map_mut(scenario).insert(id.clone(), value.clone());
                store.set_key(&ScenarioKey::new(id.clone(), scenario), value.clone(), Provenance::UserModified);
                restored += 1;
            }
        }
        debug!(module = %self.module, restored, "scenarios restored");
        restored
    }

    /// Pull imported store values for owned inputs into the private maps.
    ///
    /// Covers values written straight to the store by an importer that
    /// bypassed the facade. Nothing is written back and nothing is persisted.
    pub fn absorb_import(&mut self, store: &ValueStore) -> usize {
        let inputs: Vec<FieldId> = self.input_fields().cloned().collect();
        let mut absorbed = 0;
        for scenario in Scenario::ALL {
            for id in &inputs {
                let key = ScenarioKey::new(id.clone(), scenario).to_store_key();
                let Some(record) = store.record(&key) else {
                    continue;
                };
                if record.provenance != Provenance::Imported {
                    continue;
                }
                self.map_mut(scenario).insert(id.clone(), record.value.clone());
                absorbed += 1;
            }
        }
        if absorbed > 0 {
            debug!(module = %self.module, absorbed, "imported values absorbed");
        }
        absorbed
    }

    fn persist(&self) {
        let Some(storage) = &self.storage else {
            return;
        };
        let editable = |(id, _): &(&FieldId, &String)| self.fields.get(*id).is_some_and(|f| f.editable);
        let snapshot = PersistedScenarios {
            target: self
                .target
                .iter()
                .filter(editable)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            reference: self
                .reference
                .iter()
                .filter(editable)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };

        let result = snapshot
            .to_json()
            .and_then(|json| storage.save(&storage_key(&self.module), &json));
        if let Err(e) = result {
            warn!(module = %self.module, error = %e, "failed to persist scenarios");
        }
    }
}
