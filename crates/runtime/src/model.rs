//! Model session
//!
//! Owns the value store and the registered modules, and sequences the
//! session lifecycle:
//!
//! 1. seed declared defaults into both scenarios
//! 2. restore persisted user edits
//! 3. apply an optional import
//! 4. install every module's listeners
//! 5. run one hand-sequenced pass in registration order
//!
//! After initialization, edits and imports cascade through the listeners.

use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{debug, info, instrument, warn};

use tandem_foundation::{FieldId, ModuleId, Provenance, Scenario, ScenarioKey};

use crate::config::RuntimeConfig;
use crate::dependency::DependencyRegistry;
use crate::error::{Error, Result};
use crate::import::{ImportBatch, ImportSummary};
use crate::module::{CalculationModule, DualEngine, ModuleDriver};
use crate::persistence::{FileStorage, MemoryStorage, ScenarioStorage};
use crate::staged::{StagedCalculation, StagedOrchestrator};
use crate::store::ValueStore;

/// A running model: one store, many modules
pub struct Model {
    config: RuntimeConfig,
    store: ValueStore,
    drivers: IndexMap<ModuleId, Rc<dyn ModuleDriver>>,
    storage: Option<Rc<dyn ScenarioStorage>>,
    mode: Scenario,
    initialized: bool,
}

impl Model {
    /// Create a model, opening the storage named by the configuration.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let storage: Option<Rc<dyn ScenarioStorage>> = match &config.persistence {
            p if !p.enabled => None,
            p => match &p.directory {
                Some(dir) => Some(Rc::new(FileStorage::new(dir)?)),
                None => Some(Rc::new(MemoryStorage::new())),
            },
        };
        Ok(Self::build(config, storage))
    }

    /// Create a model persisting into the given storage.
    pub fn with_storage(config: RuntimeConfig, storage: Rc<dyn ScenarioStorage>) -> Self {
        Self::build(config, Some(storage))
    }

    fn build(config: RuntimeConfig, storage: Option<Rc<dyn ScenarioStorage>>) -> Self {
        let mut store = ValueStore::new();
        store.record_history(config.record_pass_history);
        Self {
            mode: config.initial_mode,
            config,
            store,
            drivers: IndexMap::new(),
            storage,
            initialized: false,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Register a module driver. Registration order is the hand-sequenced pass order.
    ///
    /// A module registered after [`initialize`](Self::initialize) is brought up immediately.
    pub fn register(&mut self, driver: Rc<dyn ModuleDriver>) -> Result<()> {
        let id = driver.id();
        if self.drivers.contains_key(&id) {
            return Err(Error::DuplicateModule(id));
        }
        {
            let mut facade = driver.facade_mut();
            facade.set_storage(self.storage.clone());
            facade.switch_mode(self.mode);
        }
        debug!(module = %id, "module registered");
        self.drivers.insert(id, Rc::clone(&driver));

        if self.initialized {
            self.prepare(&driver);
            Rc::clone(&driver).install(&mut self.store);
            driver.recalculate(&mut self.store)?;
        }
        Ok(())
    }

    /// Register a plain module driven by a [`DualEngine`].
    pub fn register_module<M>(&mut self, module: M) -> Result<Rc<DualEngine<M>>>
    where
        M: CalculationModule + 'static,
    {
        let engine = DualEngine::new(module);
        self.register(engine.clone())?;
        Ok(engine)
    }

    /// Register a staged module driven by a [`StagedOrchestrator`].
    pub fn register_staged<C>(&mut self, calculation: C) -> Result<Rc<StagedOrchestrator<C>>>
    where
        C: StagedCalculation + 'static,
    {
        let orchestrator = StagedOrchestrator::new(calculation);
        self.register(orchestrator.clone())?;
        Ok(orchestrator)
    }

    pub fn initialize(&mut self) -> Result<()> {
        self.initialize_with_import(None).map(|_| ())
    }

    /// Initialize, applying `import` after persisted edits and before listeners exist.
    #[instrument(skip_all, fields(modules = self.drivers.len()))]
    pub fn initialize_with_import(&mut self, import: Option<&ImportBatch>) -> Result<ImportSummary> {
        if self.initialized {
            warn!("model already initialized");
            return Ok(ImportSummary::default());
        }

        let drivers: Vec<Rc<dyn ModuleDriver>> = self.drivers.values().cloned().collect();
        for driver in &drivers {
            self.prepare(driver);
        }

        let summary = match import {
            Some(batch) => self.import(batch),
            None => ImportSummary::default(),
        };

        for driver in &drivers {
            Rc::clone(driver).install(&mut self.store);
        }
        self.initialized = true;

        let result = self.recalculate();
        info!(
            modules = drivers.len(),
            keys = self.store.len(),
            imported = summary.routed.len() + summary.unowned.len(),
            "model initialized"
        );
        result.map(|()| summary)
    }

    fn prepare(&mut self, driver: &Rc<dyn ModuleDriver>) {
        let mut facade = driver.facade_mut();
        let seeded = facade.seed_defaults(&mut self.store);
        let restored = facade.restore(&mut self.store);
        debug!(module = %facade.module(), seeded, restored, "module prepared");
    }

    /// Run every module's full pass in registration order.
    ///
    /// A failing module is logged and does not stop later modules; the
    /// first error is returned.
    #[instrument(skip_all)]
    pub fn recalculate(&mut self) -> Result<()> {
        let mut first_error = None;
        for driver in self.drivers.values() {
            if let Err(e) = driver.recalculate(&mut self.store) {
                warn!(module = %driver.id(), error = %e, "module pass failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Apply a user edit to a module input under the displayed scenario.
    pub fn edit(&mut self, module: &str, field: &str, value: impl Into<String>) -> Result<()> {
        let driver = self.driver(module)?;
        if !driver.facade().field(field).is_some_and(|f| f.editable) {
            return Err(Error::UnknownField {
                module: module.into(),
                field: field.into(),
            });
        }

        driver.set_value(&mut self.store, field.into(), value.into(), Provenance::UserModified);
        Ok(())
    }

    /// Apply a user edit addressed by store key (`d_12`, `ref_d_12`).
    ///
    /// The scenario comes from the key, not from the displayed mode.
    pub fn edit_key(&mut self, key: &str, value: impl Into<String>) -> Result<ModuleId> {
        let key = ScenarioKey::parse(key)?;
        let driver = self
            .drivers
            .values()
            .find(|d| d.facade().field(key.base.as_str()).is_some_and(|f| f.editable))
            .cloned()
            .ok_or_else(|| Error::Generic(format!("no module accepts edits to {key}")))?;

        driver.set_value_in(
            &mut self.store,
            key.scenario,
            key.base,
            value.into(),
            Provenance::UserModified,
        );
        Ok(driver.id())
    }

    /// Load a batch of store values.
    ///
    /// Keys naming a module input are routed through that module's facade
    /// with `imported` provenance. Keys no module owns are written straight
    /// to the store. Empty keys and keys naming calculated outputs are
    /// rejected. The batch dispatches as one pass.
    #[instrument(skip_all, fields(entries = batch.len()))]
    pub fn import(&mut self, batch: &ImportBatch) -> ImportSummary {
        let mut summary = ImportSummary::default();
        self.store.begin_batch();
        for (key, value) in batch.iter() {
            if key.is_empty() {
                summary.rejected.push(key.to_string());
                continue;
            }
            let parsed = ScenarioKey::from_store_key(key);
            let owner = self
                .drivers
                .values()
                .find(|d| d.facade().owns(parsed.base.as_str()));

            match owner.cloned() {
                Some(driver) => {
                    let editable = driver
                        .facade()
                        .field(parsed.base.as_str())
                        .is_some_and(|f| f.editable);
                    if editable {
                        driver.set_value_in(
                            &mut self.store,
                            parsed.scenario,
                            parsed.base,
                            value.to_string(),
                            Provenance::Imported,
                        );
                        summary.routed.push(key.to_string());
                    } else {
                        debug!(key, module = %driver.id(), "import targets a calculated output");
                        summary.rejected.push(key.to_string());
                    }
                }
                None => {
                    self.store.set(key, value, Provenance::Imported);
                    summary.unowned.push(key.to_string());
                }
            }
        }
        self.store.end_batch();

        debug!(
            routed = summary.routed.len(),
            unowned = summary.unowned.len(),
            rejected = summary.rejected.len(),
            "import applied"
        );
        summary
    }

    /// Change the displayed scenario of every module. Computes nothing.
    pub fn switch_mode(&mut self, mode: Scenario) {
        self.mode = mode;
        for driver in self.drivers.values() {
            driver.facade_mut().switch_mode(mode);
        }
    }

    pub fn mode(&self) -> Scenario {
        self.mode
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Current values of a module's fields under the displayed scenario.
    pub fn display(&self, module: &str) -> Result<IndexMap<FieldId, Option<String>>> {
        let driver = self.driver(module)?;
        let facade = driver.facade();
        Ok(facade.display_values(&self.store))
    }

    pub fn store(&self) -> &ValueStore {
        &self.store
    }

    /// Direct store access for collaborators and tests.
    pub fn store_mut(&mut self) -> &mut ValueStore {
        &mut self.store
    }

    pub fn driver(&self, module: &str) -> Result<Rc<dyn ModuleDriver>> {
        self.drivers
            .get(module)
            .cloned()
            .ok_or_else(|| Error::UnknownModule(module.into()))
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleId> {
        self.drivers.keys()
    }

    /// Key-level dependency edges collapsed to module-level edges.
    pub fn module_graph(&self) -> DependencyRegistry {
        self.store.dependencies().grouped_by(|key| {
            self.drivers
                .values()
                .find(|d| d.facade().owns(key))
                .map(|d| d.id().to_string())
        })
    }
}
