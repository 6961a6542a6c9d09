//! Integration test harness for Tandem.
//!
//! Builds the demonstration heating/cooling model with a diagnostics
//! observer attached, so end-to-end tests can drive edits and imports and
//! then verify store values, stage counters, and read patterns.

use std::rc::Rc;

use indexmap::IndexMap;

use tandem_foundation::{FieldId, Provenance, Scenario, parse_numeric};
use tandem_runtime::{
    Diagnostics, DualEngine, ImportBatch, ImportSummary, MemoryStorage, Model, RuntimeConfig,
    ScenarioStorage, StageStats, StagedOrchestrator, ValueStore,
};
use tandem_tools::demo::{CoolingModule, DemoModel, HeatingModule};

/// Test harness around an initialized demonstration model.
pub struct TestHarness {
    demo: DemoModel,
    diagnostics: Rc<Diagnostics>,
}

impl TestHarness {
    /// Initialize the demo model with fresh in-memory persistence.
    ///
    /// # Panics
    ///
    /// Panics if initialization fails.
    pub fn new() -> Self {
        Self::with_storage(Rc::new(MemoryStorage::new()))
    }

    /// Initialize the demo model persisting into `storage`.
    ///
    /// # Panics
    ///
    /// Panics if initialization fails.
    pub fn with_storage(storage: Rc<dyn ScenarioStorage>) -> Self {
        Self::build(storage, None).0
    }

    /// Initialize the demo model, importing `batch` before the first pass.
    ///
    /// # Panics
    ///
    /// Panics if initialization fails.
    pub fn with_import(storage: Rc<dyn ScenarioStorage>, batch: &ImportBatch) -> (Self, ImportSummary) {
        Self::build(storage, Some(batch))
    }

    fn build(storage: Rc<dyn ScenarioStorage>, batch: Option<&ImportBatch>) -> (Self, ImportSummary) {
        let model = Model::with_storage(RuntimeConfig::default(), storage);
        let mut demo = DemoModel::from_model(model).expect("demo modules register");

        let diagnostics = Diagnostics::new();
        demo.model.store_mut().set_observer(diagnostics.clone());

        let summary = demo
            .model
            .initialize_with_import(batch)
            .expect("initialization failed");
        (Self { demo, diagnostics }, summary)
    }

    /// Current store value of a key.
    pub fn get(&self, key: &str) -> Option<String> {
        self.demo.model.store().get(key).map(str::to_string)
    }

    /// Current store value of a key, parsed as a number.
    pub fn number(&self, key: &str) -> Option<f64> {
        self.demo.model.store().get(key).map(parse_numeric)
    }

    pub fn provenance(&self, key: &str) -> Option<Provenance> {
        self.demo.model.store().provenance(key)
    }

    /// User edit under the displayed scenario.
    ///
    /// # Panics
    ///
    /// Panics if the module or field is unknown.
    pub fn edit(&mut self, module: &str, field: &str, value: &str) {
        self.demo
            .model
            .edit(module, field, value)
            .expect("edit failed");
    }

    /// User edit addressed by store key.
    ///
    /// # Panics
    ///
    /// Panics if no module accepts the key.
    pub fn edit_key(&mut self, key: &str, value: &str) {
        self.demo.model.edit_key(key, value).expect("edit failed");
    }

    pub fn switch_mode(&mut self, mode: Scenario) {
        self.demo.model.switch_mode(mode);
    }

    /// Displayed values of a module's fields.
    ///
    /// # Panics
    ///
    /// Panics if the module is unknown.
    pub fn display(&self, module: &str) -> IndexMap<FieldId, Option<String>> {
        self.demo.model.display(module).expect("unknown module")
    }

    /// Private facade value of a module input.
    pub fn private_value(&self, module: &str, scenario: Scenario, field: &str) -> Option<String> {
        let driver = self.demo.model.driver(module).ok()?;
        let facade = driver.facade();
        facade.value_in(scenario, field).map(str::to_string)
    }

    pub fn heating(&self) -> &Rc<StagedOrchestrator<HeatingModule>> {
        &self.demo.heating
    }

    pub fn cooling(&self) -> &Rc<DualEngine<CoolingModule>> {
        &self.demo.cooling
    }

    pub fn heating_stats(&self) -> StageStats {
        self.demo.heating.stats()
    }

    pub fn cooling_runs(&self) -> u64 {
        self.demo.cooling.runs()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Snapshot of every key and value.
    pub fn snapshot(&self) -> IndexMap<String, String> {
        self.demo.model.store().all_values()
    }

    pub fn store(&self) -> &ValueStore {
        self.demo.model.store()
    }

    pub fn store_mut(&mut self) -> &mut ValueStore {
        self.demo.model.store_mut()
    }

    pub fn model(&self) -> &Model {
        &self.demo.model
    }

    pub fn model_mut(&mut self) -> &mut Model {
        &mut self.demo.model
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
