//! Calculation modules and the dual-engine pass
//!
//! A module is a set of formulas plus its [`ScenarioFacade`]. Every
//! recalculation computes both scenarios back to back, whatever is
//! displayed, so switching the display never exposes a stale scenario.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::Rc;

use tracing::{debug, instrument, trace, warn};

use tandem_foundation::{FieldId, ModuleId, Provenance, Scenario, ScenarioKey};

use crate::context::CalcContext;
use crate::error::Result;
use crate::facade::ScenarioFacade;
use crate::guard::ReentrancyGuard;
use crate::store::{ListenerId, ValueStore};

/// Formulas of one domain module
pub trait CalculationModule {
    fn facade(&self) -> &ScenarioFacade;

    fn facade_mut(&mut self) -> &mut ScenarioFacade;

    /// Base ids published by other modules that this module reads.
    fn inputs(&self) -> Vec<FieldId> {
        Vec::new()
    }

    /// Base ids this module publishes.
    fn outputs(&self) -> Vec<FieldId> {
        self.facade().output_fields().cloned().collect()
    }

    /// Compute one scenario. Inputs must be re-read from `ctx` on every call.
    fn calculate(&self, ctx: &mut CalcContext<'_>) -> Result<()>;
}

/// What a [`Model`](crate::model::Model) needs from a registered module
pub trait ModuleDriver {
    fn id(&self) -> ModuleId;

    /// Borrow the module's facade.
    fn facade(&self) -> Ref<'_, ScenarioFacade>;

    /// Mutably borrow the module's facade. Must not be held across a store dispatch;
    /// writes that should cascade go through [`set_value`](Self::set_value).
    fn facade_mut(&self) -> RefMut<'_, ScenarioFacade>;

    /// External base ids the module reads.
    fn inputs(&self) -> Vec<FieldId>;

    /// Base ids the module publishes.
    fn outputs(&self) -> Vec<FieldId>;

    /// Register the module's listeners and documentation edges.
    fn install(self: Rc<Self>, store: &mut ValueStore) -> Vec<ListenerId>;

    /// Full hand-sequenced pass over both scenarios.
    fn recalculate(&self, store: &mut ValueStore) -> Result<()>;

    /// Write a module input under the displayed scenario and run the cascade.
    fn set_value(&self, store: &mut ValueStore, id: FieldId, value: String, provenance: Provenance) {
        let mode = self.facade().mode();
        self.set_value_in(store, mode, id, value, provenance);
    }

    /// Write a module input under `scenario` and run the cascade.
    ///
    /// The facade borrow is released before the store dispatches, so the
    /// module's own listeners can run.
    fn set_value_in(
        &self,
        store: &mut ValueStore,
        scenario: Scenario,
        id: FieldId,
        value: String,
        provenance: Provenance,
    ) {
        store.begin_batch();
        self.facade_mut().set_value_in(store, scenario, id, value, provenance);
        store.end_batch();
    }
}

/// Store keys of `fields` under both scenarios.
pub(crate) fn scenario_keys<'a>(fields: impl IntoIterator<Item = &'a FieldId>) -> Vec<String> {
    let fields: Vec<&FieldId> = fields.into_iter().collect();
    Scenario::ALL
        .iter()
        .flat_map(|scenario| {
            fields
                .iter()
                .map(move |f| ScenarioKey::new((*f).clone(), *scenario).to_store_key())
        })
        .collect()
}

/// Compute Target then Reference for one module.
///
/// A failure in one scenario is logged and does not prevent the other from
/// being computed; the first error is returned.
pub fn run_dual_engine<M>(module: &M, store: &mut ValueStore) -> Result<()>
where
    M: CalculationModule + ?Sized,
{
    let mut first_error = None;
    for scenario in Scenario::ALL {
        let mut ctx = CalcContext::new(store, module.facade(), scenario);
        match module.calculate(&mut ctx) {
            Ok(()) => trace!(
                module = %module.facade().module(),
                %scenario,
                published = ctx.published().len(),
                "scenario computed"
            ),
            Err(e) => {
                warn!(module = %module.facade().module(), %scenario, error = %e, "scenario calculation failed");
                first_error.get_or_insert(e);
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Drives a plain (single-stage) module
///
/// Recomputes both scenarios whenever one of the module's own inputs or
/// one of its external inputs is written.
pub struct DualEngine<M> {
    id: ModuleId,
    module: RefCell<M>,
    guard: ReentrancyGuard,
    runs: Cell<u64>,
}

impl<M: CalculationModule + 'static> DualEngine<M> {
    pub fn new(module: M) -> Rc<Self> {
        let id = module.facade().module().clone();
        Rc::new(Self {
            guard: ReentrancyGuard::new(id.to_string()),
            id,
            module: RefCell::new(module),
            runs: Cell::new(0),
        })
    }

    pub fn module(&self) -> Ref<'_, M> {
        self.module.borrow()
    }

    /// Number of times the calculation body has executed.
    pub fn runs(&self) -> u64 {
        self.runs.get()
    }

    /// Nested calls skipped by the reentrancy guard.
    pub fn suppressed(&self) -> u64 {
        self.guard.suppressed()
    }

    /// Recompute both scenarios; the resulting cascade runs after the body.
    #[instrument(skip_all, fields(module = %self.id))]
    pub fn run(&self, store: &mut ValueStore) -> Result<()> {
        store.begin_batch();
        let result = self.run_body(store);
        store.end_batch();
        result
    }

    fn run_body(&self, store: &mut ValueStore) -> Result<()> {
        let Some(_token) = self.guard.enter() else {
            return Ok(());
        };
        self.runs.set(self.runs.get() + 1);
        let module = self.module.borrow();
        run_dual_engine(&*module, store)
    }
}

impl<M: CalculationModule + 'static> ModuleDriver for DualEngine<M> {
    fn id(&self) -> ModuleId {
        self.id.clone()
    }

    fn facade(&self) -> Ref<'_, ScenarioFacade> {
        Ref::map(self.module.borrow(), |m| m.facade())
    }

    fn facade_mut(&self) -> RefMut<'_, ScenarioFacade> {
        RefMut::map(self.module.borrow_mut(), |m| m.facade_mut())
    }

    fn inputs(&self) -> Vec<FieldId> {
        self.module.borrow().inputs()
    }

    fn outputs(&self) -> Vec<FieldId> {
        self.module.borrow().outputs()
    }

    fn install(self: Rc<Self>, store: &mut ValueStore) -> Vec<ListenerId> {
        let (own, external, outputs) = {
            let module = self.module.borrow();
            let own: Vec<FieldId> = module.facade().input_fields().cloned().collect();
            (own, module.inputs(), module.outputs())
        };

        for input in own.iter().chain(&external) {
            for output in &outputs {
                store.register_dependency(input.as_str(), output.as_str());
            }
        }

        let keys = scenario_keys(own.iter().chain(&external));
        let engine = Rc::downgrade(&self);
        let id = store.add_listener_many(keys, move |store, _| match engine.upgrade() {
            Some(engine) => {
                engine.facade_mut().absorb_import(store);
                engine.run(store)
            }
            None => Ok(()),
        });
        debug!(module = %self.id, %id, inputs = own.len() + external.len(), "module installed");
        vec![id]
    }

    fn recalculate(&self, store: &mut ValueStore) -> Result<()> {
        self.run(store)
    }
}
