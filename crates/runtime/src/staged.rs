//! Staged orchestration
//!
//! Breaks a true cycle between two modules. Module A needs an output of
//! module B, and B needs an earlier output of A. A's outputs are split:
//!
//! - **Stage 1** depends only on A's own state and non-cyclic inputs. It
//!   runs whenever one of those inputs changes and never waits on B.
//! - **Stage 2** needs B's output. It runs when B's published key changes,
//!   re-reading Stage 1's outputs fresh from the store.
//!
//! ```text
//!   own inputs ──► Stage 1 ──► h_124 ──► B ──► m_129 ──► Stage 2 ──► m_124
//! ```
//!
//! Per orchestrator the state machine is
//! `Idle → Stage1Running → Stage1Complete → Stage2Running → Stage2Complete → Idle`
//! and re-enters from `Idle` on every later upstream change.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::Rc;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, instrument, trace, warn};

use tandem_foundation::{FieldId, ModuleId, NEUTRAL, Scenario};

use crate::context::CalcContext;
use crate::error::Result;
use crate::events::{Stage, StageEvent};
use crate::facade::ScenarioFacade;
use crate::guard::ReentrancyGuard;
use crate::module::{ModuleDriver, scenario_keys};
use crate::store::{ListenerId, ValueStore};

/// Whether the feature that needs the upstream module is enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Open,
    /// Stage 2 publishes neutral outputs without reading upstream
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageState {
    #[default]
    Idle,
    Stage1Running,
    Stage1Complete,
    Stage2Running,
    Stage2Complete,
}

/// Execution counters of one orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StageStats {
    pub stage1_runs: u64,
    pub stage2_runs: u64,
    /// Scenarios skipped because a Stage 1 output was still unset
    pub stage2_deferred: u64,
    /// Scenarios that published neutral outputs with the gate closed
    pub gated: u64,
    /// Nested stage invocations skipped by the reentrancy guards
    pub suppressed: u64,
}

/// A module whose outputs are split into two stages
pub trait StagedCalculation {
    fn facade(&self) -> &ScenarioFacade;

    fn facade_mut(&mut self) -> &mut ScenarioFacade;

    /// External base ids Stage 1 reads. Must not include the upstream key.
    fn stage1_inputs(&self) -> Vec<FieldId> {
        Vec::new()
    }

    fn stage1_outputs(&self) -> Vec<FieldId>;

    fn stage2_outputs(&self) -> Vec<FieldId>;

    /// Base id published by the module on the other side of the cycle.
    fn upstream(&self) -> FieldId;

    fn stage1(&self, ctx: &mut CalcContext<'_>) -> Result<()>;

    /// Evaluated per scenario before Stage 2.
    fn gate(&self, _ctx: &CalcContext<'_>) -> Gate {
        Gate::Open
    }

    /// Values Stage 2 publishes while the gate is closed.
    fn neutral_outputs(&self) -> Vec<(FieldId, f64)> {
        self.stage2_outputs()
            .into_iter()
            .map(|id| (id, NEUTRAL))
            .collect()
    }

    /// Compute Stage 2 for one scenario. Stage 1 outputs must be re-read from `ctx`.
    fn stage2(&self, ctx: &mut CalcContext<'_>, upstream: f64) -> Result<()>;
}

/// Drives a [`StagedCalculation`]
pub struct StagedOrchestrator<C> {
    id: ModuleId,
    calc: RefCell<C>,
    state: Cell<StageState>,
    stage1_guard: ReentrancyGuard,
    stage2_guard: ReentrancyGuard,
    stats: Cell<StageStats>,
}

impl<C: StagedCalculation + 'static> StagedOrchestrator<C> {
    pub fn new(calc: C) -> Rc<Self> {
        let id = calc.facade().module().clone();
        Rc::new(Self {
            stage1_guard: ReentrancyGuard::new(format!("{id}-stage1")),
            stage2_guard: ReentrancyGuard::new(format!("{id}-stage2")),
            id,
            calc: RefCell::new(calc),
            state: Cell::new(StageState::Idle),
            stats: Cell::new(StageStats::default()),
        })
    }

    pub fn calculation(&self) -> Ref<'_, C> {
        self.calc.borrow()
    }

    pub fn state(&self) -> StageState {
        self.state.get()
    }

    pub fn stats(&self) -> StageStats {
        StageStats {
            suppressed: self.stage1_guard.suppressed() + self.stage2_guard.suppressed(),
            ..self.stats.get()
        }
    }

    fn transition(&self, next: StageState) {
        trace!(module = %self.id, from = ?self.state.get(), to = ?next, "stage transition");
        self.state.set(next);
    }

    fn bump(&self, f: impl FnOnce(&mut StageStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    /// Run Stage 1 for both scenarios; the resulting cascade runs afterwards.
    #[instrument(skip_all, fields(module = %self.id))]
    pub fn run_stage1(&self, store: &mut ValueStore) -> Result<()> {
        store.begin_batch();
        let result = self.stage1_body(store);
        store.end_batch();
        result
    }

    /// Run Stage 2 for both scenarios; the resulting cascade runs afterwards.
    #[instrument(skip_all, fields(module = %self.id))]
    pub fn run_stage2(&self, store: &mut ValueStore) -> Result<()> {
        store.begin_batch();
        let result = self.stage2_body(store);
        store.end_batch();
        result
    }

    fn stage1_body(&self, store: &mut ValueStore) -> Result<()> {
        let Some(_token) = self.stage1_guard.enter() else {
            return Ok(());
        };
        self.transition(StageState::Stage1Running);

        let calc = self.calc.borrow();
        let mut snapshot = IndexMap::new();
        let mut first_error = None;
        for scenario in Scenario::ALL {
            let mut ctx = CalcContext::new(store, calc.facade(), scenario);
            if let Err(e) = calc.stage1(&mut ctx) {
                warn!(module = %self.id, %scenario, error = %e, "stage 1 failed");
                first_error.get_or_insert(e);
            }
            snapshot.extend(ctx.into_published());
        }

        self.transition(StageState::Stage1Complete);
        self.bump(|s| s.stage1_runs += 1);
        store.emit_stage_event(StageEvent::new(self.id.clone(), Stage::Stage1, snapshot));
        first_error.map_or(Ok(()), Err)
    }

    fn stage2_body(&self, store: &mut ValueStore) -> Result<()> {
        let Some(_token) = self.stage2_guard.enter() else {
            return Ok(());
        };
        let previous = self.state.get();
        self.transition(StageState::Stage2Running);

        let calc = self.calc.borrow();
        let required = calc.stage1_outputs();
        let upstream = calc.upstream();
        let mut snapshot = IndexMap::new();
        let mut first_error = None;
        let mut computed = 0;

        for scenario in Scenario::ALL {
            let mut ctx = CalcContext::new(store, calc.facade(), scenario);

            if let Some(missing) = required.iter().find(|id| ctx.external(id.as_str()).is_none()) {
                debug!(module = %self.id, %scenario, field = %missing, "stage 1 output unset, stage 2 deferred");
                self.bump(|s| s.stage2_deferred += 1);
                continue;
            }

            match calc.gate(&ctx) {
                Gate::Closed => {
                    trace!(module = %self.id, %scenario, "gate closed, publishing neutral outputs");
                    for (id, value) in calc.neutral_outputs() {
                        ctx.publish(id.as_str(), value);
                    }
                    self.bump(|s| s.gated += 1);
                }
                Gate::Open => {
                    let value = ctx.number(upstream.as_str(), NEUTRAL);
                    if let Err(e) = calc.stage2(&mut ctx, value) {
                        warn!(module = %self.id, %scenario, error = %e, "stage 2 failed");
                        first_error.get_or_insert(e);
                    }
                }
            }
            snapshot.extend(ctx.into_published());
            computed += 1;
        }

        if computed == 0 {
            self.transition(previous);
            return first_error.map_or(Ok(()), Err);
        }

        self.transition(StageState::Stage2Complete);
        self.bump(|s| s.stage2_runs += 1);
        store.emit_stage_event(StageEvent::new(self.id.clone(), Stage::Stage2, snapshot));
        self.transition(StageState::Idle);
        first_error.map_or(Ok(()), Err)
    }
}

impl<C: StagedCalculation + 'static> ModuleDriver for StagedOrchestrator<C> {
    fn id(&self) -> ModuleId {
        self.id.clone()
    }

    fn facade(&self) -> Ref<'_, ScenarioFacade> {
        Ref::map(self.calc.borrow(), |c| c.facade())
    }

    fn facade_mut(&self) -> RefMut<'_, ScenarioFacade> {
        RefMut::map(self.calc.borrow_mut(), |c| c.facade_mut())
    }

    fn inputs(&self) -> Vec<FieldId> {
        let calc = self.calc.borrow();
        let mut inputs = calc.stage1_inputs();
        inputs.push(calc.upstream());
        inputs
    }

    fn outputs(&self) -> Vec<FieldId> {
        let calc = self.calc.borrow();
        let mut outputs = calc.stage1_outputs();
        outputs.extend(calc.stage2_outputs());
        outputs
    }

    fn install(self: Rc<Self>, store: &mut ValueStore) -> Vec<ListenerId> {
        let (stage1_keys, upstream, stage1_outputs, stage2_outputs) = {
            let calc = self.calc.borrow();
            let mut keys: Vec<FieldId> = calc.facade().input_fields().cloned().collect();
            keys.extend(calc.stage1_inputs());
            (keys, calc.upstream(), calc.stage1_outputs(), calc.stage2_outputs())
        };

        for input in &stage1_keys {
            for output in &stage1_outputs {
                store.register_dependency(input.as_str(), output.as_str());
            }
        }
        for input in stage1_outputs.iter().chain([&upstream]) {
            for output in &stage2_outputs {
                store.register_dependency(input.as_str(), output.as_str());
            }
        }

        let weak = Rc::downgrade(&self);
        let stage1 = store.add_listener_many(scenario_keys(&stage1_keys), move |store, _| {
            match weak.upgrade() {
                Some(orchestrator) => {
                    orchestrator.facade_mut().absorb_import(store);
                    orchestrator.run_stage1(store)
                }
                None => Ok(()),
            }
        });

        // Stage 2 listens on the concrete upstream key, not on stage events
        let weak = Rc::downgrade(&self);
        let stage2 = store.add_listener_many(scenario_keys([&upstream]), move |store, _| {
            match weak.upgrade() {
                Some(orchestrator) => orchestrator.run_stage2(store),
                None => Ok(()),
            }
        });

        debug!(module = %self.id, %stage1, %stage2, upstream = %upstream, "staged module installed");
        vec![stage1, stage2]
    }

    /// Stage 1, then Stage 2 unless the Stage 1 cascade already ran it.
    fn recalculate(&self, store: &mut ValueStore) -> Result<()> {
        let before = self.stats.get().stage2_runs;
        let stage1 = self.run_stage1(store);
        if self.stats.get().stage2_runs != before {
            trace!(module = %self.id, "stage 2 already ran in the stage 1 cascade");
            return stage1;
        }
        let stage2 = self.run_stage2(store);
        stage1.and(stage2)
    }
}

#[cfg(test)]
mod tests {
    use tandem_foundation::Provenance;

    use super::*;
    use crate::diagnostics::Diagnostics;
    use crate::facade::FieldSpec;

    /// Stage 1: h_124 = d_13. Stage 2: m_124 = h_124 - m_129.
    struct Net {
        facade: ScenarioFacade,
    }

    impl Net {
        fn new() -> Self {
            Self {
                facade: ScenarioFacade::new(
                    "net",
                    [
                        FieldSpec::input("d_13", "42"),
                        FieldSpec::input("d_14", "on"),
                        FieldSpec::output("h_124"),
                        FieldSpec::output("m_124"),
                    ],
                ),
            }
        }
    }

    impl StagedCalculation for Net {
        fn facade(&self) -> &ScenarioFacade {
            &self.facade
        }

        fn facade_mut(&mut self) -> &mut ScenarioFacade {
            &mut self.facade
        }

        fn stage1_outputs(&self) -> Vec<FieldId> {
            vec!["h_124".into()]
        }

        fn stage2_outputs(&self) -> Vec<FieldId> {
            vec!["m_124".into()]
        }

        fn upstream(&self) -> FieldId {
            "m_129".into()
        }

        fn stage1(&self, ctx: &mut CalcContext<'_>) -> Result<()> {
            let demand = ctx.own_number("d_13", 0.0);
            ctx.publish("h_124", demand);
            Ok(())
        }

        fn gate(&self, ctx: &CalcContext<'_>) -> Gate {
            if ctx.own("d_14") == Some("none") {
                Gate::Closed
            } else {
                Gate::Open
            }
        }

        fn stage2(&self, ctx: &mut CalcContext<'_>, upstream: f64) -> Result<()> {
            let demand = ctx.number("h_124", 0.0);
            ctx.publish("m_124", demand - upstream);
            Ok(())
        }
    }

    fn setup() -> (ValueStore, Rc<StagedOrchestrator<Net>>) {
        let mut store = ValueStore::new();
        let orchestrator = StagedOrchestrator::new(Net::new());
        orchestrator.facade_mut().seed_defaults(&mut store);
        Rc::clone(&orchestrator).install(&mut store);
        (store, orchestrator)
    }

    #[test]
    fn test_stage2_waits_for_stage1_outputs() {
        let (mut store, orchestrator) = setup();

        store.set("m_129", "10", Provenance::Calculated);
        assert_eq!(store.get("m_124"), None);
        assert_eq!(orchestrator.stats().stage2_deferred, 2);
        assert_eq!(orchestrator.stats().stage2_runs, 0);
        assert_eq!(orchestrator.state(), StageState::Idle);
    }

    #[test]
    fn test_upstream_change_triggers_stage2() {
        let (mut store, orchestrator) = setup();
        orchestrator.run_stage1(&mut store).unwrap();
        assert_eq!(orchestrator.state(), StageState::Stage1Complete);
        assert_eq!(store.get("h_124"), Some("42"));

        store.set("m_129", "10", Provenance::Calculated);
        assert_eq!(store.get("m_124"), Some("32"));
        assert_eq!(orchestrator.state(), StageState::Idle);

        // Reference upstream is independent
        assert_eq!(store.get("ref_m_124"), Some("42"));
    }

    #[test]
    fn test_stage2_rereads_stage1_outputs() {
        let (mut store, orchestrator) = setup();
        orchestrator.run_stage1(&mut store).unwrap();

        // Stage 1 output changed behind the orchestrator's back
        store.set("h_124", "50", Provenance::Calculated);
        store.set("m_129", "10", Provenance::Calculated);
        assert_eq!(store.get("m_124"), Some("40"));
    }

    #[test]
    fn test_closed_gate_publishes_neutral_without_reading_upstream() {
        let (mut store, orchestrator) = setup();
        store.batch(|store| {
            orchestrator
                .facade_mut()
                .set_value(store, "d_14", "none", Provenance::UserModified);
        });
        let diagnostics = Diagnostics::new();
        store.set_observer(diagnostics.clone());

        store.set("m_129", "10", Provenance::Calculated);

        assert_eq!(store.get("m_124"), Some("0"));
        assert_eq!(diagnostics.stats("m_129").reads, 0);
        assert_eq!(orchestrator.stats().gated, 1);
        // Reference gate is still open
        assert_eq!(store.get("ref_m_124"), Some("42"));
    }

    #[test]
    fn test_own_input_change_runs_stage1_then_listeners() {
        let (mut store, orchestrator) = setup();
        store.add_listener_many(["h_124", "ref_h_124"], |store, _| {
            let demand = store.get_number("h_124", 0.0);
            store.set("m_129", (demand / 2.0).to_string(), Provenance::Calculated);
            Ok(())
        });

        store.batch(|store| {
            orchestrator
                .facade_mut()
                .set_value(store, "d_13", "60", Provenance::UserModified);
        });

        assert_eq!(store.get("h_124"), Some("60"));
        assert_eq!(store.get("m_129"), Some("30"));
        assert_eq!(store.get("m_124"), Some("30"));
        assert_eq!(orchestrator.stats().stage1_runs, 1);
        assert_eq!(orchestrator.stats().stage2_runs, 1);
    }

    #[test]
    fn test_recalculate_runs_stage2_once() {
        let (mut store, orchestrator) = setup();
        store.add_listener_many(["h_124", "ref_h_124"], |store, _| {
            let demand = store.get_number("h_124", 0.0);
            store.set("m_129", (demand / 2.0).to_string(), Provenance::Calculated);
            Ok(())
        });

        orchestrator.recalculate(&mut store).unwrap();

        assert_eq!(orchestrator.stats().stage1_runs, 1);
        assert_eq!(orchestrator.stats().stage2_runs, 1);
        assert_eq!(store.get("m_124"), Some("21"));
    }

    #[test]
    fn test_recalculate_without_upstream_runs_stage2_directly() {
        let (mut store, orchestrator) = setup();

        orchestrator.recalculate(&mut store).unwrap();

        assert_eq!(orchestrator.stats().stage2_runs, 1);
        assert_eq!(store.get("m_124"), Some("42"));
    }

    #[test]
    fn test_driver_edit_runs_stage1_outside_batch() {
        let (mut store, orchestrator) = setup();

        orchestrator.set_value(&mut store, "d_13".into(), "60".into(), Provenance::UserModified);

        assert_eq!(store.get("h_124"), Some("60"));
        assert_eq!(store.get("ref_h_124"), Some("42"));
        assert_eq!(orchestrator.calculation().facade().value_in(Scenario::Target, "d_13"), Some("60"));
    }

    #[test]
    fn test_stage_events_carry_snapshots() {
        let (mut store, orchestrator) = setup();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        store.subscribe_stage_events(Some("net-stage1"), move |event| {
            sink.borrow_mut().push(event.snapshot.clone());
        });

        orchestrator.run_stage1(&mut store).unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].get("h_124").map(String::as_str), Some("42"));
        assert_eq!(seen[0].get("ref_h_124").map(String::as_str), Some("42"));
    }
}
