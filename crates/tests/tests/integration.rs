//! Integration tests for the demonstration heating/cooling model.
//!
//! These tests verify the full session:
//! Register → Seed → Restore → Import → Install → Recalculate → Edit

use std::cell::RefCell;
use std::rc::Rc;

use tandem_foundation::{Provenance, Scenario};
use tandem_runtime::{
    Diagnostics, FileStorage, ImportBatch, MemoryStorage, Model, ModuleDriver, RuntimeConfig,
};
use tandem_tests::TestHarness;
use tandem_tools::demo::HeatingModule;

/// Test that initialization computes both scenarios from declared defaults.
///
/// d_12=100, d_13=42, f_20=25 → h_124=42, m_129=10.5, m_124=31.5
#[test]
fn test_initialization_computes_both_scenarios() {
    let harness = TestHarness::new();

    for prefix in ["", "ref_"] {
        assert_eq!(harness.number(&format!("{prefix}h_124")), Some(42.0));
        assert_eq!(harness.number(&format!("{prefix}h_125")), Some(0.42));
        assert_eq!(harness.number(&format!("{prefix}m_129")), Some(10.5));
        assert_eq!(harness.number(&format!("{prefix}m_124")), Some(31.5));
        assert_eq!(harness.number(&format!("{prefix}m_125")), Some(0.25));
    }
    assert_eq!(harness.provenance("m_124"), Some(Provenance::Calculated));
    assert!(Diagnostics::check_invariants(harness.store()).is_empty());
}

/// Test that Target and Reference edits land under separate keys.
///
/// Set d_12=100 in Target, switch to Reference, set d_12=50.
#[test]
fn test_reference_edit_uses_prefixed_key() {
    let mut harness = TestHarness::new();

    harness.edit("heating", "d_12", "100");
    harness.switch_mode(Scenario::Reference);
    harness.edit("heating", "d_12", "50");

    assert_eq!(harness.get("d_12").as_deref(), Some("100"));
    assert_eq!(harness.get("ref_d_12").as_deref(), Some("50"));
    assert_eq!(harness.number("h_124"), Some(42.0));
    assert_eq!(harness.number("ref_h_124"), Some(21.0));

    assert_eq!(harness.display("heating")["d_12"].as_deref(), Some("50"));
    harness.switch_mode(Scenario::Target);
    assert_eq!(harness.display("heating")["d_12"].as_deref(), Some("100"));
}

/// Test that a Reference edit recomputes Reference while Target is displayed elsewhere.
#[test]
fn test_both_scenarios_recompute_regardless_of_mode() {
    let mut harness = TestHarness::new();
    harness.switch_mode(Scenario::Reference);

    harness.edit("heating", "d_13", "10");

    assert_eq!(harness.number("ref_h_124"), Some(10.0));
    assert_eq!(harness.number("ref_m_129"), Some(2.5));
    assert_eq!(harness.number("ref_m_124"), Some(7.5));
    assert_eq!(harness.number("h_124"), Some(42.0));
    assert_eq!(harness.number("m_124"), Some(31.5));
}

/// Test the staged cycle with the upstream module's value supplied directly.
///
/// Stage 1 publishes h_124=42, upstream publishes m_129=10, Stage 2 publishes m_124=32.
#[test]
fn test_staged_cycle_with_direct_upstream() {
    let mut config = RuntimeConfig::default();
    config.persistence.enabled = false;
    let mut model = Model::new(config).unwrap();
    let heating = model.register_staged(HeatingModule::new()).unwrap();
    model.initialize().unwrap();

    assert_eq!(model.store().get("h_124"), Some("42"));
    model.store_mut().set("m_129", "10", Provenance::Calculated);

    assert_eq!(model.store().get("m_124"), Some("32"));
    assert_eq!(model.store().get("ref_m_124"), Some("42"));
    assert_eq!(heating.stats().stage2_runs, 2);
}

/// Test that an edit runs Stage 1, then the upstream module, then Stage 2.
#[test]
fn test_stage_ordering() {
    let mut harness = TestHarness::new();
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    harness
        .store_mut()
        .subscribe_stage_events(None, move |event| sink.borrow_mut().push(event.name.clone()));
    let cooling_before = harness.cooling_runs();

    harness.edit("heating", "d_13", "60");

    assert_eq!(*events.borrow(), vec!["heating-stage1", "heating-stage2"]);
    assert_eq!(harness.cooling_runs(), cooling_before + 1);
    assert_eq!(harness.number("h_124"), Some(60.0));
    assert_eq!(harness.number("m_129"), Some(15.0));
    assert_eq!(harness.number("m_124"), Some(45.0));
}

/// Test that a closed gate publishes neutral outputs without reading upstream.
#[test]
fn test_closed_gate_never_reads_upstream() {
    let mut harness = TestHarness::new();
    harness.edit("heating", "d_14", "none");

    assert_eq!(harness.get("m_124").as_deref(), Some("0"));
    assert_eq!(harness.get("m_125").as_deref(), Some("0"));
    assert_eq!(harness.number("ref_m_124"), Some(31.5));

    harness.diagnostics().reset();
    harness.edit("cooling", "f_20", "50");

    // Checked before any assertion below reads the store
    assert_eq!(harness.diagnostics().reads("m_129"), 0);
    assert!(harness.diagnostics().reads("ref_m_129") > 0);

    assert_eq!(harness.number("m_129"), Some(21.0));
    assert_eq!(harness.get("m_124").as_deref(), Some("0"));
}

/// Test that Stage 2 runs once per trigger even when its output feeds back upstream.
///
/// A collaborator rewrites m_129 from m_124; the re-triggered Stage 2 is suppressed.
#[test]
fn test_feedback_does_not_retrigger_stage2() {
    let mut harness = TestHarness::new();
    harness.store_mut().add_listener("m_124", |store, _| {
        let net = store.get_number("m_124", 0.0);
        store.set("m_129", net.to_string(), Provenance::Calculated);
        Ok(())
    });
    let before = harness.heating_stats().stage2_runs;

    harness.edit("heating", "d_13", "60");

    assert_eq!(harness.heating_stats().stage2_runs, before + 1);
    assert_eq!(harness.store().last_pass().suppressed, 1);
    assert_eq!(harness.number("m_124"), Some(45.0));
    assert_eq!(harness.number("m_129"), Some(45.0));
}

/// Test that recalculating with unchanged inputs changes nothing.
#[test]
fn test_recalculate_is_idempotent() {
    let mut harness = TestHarness::new();
    harness.edit_key("ref_d_12", "80");
    let before = harness.snapshot();

    harness.model_mut().recalculate().unwrap();
    harness.model_mut().recalculate().unwrap();

    assert_eq!(harness.snapshot(), before);
}

/// Test that repeating a calculated write produces the same cascade outputs.
#[test]
fn test_repeated_write_is_idempotent() {
    let mut harness = TestHarness::new();

    harness.store_mut().set("m_129", "10", Provenance::Calculated);
    let first = harness.snapshot();
    harness.store_mut().set("m_129", "10", Provenance::Calculated);

    assert_eq!(harness.snapshot(), first);
    assert_eq!(harness.get("m_124").as_deref(), Some("32"));
}

/// Test that switching modes computes nothing and writes nothing.
#[test]
fn test_mode_switch_is_pure() {
    let mut harness = TestHarness::new();
    let values = harness.snapshot();
    let stats = harness.heating_stats();
    let runs = harness.cooling_runs();
    let passes = harness.store().pass_count();

    harness.switch_mode(Scenario::Reference);
    harness.switch_mode(Scenario::Target);
    harness.switch_mode(Scenario::Reference);

    assert_eq!(harness.snapshot(), values);
    assert_eq!(harness.heating_stats(), stats);
    assert_eq!(harness.cooling_runs(), runs);
    assert_eq!(harness.store().pass_count(), passes);
    assert_eq!(harness.model().mode(), Scenario::Reference);
}

/// Test that user edits survive a reload from file-backed storage.
#[test]
fn test_persisted_edits_reload() {
    let dir = tempfile::tempdir().unwrap();

    {
        let storage = Rc::new(FileStorage::new(dir.path()).unwrap());
        let mut harness = TestHarness::with_storage(storage);
        harness.edit_key("ref_d_12", "50");
    }
    assert!(dir.path().join("tandem.heating.scenarios.json").exists());

    let storage = Rc::new(FileStorage::new(dir.path()).unwrap());
    let harness = TestHarness::with_storage(storage);

    assert_eq!(harness.get("ref_d_12").as_deref(), Some("50"));
    assert_eq!(harness.provenance("ref_d_12"), Some(Provenance::UserModified));
    assert_eq!(harness.get("d_12").as_deref(), Some("100"));
    assert_eq!(harness.number("ref_h_124"), Some(21.0));
    assert_eq!(
        harness.private_value("heating", Scenario::Reference, "d_12").as_deref(),
        Some("50")
    );
}

/// Test that an import is routed through the owning facades and is not persisted.
#[test]
fn test_import_routes_through_facades() {
    let storage = MemoryStorage::new();
    let batch = ImportBatch::from_json(
        r#"{"d_13": 60, "ref_f_20": "50", "site_1": "north", "m_124": "99"}"#,
    )
    .unwrap();

    let (harness, summary) = TestHarness::with_import(Rc::new(storage.clone()), &batch);

    assert_eq!(summary.routed, vec!["d_13", "ref_f_20"]);
    assert_eq!(summary.unowned, vec!["site_1"]);
    assert_eq!(summary.rejected, vec!["m_124"]);

    assert_eq!(harness.provenance("d_13"), Some(Provenance::Imported));
    assert_eq!(
        harness.private_value("heating", Scenario::Target, "d_13").as_deref(),
        Some("60")
    );
    assert_eq!(harness.number("h_124"), Some(60.0));
    assert_eq!(harness.number("ref_m_129"), Some(21.0));
    assert_eq!(harness.number("m_124"), Some(45.0));
    assert_eq!(storage.save_count(), 0);
}

/// Test that a multi-key import after initialization settles the same way in any key order.
///
/// f_20=50 queues cooling before heating Stage 1; cooling must re-run on the new h_124.
#[test]
fn test_import_after_init_is_order_independent() {
    let mut results = Vec::new();
    for order in [["f_20", "d_13"], ["d_13", "f_20"]] {
        let mut harness = TestHarness::new();
        let batch: ImportBatch = order
            .into_iter()
            .map(|key| (key, if key == "f_20" { "50" } else { "60" }))
            .collect();

        let summary = harness.model_mut().import(&batch);
        assert_eq!(summary.routed.len(), 2);

        assert_eq!(harness.number("h_124"), Some(60.0));
        assert_eq!(harness.number("m_129"), Some(30.0));
        assert_eq!(harness.number("m_124"), Some(30.0));
        assert_eq!(harness.number("m_125"), Some(0.5));
        assert_eq!(harness.number("ref_m_124"), Some(31.5));
        results.push(harness.snapshot());
    }

    assert_eq!(results[0], results[1]);
}

/// Test that writing through an installed staged module's driver runs the full cycle.
#[test]
fn test_driver_edit_on_staged_module() {
    let mut harness = TestHarness::new();
    let driver: Rc<dyn ModuleDriver> = harness.heating().clone();

    driver.set_value(
        harness.store_mut(),
        "d_13".into(),
        "60".into(),
        Provenance::UserModified,
    );

    assert_eq!(harness.number("h_124"), Some(60.0));
    assert_eq!(harness.number("m_129"), Some(15.0));
    assert_eq!(harness.number("m_124"), Some(45.0));
    assert_eq!(
        harness.private_value("heating", Scenario::Target, "d_13").as_deref(),
        Some("60")
    );
}

/// Test that a collaborator writing an imported input straight to the store updates the module.
#[test]
fn test_direct_import_write_is_absorbed() {
    let mut harness = TestHarness::new();

    harness.store_mut().set("f_20", "50", Provenance::Imported);

    assert_eq!(
        harness.private_value("cooling", Scenario::Target, "f_20").as_deref(),
        Some("50")
    );
    assert_eq!(harness.number("m_129"), Some(21.0));
    assert_eq!(harness.number("m_124"), Some(21.0));
}

/// Test that the module graph exposes the heating/cooling cycle.
#[test]
fn test_module_graph_reports_cycle() {
    let harness = TestHarness::new();

    assert!(harness.store().dependencies().levels().is_ok());

    let report = harness.model().module_graph().levels().unwrap_err();
    let mut involved = report.involved.clone();
    involved.sort();
    assert_eq!(involved, vec!["cooling", "heating"]);
}
