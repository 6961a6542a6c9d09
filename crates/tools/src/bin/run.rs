//! Tandem Run
//!
//! Initializes the demonstration heating/cooling model, applies edits, and
//! prints both scenarios.
//!
//! Usage: `run [--config FILE] [--import FILE] [--set KEY=VALUE]... [--mode MODE] [--json]`

use std::path::PathBuf;
use std::process;

use clap::Parser;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{error, info, warn};

use tandem_foundation::Scenario;
use tandem_runtime::{
    DiagnosticReport, Diagnostics, ImportBatch, ImportSummary, RuntimeConfig, StageStats,
    Violation,
};
use tandem_tools::demo::DemoModel;

#[derive(Parser, Debug)]
#[command(name = "run")]
#[command(about = "Initialize the demonstration model and print both scenarios")]
struct Args {
    /// Runtime configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Store values to import at initialization (JSON object of key to value)
    #[arg(long)]
    import: Option<PathBuf>,

    /// Scenario to display: target or reference
    #[arg(long)]
    mode: Option<Scenario>,

    /// User edit applied after initialization, e.g. `ref_d_12=50`
    #[arg(long = "set", value_name = "KEY=VALUE")]
    edits: Vec<String>,

    /// Directory for persisted user edits
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// Print a JSON report instead of log lines
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct RunReport {
    mode: Scenario,
    import: ImportSummary,
    modules: IndexMap<String, IndexMap<String, Option<String>>>,
    heating: StageStats,
    diagnostics: DiagnosticReport,
    violations: Vec<Violation>,
}

fn main() {
    tandem_tools::init_logging();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match RuntimeConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to load config '{}': {}", path.display(), e);
                process::exit(1);
            }
        },
        None => RuntimeConfig::default(),
    };
    if let Some(dir) = args.storage_dir.clone() {
        config.persistence.enabled = true;
        config.persistence.directory = Some(dir);
    }

    let import = match &args.import {
        Some(path) => match ImportBatch::from_path(path) {
            Ok(batch) => {
                info!("Loaded {} import entries from {}", batch.len(), path.display());
                Some(batch)
            }
            Err(e) => {
                error!("Failed to load import '{}': {}", path.display(), e);
                process::exit(1);
            }
        },
        None => None,
    };

    let mut demo = match DemoModel::new(config) {
        Ok(d) => d,
        Err(e) => {
            error!("Failed to build model: {}", e);
            process::exit(1);
        }
    };

    let diagnostics = Diagnostics::new();
    demo.model.store_mut().set_observer(diagnostics.clone());

    let summary = match demo.model.initialize_with_import(import.as_ref()) {
        Ok(s) => s,
        Err(e) => {
            error!("Initialization failed: {}", e);
            process::exit(1);
        }
    };
    if !summary.rejected.is_empty() {
        warn!("Rejected import keys: {:?}", summary.rejected);
    }

    for edit in &args.edits {
        let Some((key, value)) = edit.split_once('=') else {
            error!("Invalid edit '{}': expected KEY=VALUE", edit);
            process::exit(1);
        };
        match demo.model.edit_key(key.trim(), value.trim()) {
            Ok(module) => info!("Set {} = {} ({})", key.trim(), value.trim(), module),
            Err(e) => {
                error!("Edit '{}' failed: {}", edit, e);
                process::exit(1);
            }
        }
    }

    if let Some(mode) = args.mode {
        demo.model.switch_mode(mode);
    }

    let mut modules = IndexMap::new();
    for id in demo.model.modules().cloned().collect::<Vec<_>>() {
        match demo.model.display(id.as_str()) {
            Ok(values) => {
                let values = values
                    .into_iter()
                    .map(|(field, value)| (field.to_string(), value))
                    .collect();
                modules.insert(id.to_string(), values);
            }
            Err(e) => {
                error!("Failed to display {}: {}", id, e);
                process::exit(1);
            }
        }
    }

    let report = RunReport {
        mode: demo.model.mode(),
        import: summary,
        modules,
        heating: demo.heating.stats(),
        diagnostics: diagnostics.report(10),
        violations: Diagnostics::check_invariants(demo.model.store()),
    };

    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                error!("Failed to serialize report: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    info!("Mode: {}", report.mode);
    for (module, values) in &report.modules {
        info!("[{}]", module);
        for (field, value) in values {
            info!("  {} = {}", field, value.as_deref().unwrap_or("-"));
        }
    }
    info!(
        "Heating stages: stage1={} stage2={} gated={} suppressed={}",
        report.heating.stage1_runs,
        report.heating.stage2_runs,
        report.heating.gated,
        report.heating.suppressed
    );
    info!(
        "Store: {} reads ({} misses), {} writes",
        report.diagnostics.total_reads, report.diagnostics.total_misses, report.diagnostics.total_writes
    );
    for violation in &report.violations {
        warn!("Invariant: {}", violation);
    }
}
