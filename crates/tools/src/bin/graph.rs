//! Tandem Graph
//!
//! Prints the declared dependency edges of the demonstration model as a
//! Graphviz digraph and reports where the graph is cyclic.
//!
//! Usage: `graph [--modules] [--out FILE]`

use std::fs;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::{error, info, warn};

use tandem_runtime::{DependencyRegistry, RuntimeConfig};
use tandem_tools::demo::DemoModel;

#[derive(Parser, Debug)]
#[command(name = "graph")]
#[command(about = "Export the demonstration model's dependency graph")]
struct Args {
    /// Collapse key-level edges into module-level edges
    #[arg(long)]
    modules: bool,

    /// Write the DOT output to a file instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() {
    tandem_tools::init_logging();

    let args = Args::parse();

    let mut config = RuntimeConfig::default();
    config.persistence.enabled = false;

    let mut demo = match DemoModel::new(config) {
        Ok(d) => d,
        Err(e) => {
            error!("Failed to build model: {}", e);
            process::exit(1);
        }
    };
    if let Err(e) = demo.model.initialize() {
        error!("Initialization failed: {}", e);
        process::exit(1);
    }

    let (name, graph): (&str, DependencyRegistry) = if args.modules {
        ("modules", demo.model.module_graph())
    } else {
        ("keys", demo.model.store().dependencies().clone())
    };

    info!("{} nodes, {} edges", graph.nodes().len(), graph.len());
    match graph.levels() {
        Ok(levels) => {
            for (i, level) in levels.iter().enumerate() {
                info!("  level {}: {}", i, level.join(", "));
            }
        }
        Err(report) => {
            warn!("Cycle detected; staged orchestration required between: {}", report.involved.join(", "));
        }
    }

    let dot = graph.to_dot(name);
    match &args.out {
        Some(path) => {
            if let Err(e) = fs::write(path, &dot) {
                error!("Failed to write '{}': {}", path.display(), e);
                process::exit(1);
            }
            info!("Wrote {}", path.display());
        }
        None => print!("{dot}"),
    }
}
