//! Tandem Runtime
//!
//! Shared keyed value store, dual-scenario module facades, and the staged
//! orchestration that lets two mutually dependent modules compute without
//! deadlock.

pub mod config;
pub mod context;
pub mod dependency;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod facade;
pub mod guard;
pub mod import;
pub mod model;
pub mod module;
pub mod persistence;
pub mod queue;
pub mod staged;
pub mod store;

pub use config::{PersistenceConfig, RuntimeConfig};
pub use context::CalcContext;
pub use dependency::{CycleReport, DependencyRegistry};
pub use diagnostics::{DiagnosticReport, Diagnostics, KeyStats, StoreObserver, Violation};
pub use error::{Error, Result};
pub use events::{Stage, StageEvent, SubscriptionId};
pub use facade::{FieldSpec, ScenarioFacade};
pub use guard::ReentrancyGuard;
pub use import::{ImportBatch, ImportSummary};
pub use model::Model;
pub use module::{CalculationModule, DualEngine, ModuleDriver, run_dual_engine};
pub use persistence::{FileStorage, MemoryStorage, PersistedScenarios, ScenarioStorage, storage_key};
pub use queue::{MAX_RUNS_PER_PASS, PassReport};
pub use staged::{Gate, StageState, StageStats, StagedCalculation, StagedOrchestrator};
pub use store::{Change, ListenerId, Record, ValueStore};
