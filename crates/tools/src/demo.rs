//! Demonstration model
//!
//! Two modules in a true cycle:
//!
//! - `heating` (staged) publishes the gross demand `h_124` in Stage 1 and
//!   the net demand `m_124` in Stage 2, which needs the recovered energy.
//! - `cooling` (plain) turns the gross demand into recovered energy `m_129`.
//!
//! ```text
//!   d_12, d_13 ──► heating/1 ──► h_124 ──► cooling ──► m_129 ──► heating/2 ──► m_124
//! ```

mod cooling;
mod heating;

use std::rc::Rc;

use tandem_runtime::{DualEngine, Model, Result, RuntimeConfig, StagedOrchestrator};

pub use cooling::CoolingModule;
pub use heating::HeatingModule;

/// Handles to the registered demo modules
pub struct DemoModel {
    pub model: Model,
    pub heating: Rc<StagedOrchestrator<HeatingModule>>,
    pub cooling: Rc<DualEngine<CoolingModule>>,
}

impl DemoModel {
    /// Register both modules. The model is not initialized yet.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        Self::from_model(Model::new(config)?)
    }

    /// Register both modules on an existing, uninitialized model.
    pub fn from_model(mut model: Model) -> Result<Self> {
        let heating = model.register_staged(HeatingModule::new())?;
        let cooling = model.register_module(CoolingModule::new())?;
        Ok(Self {
            model,
            heating,
            cooling,
        })
    }
}
