//! Cooling module (plain dual-engine)

use tandem_foundation::FieldId;
use tandem_runtime::{CalcContext, CalculationModule, FieldSpec, Result, ScenarioFacade};

pub struct CoolingModule {
    facade: ScenarioFacade,
}

impl CoolingModule {
    pub fn new() -> Self {
        Self {
            facade: ScenarioFacade::new(
                "cooling",
                [
                    // Recovery efficiency, percent
                    FieldSpec::input("f_20", "25"),
                    FieldSpec::output("m_129"),
                ],
            ),
        }
    }
}

impl Default for CoolingModule {
    fn default() -> Self {
        Self::new()
    }
}

impl CalculationModule for CoolingModule {
    fn facade(&self) -> &ScenarioFacade {
        &self.facade
    }

    fn facade_mut(&mut self) -> &mut ScenarioFacade {
        &mut self.facade
    }

    fn inputs(&self) -> Vec<FieldId> {
        vec!["h_124".into()]
    }

    /// Recovered energy from the heating module's gross demand.
    fn calculate(&self, ctx: &mut CalcContext<'_>) -> Result<()> {
        let demand = ctx.number("h_124", 0.0);
        let efficiency = ctx.own_number("f_20", 0.0);
        ctx.publish("m_129", demand * efficiency / 100.0);
        Ok(())
    }
}
