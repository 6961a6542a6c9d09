//! Heating module (staged)

use tandem_foundation::FieldId;
use tandem_runtime::{CalcContext, FieldSpec, Gate, Result, ScenarioFacade, StagedCalculation};

/// `d_14` value that disables heat recovery
pub const NO_RECOVERY: &str = "none";

pub struct HeatingModule {
    facade: ScenarioFacade,
}

impl HeatingModule {
    pub fn new() -> Self {
        Self {
            facade: ScenarioFacade::new(
                "heating",
                [
                    // Floor area, m²
                    FieldSpec::input("d_12", "100"),
                    // Heating intensity, kWh/m²a
                    FieldSpec::input("d_13", "42"),
                    // Recovery system
                    FieldSpec::input("d_14", "plate-exchanger"),
                    FieldSpec::output("h_124"),
                    FieldSpec::output("h_125"),
                    FieldSpec::output("m_124"),
                    FieldSpec::output("m_125"),
                ],
            ),
        }
    }
}

impl Default for HeatingModule {
    fn default() -> Self {
        Self::new()
    }
}

impl StagedCalculation for HeatingModule {
    fn facade(&self) -> &ScenarioFacade {
        &self.facade
    }

    fn facade_mut(&mut self) -> &mut ScenarioFacade {
        &mut self.facade
    }

    fn stage1_outputs(&self) -> Vec<FieldId> {
        vec!["h_124".into(), "h_125".into()]
    }

    fn stage2_outputs(&self) -> Vec<FieldId> {
        vec!["m_124".into(), "m_125".into()]
    }

    fn upstream(&self) -> FieldId {
        "m_129".into()
    }

    /// Gross demand and demand per area.
    fn stage1(&self, ctx: &mut CalcContext<'_>) -> Result<()> {
        let area = ctx.own_number("d_12", 0.0);
        let intensity = ctx.own_number("d_13", 0.0);

        let demand = area * intensity / 100.0;
        ctx.publish("h_124", demand);
        let per_area = ctx.divide(demand, area, 0.0, "h_125");
        ctx.publish("h_125", per_area);
        Ok(())
    }

    fn gate(&self, ctx: &CalcContext<'_>) -> Gate {
        match ctx.own("d_14") {
            Some(system) if system.trim().eq_ignore_ascii_case(NO_RECOVERY) => Gate::Closed,
            _ => Gate::Open,
        }
    }

    /// Net demand after recovered energy, and the recovery ratio.
    fn stage2(&self, ctx: &mut CalcContext<'_>, recovered: f64) -> Result<()> {
        let demand = ctx.number("h_124", 0.0);

        ctx.publish("m_124", (demand - recovered).max(0.0));
        let ratio = ctx.divide(recovered, demand, 0.0, "m_125");
        ctx.publish("m_125", ratio);
        Ok(())
    }
}
