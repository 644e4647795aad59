use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result, check_probability, check_relative_risk};

/// Per-stage costs, utility loss and mortality, bound once per run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StageEconomics {
    /// Yearly cost while the stage is active.
    pub annual_cost: f64,
    /// One-off cost at onset.
    pub transition_cost: f64,
    pub disutility: f64,
    /// Mortality multiplier while active, if the stage has one.
    pub imr: Option<f64>,
    /// Probability of having the stage at simulation start.
    pub initial_prevalence: f64,
}

impl StageEconomics {
    pub fn validate(&self, code: &str) -> Result<()> {
        let costs = [("annual cost", self.annual_cost), ("transition cost", self.transition_cost)];
        for (what, v) in costs {
            if !(v.is_finite() && v >= 0.0) {
                return Err(ConfigError::InvalidSetting(format!("{what} of {code} is {v}")));
            }
        }
        if !(0.0..1.0).contains(&self.disutility) {
            return Err(ConfigError::InvalidSetting(format!(
                "disutility of {code} is {}",
                self.disutility
            )));
        }
        if let Some(imr) = self.imr {
            check_relative_risk(code, imr)?;
        }
        check_probability(code, self.initial_prevalence)?;
        Ok(())
    }
}

/// How the disutilities of several simultaneous stages combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisutilityCombination {
    Additive,
    Multiplicative,
    /// Only the largest disutility counts.
    Max,
}

/// Combined disutility, always in [0, 1).
pub fn combine_disutilities(
    method: DisutilityCombination,
    values: impl IntoIterator<Item = f64>,
) -> f64 {
    let combined = match method {
        DisutilityCombination::Additive => values.into_iter().sum(),
        DisutilityCombination::Multiplicative => {
            1.0 - values.into_iter().map(|d| 1.0 - d).product::<f64>()
        }
        DisutilityCombination::Max => values.into_iter().fold(0.0, f64::max),
    };
    combined.clamp(0.0, 1.0 - f64::EPSILON)
}
