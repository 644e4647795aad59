use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::death::DeathModelKind;
use crate::economics::DisutilityCombination;
use crate::error::{ConfigError, Result, check_probability, check_relative_risk};
use crate::stage::Complication;
use crate::types::{Clock, TimeUnit};

/// One arm of the comparison. Every arm simulates the same cohort with the
/// same draws.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intervention {
    pub name: String,
    /// Added to each patient's baseline HbA1c (negative lowers it).
    pub hba1c_change: f64,
    /// Multiplier on the risk of severe hypoglycemia.
    pub hypoglycemia_rr: f64,
    /// Yearly cost of the intervention itself.
    pub annual_cost: f64,
}

/// Baseline characteristics the reference cohort is drawn from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CohortConfig {
    pub age_mean: f64,
    pub age_sd: f64,
    pub min_age: f64,
    pub male_fraction: f64,
    pub hba1c_mean: f64,
    pub hba1c_sd: f64,
    pub duration_mean: f64,
    pub duration_sd: f64,
    pub smoker_fraction: f64,
    pub atrial_fibrillation_fraction: f64,
}

impl Default for CohortConfig {
    /// Adult type 1 cohort. PLACEHOLDER values.
    fn default() -> Self {
        CohortConfig {
            age_mean: 40.0,
            age_sd: 12.0,
            min_age: 18.0,
            male_fraction: 0.5,
            hba1c_mean: 8.3,
            hba1c_sd: 1.2,
            duration_mean: 15.0,
            duration_sd: 8.0,
            smoker_fraction: 0.25,
            atrial_fibrillation_fraction: 0.02,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub seed: u64,
    /// Monte-Carlo iterations. Iteration 0 is the base case.
    pub iterations: usize,
    pub patients: usize,
    /// Years simulated per patient, unless death comes first.
    pub years: f64,
    pub time_unit: TimeUnit,
    pub min_step: u64,
    /// Sample parameters from their second-order distributions.
    pub second_order: bool,
    pub death_model: DeathModelKind,
    pub max_age: f64,
    pub disutility_combination: DisutilityCombination,
    /// Utility of a patient with no complications.
    pub base_utility: f64,
    pub disabled: Vec<Complication>,
    pub interventions: Vec<Intervention>,
    pub cohort: CohortConfig,
    /// Parameter file overlaid on the built-in parameters.
    pub parameters: Option<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self::canonical()
    }
}

impl SimulationConfig {
    pub fn canonical() -> Self {
        SimulationConfig {
            seed: 42,
            iterations: 1,
            patients: 1_000,
            years: 60.0,
            time_unit: TimeUnit::Day,
            min_step: 1,
            second_order: false,
            death_model: DeathModelKind::Gompertz,
            max_age: 100.0,
            disutility_combination: DisutilityCombination::Additive,
            base_utility: 0.911, // PLACEHOLDER
            disabled: Vec::new(),
            interventions: vec![
                Intervention {
                    name: "standard care".to_string(),
                    hba1c_change: 0.0,
                    hypoglycemia_rr: 1.0,
                    annual_cost: 0.0,
                },
                Intervention {
                    name: "intensive control".to_string(),
                    hba1c_change: -0.5,     // PLACEHOLDER
                    hypoglycemia_rr: 0.75,  // PLACEHOLDER
                    annual_cost: 1_500.0,   // PLACEHOLDER
                },
            ],
            cohort: CohortConfig::default(),
            parameters: None,
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: SimulationConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn clock(&self) -> Clock {
        Clock::new(self.time_unit, self.min_step)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ConfigError::InvalidSetting(msg));
        if self.iterations == 0 || self.patients == 0 {
            return invalid("at least one iteration and one patient are required".into());
        }
        if !(self.years > 0.0 && self.years.is_finite()) {
            return invalid(format!("horizon of {} years", self.years));
        }
        if self.min_step == 0 {
            return invalid("minimum step must be at least one tick".into());
        }
        if !(self.max_age > 0.0 && self.max_age.is_finite()) {
            return invalid(format!("max age {}", self.max_age));
        }
        if !(self.base_utility > 0.0 && self.base_utility <= 1.0) {
            return invalid(format!("base utility {}", self.base_utility));
        }
        if self.interventions.is_empty() {
            return invalid("no intervention arms".into());
        }
        for arm in &self.interventions {
            check_relative_risk(&arm.name, arm.hypoglycemia_rr)?;
            let cost_ok = arm.annual_cost.is_finite() && arm.annual_cost >= 0.0;
            if !cost_ok || !arm.hba1c_change.is_finite() {
                return invalid(format!("intervention `{}`", arm.name));
            }
        }
        let c = &self.cohort;
        check_probability("male_fraction", c.male_fraction)?;
        check_probability("smoker_fraction", c.smoker_fraction)?;
        check_probability("atrial_fibrillation_fraction", c.atrial_fibrillation_fraction)?;
        if [c.age_sd, c.hba1c_sd, c.duration_sd].iter().any(|sd| !(*sd >= 0.0)) {
            return invalid("cohort standard deviations must be non-negative".into());
        }
        if c.min_age >= self.max_age {
            return invalid(format!("min age {} is not below max age {}", c.min_age, self.max_age));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_is_valid() {
        let config = SimulationConfig::canonical();
        assert!(config.validate().is_ok());
        assert_eq!(config.interventions.len(), 2);
        assert_eq!(config.clock(), Clock::new(TimeUnit::Day, 1));
    }

    #[test]
    fn partial_json_falls_back_to_canonical() {
        let json = r#"{"patients": 10, "disabled": ["CoronaryHeartDisease"]}"#;
        let config: SimulationConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.patients, 10);
        assert_eq!(config.disabled, vec![Complication::CoronaryHeartDisease]);
        assert_eq!(config.seed, 42);
        assert_eq!(config.cohort, CohortConfig::default());
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let mut config = SimulationConfig::canonical();
        config.interventions[1].hypoglycemia_rr = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRelativeRisk { .. })));

        let mut config = SimulationConfig::canonical();
        config.patients = 0;
        assert!(config.validate().is_err());

        let mut config = SimulationConfig::canonical();
        config.cohort.male_fraction = 1.2;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidProbability { .. })));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = SimulationConfig::from_json_file("/nonexistent/diabsim.json");
        assert!(matches!(err, Err(ConfigError::Io(_))));
    }
}
