//! Named model parameters.
//!
//! A [`ParameterSet`] holds point estimates and optional second-order
//! distributions. Each Monte-Carlo iteration binds one immutable
//! [`RunParameters`] from it: point estimates for the base case, samples
//! otherwise.

use std::collections::BTreeMap;
use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_distr::{Beta, Distribution, Gamma, LogNormal, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result, check_probability, check_relative_risk};
use crate::risk::Band;
use crate::time_to_event::BaseRisk;

/// Second-order distribution of a scalar parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Uncertainty {
    Beta { alpha: f64, beta: f64 },
    Gamma { shape: f64, scale: f64 },
    /// ln-space parameters.
    LogNormal { mu: f64, sigma: f64 },
    Normal { mean: f64, sd: f64 },
}

impl Uncertainty {
    /// Beta with the given mean, as if estimated from `n` observations.
    pub fn beta_around(mean: f64, n: f64) -> Self {
        Uncertainty::Beta { alpha: mean * n, beta: (1.0 - mean) * n }
    }

    /// Gamma with the given mean and coefficient of variation.
    pub fn gamma_around(mean: f64, cv: f64) -> Self {
        let shape = 1.0 / (cv * cv);
        Uncertainty::Gamma { shape, scale: mean / shape }
    }

    /// Log-normal centred (in ln-space) on `rr`.
    pub fn log_normal_around(rr: f64, sigma: f64) -> Self {
        Uncertainty::LogNormal { mu: rr.ln(), sigma }
    }

    pub fn sample<R: Rng + ?Sized>(&self, name: &str, rng: &mut R) -> Result<f64> {
        let invalid =
            |reason: String| ConfigError::InvalidDistribution { name: name.to_string(), reason };
        match *self {
            Uncertainty::Beta { alpha, beta } => {
                Beta::new(alpha, beta).map(|d| d.sample(rng)).map_err(|e| invalid(e.to_string()))
            }
            Uncertainty::Gamma { shape, scale } => {
                Gamma::new(shape, scale).map(|d| d.sample(rng)).map_err(|e| invalid(e.to_string()))
            }
            Uncertainty::LogNormal { mu, sigma } => {
                LogNormal::new(mu, sigma).map(|d| d.sample(rng)).map_err(|e| invalid(e.to_string()))
            }
            Uncertainty::Normal { mean, sd } => {
                Normal::new(mean, sd).map(|d| d.sample(rng)).map_err(|e| invalid(e.to_string()))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncertainty: Option<Uncertainty>,
}

impl Param {
    pub fn point(value: f64) -> Self {
        Param { value, uncertainty: None }
    }

    pub fn uncertain(value: f64, uncertainty: Uncertainty) -> Self {
        Param { value, uncertainty: Some(uncertainty) }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    #[serde(default)]
    scalars: BTreeMap<String, Param>,
    #[serde(default)]
    tables: BTreeMap<String, Vec<f64>>,
    /// Probabilities by duration of diabetes, replacing the scalar of the same name.
    #[serde(default)]
    bands: BTreeMap<String, Vec<Band>>,
    /// Closed-form risk equations, replacing bands and scalars of the same name.
    #[serde(default)]
    equations: BTreeMap<String, BaseRisk>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, param: Param) -> &mut Self {
        self.scalars.insert(name.to_string(), param);
        self
    }

    pub fn set_table(&mut self, name: &str, values: Vec<f64>) -> &mut Self {
        self.tables.insert(name.to_string(), values);
        self
    }

    pub fn set_bands(&mut self, name: &str, bands: Vec<Band>) -> &mut Self {
        self.bands.insert(name.to_string(), bands);
        self
    }

    pub fn set_equation(&mut self, name: &str, risk: BaseRisk) -> &mut Self {
        self.equations.insert(name.to_string(), risk);
        self
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        self.scalars.get(name)
    }

    pub fn scalars(&self) -> impl Iterator<Item = (&str, &Param)> {
        self.scalars.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.tables.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let set: ParameterSet = serde_json::from_str(&text)?;
        set.validate()?;
        Ok(set)
    }

    /// Overlay `other` on top of this set; entries in `other` win.
    pub fn merge(&mut self, other: ParameterSet) {
        self.scalars.extend(other.scalars);
        self.tables.extend(other.tables);
        self.bands.extend(other.bands);
        self.equations.extend(other.equations);
    }

    /// Check every distribution can be built.
    pub fn validate(&self) -> Result<()> {
        let mut rng = ChaCha20Rng::seed_from_u64(0);
        for (name, p) in &self.scalars {
            if !p.value.is_finite() {
                return Err(ConfigError::InvalidSetting(format!(
                    "parameter `{name}` is {}",
                    p.value
                )));
            }
            if let Some(u) = &p.uncertainty {
                u.sample(name, &mut rng)?;
            }
        }
        for (name, risk) in &self.equations {
            risk.validate(name)?;
        }
        Ok(())
    }

    /// Bind the parameters of one Monte-Carlo iteration.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        iteration: usize,
        second_order: bool,
        rng: &mut R,
    ) -> Result<RunParameters> {
        let sampled = second_order && iteration > 0;
        let mut scalars = BTreeMap::new();
        for (name, p) in &self.scalars {
            let value = match (&p.uncertainty, sampled) {
                (Some(u), true) => u.sample(name, rng)?,
                _ => p.value,
            };
            scalars.insert(name.clone(), value);
        }
        Ok(RunParameters {
            iteration,
            scalars,
            tables: self.tables.clone(),
            bands: self.bands.clone(),
            equations: self.equations.clone(),
        })
    }

    /// Built-in parameter set covering every complication.
    /// All numeric values are PLACEHOLDER calibration.
    pub fn canonical() -> Self {
        let mut set = ParameterSet::new();

        // ── Transition probabilities (annual) ────────────────────────────────
        let transitions = [
            ("P_DNC_BGRET", 0.0454),
            ("P_DNC_PRET", 0.0013),
            ("P_DNC_ME", 0.0012),
            ("P_DNC_BLI", 0.00002),
            ("P_BGRET_PRET", 0.0595),
            ("P_BGRET_ME", 0.0512),
            ("P_BGRET_BLI", 0.0001),
            ("P_PRET_ME", 0.0512),
            ("P_ME_PRET", 0.0595),
            ("P_PRET_BLI", 0.0038),
            ("P_ME_BLI", 0.0016),
            ("P_DNC_ALB1", 0.0436),
            ("P_ALB1_ALB2", 0.1234),
            ("P_DNC_ESRD", 0.0002),
            ("P_ALB1_ESRD", 0.0037),
            ("P_ALB2_ESRD", 0.0409),
            ("P_NEU_LEA", 0.0154),
            ("P_DNC_CHD", 0.0045),
            ("P_NEU_CHD", 0.0224),
            ("P_NPH_CHD", 0.0223),
            ("P_RET_CHD", 0.0028),
            ("P_SHE", 0.0982),
            ("P_DEATH_SHE", 0.0063),
        ];
        for (name, p) in transitions {
            set.set(name, Param::uncertain(p, Uncertainty::beta_around(p, 1000.0)));
        }

        // Neuropathy onset rises with duration of diabetes.
        set.set_bands(
            "P_DNC_NEU",
            vec![Band::new(10.0, 0.02), Band::new(20.0, 0.0354), Band::new(200.0, 0.05)],
        );

        // ── Relative risks ───────────────────────────────────────────────────
        for (name, rr) in [
            ("RR_RET_HBA1C", 0.61),
            ("RR_NPH_HBA1C", 0.75),
            ("RR_NEU_HBA1C", 0.70),
            ("RR_CHD_HBA1C", 1.15),
            ("RR_CHD_SMOKER", 1.6),
        ] {
            set.set(name, Param::uncertain(rr, Uncertainty::log_normal_around(rr, 0.1)));
        }
        set.set("HBA1C_REFERENCE", Param::point(7.0));
        // Adolescents carry a higher risk of severe hypoglycemia.
        set.set_bands(
            "RR_SHE_AGE",
            vec![Band::new(12.0, 1.0), Band::new(18.0, 1.8), Band::new(200.0, 1.0)],
        );

        // ── Coronary heart disease manifestations: MI, stroke, angina, HF ───
        set.set_table("CHD_MANIFESTATIONS", vec![0.53, 0.07, 0.28, 0.12]);
        set.set_table("CHD_CASE_FATALITY", vec![0.393, 0.124, 0.0, 0.0]);

        // ── Stage economics ──────────────────────────────────────────────────
        // (stage, annual cost, transition cost, disutility, imr, initial prevalence)
        let stages: [(&str, f64, f64, f64, Option<f64>, f64); 13] = [
            ("BGRET", 146.0, 0.0, 0.04, None, 0.10),
            ("PRET", 6_469.0, 0.0, 0.04, None, 0.0),
            ("ME", 6_008.0, 0.0, 0.04, None, 0.0),
            ("BLI", 2_405.0, 0.0, 0.074, None, 0.0),
            ("ALB1", 33.0, 0.0, 0.0, Some(1.4), 0.08),
            ("ALB2", 33.0, 0.0, 0.0, Some(2.23), 0.0),
            ("ESRD", 34_259.0, 0.0, 0.164, Some(4.53), 0.0),
            ("NEU", 3_108.0, 0.0, 0.084, Some(1.51), 0.05),
            ("LEA", 9_305.0, 11_804.0, 0.28, Some(3.98), 0.0),
            ("ANGINA", 1_213.0, 0.0, 0.09, Some(1.96), 0.0),
            ("MI", 1_128.0, 21_864.0, 0.055, Some(1.96), 0.0),
            ("STROKE", 2_486.0, 13_707.0, 0.164, Some(1.96), 0.0),
            ("HF", 1_054.0, 0.0, 0.108, Some(1.96), 0.0),
        ];
        for (code, annual, transition, du, imr, prevalence) in stages {
            set.set(
                &format!("COST_{code}"),
                Param::uncertain(annual, Uncertainty::gamma_around(annual, 0.2)),
            );
            if transition > 0.0 {
                set.set(
                    &format!("TCOST_{code}"),
                    Param::uncertain(transition, Uncertainty::gamma_around(transition, 0.2)),
                );
            }
            set.set(&format!("DU_{code}"), Param::point(du));
            if let Some(imr) = imr {
                set.set(
                    &format!("IMR_{code}"),
                    Param::uncertain(imr, Uncertainty::log_normal_around(imr, 0.05)),
                );
            }
            set.set(&format!("PREV_{code}"), Param::point(prevalence));
        }
        set.set("COST_SHE", Param::uncertain(716.0, Uncertainty::gamma_around(716.0, 0.2)));
        set.set("DU_SHE", Param::point(0.047));

        // ── Mortality (Spain) ────────────────────────────────────────────────
        set.set("DEATH_ALPHA_MEN", Param::point((-10.72495261f64).exp()));
        set.set("DEATH_ALPHA_WOMEN", Param::point((-12.06091495f64).exp()));
        set.set("DEATH_BETA_MEN", Param::point(0.097793422));
        set.set("DEATH_BETA_WOMEN", Param::point(0.108692433));

        set
    }
}

/// Parameters bound for one Monte-Carlo iteration. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunParameters {
    pub iteration: usize,
    scalars: BTreeMap<String, f64>,
    tables: BTreeMap<String, Vec<f64>>,
    bands: BTreeMap<String, Vec<Band>>,
    equations: BTreeMap<String, BaseRisk>,
}

impl RunParameters {
    pub fn get(&self, name: &str) -> Result<f64> {
        self.scalars
            .get(name)
            .copied()
            .ok_or_else(|| ConfigError::MissingParameter(name.to_string()))
    }

    pub fn get_or(&self, name: &str, default: f64) -> f64 {
        self.scalars.get(name).copied().unwrap_or(default)
    }

    pub fn probability(&self, name: &str) -> Result<f64> {
        check_probability(name, self.get(name)?)
    }

    pub fn relative_risk(&self, name: &str) -> Result<f64> {
        check_relative_risk(name, self.get(name)?)
    }

    pub fn table(&self, name: &str) -> Result<&[f64]> {
        self.tables
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| ConfigError::MissingParameter(name.to_string()))
    }

    pub fn bands(&self, name: &str) -> Result<&[Band]> {
        self.bands
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| ConfigError::MissingParameter(name.to_string()))
    }

    /// Base risk named `name`: an equation if one is bound, else duration
    /// bands, else the scalar annual probability.
    pub fn base_risk(&self, name: &str) -> Result<BaseRisk> {
        if let Some(risk) = self.equations.get(name) {
            return Ok(risk.clone());
        }
        if let Some(bands) = self.bands.get(name) {
            return Ok(BaseRisk::DurationBanded { bands: bands.clone(), draw_per_band: false });
        }
        Ok(BaseRisk::Annual(self.probability(name)?))
    }

    /// Override one scalar, for sensitivity analyses and tests.
    pub fn set(&mut self, name: &str, value: f64) {
        self.scalars.insert(name.to_string(), value);
    }

    pub fn set_table(&mut self, name: &str, values: Vec<f64>) {
        self.tables.insert(name.to_string(), values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_to_event::Covariates;

    #[test]
    fn base_case_uses_point_estimates() {
        let set = ParameterSet::canonical();
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let base = set.sample(0, true, &mut rng).unwrap();
        assert_eq!(base.get("P_DNC_BGRET").unwrap(), 0.0454);
        let off = set.sample(5, false, &mut rng).unwrap();
        assert_eq!(off.get("P_DNC_BGRET").unwrap(), 0.0454);
    }

    #[test]
    fn second_order_draws_vary_and_stay_in_range() {
        let set = ParameterSet::canonical();
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let a = set.sample(1, true, &mut rng).unwrap();
        let b = set.sample(2, true, &mut rng).unwrap();
        assert_ne!(a.get("P_DNC_BGRET").unwrap(), b.get("P_DNC_BGRET").unwrap());
        for run in [&a, &b] {
            let p = run.probability("P_ALB1_ALB2").unwrap();
            assert!(p > 0.0 && p < 1.0);
            assert!(run.relative_risk("RR_CHD_HBA1C").unwrap() > 0.0);
            assert!(run.get("COST_ESRD").unwrap() > 0.0);
        }
        // Point-only parameters never move.
        assert_eq!(a.get("HBA1C_REFERENCE").unwrap(), 7.0);
    }

    #[test]
    fn same_seed_same_draws() {
        let set = ParameterSet::canonical();
        let a = set.sample(3, true, &mut ChaCha20Rng::seed_from_u64(9)).unwrap();
        let b = set.sample(3, true, &mut ChaCha20Rng::seed_from_u64(9)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_parameter_is_named() {
        let run = ParameterSet::new().sample(0, false, &mut ChaCha20Rng::seed_from_u64(0)).unwrap();
        match run.get("P_NOPE") {
            Err(ConfigError::MissingParameter(name)) => assert_eq!(name, "P_NOPE"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(run.table("CHD_MANIFESTATIONS").is_err());
        assert_eq!(run.get_or("P_NOPE", 0.5), 0.5);
    }

    #[test]
    fn bad_distribution_is_rejected() {
        let mut set = ParameterSet::new();
        set.set("P_X", Param::uncertain(0.1, Uncertainty::Beta { alpha: -1.0, beta: 2.0 }));
        assert!(matches!(set.validate(), Err(ConfigError::InvalidDistribution { .. })));
        let err = set.sample(1, true, &mut ChaCha20Rng::seed_from_u64(0));
        assert!(err.is_err());
    }

    #[test]
    fn base_risk_prefers_bands_over_scalar() {
        let mut rng = ChaCha20Rng::seed_from_u64(0);
        let run = ParameterSet::canonical().sample(0, false, &mut rng).unwrap();
        assert!(matches!(run.base_risk("P_DNC_NEU").unwrap(), BaseRisk::DurationBanded { .. }));
        assert_eq!(run.base_risk("P_DNC_ALB1").unwrap(), BaseRisk::Annual(0.0436));
    }

    #[test]
    fn equation_overrides_bands_and_scalar() {
        let neu = Covariates { intercept: -4.0, hba1c: 0.1, ..Covariates::default() };
        let mut set = ParameterSet::canonical();
        set.set_equation("P_DNC_NEU", BaseRisk::Logistic(neu));
        let alb1 = Covariates { intercept: -3.0, ..Covariates::default() };
        set.set_equation("P_DNC_ALB1", BaseRisk::LogLinear(alb1));
        assert!(set.validate().is_ok());

        let run = set.sample(0, false, &mut ChaCha20Rng::seed_from_u64(0)).unwrap();
        assert_eq!(run.base_risk("P_DNC_NEU").unwrap(), BaseRisk::Logistic(neu));
        assert!(matches!(run.base_risk("P_DNC_ALB1").unwrap(), BaseRisk::LogLinear(_)));
        assert_eq!(run.base_risk("P_DNC_BGRET").unwrap(), BaseRisk::Annual(0.0454));
    }

    #[test]
    fn non_finite_equation_is_rejected() {
        let mut set = ParameterSet::new();
        let bad = Covariates { hba1c: f64::NAN, ..Covariates::default() };
        set.set_equation("P_DNC_ALB1", BaseRisk::LogLinear(bad));
        assert!(matches!(set.validate(), Err(ConfigError::InvalidTable { .. })));
    }

    #[test]
    fn json_round_trip_keeps_parameters() {
        let set = ParameterSet::canonical();
        let json = serde_json::to_string(&set).unwrap();
        let back: ParameterSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back.param("P_SHE"), set.param("P_SHE"));
        assert!(back.validate().is_ok());
    }

    #[test]
    fn partial_json_overlays_canonical() {
        let overlay: ParameterSet =
            serde_json::from_str(r#"{"scalars": {"P_SHE": {"value": 0.004}}}"#).unwrap();
        let mut set = ParameterSet::canonical();
        set.merge(overlay);
        assert_eq!(set.param("P_SHE").unwrap().value, 0.004);
        assert!(set.param("P_SHE").unwrap().uncertainty.is_none());
        assert!(set.param("P_DEATH_SHE").is_some());
    }
}
