//! Baseline time to death, adjusted by the increased mortality risk (IMR) of
//! the patient's active stages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::draws::{RunContext, UniqueDraws};
use crate::error::{ConfigError, Result, check_probability, check_relative_risk};
use crate::patient::PatientView;
use crate::stage::Stage;
use crate::types::{Clock, SimTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeathModelKind {
    Gompertz,
    LifeTable,
}

/// Gompertz hazard `alpha · exp(beta · age)`, men first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gompertz {
    pub alpha: [f64; 2],
    pub beta: [f64; 2],
}

impl Gompertz {
    /// Years until death for draw `u`, given survival to `age` and a hazard
    /// multiplied by `imr`. Same as drawing with `u^(1/imr)` at `imr = 1`.
    pub fn years_to_death(&self, sex: usize, age: f64, u: f64, imr: f64) -> f64 {
        let (alpha, beta) = (self.alpha[sex], self.beta[sex]);
        let scale = imr * alpha * (beta * age).exp();
        ((-beta * u.ln() / scale).ln_1p()) / beta
    }

    /// Annual death probabilities for ages `0..max_age`.
    pub fn annual_probabilities(&self, sex: usize, max_age: usize) -> Vec<f64> {
        let (alpha, beta) = (self.alpha[sex], self.beta[sex]);
        (0..max_age)
            .map(|a| {
                let cumulative = alpha / beta * (beta * a as f64).exp() * beta.exp_m1();
                -(-cumulative).exp_m1()
            })
            .collect()
    }
}

/// Survival curve `survival[age]` for whole ages `0..=max_age`, men first.
#[derive(Debug, Clone, PartialEq)]
pub struct LifeTable {
    survival: [Vec<f64>; 2],
}

impl LifeTable {
    /// Build from annual death probabilities by whole age.
    pub fn from_probabilities(qx: [&[f64]; 2], max_age: usize) -> Result<Self> {
        let mut survival: [Vec<f64>; 2] = [Vec::new(), Vec::new()];
        for (sex, q) in qx.iter().enumerate() {
            if q.len() < max_age {
                return Err(ConfigError::InvalidTable {
                    name: "life table".into(),
                    reason: format!("{} ages given, {max_age} needed", q.len()),
                });
            }
            let mut alive = 1.0;
            let mut curve = Vec::with_capacity(max_age + 1);
            curve.push(alive);
            for &p in &q[..max_age] {
                check_probability("life table", p)?;
                alive *= 1.0 - p;
                curve.push(alive);
            }
            survival[sex] = curve;
        }
        Ok(LifeTable { survival })
    }

    /// Linearly interpolated survival at a fractional age.
    pub fn survival_at(&self, sex: usize, age: f64) -> f64 {
        let curve = &self.survival[sex];
        let last = curve.len() - 1;
        if age <= 0.0 {
            return curve[0];
        }
        let lower = age.floor() as usize;
        if lower >= last {
            return curve[last];
        }
        let frac = age - lower as f64;
        curve[lower] + (curve[lower + 1] - curve[lower]) * frac
    }

    /// Age at which survival falls to `target`, by binary search over the
    /// decreasing curve. `None` if it stays above `target` through the table.
    pub fn age_at_survival(&self, sex: usize, target: f64) -> Option<f64> {
        let curve = &self.survival[sex];
        let k = curve.partition_point(|&s| s > target);
        if k >= curve.len() {
            return None;
        }
        if k == 0 {
            return Some(0.0);
        }
        let (hi, lo) = (curve[k - 1], curve[k]);
        let frac = if hi > lo { (hi - target) / (hi - lo) } else { 0.0 };
        Some((k - 1) as f64 + frac)
    }
}

#[derive(Debug, Clone)]
enum Strategy {
    Gompertz(Gompertz),
    LifeTable(LifeTable),
}

#[derive(Debug, Clone)]
pub struct DeathSource {
    strategy: Strategy,
    imr: BTreeMap<Stage, f64>,
    draws: UniqueDraws,
    clock: Clock,
    max_age: f64,
}

impl DeathSource {
    pub fn gompertz(
        params: Gompertz,
        max_age: f64,
        imr: BTreeMap<Stage, f64>,
        ctx: &mut RunContext,
    ) -> Result<Self> {
        for sex in 0..2 {
            check_relative_risk("gompertz alpha", params.alpha[sex])?;
            check_relative_risk("gompertz beta", params.beta[sex])?;
        }
        Self::build(Strategy::Gompertz(params), max_age, imr, ctx)
    }

    pub fn life_table(
        table: LifeTable,
        max_age: f64,
        imr: BTreeMap<Stage, f64>,
        ctx: &mut RunContext,
    ) -> Result<Self> {
        Self::build(Strategy::LifeTable(table), max_age, imr, ctx)
    }

    fn build(
        strategy: Strategy,
        max_age: f64,
        imr: BTreeMap<Stage, f64>,
        ctx: &mut RunContext,
    ) -> Result<Self> {
        if !(max_age > 0.0 && max_age.is_finite()) {
            return Err(ConfigError::InvalidSetting(format!("max age {max_age}")));
        }
        for value in imr.values() {
            check_relative_risk("IMR", *value)?;
        }
        Ok(DeathSource { strategy, imr, draws: ctx.unique(1), clock: ctx.clock, max_age })
    }

    /// Largest IMR among the patient's active stages, 1.0 if none has one.
    pub fn imr(&self, patient: &dyn PatientView) -> f64 {
        patient
            .detailed_state()
            .iter()
            .filter_map(|s| self.imr.get(s).copied())
            .reduce(f64::max)
            .unwrap_or(1.0)
    }

    /// Years from now until death, capped at the maximum age.
    pub fn years_to_death(&self, patient: &dyn PatientView) -> f64 {
        let u = self.draws.get(patient.id(), 0);
        let imr = self.imr(patient);
        let sex = patient.sex().index();
        let age = patient.age();
        let remaining = (self.max_age - age).max(0.0);
        let years = match &self.strategy {
            Strategy::Gompertz(g) => g.years_to_death(sex, age, u, imr),
            Strategy::LifeTable(t) => {
                // S_imr(x) = S(x)^imr, so conditional survival u is reached
                // where S(x) = S(age) · u^(1/imr).
                let target = t.survival_at(sex, age) * u.powf(1.0 / imr);
                t.age_at_survival(sex, target).map_or(remaining, |death_age| death_age - age)
            }
        };
        if years.is_finite() { years.clamp(0.0, remaining) } else { remaining }
    }

    /// Absolute time of death.
    pub fn time_to_death(&self, patient: &dyn PatientView) -> SimTime {
        let years = self.years_to_death(patient);
        let delay = self.clock.delay(years).unwrap_or(self.clock.min_step);
        patient.now().offset(delay)
    }

    pub fn reset(&mut self, seed: u64) {
        self.draws.reset(seed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patient::PatientSnapshot;
    use crate::stage::StageRegistry;
    use crate::types::{PatientId, Sex, TimeUnit};

    fn spain() -> Gompertz {
        Gompertz {
            alpha: [(-10.72495261f64).exp(), (-12.06091495f64).exp()],
            beta: [0.097793422, 0.108692433],
        }
    }

    fn clock() -> Clock {
        Clock::new(TimeUnit::Day, 1)
    }

    fn fixed_draw(strategy: Strategy, u: f64, imr: BTreeMap<Stage, f64>) -> DeathSource {
        DeathSource {
            strategy,
            imr,
            draws: UniqueDraws::from_values(1, vec![u]),
            clock: clock(),
            max_age: 100.0,
        }
    }

    #[test]
    fn gompertz_median_is_plausible() {
        let years = spain().years_to_death(0, 50.0, 0.5, 1.0);
        assert!(years > 20.0 && years < 40.0, "median remaining life {years}");
    }

    #[test]
    fn gompertz_imr_scales_hazard_not_draw() {
        let g = spain();
        for (u, imr) in [(0.4, 2.0), (0.9, 4.53), (0.05, 1.4)] {
            let scaled = g.years_to_death(1, 60.0, u, imr);
            let powered = g.years_to_death(1, 60.0, f64::powf(u, 1.0 / imr), 1.0);
            assert!((scaled - powered).abs() < 1e-9, "{scaled} vs {powered}");
            let divided = g.years_to_death(1, 60.0, u / imr, 1.0);
            assert!(scaled < divided);
        }
    }

    #[test]
    fn imr_shortens_gompertz_life() {
        let registry = StageRegistry::standard();
        let esrd = registry.stage("ESRD").unwrap();
        let imr = BTreeMap::from([(esrd, 2.0)]);
        let source = fixed_draw(Strategy::Gompertz(spain()), 0.4, imr);

        let healthy = PatientSnapshot::new(PatientId(0), 50.0, Sex::Male);
        let sick = healthy.clone().with_stage(esrd);
        let d = source.time_to_death(&healthy);
        assert!(source.time_to_death(&sick) <= d);
        assert!(source.time_to_death(&sick) < d);
    }

    #[test]
    fn imr_is_the_maximum_not_the_product() {
        let registry = StageRegistry::standard();
        let (a, b, c) = (
            registry.stage("ALB2").unwrap(),
            registry.stage("ESRD").unwrap(),
            registry.stage("NEU").unwrap(),
        );
        let imr = BTreeMap::from([(a, 1.5), (b, 2.5)]);
        let source = fixed_draw(Strategy::Gompertz(spain()), 0.4, imr);
        let p = PatientSnapshot::new(PatientId(0), 50.0, Sex::Male)
            .with_stage(a)
            .with_stage(b)
            .with_stage(c);
        assert_eq!(source.imr(&p), 2.5);
        let healthy = PatientSnapshot::new(PatientId(0), 50.0, Sex::Male).with_stage(c);
        assert_eq!(source.imr(&healthy), 1.0);
    }

    #[test]
    fn death_never_exceeds_max_age() {
        let source = fixed_draw(Strategy::Gompertz(spain()), 1e-300, BTreeMap::new());
        let p = PatientSnapshot::new(PatientId(0), 90.0, Sex::Female);
        let years = source.years_to_death(&p);
        assert!(years <= 10.0 + 1e-9);
        assert!(source.time_to_death(&p) <= SimTime(10 * 365));
    }

    #[test]
    fn life_table_survival_is_decreasing_and_searchable() {
        let g = spain();
        let men = g.annual_probabilities(0, 100);
        let women = g.annual_probabilities(1, 100);
        let table = LifeTable::from_probabilities([&men, &women], 100).unwrap();
        assert_eq!(table.survival_at(0, 0.0), 1.0);
        assert!(table.survival_at(0, 60.0) > table.survival_at(0, 70.0));
        let s65 = table.survival_at(1, 65.0);
        let age = table.age_at_survival(1, s65).unwrap();
        assert!((age - 65.0).abs() < 1e-6, "got {age}");
    }

    #[test]
    fn life_table_and_gompertz_agree_roughly() {
        let g = spain();
        let men = g.annual_probabilities(0, 100);
        let women = g.annual_probabilities(1, 100);
        let table = LifeTable::from_probabilities([&men, &women], 100).unwrap();
        let p = PatientSnapshot::new(PatientId(0), 50.0, Sex::Male);
        let by_table =
            fixed_draw(Strategy::LifeTable(table), 0.5, BTreeMap::new()).years_to_death(&p);
        let by_formula = fixed_draw(Strategy::Gompertz(g), 0.5, BTreeMap::new()).years_to_death(&p);
        assert!((by_table - by_formula).abs() < 1.0, "{by_table} vs {by_formula}");
    }

    #[test]
    fn life_table_imr_shortens_life() {
        let g = spain();
        let men = g.annual_probabilities(0, 100);
        let women = g.annual_probabilities(1, 100);
        let table = LifeTable::from_probabilities([&men, &women], 100).unwrap();
        let registry = StageRegistry::standard();
        let bli = registry.stage("BLI").unwrap();
        let source = fixed_draw(Strategy::LifeTable(table), 0.5, BTreeMap::from([(bli, 2.0)]));
        let healthy = PatientSnapshot::new(PatientId(0), 50.0, Sex::Male);
        let blind = healthy.clone().with_stage(bli);
        assert!(source.years_to_death(&blind) < source.years_to_death(&healthy));
    }

    #[test]
    fn short_life_table_is_rejected() {
        let q = vec![0.01; 10];
        assert!(LifeTable::from_probabilities([&q, &q], 100).is_err());
    }

    #[test]
    fn same_draw_gives_same_death() {
        let mut ctx = RunContext::new(1, 0, 3, clock());
        let source = DeathSource::gompertz(spain(), 100.0, BTreeMap::new(), &mut ctx).unwrap();
        let p = PatientSnapshot::new(PatientId(2), 40.0, Sex::Female);
        assert_eq!(source.time_to_death(&p), source.time_to_death(&p));
    }
}
