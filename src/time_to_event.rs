//! Time-to-event sampling.
//!
//! A source turns a cached uniform draw `u`, a base annual probability `p` and
//! a relative risk `rr` into a delay of `ln(u) / (rr · ln(1 − p))` years. This is
//! both the inverse of an exponential time with rate `rr · −ln(1 − p)` and the
//! inverse of a geometric-style time using the adjusted probability
//! `1 − (1 − p)^rr`; the two conventions coincide.

use serde::{Deserialize, Serialize};

use crate::draws::{RecurringDraws, RunContext, UniqueDraws};
use crate::error::{ConfigError, Result, check_probability};
use crate::patient::PatientView;
use crate::risk::{Band, RelativeRisk, band_index, check_bands};
use crate::types::{Clock, Sex, SimTime};

/// Linear predictor over patient covariates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Covariates {
    pub intercept: f64,
    pub hba1c: f64,
    pub age: f64,
    pub duration: f64,
    pub male: f64,
    pub smoker: f64,
}

impl Covariates {
    pub fn predictor(&self, patient: &dyn PatientView) -> f64 {
        let male = if patient.sex() == Sex::Male { 1.0 } else { 0.0 };
        let smoker = if patient.is_smoker() { 1.0 } else { 0.0 };
        self.intercept
            + self.hba1c * patient.hba1c()
            + self.age * patient.age()
            + self.duration * patient.duration_of_diabetes()
            + self.male * male
            + self.smoker * smoker
    }
}

/// How the base annual probability of a transition is obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BaseRisk {
    Annual(f64),
    /// Keyed by years since diagnosis.
    DurationBanded { bands: Vec<Band>, draw_per_band: bool },
    /// Keyed by age.
    AgeBanded { bands: Vec<Band>, draw_per_band: bool },
    /// Annual rate `exp(lp)`, converted to `1 − exp(−rate)`.
    LogLinear(Covariates),
    /// `1 / (1 + exp(−lp))`.
    Logistic(Covariates),
}

impl BaseRisk {
    pub fn probability(&self, patient: &dyn PatientView) -> f64 {
        match self {
            BaseRisk::Annual(p) => *p,
            BaseRisk::DurationBanded { bands, .. } => {
                bands[band_index(bands, patient.duration_of_diabetes())].value
            }
            BaseRisk::AgeBanded { bands, .. } => bands[band_index(bands, patient.age())].value,
            BaseRisk::LogLinear(c) => -(-c.predictor(patient).exp()).exp_m1(),
            BaseRisk::Logistic(c) => 1.0 / (1.0 + (-c.predictor(patient)).exp()),
        }
    }

    /// Number of draw slots a patient needs for this risk.
    pub fn slots(&self) -> usize {
        match self {
            BaseRisk::DurationBanded { bands, draw_per_band: true }
            | BaseRisk::AgeBanded { bands, draw_per_band: true } => bands.len(),
            _ => 1,
        }
    }

    /// Draw slot used for `patient` at its current state.
    pub fn slot(&self, patient: &dyn PatientView) -> usize {
        match self {
            BaseRisk::DurationBanded { bands, draw_per_band: true } => {
                band_index(bands, patient.duration_of_diabetes())
            }
            BaseRisk::AgeBanded { bands, draw_per_band: true } => band_index(bands, patient.age()),
            _ => 0,
        }
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        match self {
            BaseRisk::Annual(p) => check_probability(name, *p).map(|_| ()),
            BaseRisk::DurationBanded { bands, .. } | BaseRisk::AgeBanded { bands, .. } => {
                check_bands(name, bands)?;
                bands.iter().try_for_each(|b| check_probability(name, b.value).map(|_| ()))
            }
            BaseRisk::LogLinear(c) | BaseRisk::Logistic(c) => {
                let coefficients = [c.intercept, c.hba1c, c.age, c.duration, c.male, c.smoker];
                if coefficients.iter().all(|v| v.is_finite()) {
                    Ok(())
                } else {
                    Err(ConfigError::InvalidTable {
                        name: name.to_string(),
                        reason: "non-finite coefficient".into(),
                    })
                }
            }
        }
    }
}

/// Years until the event for draw `u`. `None` when the effective hazard is
/// zero, negative or undefined, or the draw maps to an infinite time.
pub fn years_to_event(u: f64, p: f64, rr: f64) -> Option<f64> {
    if !(p > 0.0) || !(rr > 0.0) || !rr.is_finite() {
        return None;
    }
    if p >= 1.0 {
        return Some(0.0);
    }
    let years = u.ln() / (rr * (-p).ln_1p());
    (years.is_finite() && years >= 0.0).then_some(years)
}

/// Absolute time `years` after `now`, or `NEVER` unless strictly before `horizon`.
pub fn clamp_to_horizon(
    clock: &Clock,
    now: SimTime,
    years: Option<f64>,
    horizon: SimTime,
) -> SimTime {
    let Some(delay) = years.and_then(|y| clock.delay(y)) else {
        return SimTime::NEVER;
    };
    let time = now.offset(delay);
    if time < horizon { time } else { SimTime::NEVER }
}

/// Time to a non-recurring transition, reusing one cached draw per patient.
#[derive(Debug, Clone)]
pub struct TimeToEventSource {
    base: BaseRisk,
    rr: RelativeRisk,
    draws: UniqueDraws,
    clock: Clock,
}

impl TimeToEventSource {
    pub fn new(name: &str, base: BaseRisk, rr: RelativeRisk, ctx: &mut RunContext) -> Result<Self> {
        base.validate(name)?;
        rr.validate(name)?;
        let draws = ctx.unique(base.slots());
        Ok(TimeToEventSource { base, rr, draws, clock: ctx.clock })
    }

    /// Source over caller-supplied draws (see [`UniqueDraws::from_values`]).
    pub fn with_draws(base: BaseRisk, rr: RelativeRisk, draws: UniqueDraws, clock: Clock) -> Self {
        TimeToEventSource { base, rr, draws, clock }
    }

    /// Absolute onset time strictly before `horizon`, or `NEVER`.
    pub fn time_to_event(&self, patient: &dyn PatientView, horizon: SimTime) -> SimTime {
        let u = self.draws.get(patient.id(), self.base.slot(patient));
        let p = self.base.probability(patient);
        let rr = self.rr.rr(patient);
        let years = years_to_event(u, p, rr);
        if years.is_none() {
            log::trace!("patient {:?}: degenerate hazard p={p} rr={rr}", patient.id());
        }
        clamp_to_horizon(&self.clock, patient.now(), years, horizon)
    }

    pub fn reset(&mut self, seed: u64) {
        self.draws.reset(seed);
    }
}

/// Time to the next occurrence of a recurring event. Every call consumes a
/// fresh draw; [`cancel_last`](Self::cancel_last) hands it back.
#[derive(Debug, Clone)]
pub struct RecurringEventSource {
    base: BaseRisk,
    rr: RelativeRisk,
    draws: RecurringDraws,
    clock: Clock,
}

impl RecurringEventSource {
    pub fn new(name: &str, base: BaseRisk, rr: RelativeRisk, ctx: &mut RunContext) -> Result<Self> {
        base.validate(name)?;
        rr.validate(name)?;
        let draws = ctx.recurring();
        Ok(RecurringEventSource { base, rr, draws, clock: ctx.clock })
    }

    pub fn next_time(&mut self, patient: &dyn PatientView, horizon: SimTime) -> SimTime {
        let u = self.draws.next(patient.id());
        let p = self.base.probability(patient);
        let rr = self.rr.rr(patient);
        clamp_to_horizon(&self.clock, patient.now(), years_to_event(u, p, rr), horizon)
    }

    pub fn cancel_last(&mut self, patient: &dyn PatientView) {
        self.draws.cancel_last(patient.id());
    }

    pub fn rewind(&mut self) {
        self.draws.rewind();
    }

    pub fn reset(&mut self, seed: u64) {
        self.draws.reset(seed);
    }
}

/// Bernoulli outcome attached to each occurrence of a recurring event, such
/// as death caused by the event itself.
#[derive(Debug, Clone)]
pub struct BernoulliSource {
    p: f64,
    draws: RecurringDraws,
}

impl BernoulliSource {
    pub fn new(name: &str, p: f64, ctx: &mut RunContext) -> Result<Self> {
        let p = check_probability(name, p)?;
        Ok(BernoulliSource { p, draws: ctx.recurring() })
    }

    pub fn occurs(&mut self, patient: &dyn PatientView) -> bool {
        self.draws.next(patient.id()) < self.p
    }

    pub fn cancel_last(&mut self, patient: &dyn PatientView) {
        self.draws.cancel_last(patient.id());
    }

    pub fn rewind(&mut self) {
        self.draws.rewind();
    }

    pub fn reset(&mut self, seed: u64) {
        self.draws.reset(seed);
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::patient::PatientSnapshot;
    use crate::types::{PatientId, TimeUnit};

    fn clock() -> Clock {
        Clock::new(TimeUnit::Day, 1)
    }

    fn patient() -> PatientSnapshot {
        PatientSnapshot::new(PatientId(0), 40.0, Sex::Male).with_hba1c(8.0).with_duration(12.0)
    }

    fn fixed(u: f64, base: BaseRisk, rr: RelativeRisk) -> TimeToEventSource {
        TimeToEventSource::with_draws(base, rr, UniqueDraws::from_values(1, vec![u]), clock())
    }

    #[test]
    fn two_stage_scenario_beyond_death_is_never() {
        let years = years_to_event(0.5, 0.02, 1.0).unwrap();
        assert!((years - 34.31).abs() < 0.01, "got {years}");

        let death = SimTime(20 * 365);
        let p = patient().with_death(death);
        let source = fixed(0.5, BaseRisk::Annual(0.02), RelativeRisk::None);
        assert_eq!(source.time_to_event(&p, death), SimTime::NEVER);
    }

    #[test]
    fn event_inside_horizon_is_offset_from_now() {
        let mut p = patient();
        p.now = SimTime(100);
        let source = fixed(0.5, BaseRisk::Annual(0.2), RelativeRisk::None);
        let years = years_to_event(0.5, 0.2, 1.0).unwrap();
        let expected = SimTime(100 + (years * 365.0).floor() as u64);
        assert_eq!(source.time_to_event(&p, SimTime::NEVER), expected);
    }

    #[test]
    fn time_equal_to_horizon_is_never() {
        let p = patient();
        let source = fixed(0.5, BaseRisk::Annual(0.2), RelativeRisk::None);
        let t = source.time_to_event(&p, SimTime::NEVER);
        assert_eq!(source.time_to_event(&p, t), SimTime::NEVER);
        assert_eq!(source.time_to_event(&p, t.offset(1)), t);
    }

    #[test]
    fn zero_or_negative_hazard_is_never() {
        let p = patient();
        assert_eq!(
            fixed(0.5, BaseRisk::Annual(0.0), RelativeRisk::None).time_to_event(&p, SimTime::NEVER),
            SimTime::NEVER
        );
        let negative = RelativeRisk::HbA1cLinear { intercept: -2.0, slope: 0.1 };
        assert_eq!(
            fixed(0.5, BaseRisk::Annual(0.3), negative).time_to_event(&p, SimTime::NEVER),
            SimTime::NEVER
        );
        assert_eq!(years_to_event(0.0, 0.3, 1.0), None);
    }

    #[test]
    fn certain_event_waits_min_step() {
        let p = patient();
        let source = fixed(0.5, BaseRisk::Annual(1.0), RelativeRisk::None);
        assert_eq!(source.time_to_event(&p, SimTime::NEVER), SimTime(1));
    }

    #[test]
    fn duration_bands_select_first_breakpoint_at_or_above() {
        let base = BaseRisk::DurationBanded {
            bands: vec![
                Band::new(10.0, 0.01),
                Band::new(20.0, 0.05),
                Band::new(f64::INFINITY, 0.1),
            ],
            draw_per_band: false,
        };
        assert_eq!(base.probability(&patient()), 0.05);
        assert_eq!(base.probability(&patient().with_duration(10.0)), 0.01);
        assert_eq!(base.probability(&patient().with_duration(35.0)), 0.1);
    }

    #[test]
    fn per_band_draws_use_band_slot() {
        let base = BaseRisk::AgeBanded {
            bands: vec![Band::new(30.0, 0.1), Band::new(f64::INFINITY, 0.1)],
            draw_per_band: true,
        };
        assert_eq!(base.slots(), 2);
        let draws = UniqueDraws::from_values(2, vec![0.9, 0.1]);
        let source = TimeToEventSource::with_draws(base, RelativeRisk::None, draws, clock());
        let young = PatientSnapshot::new(PatientId(0), 20.0, Sex::Female);
        let old = PatientSnapshot::new(PatientId(0), 50.0, Sex::Female);
        // Smaller draw → longer wait.
        let t_old = source.time_to_event(&old, SimTime::NEVER);
        assert!(t_old > source.time_to_event(&young, SimTime::NEVER));
    }

    #[test]
    fn equation_sources_cache_draws_and_clamp_to_horizon() {
        let c = Covariates { intercept: -3.0, hba1c: 0.1, age: 0.01, ..Default::default() };
        for base in [BaseRisk::LogLinear(c), BaseRisk::Logistic(c)] {
            let build = |base: BaseRisk| {
                let mut ctx = RunContext::new(11, 0, 4, clock());
                TimeToEventSource::new("P_EQ", base, RelativeRisk::None, &mut ctx).unwrap()
            };
            let source = build(base.clone());
            let twin = build(base);

            let p = patient();
            let t = source.time_to_event(&p, SimTime::NEVER);
            assert!(!t.is_never());
            assert_eq!(source.time_to_event(&p, SimTime::NEVER), t);
            assert_eq!(twin.time_to_event(&p, SimTime::NEVER), t);

            assert_eq!(source.time_to_event(&p, t), SimTime::NEVER);
            assert_eq!(source.time_to_event(&p, t.offset(1)), t);
        }
    }

    #[test]
    fn covariate_equations_are_probabilities() {
        let c = Covariates { intercept: -6.0, hba1c: 0.2, ..Default::default() };
        let p = patient();
        let ll = BaseRisk::LogLinear(c).probability(&p);
        let lg = BaseRisk::Logistic(c).probability(&p);
        assert!(ll > 0.0 && ll < 1.0);
        assert!(lg > 0.0 && lg < 1.0);
        let worse = BaseRisk::LogLinear(c).probability(&p.clone().with_hba1c(10.0));
        assert!(worse > ll);
    }

    #[test]
    fn unique_source_is_idempotent() {
        let mut ctx = RunContext::new(3, 0, 5, clock());
        let base = BaseRisk::Annual(0.1);
        let source = TimeToEventSource::new("t", base, RelativeRisk::None, &mut ctx).unwrap();
        let p = patient();
        let a = source.time_to_event(&p, SimTime::NEVER);
        let b = source.time_to_event(&p, SimTime::NEVER);
        assert_eq!(a, b);
    }

    #[test]
    fn construction_rejects_bad_probability() {
        let mut ctx = RunContext::new(3, 0, 5, clock());
        let err =
            TimeToEventSource::new("P_X", BaseRisk::Annual(1.5), RelativeRisk::None, &mut ctx);
        assert!(matches!(err, Err(ConfigError::InvalidProbability { .. })));
    }

    #[test]
    fn recurring_source_consumes_and_replays() {
        let mut ctx = RunContext::new(8, 0, 2, clock());
        let mut source =
            RecurringEventSource::new("s", BaseRisk::Annual(0.3), RelativeRisk::None, &mut ctx)
                .unwrap();
        let p = patient();
        let first = source.next_time(&p, SimTime::NEVER);
        let second = source.next_time(&p, SimTime::NEVER);
        assert_ne!(first, second);
        source.cancel_last(&p);
        assert_eq!(source.next_time(&p, SimTime::NEVER), second);
        source.rewind();
        assert_eq!(source.next_time(&p, SimTime::NEVER), first);
    }

    #[test]
    fn bernoulli_extremes() {
        let mut ctx = RunContext::new(8, 0, 1, clock());
        let mut never = BernoulliSource::new("d", 0.0, &mut ctx).unwrap();
        let mut always = BernoulliSource::new("d", 1.0, &mut ctx).unwrap();
        let p = patient();
        for _ in 0..20 {
            assert!(!never.occurs(&p));
            assert!(always.occurs(&p));
        }
        assert!(BernoulliSource::new("d", -0.1, &mut ctx).is_err());
    }

    proptest! {
        #[test]
        fn time_is_non_increasing_in_rr(
            u in 0.0001f64..0.9999,
            p in 0.0001f64..0.5,
            rr in 0.05f64..20.0,
            factor in 1.0f64..10.0,
        ) {
            let low = years_to_event(u, p, rr).unwrap();
            let high = years_to_event(u, p, rr * factor).unwrap();
            prop_assert!(high <= low);

            let src_low = fixed(u, BaseRisk::Annual(p), RelativeRisk::Arm { by_arm: vec![rr] });
            let src_high =
                fixed(u, BaseRisk::Annual(p), RelativeRisk::Arm { by_arm: vec![rr * factor] });
            let pat = patient();
            let t_high = src_high.time_to_event(&pat, SimTime::NEVER);
            prop_assert!(t_high <= src_low.time_to_event(&pat, SimTime::NEVER));
        }

        #[test]
        fn result_is_before_horizon_or_never(
            u in 0.0f64..1.0,
            p in 0.0f64..1.0,
            rr in 0.01f64..10.0,
            now in 0u64..10_000,
            horizon in 0u64..100_000,
        ) {
            let mut pat = patient();
            pat.now = SimTime(now);
            let source = fixed(u, BaseRisk::Annual(p), RelativeRisk::Arm { by_arm: vec![rr] });
            let t = source.time_to_event(&pat, SimTime(horizon));
            prop_assert!(t.is_never() || t < SimTime(horizon));
            if !t.is_never() {
                prop_assert!(t > pat.now);
            }
        }
    }
}
