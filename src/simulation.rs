use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::Serialize;

use crate::config::{Intervention, SimulationConfig};
use crate::error::{ConfigError, Result};
use crate::events::{Event, SimEvent};
use crate::factory::ModelSet;
use crate::patient::{PatientSnapshot, PatientView};
use crate::progression::{ComplicationModel, Progression};
use crate::stage::{Stage, StageRegistry};
use crate::types::{Clock, PatientId, Sex, SimTime};

/// Baseline characteristics of one cohort member. Every arm starts from the
/// same baselines.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Baseline {
    pub id: PatientId,
    pub age: f64,
    pub sex: Sex,
    pub hba1c: f64,
    pub duration_of_diabetes: f64,
    pub smoker: bool,
    pub atrial_fibrillation: bool,
}

fn normal(name: &str, mean: f64, sd: f64) -> Result<Normal<f64>> {
    Normal::new(mean, sd).map_err(|e| ConfigError::InvalidDistribution {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// Draw the cohort described by `config.cohort`.
pub fn generate_cohort<R: Rng + ?Sized>(
    config: &SimulationConfig,
    rng: &mut R,
) -> Result<Vec<Baseline>> {
    let c = &config.cohort;
    let age = normal("cohort age", c.age_mean, c.age_sd)?;
    let hba1c = normal("cohort hba1c", c.hba1c_mean, c.hba1c_sd)?;
    let duration = normal("cohort duration", c.duration_mean, c.duration_sd)?;

    let cohort = (0..config.patients)
        .map(|i| {
            let a = age.sample(rng).max(c.min_age).min(config.max_age);
            Baseline {
                id: PatientId(i),
                age: a,
                sex: if rng.random::<f64>() < c.male_fraction { Sex::Male } else { Sex::Female },
                hba1c: hba1c.sample(rng).max(4.0),
                duration_of_diabetes: duration.sample(rng).max(0.0).min(a),
                smoker: rng.random::<f64>() < c.smoker_fraction,
                atrial_fibrillation: rng.random::<f64>() < c.atrial_fibrillation_fraction,
            }
        })
        .collect();
    Ok(cohort)
}

/// Per-arm totals, reported as cohort means.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub arm: String,
    pub patients: usize,
    pub deaths: usize,
    pub mean_life_years: f64,
    pub mean_cost: f64,
    pub mean_qalys: f64,
    /// Onsets per stage code over the whole cohort.
    pub incidence: BTreeMap<String, usize>,
    pub acute_episodes: usize,
}

#[derive(Debug, Default)]
struct Totals {
    patients: usize,
    deaths: usize,
    life_years: f64,
    cost: f64,
    qalys: f64,
    incidence: BTreeMap<Stage, usize>,
    acute_episodes: usize,
}

#[derive(Debug)]
struct Patient {
    state: PatientSnapshot,
    life_years: f64,
    cost: f64,
    qalys: f64,
    alive: bool,
    /// Pending episode of each acute submodel, `NEVER` if none.
    acute_pending: Vec<SimTime>,
}

impl Patient {
    fn new(baseline: &Baseline, intervention: &Intervention, arm: usize, n_acute: usize) -> Self {
        let mut state = PatientSnapshot::new(baseline.id, baseline.age, baseline.sex)
            .with_hba1c(baseline.hba1c + intervention.hba1c_change)
            .with_duration(baseline.duration_of_diabetes)
            .with_smoker(baseline.smoker)
            .with_arm(arm);
        state.atrial_fibrillation = baseline.atrial_fibrillation;
        Patient {
            state,
            life_years: 0.0,
            cost: 0.0,
            qalys: 0.0,
            alive: true,
            acute_pending: vec![SimTime::NEVER; n_acute],
        }
    }
}

/// Patient-level discrete-event driver for one intervention arm. Patients are
/// simulated one after another, each with its own event queue.
pub struct Simulation<'a> {
    config: &'a SimulationConfig,
    registry: &'a StageRegistry,
    models: &'a mut ModelSet,
    arm: usize,
    intervention: &'a Intervention,
    clock: Clock,
    horizon: SimTime,
    queue: BinaryHeap<Reverse<SimEvent>>,
    /// Dispatched events, in dispatch order. Only kept when requested.
    log: Option<Vec<SimEvent>>,
    totals: Totals,
}

impl<'a> Simulation<'a> {
    pub fn new(
        config: &'a SimulationConfig,
        registry: &'a StageRegistry,
        models: &'a mut ModelSet,
        arm: usize,
    ) -> Result<Self> {
        let intervention = config
            .interventions
            .get(arm)
            .ok_or_else(|| ConfigError::InvalidSetting(format!("no intervention arm {arm}")))?;
        let clock = config.clock();
        let horizon = clock
            .ticks(config.years)
            .map(SimTime)
            .ok_or_else(|| {
                ConfigError::InvalidSetting(format!("horizon of {} years", config.years))
            })?;
        Ok(Simulation {
            config,
            registry,
            models,
            arm,
            intervention,
            clock,
            horizon,
            queue: BinaryHeap::new(),
            log: None,
            totals: Totals::default(),
        })
    }

    /// Keep every dispatched event.
    pub fn with_log(mut self) -> Self {
        self.log = Some(Vec::new());
        self
    }

    pub fn take_log(&mut self) -> Vec<SimEvent> {
        self.log.as_mut().map(std::mem::take).unwrap_or_default()
    }

    pub fn run(&mut self, cohort: &[Baseline]) -> RunSummary {
        for baseline in cohort {
            self.run_patient(baseline);
        }
        self.summary()
    }

    fn schedule(&mut self, time: SimTime, patient: PatientId, event: Event) {
        self.queue.push(Reverse(SimEvent { time, patient, event }));
    }

    fn run_patient(&mut self, baseline: &Baseline) {
        let n_acute = self.models.acute().len();
        let mut patient = Patient::new(baseline, self.intervention, self.arm, n_acute);
        self.queue.clear();
        self.schedule(SimTime::ZERO, baseline.id, Event::Start);

        while let Some(Reverse(ev)) = self.queue.pop() {
            if ev.time >= self.horizon || !patient.alive {
                break;
            }
            if self.dispatch(&mut patient, ev)
                && let Some(log) = &mut self.log
            {
                log.push(ev);
            }
        }
        if patient.alive {
            self.accrue(&mut patient, self.horizon);
        }

        let t = &mut self.totals;
        t.patients += 1;
        t.deaths += usize::from(!patient.alive);
        t.life_years += patient.life_years;
        t.cost += patient.cost;
        t.qalys += patient.qalys;
    }

    /// Returns false for events that no longer apply.
    fn dispatch(&mut self, patient: &mut Patient, ev: SimEvent) -> bool {
        if ev.event != Event::Death && ev.time >= patient.state.death {
            return false;
        }
        match ev.event {
            Event::Start => self.handle_start(patient),

            Event::StageOnset { stage, fatal } => {
                let stale = patient.state.time_to_chronic_stage(stage) != ev.time;
                if stale || patient.state.has_stage(stage) {
                    return false;
                }
                self.handle_onset(patient, ev.time, stage, fatal);
            }

            Event::AcuteEpisode { complication, fatal } => {
                let acute = self.models.acute();
                let Some(idx) = acute.iter().position(|m| m.complication() == complication) else {
                    return false;
                };
                if patient.acute_pending[idx] != ev.time {
                    return false;
                }
                self.handle_acute(patient, ev.time, idx, fatal);
            }

            Event::YearlyUpdate => {
                self.accrue(patient, ev.time);
                self.reevaluate(patient);
                let next = ev.time.offset(self.clock.year());
                self.schedule(next, patient.state.id, Event::YearlyUpdate);
            }

            Event::Death => {
                if ev.time != patient.state.death {
                    return false;
                }
                self.accrue(patient, ev.time);
                patient.alive = false;
            }
        }
        true
    }

    fn handle_start(&mut self, patient: &mut Patient) {
        let id = patient.state.id;
        patient.state.state = self.models.initial_stage(&patient.state);
        patient.state.death = self.models.death().time_to_death(&patient.state);
        self.schedule(patient.state.death, id, Event::Death);
        self.reevaluate(patient);
        for idx in 0..patient.acute_pending.len() {
            self.schedule_acute(patient, idx);
        }
        self.schedule(SimTime::ZERO.offset(self.clock.year()), id, Event::YearlyUpdate);
    }

    fn handle_onset(&mut self, patient: &mut Patient, time: SimTime, stage: Stage, fatal: bool) {
        self.accrue(patient, time);
        for old in self.models.superseded_by(stage) {
            patient.state.state.remove(&old);
            patient.state.scheduled.remove(&old);
        }
        patient.state.scheduled.remove(&stage);
        patient.state.state.insert(stage);
        patient.cost += self.models.cost_of_complication(&patient.state, stage);
        *self.totals.incidence.entry(stage).or_default() += 1;

        if fatal {
            self.kill(patient, time);
            return;
        }
        self.update_death(patient);
        self.reevaluate(patient);
    }

    fn handle_acute(&mut self, patient: &mut Patient, time: SimTime, idx: usize, fatal: bool) {
        self.accrue(patient, time);
        let model = &self.models.acute()[idx];
        patient.cost += model.event_cost();
        patient.qalys -= model.event_disutility();
        patient.acute_pending[idx] = SimTime::NEVER;
        self.totals.acute_episodes += 1;

        if fatal {
            self.kill(patient, time);
        } else {
            self.schedule_acute(patient, idx);
        }
    }

    fn kill(&mut self, patient: &mut Patient, time: SimTime) {
        patient.state.death = time;
        self.schedule(time, patient.state.id, Event::Death);
    }

    /// New stages may raise mortality. Death only ever moves earlier, and
    /// acute episodes it now pre-empts hand their draws back.
    fn update_death(&mut self, patient: &mut Patient) {
        let death = self.models.death().time_to_death(&patient.state);
        if death >= patient.state.death {
            return;
        }
        patient.state.death = death;
        self.schedule(death, patient.state.id, Event::Death);
        for idx in 0..patient.acute_pending.len() {
            let pending = patient.acute_pending[idx];
            if !pending.is_never() && pending >= death {
                self.models.acute_mut()[idx].cancel_last(&patient.state);
                self.schedule_acute(patient, idx);
            }
        }
    }

    fn schedule_acute(&mut self, patient: &mut Patient, idx: usize) {
        let model = &mut self.models.acute_mut()[idx];
        let complication = model.complication();
        let outcome = model.value(&patient.state);
        patient.acute_pending[idx] = outcome.time;
        if !outcome.is_never() {
            let event = Event::AcuteEpisode { complication, fatal: outcome.fatal };
            self.schedule(outcome.time, patient.state.id, event);
        }
    }

    fn reevaluate(&mut self, patient: &mut Patient) {
        let progression = self.models.progression(&patient.state);
        self.apply(patient, &progression);
    }

    /// Cancellations first, then new onsets.
    fn apply(&mut self, patient: &mut Patient, progression: &Progression) {
        for stage in progression.cancel_events() {
            patient.state.scheduled.remove(stage);
        }
        for (&stage, ev) in progression.new_events() {
            patient.state.scheduled.insert(stage, ev.time);
            self.schedule(ev.time, patient.state.id, Event::StageOnset { stage, fatal: ev.fatal });
        }
    }

    /// Advance the patient to `until`, charging annual costs and QALYs for the
    /// stages held over the interval.
    fn accrue(&mut self, patient: &mut Patient, until: SimTime) {
        let ticks = until.since(patient.state.now);
        if ticks == 0 {
            return;
        }
        let years = self.clock.years(ticks);
        let from_age = patient.state.age;
        let to_age = from_age + years;
        let disutility = self.models.disutility(&patient.state, self.config.disutility_combination);

        patient.cost += self.models.annual_cost_within_period(&patient.state, from_age, to_age);
        patient.cost += self.intervention.annual_cost * years;
        patient.qalys += (self.config.base_utility - disutility).max(0.0) * years;
        patient.life_years += years;

        patient.state.age = to_age;
        patient.state.duration_of_diabetes += years;
        patient.state.now = until;
    }

    fn summary(&self) -> RunSummary {
        let t = &self.totals;
        let n = t.patients.max(1) as f64;
        RunSummary {
            arm: self.intervention.name.clone(),
            patients: t.patients,
            deaths: t.deaths,
            mean_life_years: t.life_years / n,
            mean_cost: t.cost / n,
            mean_qalys: t.qalys / n,
            incidence: t
                .incidence
                .iter()
                .map(|(s, n)| (self.registry.code(*s).to_string(), *n))
                .collect(),
            acute_episodes: t.acute_episodes,
        }
    }
}
