use std::collections::{BTreeMap, BTreeSet};

use crate::stage::Stage;
use crate::types::{PatientId, Sex, SimTime};

/// Read-only view of a simulated patient, as seen by the submodels.
/// Submodels never mutate the patient; they return values for the scheduler
/// to apply.
pub trait PatientView {
    fn id(&self) -> PatientId;
    /// Current age in years.
    fn age(&self) -> f64;
    fn sex(&self) -> Sex;
    /// Years since diagnosis.
    fn duration_of_diabetes(&self) -> f64;
    /// Current HbA1c, in percentage points.
    fn hba1c(&self) -> f64;
    fn is_smoker(&self) -> bool;
    fn has_atrial_fibrillation(&self) -> bool;
    /// 0 for the reference arm, 1.. for alternative interventions.
    fn intervention_arm(&self) -> usize;
    /// Stages currently active, across all complications.
    fn detailed_state(&self) -> &BTreeSet<Stage>;
    /// Previously scheduled (not yet fired) onset time, or `SimTime::NEVER`.
    fn time_to_chronic_stage(&self, stage: Stage) -> SimTime;
    /// Absolute time of death.
    fn time_to_death(&self) -> SimTime;
    /// Current simulation time.
    fn now(&self) -> SimTime;

    fn has_stage(&self, stage: Stage) -> bool {
        self.detailed_state().contains(&stage)
    }
}

/// Plain-value patient state. The reference scheduler owns one per simulated
/// patient; tests build them directly.
#[derive(Debug, Clone)]
pub struct PatientSnapshot {
    pub id: PatientId,
    pub age: f64,
    pub sex: Sex,
    pub duration_of_diabetes: f64,
    pub hba1c: f64,
    pub smoker: bool,
    pub atrial_fibrillation: bool,
    pub arm: usize,
    pub state: BTreeSet<Stage>,
    pub scheduled: BTreeMap<Stage, SimTime>,
    pub death: SimTime,
    pub now: SimTime,
}

impl PatientSnapshot {
    pub fn new(id: PatientId, age: f64, sex: Sex) -> Self {
        PatientSnapshot {
            id,
            age,
            sex,
            duration_of_diabetes: 0.0,
            hba1c: 7.0,
            smoker: false,
            atrial_fibrillation: false,
            arm: 0,
            state: BTreeSet::new(),
            scheduled: BTreeMap::new(),
            death: SimTime::NEVER,
            now: SimTime::ZERO,
        }
    }

    pub fn with_hba1c(mut self, hba1c: f64) -> Self {
        self.hba1c = hba1c;
        self
    }

    pub fn with_duration(mut self, years: f64) -> Self {
        self.duration_of_diabetes = years;
        self
    }

    pub fn with_arm(mut self, arm: usize) -> Self {
        self.arm = arm;
        self
    }

    pub fn with_smoker(mut self, smoker: bool) -> Self {
        self.smoker = smoker;
        self
    }

    pub fn with_death(mut self, death: SimTime) -> Self {
        self.death = death;
        self
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.state.insert(stage);
        self
    }

    pub fn with_scheduled(mut self, stage: Stage, time: SimTime) -> Self {
        self.scheduled.insert(stage, time);
        self
    }
}

impl PatientView for PatientSnapshot {
    fn id(&self) -> PatientId {
        self.id
    }

    fn age(&self) -> f64 {
        self.age
    }

    fn sex(&self) -> Sex {
        self.sex
    }

    fn duration_of_diabetes(&self) -> f64 {
        self.duration_of_diabetes
    }

    fn hba1c(&self) -> f64 {
        self.hba1c
    }

    fn is_smoker(&self) -> bool {
        self.smoker
    }

    fn has_atrial_fibrillation(&self) -> bool {
        self.atrial_fibrillation
    }

    fn intervention_arm(&self) -> usize {
        self.arm
    }

    fn detailed_state(&self) -> &BTreeSet<Stage> {
        &self.state
    }

    fn time_to_chronic_stage(&self, stage: Stage) -> SimTime {
        self.scheduled.get(&stage).copied().unwrap_or(SimTime::NEVER)
    }

    fn time_to_death(&self) -> SimTime {
        self.death
    }

    fn now(&self) -> SimTime {
        self.now
    }
}
