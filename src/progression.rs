use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::draws::RunContext;
use crate::economics::DisutilityCombination;
use crate::patient::PatientView;
use crate::stage::{Complication, Stage};
use crate::types::SimTime;

/// Capabilities shared by chronic and acute submodels. A disabled submodel
/// still implements all of them, returning nothing, zero cost and zero
/// disutility.
pub trait ComplicationModel {
    fn complication(&self) -> Complication;
    fn is_enabled(&self) -> bool;
    /// Stages the patient already has when the simulation starts.
    fn initial_stage(&self, patient: &dyn PatientView) -> BTreeSet<Stage>;
    fn annual_cost_within_period(
        &self,
        patient: &dyn PatientView,
        from_age: f64,
        to_age: f64,
    ) -> f64;
    /// One-off cost charged when `stage` starts.
    fn cost_of_complication(&self, patient: &dyn PatientView, stage: Stage) -> f64;
    fn disutility(&self, patient: &dyn PatientView, method: DisutilityCombination) -> f64;
    /// Fresh draws for a new Monte-Carlo iteration. Parameters stay bound.
    fn reset(&mut self, ctx: &mut RunContext);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NewEvent {
    pub time: SimTime,
    /// The onset itself kills the patient.
    pub fatal: bool,
}

/// Outcome of one chronic submodel evaluation: onsets to schedule and
/// previously scheduled onsets to drop. Built fresh on every evaluation and
/// handed to the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Progression {
    new_events: BTreeMap<Stage, NewEvent>,
    cancel_events: BTreeSet<Stage>,
}

impl Progression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_new_event(&mut self, stage: Stage, time: SimTime, fatal: bool) {
        self.new_events.insert(stage, NewEvent { time, fatal });
    }

    pub fn add_cancel_event(&mut self, stage: Stage) {
        self.cancel_events.insert(stage);
    }

    pub fn new_events(&self) -> &BTreeMap<Stage, NewEvent> {
        &self.new_events
    }

    pub fn cancel_events(&self) -> &BTreeSet<Stage> {
        &self.cancel_events
    }

    pub fn is_empty(&self) -> bool {
        self.new_events.is_empty() && self.cancel_events.is_empty()
    }

    /// Fold another complication's result into this one.
    pub fn merge(&mut self, other: Progression) {
        self.new_events.extend(other.new_events);
        self.cancel_events.extend(other.cancel_events);
    }
}

/// Next occurrence of an acute event. `time` is `SimTime::NEVER` when no event
/// happens before death.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AcuteOutcome {
    pub time: SimTime,
    pub fatal: bool,
}

impl AcuteOutcome {
    pub const NEVER: AcuteOutcome = AcuteOutcome { time: SimTime::NEVER, fatal: false };

    pub fn is_never(&self) -> bool {
        self.time.is_never()
    }
}
