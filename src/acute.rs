use std::collections::BTreeSet;

use crate::draws::RunContext;
use crate::economics::DisutilityCombination;
use crate::error::{ConfigError, Result};
use crate::patient::PatientView;
use crate::progression::{AcuteOutcome, ComplicationModel};
use crate::stage::{Complication, Stage};
use crate::time_to_event::{BernoulliSource, RecurringEventSource};
use crate::types::PatientId;

#[derive(Debug, Clone)]
struct Episodes {
    time: RecurringEventSource,
    death: BernoulliSource,
    cost: f64,
    disutility: f64,
    /// Per patient: the last query drew an episode whose draws are still out.
    outstanding: Vec<bool>,
}

impl Episodes {
    fn set_outstanding(&mut self, patient: PatientId, value: bool) {
        let i = patient.0;
        if i >= self.outstanding.len() {
            if !value {
                return;
            }
            self.outstanding.resize(i + 1, false);
        }
        self.outstanding[i] = value;
    }

    fn take_outstanding(&mut self, patient: PatientId) -> bool {
        self.outstanding.get_mut(patient.0).is_some_and(std::mem::take)
    }

    fn clear_outstanding(&mut self) {
        self.outstanding.iter_mut().for_each(|o| *o = false);
    }
}

/// A recurring acute complication. Each query consumes one timing draw and,
/// when an episode happens before death, one fatality draw.
#[derive(Debug, Clone)]
pub struct AcuteSubmodel {
    complication: Complication,
    episodes: Option<Episodes>,
}

impl AcuteSubmodel {
    pub fn new(
        complication: Complication,
        time: RecurringEventSource,
        death: BernoulliSource,
        cost: f64,
        disutility: f64,
    ) -> Result<Self> {
        if !complication.is_acute() {
            return Err(ConfigError::InvalidSetting(format!(
                "{complication} is not an acute complication"
            )));
        }
        if !(cost.is_finite() && cost >= 0.0) {
            return Err(ConfigError::InvalidSetting(format!("{complication} event cost {cost}")));
        }
        if !(0.0..1.0).contains(&disutility) {
            return Err(ConfigError::InvalidSetting(format!(
                "{complication} event disutility {disutility}"
            )));
        }
        let episodes = Episodes { time, death, cost, disutility, outstanding: Vec::new() };
        Ok(AcuteSubmodel { complication, episodes: Some(episodes) })
    }

    pub fn disabled(complication: Complication) -> Self {
        AcuteSubmodel { complication, episodes: None }
    }

    /// Next episode strictly before the patient's death, or never.
    pub fn value(&mut self, patient: &dyn PatientView) -> AcuteOutcome {
        let Some(e) = &mut self.episodes else {
            return AcuteOutcome::NEVER;
        };
        let time = e.time.next_time(patient, patient.time_to_death());
        if time.is_never() {
            // Death comes first; keep the draw for the next query.
            e.time.cancel_last(patient);
            e.set_outstanding(patient.id(), false);
            return AcuteOutcome::NEVER;
        }
        e.set_outstanding(patient.id(), true);
        AcuteOutcome { time, fatal: e.death.occurs(patient) }
    }

    /// Hand back the draws of the last non-never outcome, for an episode that
    /// was pre-empted before it happened. A no-op after a never outcome or a
    /// second call.
    pub fn cancel_last(&mut self, patient: &dyn PatientView) {
        if let Some(e) = &mut self.episodes
            && e.take_outstanding(patient.id())
        {
            e.time.cancel_last(patient);
            e.death.cancel_last(patient);
        }
    }

    /// Replay every patient's draws from the start, for another intervention arm.
    pub fn rewind(&mut self) {
        if let Some(e) = &mut self.episodes {
            e.time.rewind();
            e.death.rewind();
            e.clear_outstanding();
        }
    }

    pub fn event_cost(&self) -> f64 {
        self.episodes.as_ref().map_or(0.0, |e| e.cost)
    }

    pub fn event_disutility(&self) -> f64 {
        self.episodes.as_ref().map_or(0.0, |e| e.disutility)
    }
}

impl ComplicationModel for AcuteSubmodel {
    fn complication(&self) -> Complication {
        self.complication
    }

    fn is_enabled(&self) -> bool {
        self.episodes.is_some()
    }

    fn initial_stage(&self, _patient: &dyn PatientView) -> BTreeSet<Stage> {
        BTreeSet::new()
    }

    // Acute costs are charged per episode through `event_cost`.
    fn annual_cost_within_period(
        &self,
        _patient: &dyn PatientView,
        _from_age: f64,
        _to_age: f64,
    ) -> f64 {
        0.0
    }

    fn cost_of_complication(&self, _patient: &dyn PatientView, _stage: Stage) -> f64 {
        0.0
    }

    fn disutility(&self, _patient: &dyn PatientView, _method: DisutilityCombination) -> f64 {
        0.0
    }

    fn reset(&mut self, ctx: &mut RunContext) {
        if let Some(e) = &mut self.episodes {
            e.time.reset(ctx.next_seed());
            e.death.reset(ctx.next_seed());
            e.clear_outstanding();
        }
    }
}
