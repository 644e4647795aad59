use std::cmp::Ordering;

use serde::Serialize;

use crate::stage::{Complication, Stage};
use crate::types::{PatientId, SimTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Event {
    /// Fires once per patient at time zero. Draws initial stages, death and the
    /// first round of onsets.
    Start,
    /// A chronic stage begins. Only fires if the patient still has it scheduled
    /// at this exact time.
    StageOnset { stage: Stage, fatal: bool },
    AcuteEpisode { complication: Complication, fatal: bool },
    /// Once per simulated year: costs and QALYs accrue, risks are re-evaluated.
    YearlyUpdate,
    Death,
}

/// Queue entry and log record. Ordering is by `time` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SimEvent {
    pub time: SimTime,
    pub patient: PatientId,
    pub event: Event,
}

impl Ord for SimEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time.cmp(&other.time)
    }
}

impl PartialOrd for SimEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
