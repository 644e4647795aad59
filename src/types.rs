use serde::{Deserialize, Serialize};

/// Index of a simulated patient within its cohort. Stable for the patient's
/// lifetime and used directly to address per-patient draw caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PatientId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    /// Position in per-sex parameter arrays (men first).
    pub fn index(self) -> usize {
        match self {
            Sex::Male => 0,
            Sex::Female => 1,
        }
    }
}

/// Absolute simulation time in ticks of the run's [`TimeUnit`].
/// Time jumps directly from one event to the next. `SimTime::NEVER` stands for
/// an event that does not happen within any feasible horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SimTime(pub u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);
    pub const NEVER: SimTime = SimTime(u64::MAX);

    pub fn is_never(self) -> bool {
        self == Self::NEVER
    }

    pub fn offset(self, ticks: u64) -> Self {
        SimTime(self.0.saturating_add(ticks))
    }

    /// Ticks from `earlier` to `self`, zero if `earlier` is later.
    pub fn since(self, earlier: SimTime) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeUnit {
    Year,
    Month,
    Week,
    Day,
    Hour,
}

impl TimeUnit {
    pub fn per_year(self) -> f64 {
        match self {
            TimeUnit::Year => 1.0,
            TimeUnit::Month => 12.0,
            TimeUnit::Week => 365.0 / 7.0,
            TimeUnit::Day => 365.0,
            TimeUnit::Hour => 365.0 * 24.0,
        }
    }
}

/// Year ↔ tick conversion for one run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Clock {
    pub unit: TimeUnit,
    /// Smallest non-zero delay between "now" and a sampled event, in ticks.
    pub min_step: u64,
}

impl Default for Clock {
    fn default() -> Self {
        Clock { unit: TimeUnit::Day, min_step: 1 }
    }
}

impl Clock {
    pub fn new(unit: TimeUnit, min_step: u64) -> Self {
        Clock { unit, min_step: min_step.max(1) }
    }

    /// Whole ticks in `years` (truncating). `None` when the value does not fit,
    /// is negative or is not a number.
    pub fn ticks(&self, years: f64) -> Option<u64> {
        let ticks = (years * self.unit.per_year()).floor();
        if ticks.is_finite() && ticks >= 0.0 && ticks < u64::MAX as f64 {
            Some(ticks as u64)
        } else {
            None
        }
    }

    /// Delay in ticks for an event `years` ahead, never below `min_step`.
    pub fn delay(&self, years: f64) -> Option<u64> {
        self.ticks(years).map(|t| t.max(self.min_step))
    }

    pub fn years(&self, ticks: u64) -> f64 {
        ticks as f64 / self.unit.per_year()
    }

    /// Ticks in one year, at least one.
    pub fn year(&self) -> u64 {
        (self.unit.per_year().floor() as u64).max(1)
    }
}
