//! Relative-risk calculators: pure functions from patient state to a hazard
//! multiplier.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result, check_relative_risk};
use crate::patient::PatientView;

/// One entry of a piecewise-constant table. The first band whose `upper`
/// bound is at or above the looked-up value applies; values past the last
/// bound use the last band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub upper: f64,
    pub value: f64,
}

impl Band {
    pub fn new(upper: f64, value: f64) -> Self {
        Band { upper, value }
    }
}

/// Index of the band covering `x`. `bands` must be non-empty.
pub fn band_index(bands: &[Band], x: f64) -> usize {
    bands
        .iter()
        .position(|b| x <= b.upper)
        .unwrap_or(bands.len().saturating_sub(1))
}

/// Check breakpoints are non-empty and strictly increasing.
pub fn check_bands(name: &str, bands: &[Band]) -> Result<()> {
    if bands.is_empty() {
        return Err(ConfigError::InvalidTable { name: name.to_string(), reason: "no bands".into() });
    }
    if bands.windows(2).any(|w| w[0].upper >= w[1].upper || w[0].upper.is_nan()) {
        return Err(ConfigError::InvalidTable {
            name: name.to_string(),
            reason: "breakpoints must be strictly increasing".into(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Combination {
    Product,
    Sum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatientFlag {
    Smoker,
    AtrialFibrillation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RelativeRisk {
    /// Always 1.0.
    None,
    /// `rr ^ ((reference - hba1c) / 10)`: effect reported per 10% HbA1c reduction.
    HbA1cPer10Reduction { rr: f64, reference: f64 },
    /// `rr ^ (hba1c - reference)`: effect reported per percentage point.
    HbA1cPerPoint { rr: f64, reference: f64 },
    /// `intercept + slope * hba1c`. Not floored: callers treat a non-positive
    /// result as "no event".
    HbA1cLinear { intercept: f64, slope: f64 },
    /// Piecewise constant by age.
    AgeBanded { bands: Vec<Band> },
    /// Multiplier indexed by intervention arm; arms past the end use 1.0.
    Arm { by_arm: Vec<f64> },
    /// `rr` when the flag is set on the patient, 1.0 otherwise.
    Flag { flag: PatientFlag, rr: f64 },
    Compound { mode: Combination, parts: Vec<RelativeRisk> },
}

impl RelativeRisk {
    pub fn product(parts: Vec<RelativeRisk>) -> Self {
        RelativeRisk::Compound { mode: Combination::Product, parts }
    }

    pub fn sum(parts: Vec<RelativeRisk>) -> Self {
        RelativeRisk::Compound { mode: Combination::Sum, parts }
    }

    pub fn rr(&self, patient: &dyn PatientView) -> f64 {
        match self {
            RelativeRisk::None => 1.0,
            RelativeRisk::HbA1cPer10Reduction { rr, reference } => {
                rr.powf((reference - patient.hba1c()) / 10.0)
            }
            RelativeRisk::HbA1cPerPoint { rr, reference } => rr.powf(patient.hba1c() - reference),
            RelativeRisk::HbA1cLinear { intercept, slope } => intercept + slope * patient.hba1c(),
            RelativeRisk::AgeBanded { bands } => {
                if bands.is_empty() {
                    1.0
                } else {
                    bands[band_index(bands, patient.age())].value
                }
            }
            RelativeRisk::Arm { by_arm } => {
                by_arm.get(patient.intervention_arm()).copied().unwrap_or(1.0)
            }
            RelativeRisk::Flag { flag, rr } => {
                let set = match flag {
                    PatientFlag::Smoker => patient.is_smoker(),
                    PatientFlag::AtrialFibrillation => patient.has_atrial_fibrillation(),
                };
                if set { *rr } else { 1.0 }
            }
            RelativeRisk::Compound { mode: Combination::Product, parts } => {
                parts.iter().map(|p| p.rr(patient)).product()
            }
            RelativeRisk::Compound { mode: Combination::Sum, parts } => {
                parts.iter().map(|p| p.rr(patient)).sum()
            }
        }
    }

    /// Reject multipliers that cannot produce a positive hazard. The linear
    /// variant is exempt: its sign depends on the patient.
    pub fn validate(&self, name: &str) -> Result<()> {
        match self {
            RelativeRisk::None | RelativeRisk::HbA1cLinear { .. } => Ok(()),
            RelativeRisk::HbA1cPer10Reduction { rr, .. }
            | RelativeRisk::HbA1cPerPoint { rr, .. }
            | RelativeRisk::Flag { rr, .. } => check_relative_risk(name, *rr).map(|_| ()),
            RelativeRisk::AgeBanded { bands } => {
                check_bands(name, bands)?;
                for b in bands {
                    check_relative_risk(name, b.value)?;
                }
                Ok(())
            }
            RelativeRisk::Arm { by_arm } => {
                for rr in by_arm {
                    check_relative_risk(name, *rr)?;
                }
                Ok(())
            }
            RelativeRisk::Compound { parts, .. } => {
                parts.iter().try_for_each(|p| p.validate(name))
            }
        }
    }
}
