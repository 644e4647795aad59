use crate::error::{ConfigError, Result};

/// Categorical choice among a fixed set of outcomes, driven by a single
/// uniform draw against the cumulative distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteSelector {
    cumulative: Vec<f64>,
}

impl DiscreteSelector {
    /// Normalise `frequencies`. Negative, non-finite, empty or all-zero
    /// vectors are rejected.
    pub fn new(frequencies: &[f64]) -> Result<Self> {
        if frequencies.is_empty() {
            return Err(ConfigError::InvalidFrequencies("empty".into()));
        }
        if let Some(f) = frequencies.iter().find(|f| !f.is_finite() || **f < 0.0) {
            return Err(ConfigError::InvalidFrequencies(format!("invalid frequency {f}")));
        }
        let total: f64 = frequencies.iter().sum();
        if total <= 0.0 {
            return Err(ConfigError::InvalidFrequencies("all frequencies are zero".into()));
        }
        let mut acc = 0.0;
        let cumulative = frequencies
            .iter()
            .map(|f| {
                acc += f / total;
                acc
            })
            .collect();
        Ok(DiscreteSelector { cumulative })
    }

    pub fn len(&self) -> usize {
        self.cumulative.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cumulative.is_empty()
    }

    /// Index of the outcome selected by `u` in [0, 1).
    pub fn select(&self, u: f64) -> usize {
        // Zero-frequency outcomes share their cumulative value with the
        // previous entry and are never selected.
        self.cumulative
            .iter()
            .position(|&c| u < c)
            .unwrap_or_else(|| self.last_positive())
    }

    /// Rounding can leave the last cumulative value a hair under 1.0.
    fn last_positive(&self) -> usize {
        let mut idx = self.cumulative.len() - 1;
        while idx > 0 && self.cumulative[idx] == self.cumulative[idx - 1] {
            idx -= 1;
        }
        idx
    }
}
