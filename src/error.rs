//! Construction-time errors. Per-patient evaluation never fails: degenerate
//! numeric results collapse to [`SimTime::NEVER`](crate::types::SimTime::NEVER).

use crate::stage::Complication;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing parameter `{0}`")]
    MissingParameter(String),

    #[error("parameter `{name}` must be a probability in [0, 1], got {value}")]
    InvalidProbability { name: String, value: f64 },

    #[error("relative risk `{name}` must be positive and finite, got {value}")]
    InvalidRelativeRisk { name: String, value: f64 },

    #[error("invalid frequency vector: {0}")]
    InvalidFrequencies(String),

    #[error("invalid table `{name}`: {reason}")]
    InvalidTable { name: String, reason: String },

    #[error("invalid uncertainty distribution for `{name}`: {reason}")]
    InvalidDistribution { name: String, reason: String },

    #[error("unknown stage `{0}`")]
    UnknownStage(String),

    #[error("stage `{0}` is already registered")]
    DuplicateStage(String),

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error("failed to build {complication} submodel: {source}")]
    Submodel {
        complication: Complication,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    /// Attach the complication whose construction failed.
    pub fn in_submodel(self, complication: Complication) -> Self {
        ConfigError::Submodel { complication, source: Box::new(self) }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Reject anything that is not a probability.
pub fn check_probability(name: &str, value: f64) -> Result<f64> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::InvalidProbability { name: name.to_string(), value })
    }
}

/// Reject non-positive or non-finite multipliers.
pub fn check_relative_risk(name: &str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::InvalidRelativeRisk { name: name.to_string(), value })
    }
}
