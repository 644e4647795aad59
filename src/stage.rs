use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Complication {
    Retinopathy,
    Nephropathy,
    Neuropathy,
    CoronaryHeartDisease,
    SevereHypoglycemia,
}

impl Complication {
    pub const ALL: [Complication; 5] = [
        Complication::Retinopathy,
        Complication::Nephropathy,
        Complication::Neuropathy,
        Complication::CoronaryHeartDisease,
        Complication::SevereHypoglycemia,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Complication::Retinopathy => "RET",
            Complication::Nephropathy => "NPH",
            Complication::Neuropathy => "NEU",
            Complication::CoronaryHeartDisease => "CHD",
            Complication::SevereHypoglycemia => "SHE",
        }
    }

    /// Acute complications recur as discrete episodes instead of progressing
    /// through stages.
    pub fn is_acute(self) -> bool {
        matches!(self, Complication::SevereHypoglycemia)
    }
}

impl fmt::Display for Complication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Interned handle to a registered disease stage. Cheap to copy and compared
/// by identity; the code and label live in the [`StageRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stage {
    id: u16,
    complication: Complication,
}

impl Stage {
    pub fn complication(self) -> Complication {
        self.complication
    }

    pub fn index(self) -> usize {
        self.id as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageInfo {
    pub stage: Stage,
    pub code: String,
    pub label: String,
}

const STANDARD_STAGES: &[(&str, &str, Complication)] = &[
    ("BGRET", "Background retinopathy", Complication::Retinopathy),
    ("PRET", "Proliferative retinopathy", Complication::Retinopathy),
    ("ME", "Macular edema", Complication::Retinopathy),
    ("BLI", "Blindness", Complication::Retinopathy),
    ("ALB1", "Microalbuminuria", Complication::Nephropathy),
    ("ALB2", "Macroalbuminuria", Complication::Nephropathy),
    ("ESRD", "End-stage renal disease", Complication::Nephropathy),
    ("NEU", "Peripheral neuropathy", Complication::Neuropathy),
    ("LEA", "Lower extremity amputation", Complication::Neuropathy),
    ("ANGINA", "Angina", Complication::CoronaryHeartDisease),
    ("MI", "Myocardial infarction", Complication::CoronaryHeartDisease),
    ("STROKE", "Stroke", Complication::CoronaryHeartDisease),
    ("HF", "Heart failure", Complication::CoronaryHeartDisease),
];

/// Catalogue of every stage known to a run. Built once at start-up and
/// read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct StageRegistry {
    stages: Vec<StageInfo>,
    by_code: HashMap<String, Stage>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retinopathy, nephropathy, neuropathy and coronary heart disease stages.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for &(code, label, complication) in STANDARD_STAGES {
            registry.push(code, label, complication);
        }
        registry
    }

    pub fn register(
        &mut self,
        code: &str,
        label: &str,
        complication: Complication,
    ) -> Result<Stage> {
        if self.by_code.contains_key(code) {
            return Err(ConfigError::DuplicateStage(code.to_string()));
        }
        if self.stages.len() > usize::from(u16::MAX) {
            return Err(ConfigError::InvalidSetting("too many stages".to_string()));
        }
        Ok(self.push(code, label, complication))
    }

    /// Caller guarantees `code` is new and the id fits.
    fn push(&mut self, code: &str, label: &str, complication: Complication) -> Stage {
        let stage = Stage { id: self.stages.len() as u16, complication };
        self.stages.push(StageInfo { stage, code: code.to_string(), label: label.to_string() });
        self.by_code.insert(code.to_string(), stage);
        stage
    }

    pub fn stage(&self, code: &str) -> Result<Stage> {
        self.by_code
            .get(code)
            .copied()
            .ok_or_else(|| ConfigError::UnknownStage(code.to_string()))
    }

    pub fn info(&self, stage: Stage) -> &StageInfo {
        &self.stages[stage.index()]
    }

    pub fn code(&self, stage: Stage) -> &str {
        &self.info(stage).code
    }

    pub fn stages_of(&self, complication: Complication) -> Vec<Stage> {
        self.stages
            .iter()
            .map(|s| s.stage)
            .filter(|s| s.complication == complication)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageInfo> {
        self.stages.iter()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn standard_registry_groups_by_complication() {
        let registry = StageRegistry::standard();
        let ret: Vec<&str> = registry
            .stages_of(Complication::Retinopathy)
            .into_iter()
            .map(|s| registry.code(s))
            .collect();
        assert_eq!(ret, vec!["BGRET", "PRET", "ME", "BLI"]);
        assert!(registry.stages_of(Complication::SevereHypoglycemia).is_empty());
    }

    #[test]
    fn standard_registry_holds_every_catalogue_code() {
        let registry = StageRegistry::standard();
        assert_eq!(registry.len(), 13);
        let codes: HashSet<&str> = STANDARD_STAGES.iter().map(|&(code, _, _)| code).collect();
        assert_eq!(codes.len(), STANDARD_STAGES.len());
        for (i, info) in registry.iter().enumerate() {
            assert_eq!(info.stage.index(), i);
            assert_eq!(registry.stage(&info.code).unwrap(), info.stage);
        }
    }

    #[test]
    fn register_after_standard_continues_numbering() {
        let mut registry = StageRegistry::standard();
        let extra = registry.register("CATARACT", "Cataract", Complication::Retinopathy).unwrap();
        assert_eq!(extra.index(), 13);
        assert_eq!(registry.code(extra), "CATARACT");
    }

    #[test]
    fn lookup_by_code_returns_same_handle() {
        let registry = StageRegistry::standard();
        let a = registry.stage("ESRD").unwrap();
        let b = registry.stage("ESRD").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.complication(), Complication::Nephropathy);
        assert_eq!(registry.info(a).label, "End-stage renal disease");
    }

    #[test]
    fn duplicate_and_unknown_codes_are_rejected() {
        let mut registry = StageRegistry::standard();
        assert!(matches!(
            registry.register("BLI", "again", Complication::Retinopathy),
            Err(ConfigError::DuplicateStage(_))
        ));
        assert!(matches!(registry.stage("XYZ"), Err(ConfigError::UnknownStage(_))));
    }
}
