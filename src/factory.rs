use std::collections::{BTreeMap, BTreeSet};

use crate::acute::AcuteSubmodel;
use crate::chronic::ChronicSubmodel;
use crate::complications;
use crate::config::SimulationConfig;
use crate::death::{DeathModelKind, DeathSource, Gompertz, LifeTable};
use crate::draws::RunContext;
use crate::economics::{DisutilityCombination, combine_disutilities};
use crate::error::Result;
use crate::params::RunParameters;
use crate::patient::PatientView;
use crate::progression::{ComplicationModel, Progression};
use crate::stage::{Complication, Stage, StageRegistry};

/// Every submodel of one Monte-Carlo iteration plus the death source.
#[derive(Debug, Clone)]
pub struct ModelSet {
    chronic: Vec<ChronicSubmodel>,
    acute: Vec<AcuteSubmodel>,
    death: DeathSource,
}

impl ModelSet {
    pub fn chronic(&self) -> &[ChronicSubmodel] {
        &self.chronic
    }

    pub fn acute(&self) -> &[AcuteSubmodel] {
        &self.acute
    }

    pub fn acute_mut(&mut self) -> &mut [AcuteSubmodel] {
        &mut self.acute
    }

    pub fn death(&self) -> &DeathSource {
        &self.death
    }

    fn models(&self) -> impl Iterator<Item = &dyn ComplicationModel> {
        let chronic = self.chronic.iter().map(|m| m as &dyn ComplicationModel);
        chronic.chain(self.acute.iter().map(|m| m as &dyn ComplicationModel))
    }

    /// Progression of every chronic complication, merged.
    pub fn progression(&self, patient: &dyn PatientView) -> Progression {
        let mut merged = Progression::new();
        for model in &self.chronic {
            merged.merge(model.progression(patient));
        }
        merged
    }

    pub fn initial_stage(&self, patient: &dyn PatientView) -> BTreeSet<Stage> {
        self.models().flat_map(|m| m.initial_stage(patient)).collect()
    }

    pub fn superseded_by(&self, stage: Stage) -> Vec<Stage> {
        self.chronic
            .iter()
            .filter(|m| m.complication() == stage.complication())
            .flat_map(|m| m.superseded_by(stage))
            .collect()
    }

    pub fn annual_cost_within_period(
        &self,
        patient: &dyn PatientView,
        from_age: f64,
        to_age: f64,
    ) -> f64 {
        self.models().map(|m| m.annual_cost_within_period(patient, from_age, to_age)).sum()
    }

    pub fn cost_of_complication(&self, patient: &dyn PatientView, stage: Stage) -> f64 {
        self.models().map(|m| m.cost_of_complication(patient, stage)).sum()
    }

    /// Disutility of each complication, combined again across complications.
    pub fn disutility(&self, patient: &dyn PatientView, method: DisutilityCombination) -> f64 {
        let per_complication = self.models().map(|m| m.disutility(patient, method));
        combine_disutilities(method, per_complication)
    }

    /// Replay acute draws from the start, for the next intervention arm.
    pub fn rewind(&mut self) {
        self.acute.iter_mut().for_each(AcuteSubmodel::rewind);
    }

    /// Fresh draws for every submodel, keeping the bound parameters.
    pub fn reset(&mut self, ctx: &mut RunContext) {
        for model in &mut self.chronic {
            model.reset(&mut ctx.fork());
        }
        for model in &mut self.acute {
            model.reset(&mut ctx.fork());
        }
        self.death.reset(ctx.next_seed());
    }
}

/// Builds a [`ModelSet`] from one iteration's parameters.
#[derive(Debug, Clone)]
pub struct SubmodelFactory<'a> {
    registry: &'a StageRegistry,
    disabled: BTreeSet<Complication>,
    death_model: DeathModelKind,
    max_age: f64,
    /// Severe hypoglycemia multiplier of each intervention arm.
    hypoglycemia_rr: Vec<f64>,
}

impl<'a> SubmodelFactory<'a> {
    pub fn new(registry: &'a StageRegistry, config: &SimulationConfig) -> Self {
        SubmodelFactory {
            registry,
            disabled: config.disabled.iter().copied().collect(),
            death_model: config.death_model,
            max_age: config.max_age,
            hypoglycemia_rr: config.interventions.iter().map(|i| i.hypoglycemia_rr).collect(),
        }
    }

    pub fn disable(mut self, complication: Complication) -> Self {
        self.disabled.insert(complication);
        self
    }

    /// Every complication gets its own forked stream, so disabling one leaves
    /// the draws of the others unchanged.
    pub fn build(&self, params: &RunParameters, ctx: &mut RunContext) -> Result<ModelSet> {
        let mut chronic = Vec::new();
        let mut acute = Vec::new();
        for complication in Complication::ALL {
            let mut sub = ctx.fork();
            let enabled = !self.disabled.contains(&complication);
            if complication.is_acute() {
                let model = if enabled {
                    complications::severe_hypoglycemia(params, &self.hypoglycemia_rr, &mut sub)
                        .map_err(|e| e.in_submodel(complication))?
                } else {
                    AcuteSubmodel::disabled(complication)
                };
                acute.push(model);
            } else {
                let model = if enabled {
                    self.chronic(complication, params, &mut sub)
                        .map_err(|e| e.in_submodel(complication))?
                } else {
                    ChronicSubmodel::disabled(complication)
                };
                chronic.push(model);
            }
            if enabled {
                log::debug!("iteration {}: built {complication} submodel", ctx.iteration);
            } else {
                log::debug!("iteration {}: {complication} disabled", ctx.iteration);
            }
        }

        let imr: BTreeMap<Stage, f64> = chronic.iter().flat_map(ChronicSubmodel::imr).collect();
        let death = self.death(params, imr, &mut ctx.fork())?;
        Ok(ModelSet { chronic, acute, death })
    }

    fn chronic(
        &self,
        complication: Complication,
        params: &RunParameters,
        ctx: &mut RunContext,
    ) -> Result<ChronicSubmodel> {
        let registry = self.registry;
        match complication {
            Complication::Retinopathy => complications::retinopathy(params, registry, ctx),
            Complication::Nephropathy => complications::nephropathy(params, registry, ctx),
            Complication::Neuropathy => complications::neuropathy(params, registry, ctx),
            Complication::CoronaryHeartDisease => {
                complications::coronary_heart_disease(params, registry, ctx)
            }
            Complication::SevereHypoglycemia => Ok(ChronicSubmodel::disabled(complication)),
        }
    }

    fn death(
        &self,
        params: &RunParameters,
        imr: BTreeMap<Stage, f64>,
        ctx: &mut RunContext,
    ) -> Result<DeathSource> {
        let gompertz = Gompertz {
            alpha: [params.get("DEATH_ALPHA_MEN")?, params.get("DEATH_ALPHA_WOMEN")?],
            beta: [params.get("DEATH_BETA_MEN")?, params.get("DEATH_BETA_WOMEN")?],
        };
        match self.death_model {
            DeathModelKind::Gompertz => DeathSource::gompertz(gompertz, self.max_age, imr, ctx),
            DeathModelKind::LifeTable => {
                let ages = self.max_age.ceil() as usize;
                let tables = (params.table("LIFE_TABLE_MEN"), params.table("LIFE_TABLE_WOMEN"));
                let table = match tables {
                    (Ok(men), Ok(women)) => LifeTable::from_probabilities([men, women], ages)?,
                    _ => {
                        log::debug!("no life table given, deriving one from Gompertz");
                        let men = gompertz.annual_probabilities(0, ages);
                        let women = gompertz.annual_probabilities(1, ages);
                        LifeTable::from_probabilities([&men, &women], ages)?
                    }
                };
                DeathSource::life_table(table, self.max_age, imr, ctx)
            }
        }
    }
}
