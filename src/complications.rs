//! The stage graphs of each complication, bound to one iteration's parameters.
//!
//! Parameter names follow `P_<FROM>_<TO>` for annual transition
//! probabilities (`DNC` = no complication yet), `RR_*` for relative risks and
//! `COST_`, `TCOST_`, `DU_`, `IMR_`, `PREV_` prefixes for per-stage economics.

use std::collections::BTreeMap;

use crate::acute::AcuteSubmodel;
use crate::chronic::{ChronicSubmodel, Manifestations, Origin, StageGraph, Step};
use crate::draws::RunContext;
use crate::economics::StageEconomics;
use crate::error::{ConfigError, Result};
use crate::params::RunParameters;
use crate::risk::{PatientFlag, RelativeRisk};
use crate::stage::{Complication, Stage, StageRegistry};
use crate::time_to_event::{BernoulliSource, RecurringEventSource, TimeToEventSource};

fn stages<const N: usize>(registry: &StageRegistry, codes: [&str; N]) -> Result<[Stage; N]> {
    let found = codes.iter().map(|c| registry.stage(c)).collect::<Result<Vec<_>>>()?;
    found
        .try_into()
        .map_err(|_| ConfigError::InvalidSetting(format!("expected {N} stages")))
}

fn source(
    params: &RunParameters,
    name: &str,
    rr: &RelativeRisk,
    ctx: &mut RunContext,
) -> Result<TimeToEventSource> {
    TimeToEventSource::new(name, params.base_risk(name)?, rr.clone(), ctx)
}

fn hba1c_per_10_reduction(params: &RunParameters, name: &str) -> Result<RelativeRisk> {
    Ok(RelativeRisk::HbA1cPer10Reduction {
        rr: params.relative_risk(name)?,
        reference: params.get("HBA1C_REFERENCE")?,
    })
}

/// Per-stage economics of every stage of `complication`.
pub fn stage_economics(
    params: &RunParameters,
    registry: &StageRegistry,
    complication: Complication,
) -> Result<BTreeMap<Stage, StageEconomics>> {
    let mut economics = BTreeMap::new();
    for stage in registry.stages_of(complication) {
        let code = registry.code(stage);
        let imr_name = format!("IMR_{code}");
        let e = StageEconomics {
            annual_cost: params.get(&format!("COST_{code}"))?,
            transition_cost: params.get_or(&format!("TCOST_{code}"), 0.0),
            disutility: params.get(&format!("DU_{code}"))?,
            imr: params.get(&imr_name).ok(),
            initial_prevalence: params.get_or(&format!("PREV_{code}"), 0.0),
        };
        e.validate(code)?;
        economics.insert(stage, e);
    }
    Ok(economics)
}

/// Background retinopathy leads to proliferative retinopathy or macular
/// edema, either of which can end in blindness.
pub fn retinopathy(
    params: &RunParameters,
    registry: &StageRegistry,
    ctx: &mut RunContext,
) -> Result<ChronicSubmodel> {
    let [bgret, pret, me, bli] = stages(registry, ["BGRET", "PRET", "ME", "BLI"])?;
    let rr = hba1c_per_10_reduction(params, "RR_RET_HBA1C")?;
    let src = |name: &str, ctx: &mut RunContext| source(params, name, &rr, ctx);
    let healthy = Origin::none(&[bgret, pret, me]);

    let graph = StageGraph::new(Complication::Retinopathy, &[bli])?
        .step(
            Step::to(bli)
                .route(healthy.clone(), src("P_DNC_BLI", ctx)?)
                .route(Origin::any(&[bgret]), src("P_BGRET_BLI", ctx)?)
                .route(Origin::any(&[pret]), src("P_PRET_BLI", ctx)?)
                .route(Origin::any(&[me]), src("P_ME_BLI", ctx)?),
        )?
        .step(
            Step::to(pret)
                .route(healthy.clone(), src("P_DNC_PRET", ctx)?)
                .route(Origin::any(&[bgret]), src("P_BGRET_PRET", ctx)?)
                .route(Origin::any(&[me]), src("P_ME_PRET", ctx)?),
        )?
        .step(
            Step::to(me)
                .route(healthy.clone(), src("P_DNC_ME", ctx)?)
                .route(Origin::any(&[bgret]), src("P_BGRET_ME", ctx)?)
                .route(Origin::any(&[pret]), src("P_PRET_ME", ctx)?),
        )?
        .step(Step::to(bgret).precedes(&[pret, me]).route(healthy, src("P_DNC_BGRET", ctx)?))?;

    let economics = stage_economics(params, registry, Complication::Retinopathy)?;
    ChronicSubmodel::new(graph, economics, ctx)
}

/// Microalbuminuria, then macroalbuminuria, then end-stage renal disease,
/// which can also be reached from either earlier stage or directly.
pub fn nephropathy(
    params: &RunParameters,
    registry: &StageRegistry,
    ctx: &mut RunContext,
) -> Result<ChronicSubmodel> {
    let [alb1, alb2, esrd] = stages(registry, ["ALB1", "ALB2", "ESRD"])?;
    let rr = hba1c_per_10_reduction(params, "RR_NPH_HBA1C")?;
    let src = |name: &str, ctx: &mut RunContext| source(params, name, &rr, ctx);
    let healthy = Origin::none(&[alb1, alb2]);

    let graph = StageGraph::new(Complication::Nephropathy, &[esrd])?
        .step(
            Step::to(esrd)
                .route(healthy.clone(), src("P_DNC_ESRD", ctx)?)
                .route(Origin::any(&[alb1]), src("P_ALB1_ESRD", ctx)?)
                .route(Origin::any(&[alb2]), src("P_ALB2_ESRD", ctx)?),
        )?
        .step(Step::to(alb2).route(Origin::any(&[alb1]), src("P_ALB1_ALB2", ctx)?))?
        .step(Step::to(alb1).precedes(&[alb2]).route(healthy, src("P_DNC_ALB1", ctx)?))?;

    let economics = stage_economics(params, registry, Complication::Nephropathy)?;
    ChronicSubmodel::new(graph, economics, ctx)
}

pub fn neuropathy(
    params: &RunParameters,
    registry: &StageRegistry,
    ctx: &mut RunContext,
) -> Result<ChronicSubmodel> {
    let [neu, lea] = stages(registry, ["NEU", "LEA"])?;
    let rr = hba1c_per_10_reduction(params, "RR_NEU_HBA1C")?;
    let src = |name: &str, ctx: &mut RunContext| source(params, name, &rr, ctx);

    let graph = StageGraph::new(Complication::Neuropathy, &[lea])?
        .step(Step::to(lea).route(Origin::any(&[neu]), src("P_NEU_LEA", ctx)?))?
        .step(Step::to(neu).route(Origin::none(&[neu]), src("P_DNC_NEU", ctx)?))?;

    let economics = stage_economics(params, registry, Complication::Neuropathy)?;
    ChronicSubmodel::new(graph, economics, ctx)
}

/// A single coronary event whose manifestation (MI, stroke, angina or heart
/// failure) is drawn at onset. Microvascular complications raise the risk.
pub fn coronary_heart_disease(
    params: &RunParameters,
    registry: &StageRegistry,
    ctx: &mut RunContext,
) -> Result<ChronicSubmodel> {
    let manifestations = stages(registry, ["MI", "STROKE", "ANGINA", "HF"])?;
    let rr = RelativeRisk::product(vec![
        RelativeRisk::HbA1cPerPoint {
            rr: params.relative_risk("RR_CHD_HBA1C")?,
            reference: params.get("HBA1C_REFERENCE")?,
        },
        RelativeRisk::Flag {
            flag: PatientFlag::Smoker,
            rr: params.relative_risk("RR_CHD_SMOKER")?,
        },
    ]);
    let src = |name: &str, ctx: &mut RunContext| source(params, name, &rr, ctx);

    let neu = registry.stages_of(Complication::Neuropathy);
    let nph = registry.stages_of(Complication::Nephropathy);
    let ret = registry.stages_of(Complication::Retinopathy);
    let microvascular: Vec<Stage> = neu.iter().chain(&nph).chain(&ret).copied().collect();

    let choice = Manifestations::new(
        "CHD_MANIFESTATIONS",
        &manifestations,
        params.table("CHD_MANIFESTATIONS")?,
        params.table("CHD_CASE_FATALITY")?,
        ctx,
    )?;
    let graph = StageGraph::new(Complication::CoronaryHeartDisease, &[])?.step(
        Step::choice(choice)
            .route(Origin::none(&microvascular), src("P_DNC_CHD", ctx)?)
            .route(Origin::any(&neu), src("P_NEU_CHD", ctx)?)
            .route(Origin::any(&nph), src("P_NPH_CHD", ctx)?)
            .route(Origin::any(&ret), src("P_RET_CHD", ctx)?),
    )?;

    let economics = stage_economics(params, registry, Complication::CoronaryHeartDisease)?;
    ChronicSubmodel::new(graph, economics, ctx)
}

/// Recurring severe hypoglycemic episodes. `arm_rr` holds the multiplier of
/// each intervention arm.
pub fn severe_hypoglycemia(
    params: &RunParameters,
    arm_rr: &[f64],
    ctx: &mut RunContext,
) -> Result<AcuteSubmodel> {
    let rr = RelativeRisk::product(vec![
        RelativeRisk::AgeBanded { bands: params.bands("RR_SHE_AGE")?.to_vec() },
        RelativeRisk::Arm { by_arm: arm_rr.to_vec() },
    ]);
    let time = RecurringEventSource::new("P_SHE", params.base_risk("P_SHE")?, rr, ctx)?;
    let death = BernoulliSource::new("P_DEATH_SHE", params.probability("P_DEATH_SHE")?, ctx)?;
    AcuteSubmodel::new(
        Complication::SevereHypoglycemia,
        time,
        death,
        params.get("COST_SHE")?,
        params.get("DU_SHE")?,
    )
}
