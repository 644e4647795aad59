//! Chronic complications as declarative stage graphs.
//!
//! A [`StageGraph`] lists its transitions as [`Step`]s in evaluation order.
//! Absorbing stages come first; a step that must happen before others names
//! them in `precedes`, and those steps must already have been listed. One
//! generic pass over the steps reconciles new onset times against what the
//! patient already has scheduled.

use std::collections::{BTreeMap, BTreeSet};

use crate::draws::{RunContext, UniqueDraws};
use crate::economics::{DisutilityCombination, StageEconomics, combine_disutilities};
use crate::error::{ConfigError, Result, check_probability};
use crate::patient::PatientView;
use crate::progression::{ComplicationModel, Progression};
use crate::selector::DiscreteSelector;
use crate::stage::{Complication, Stage};
use crate::time_to_event::TimeToEventSource;
use crate::types::SimTime;

/// Where the patient must currently be for a route to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    AnyOf(Vec<Stage>),
    /// Used for "no complication yet" routes.
    NoneOf(Vec<Stage>),
}

impl Origin {
    pub fn any(stages: &[Stage]) -> Self {
        Origin::AnyOf(stages.to_vec())
    }

    pub fn none(stages: &[Stage]) -> Self {
        Origin::NoneOf(stages.to_vec())
    }

    pub fn holds(&self, state: &BTreeSet<Stage>) -> bool {
        match self {
            Origin::AnyOf(stages) => stages.iter().any(|s| state.contains(s)),
            Origin::NoneOf(stages) => !stages.iter().any(|s| state.contains(s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Route {
    pub origin: Origin,
    pub source: TimeToEventSource,
}

/// A categorical choice of which stage an onset turns out to be, with an
/// optional probability that the onset kills the patient.
#[derive(Debug, Clone)]
pub struct Manifestations {
    stages: Vec<Stage>,
    selector: DiscreteSelector,
    case_fatality: Vec<f64>,
    // Slot 0 picks the manifestation, slot 1 decides fatality.
    draws: UniqueDraws,
}

impl Manifestations {
    pub fn new(
        name: &str,
        stages: &[Stage],
        frequencies: &[f64],
        case_fatality: &[f64],
        ctx: &mut RunContext,
    ) -> Result<Self> {
        Self::with_draws(name, stages, frequencies, case_fatality, ctx.unique(2))
    }

    pub fn with_draws(
        name: &str,
        stages: &[Stage],
        frequencies: &[f64],
        case_fatality: &[f64],
        draws: UniqueDraws,
    ) -> Result<Self> {
        if stages.len() != frequencies.len() || stages.len() != case_fatality.len() {
            return Err(ConfigError::InvalidFrequencies(format!(
                "{name}: {} stages, {} frequencies, {} case fatalities",
                stages.len(),
                frequencies.len(),
                case_fatality.len()
            )));
        }
        let selector = DiscreteSelector::new(frequencies)?;
        for &cf in case_fatality {
            check_probability(name, cf)?;
        }
        Ok(Manifestations {
            stages: stages.to_vec(),
            selector,
            case_fatality: case_fatality.to_vec(),
            draws,
        })
    }

    pub fn resolve(&self, patient: &dyn PatientView) -> (Stage, bool) {
        let idx = self.selector.select(self.draws.get(patient.id(), 0));
        let fatal = self.draws.get(patient.id(), 1) < self.case_fatality[idx];
        (self.stages[idx], fatal)
    }
}

#[derive(Debug, Clone)]
pub enum Target {
    Stage(Stage),
    Choice(Manifestations),
}

impl Target {
    pub fn stages(&self) -> &[Stage] {
        match self {
            Target::Stage(s) => std::slice::from_ref(s),
            Target::Choice(m) => &m.stages,
        }
    }

    fn resolve(&self, patient: &dyn PatientView) -> (Stage, bool) {
        match self {
            Target::Stage(s) => (*s, false),
            Target::Choice(m) => m.resolve(patient),
        }
    }
}

/// One transition into a target, reachable through one or more routes.
#[derive(Debug, Clone)]
pub struct Step {
    target: Target,
    routes: Vec<Route>,
    precedes: Vec<Stage>,
}

impl Step {
    pub fn to(stage: Stage) -> Self {
        Step { target: Target::Stage(stage), routes: Vec::new(), precedes: Vec::new() }
    }

    pub fn choice(manifestations: Manifestations) -> Self {
        Step { target: Target::Choice(manifestations), routes: Vec::new(), precedes: Vec::new() }
    }

    /// Add a route. On equal times the route added first wins.
    pub fn route(mut self, origin: Origin, source: TimeToEventSource) -> Self {
        self.routes.push(Route { origin, source });
        self
    }

    /// Stages this target must happen strictly before.
    pub fn precedes(mut self, stages: &[Stage]) -> Self {
        self.precedes.extend_from_slice(stages);
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }
}

#[derive(Debug, Clone)]
pub struct StageGraph {
    complication: Complication,
    absorbing: Vec<Stage>,
    steps: Vec<Step>,
}

impl StageGraph {
    pub fn new(complication: Complication, absorbing: &[Stage]) -> Result<Self> {
        if complication.is_acute() {
            return Err(ConfigError::InvalidSetting(format!("{complication} has no stage graph")));
        }
        let graph = StageGraph { complication, absorbing: absorbing.to_vec(), steps: Vec::new() };
        for &s in absorbing {
            graph.check_owned(s)?;
        }
        Ok(graph)
    }

    fn check_owned(&self, stage: Stage) -> Result<()> {
        if stage.complication() == self.complication {
            Ok(())
        } else {
            Err(ConfigError::InvalidSetting(format!(
                "stage {} belongs to {}, not {}",
                stage.index(),
                stage.complication(),
                self.complication
            )))
        }
    }

    fn is_absorbing_step(&self, step: &Step) -> bool {
        step.target.stages().iter().any(|s| self.absorbing.contains(s))
    }

    /// Append the next step in evaluation order.
    pub fn step(mut self, step: Step) -> Result<Self> {
        let complication = self.complication;
        let invalid = |msg: String| -> Result<Self> {
            Err(ConfigError::InvalidSetting(format!("{complication}: {msg}")))
        };
        if step.routes.is_empty() {
            return invalid("step without routes".into());
        }
        for &s in step.target.stages() {
            self.check_owned(s)?;
            if self.stages().any(|known| known == s) {
                return invalid(format!("stage {} is the target of two steps", s.index()));
            }
        }
        for &s in &step.precedes {
            if !self.stages().any(|known| known == s) {
                return invalid(format!(
                    "stage {} must be evaluated before its predecessors",
                    s.index()
                ));
            }
        }
        let after_transient = self.steps.iter().any(|prev| !self.is_absorbing_step(prev));
        if self.is_absorbing_step(&step) && after_transient {
            return invalid("absorbing stages must be evaluated first".into());
        }
        self.steps.push(step);
        Ok(self)
    }

    pub fn complication(&self) -> Complication {
        self.complication
    }

    /// Every target stage, in evaluation order.
    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        self.steps.iter().flat_map(|step| step.target.stages().iter().copied())
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn is_absorbing(&self, stage: Stage) -> bool {
        self.absorbing.contains(&stage)
    }

    /// New onsets and cancellations for `patient`.
    pub fn progression(&self, patient: &dyn PatientView) -> Progression {
        let mut progression = Progression::new();
        let state = patient.detailed_state();
        if self.absorbing.iter().any(|s| state.contains(s)) {
            return progression;
        }

        let mut limit = patient.time_to_death();
        let mut effective: BTreeMap<Stage, SimTime> = BTreeMap::new();

        for step in &self.steps {
            let members = step.target.stages();
            let previous = members
                .iter()
                .map(|&s| patient.time_to_chronic_stage(s))
                .min()
                .unwrap_or(SimTime::NEVER);

            let reached = members.iter().chain(&step.precedes).any(|s| state.contains(s));
            if reached {
                cancel_scheduled(patient, members, &mut progression);
                continue;
            }

            let bound = step
                .precedes
                .iter()
                .map(|s| {
                    effective.get(s).copied().unwrap_or_else(|| patient.time_to_chronic_stage(*s))
                })
                .fold(limit, SimTime::min);
            let horizon = bound.min(previous);

            let mut candidate = SimTime::NEVER;
            for route in step.routes.iter().filter(|r| r.origin.holds(state)) {
                let t = route.source.time_to_event(patient, horizon);
                if t < candidate {
                    candidate = t;
                }
            }

            let time = if !candidate.is_never() {
                cancel_scheduled(patient, members, &mut progression);
                let (stage, fatal) = step.target.resolve(patient);
                progression.add_new_event(stage, candidate, fatal);
                candidate
            } else if !previous.is_never() && previous >= bound {
                log::trace!(
                    "patient {:?}: {} onset at {previous:?} overtaken",
                    patient.id(),
                    self.complication
                );
                cancel_scheduled(patient, members, &mut progression);
                SimTime::NEVER
            } else {
                previous
            };

            for &s in members {
                effective.insert(s, time);
            }
            if self.is_absorbing_step(step) {
                limit = limit.min(time);
            }
        }
        progression
    }

    fn reset(&mut self, ctx: &mut RunContext) {
        for step in &mut self.steps {
            for route in &mut step.routes {
                route.source.reset(ctx.next_seed());
            }
            if let Target::Choice(m) = &mut step.target {
                m.draws.reset(ctx.next_seed());
            }
        }
    }
}

fn cancel_scheduled(patient: &dyn PatientView, stages: &[Stage], progression: &mut Progression) {
    for &s in stages {
        if !patient.time_to_chronic_stage(s).is_never() {
            progression.add_cancel_event(s);
        }
    }
}

/// A chronic complication: its stage graph plus the economics of each stage.
#[derive(Debug, Clone)]
pub struct ChronicSubmodel {
    complication: Complication,
    graph: Option<StageGraph>,
    economics: BTreeMap<Stage, StageEconomics>,
    // One slot per graph stage, in evaluation order.
    initial: UniqueDraws,
}

impl ChronicSubmodel {
    pub fn new(
        graph: StageGraph,
        economics: BTreeMap<Stage, StageEconomics>,
        ctx: &mut RunContext,
    ) -> Result<Self> {
        let complication = graph.complication();
        for (stage, e) in &economics {
            graph.check_owned(*stage)?;
            e.validate(&format!("{complication} stage {}", stage.index()))?;
        }
        let initial = ctx.unique(graph.stages().count());
        Ok(ChronicSubmodel { complication, graph: Some(graph), economics, initial })
    }

    /// A submodel that never progresses and costs nothing.
    pub fn disabled(complication: Complication) -> Self {
        ChronicSubmodel {
            complication,
            graph: None,
            economics: BTreeMap::new(),
            initial: UniqueDraws::from_values(1, Vec::new()),
        }
    }

    pub fn progression(&self, patient: &dyn PatientView) -> Progression {
        match &self.graph {
            Some(graph) => graph.progression(patient),
            None => Progression::new(),
        }
    }

    pub fn economics(&self, stage: Stage) -> StageEconomics {
        self.economics.get(&stage).copied().unwrap_or_default()
    }

    /// Mortality multipliers of the stages that carry one.
    pub fn imr(&self) -> impl Iterator<Item = (Stage, f64)> + '_ {
        self.economics.iter().filter_map(|(s, e)| e.imr.map(|imr| (*s, imr)))
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.graph.iter().flat_map(StageGraph::stages).collect()
    }

    /// Stages that end when `stage` starts.
    pub fn superseded_by(&self, stage: Stage) -> Vec<Stage> {
        self.graph
            .iter()
            .flat_map(StageGraph::steps)
            .filter(|step| step.precedes.contains(&stage))
            .flat_map(|step| step.target.stages().iter().copied())
            .collect()
    }

    fn active_economics<'a>(
        &'a self,
        patient: &'a dyn PatientView,
    ) -> impl Iterator<Item = StageEconomics> + 'a {
        patient
            .detailed_state()
            .iter()
            .filter(|s| s.complication() == self.complication)
            .map(|s| self.economics(*s))
    }
}

impl ComplicationModel for ChronicSubmodel {
    fn complication(&self) -> Complication {
        self.complication
    }

    fn is_enabled(&self) -> bool {
        self.graph.is_some()
    }

    /// Each stage is tried from the most advanced down; a stage is skipped
    /// once something it precedes has been drawn, and nothing else is tried
    /// after an absorbing stage.
    fn initial_stage(&self, patient: &dyn PatientView) -> BTreeSet<Stage> {
        let mut chosen = BTreeSet::new();
        let Some(graph) = &self.graph else {
            return chosen;
        };
        let mut slot = 0;
        for step in graph.steps() {
            let members = step.target.stages();
            let superseded = step.precedes.iter().any(|s| chosen.contains(s));
            let blocked = chosen.iter().any(|s| graph.is_absorbing(*s));
            let mut picked = false;
            for &stage in members {
                let u = self.initial.get(patient.id(), slot);
                slot += 1;
                if superseded || blocked || picked {
                    continue;
                }
                if u < self.economics(stage).initial_prevalence {
                    chosen.insert(stage);
                    picked = true;
                }
            }
        }
        chosen
    }

    fn annual_cost_within_period(
        &self,
        patient: &dyn PatientView,
        from_age: f64,
        to_age: f64,
    ) -> f64 {
        let years = (to_age - from_age).max(0.0);
        self.active_economics(patient).map(|e| e.annual_cost).sum::<f64>() * years
    }

    fn cost_of_complication(&self, _patient: &dyn PatientView, stage: Stage) -> f64 {
        if stage.complication() == self.complication {
            self.economics(stage).transition_cost
        } else {
            0.0
        }
    }

    fn disutility(&self, patient: &dyn PatientView, method: DisutilityCombination) -> f64 {
        combine_disutilities(method, self.active_economics(patient).map(|e| e.disutility))
    }

    fn reset(&mut self, ctx: &mut RunContext) {
        if let Some(graph) = &mut self.graph {
            graph.reset(ctx);
            self.initial.reset(ctx.next_seed());
        }
    }
}
