use std::fs::File;
use std::io::{BufWriter, Write};
use std::str::FromStr;

use rayon::prelude::*;
use serde::Serialize;

use diabsim::config::SimulationConfig;
use diabsim::draws::{RunContext, Stream, stream_rng};
use diabsim::error::Result;
use diabsim::events::SimEvent;
use diabsim::factory::SubmodelFactory;
use diabsim::params::ParameterSet;
use diabsim::simulation::{Baseline, RunSummary, Simulation, generate_cohort};
use diabsim::stage::StageRegistry;

#[derive(Debug, Default)]
struct Args {
    seed: Option<u64>,
    iterations: Option<usize>,
    patients: Option<usize>,
    years: Option<f64>,
    config: Option<String>,
    output: Option<String>,
    quiet: bool,
}

fn value<T: FromStr>(args: &[String], i: usize, flag: &str) -> T {
    match args.get(i).and_then(|s| s.parse().ok()) {
        Some(v) => v,
        None => {
            eprintln!("{flag} requires a value of the right type");
            std::process::exit(2);
        }
    }
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args::default();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--seed" => {
                i += 1;
                parsed.seed = Some(value(&args, i, "--seed"));
            }
            "--iterations" => {
                i += 1;
                parsed.iterations = Some(value(&args, i, "--iterations"));
            }
            "--patients" => {
                i += 1;
                parsed.patients = Some(value(&args, i, "--patients"));
            }
            "--years" => {
                i += 1;
                parsed.years = Some(value(&args, i, "--years"));
            }
            "--config" => {
                i += 1;
                parsed.config = Some(value(&args, i, "--config"));
            }
            "--output" => {
                i += 1;
                parsed.output = Some(value(&args, i, "--output"));
            }
            "--quiet" => parsed.quiet = true,
            other => log::warn!("ignoring unknown argument `{other}`"),
        }
        i += 1;
    }
    parsed
}

/// Event log line: the event plus the iteration and arm it belongs to.
#[derive(Serialize)]
struct LoggedEvent {
    iteration: usize,
    arm: usize,
    #[serde(flatten)]
    event: SimEvent,
}

#[derive(Serialize)]
struct IterationResult {
    iteration: usize,
    arms: Vec<RunSummary>,
    #[serde(skip)]
    log: Vec<LoggedEvent>,
}

fn run_iteration(
    config: &SimulationConfig,
    registry: &StageRegistry,
    params: &ParameterSet,
    cohort: &[Baseline],
    iteration: usize,
    keep_log: bool,
) -> Result<IterationResult> {
    let mut rng = stream_rng(config.seed, Stream::Parameters { iteration });
    let run_params = params.sample(iteration, config.second_order, &mut rng)?;

    let mut ctx = RunContext::new(config.seed, iteration, config.patients, config.clock());
    let mut models = SubmodelFactory::new(registry, config).build(&run_params, &mut ctx)?;

    let mut arms = Vec::with_capacity(config.interventions.len());
    let mut log = Vec::new();
    for arm in 0..config.interventions.len() {
        // Every arm replays the same draws.
        models.rewind();
        let mut sim = Simulation::new(config, registry, &mut models, arm)?;
        if keep_log {
            sim = sim.with_log();
        }
        let summary = sim.run(cohort);
        log.extend(sim.take_log().into_iter().map(|event| LoggedEvent { iteration, arm, event }));
        log::info!(
            "iteration {iteration}, {}: {:.2} life-years, {:.3} QALYs, cost {:.0}",
            summary.arm,
            summary.mean_life_years,
            summary.mean_qalys,
            summary.mean_cost
        );
        arms.push(summary);
    }
    Ok(IterationResult { iteration, arms, log })
}

fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => SimulationConfig::from_json_file(path)?,
        None => SimulationConfig::canonical(),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(n) = args.iterations {
        config.iterations = n;
    }
    if let Some(n) = args.patients {
        config.patients = n;
    }
    if let Some(y) = args.years {
        config.years = y;
    }
    config.validate()?;

    let mut params = ParameterSet::canonical();
    if let Some(path) = &config.parameters {
        params.merge(ParameterSet::from_json_file(path)?);
    }
    params.validate()?;

    let registry = StageRegistry::standard();
    let cohort = generate_cohort(&config, &mut stream_rng(config.seed, Stream::Cohort))?;
    log::info!(
        "simulating {} patients over {} years, {} iteration(s) x {} arm(s)",
        config.patients,
        config.years,
        config.iterations,
        config.interventions.len()
    );

    let keep_log = args.output.is_some();
    let results = (0..config.iterations)
        .into_par_iter()
        .map(|iteration| run_iteration(&config, &registry, &params, &cohort, iteration, keep_log))
        .collect::<Result<Vec<_>>>()?;

    if let Some(path) = &args.output {
        let mut writer = BufWriter::new(File::create(path)?);
        let mut lines = 0usize;
        for event in results.iter().flat_map(|r| &r.log) {
            serde_json::to_writer(&mut writer, event)?;
            writeln!(writer)?;
            lines += 1;
        }
        writer.flush()?;
        log::info!("wrote {lines} events to {path}");
    }

    if !args.quiet {
        for result in &results {
            println!("{}", serde_json::to_string(result)?);
        }
        print_arm_means(&results);
    }
    Ok(())
}

fn print_arm_means(results: &[IterationResult]) {
    let Some(first) = results.first() else {
        return;
    };
    let n = results.len() as f64;
    println!("{:<24} {:>12} {:>10} {:>12}", "arm", "life-years", "QALYs", "cost");
    for (arm, summary) in first.arms.iter().enumerate() {
        let mean =
            |f: fn(&RunSummary) -> f64| results.iter().map(|r| f(&r.arms[arm])).sum::<f64>() / n;
        println!(
            "{:<24} {:>12.3} {:>10.3} {:>12.0}",
            summary.arm,
            mean(|s| s.mean_life_years),
            mean(|s| s.mean_qalys),
            mean(|s| s.mean_cost)
        );
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = parse_args();
    if let Err(e) = run(args) {
        log::error!("{e}");
        std::process::exit(1);
    }
}
