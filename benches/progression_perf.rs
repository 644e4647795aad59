
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use diabsim::events::{Event, SimEvent};
use diabsim::simulation::Simulation;
use diabsim::stage::StageRegistry;
use diabsim::types::{PatientId, SimTime};

use fixtures::{LARGE, MEDIUM, SMALL, build_models, cohort, config, patients};

// ── Group 1: progression: one evaluation of every chronic submodel ─────────

fn bench_progression(c: &mut Criterion) {
    let mut group = c.benchmark_group("progression");
    let registry = StageRegistry::standard();
    let cfg = config(&MEDIUM, 42);
    let models = build_models(&cfg, &registry);
    let states: [(&str, &[&str]); 3] = [
        ("healthy", &[]),
        ("background", &["BGRET", "ALB1"]),
        ("advanced", &["PRET", "ALB2", "NEU"]),
    ];
    for (name, codes) in states {
        let cohort = patients(&registry, cfg.patients, codes);
        group.throughput(Throughput::Elements(cohort.len() as u64));
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter(|| {
                for p in &cohort {
                    std::hint::black_box(models.progression(p));
                }
            })
        });
    }
    group.finish();
}

// ── Group 2: cohort_run: end-to-end single arm ──────────────────────────────

fn bench_cohort_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("cohort_run");
    let registry = StageRegistry::standard();
    for (name, scenario) in [("small", &SMALL), ("medium", &MEDIUM), ("large", &LARGE)] {
        if name == "large" {
            group.sample_size(10);
        }
        let cfg = config(scenario, 42);
        let baselines = cohort(&cfg);
        group.throughput(Throughput::Elements(scenario.patients as u64));
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter_batched(
                || build_models(&cfg, &registry),
                |mut models| {
                    let mut sim =
                        Simulation::new(&cfg, &registry, &mut models, 0).expect("valid arm");
                    sim.run(&baselines)
                },
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

// ── Group 3: event_queue: BinaryHeap in isolation ───────────────────────────

fn bench_event_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_queue");
    for &count in &[1_000usize, 10_000, 100_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &n| {
            b.iter_batched(
                || {
                    (0..n)
                        .map(|i| {
                            let time = if i % 2 == 0 { i as u64 } else { (n - i) as u64 };
                            Reverse(SimEvent {
                                time: SimTime(time),
                                patient: PatientId(0),
                                event: Event::YearlyUpdate,
                            })
                        })
                        .collect::<Vec<_>>()
                },
                |items| {
                    let mut heap = BinaryHeap::with_capacity(items.len());
                    for item in items {
                        heap.push(item);
                    }
                    while let Some(v) = heap.pop() {
                        std::hint::black_box(v);
                    }
                },
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_progression, bench_cohort_run, bench_event_queue);
criterion_main!(benches);
