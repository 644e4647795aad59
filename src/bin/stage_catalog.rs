use std::collections::BTreeMap;

use serde::Serialize;

use diabsim::params::{Param, ParameterSet};
use diabsim::stage::{Complication, StageRegistry};

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Entry<'a> {
    Stage { code: &'a str, label: &'a str, complication: Complication },
    Scalar { name: &'a str, param: &'a Param },
    Table { name: &'a str, values: &'a [f64] },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let registry = StageRegistry::standard();
    let params = ParameterSet::canonical();

    let stages = registry.iter().map(|info| Entry::Stage {
        code: &info.code,
        label: &info.label,
        complication: info.stage.complication(),
    });
    let scalars = params.scalars().map(|(name, param)| Entry::Scalar { name, param });
    let tables = params.tables().map(|(name, values)| Entry::Table { name, values });

    // NDJSON to stdout.
    let mut per_complication: BTreeMap<Complication, usize> = BTreeMap::new();
    for entry in stages.chain(scalars).chain(tables) {
        if let Entry::Stage { complication, .. } = &entry {
            *per_complication.entry(*complication).or_insert(0) += 1;
        }
        match serde_json::to_string(&entry) {
            Ok(line) => println!("{line}"),
            Err(e) => {
                log::error!("failed to serialise catalogue entry: {e}");
                std::process::exit(1);
            }
        }
    }

    // Summary to stderr.
    eprintln!(
        "stage_catalog: {} stages, {} scalar parameters",
        registry.len(),
        params.scalars().count()
    );
    for (complication, n) in per_complication {
        eprintln!("  {complication:<4} stages={n}");
    }
}
