use crate::cli::args::ContextsArgs;
use crate::exit_codes::{EXIT_CONFIG_ERROR, EXIT_SUCCESS};
use anyhow::Result;
use permgate_core::context::{ContextManager, ZoneCalculator};
use permgate_core::host::ZoneDirectory;
use permgate_core::{PermGateConfig, SubjectId};
use permgate_sim::SimSubject;
use std::sync::Arc;

struct StaticZones(Vec<String>);

impl ZoneDirectory for StaticZones {
    fn zones(&self) -> Vec<String> {
        self.0.clone()
    }
}

pub fn run(args: ContextsArgs) -> Result<i32> {
    let config = match PermGateConfig::load(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e:#}");
            return Ok(EXIT_CONFIG_ERROR);
        }
    };

    let manager = ContextManager::new(config.server.as_deref(), config.context_cache_ttl());
    manager.register_calculator(Arc::new(ZoneCalculator::new(
        &config.zone_rewrites,
        Arc::new(StaticZones(args.zones.clone())),
    )));

    let sample = SimSubject::new(SubjectId::offline("sample"), "sample", &args.zone);
    let current = manager.calculate(&sample);
    let potential = manager.estimate_potential_contexts();

    if args.json {
        let out = serde_json::json!({
            "zone": args.zone,
            "contexts": current,
            "potential": potential,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("contexts:  {current}");
        println!("potential: {potential}");
    }
    Ok(EXIT_SUCCESS)
}
