use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use hybridmem::hybrid::{HybridConfig, HybridSystem};
use hybridmem::sim::config::{Config, SimConfig};
use hybridmem::sim::perf_log;
use hybridmem::sim::top::TraceSim;
use log::error;
use toml::Table;

#[derive(Parser)]
#[command(version, about)]
struct HybridArgs {
    #[arg(help = "Path to config.toml")]
    config_path: PathBuf,
    #[arg(long, help = "Override trace file")]
    trace: Option<PathBuf>,
    #[arg(long, help = "Skip this many trace transactions")]
    start: Option<u64>,
    #[arg(long, help = "Stop after this many transactions")]
    end: Option<u64>,
    #[arg(long, help = "Divide trace cycles by this factor")]
    speedup: Option<u64>,
    #[arg(long, help = "Log filter (error, warn, info, debug, trace)")]
    log: Option<String>,
}

fn run(argv: HybridArgs) -> anyhow::Result<()> {
    let text = fs::read_to_string(&argv.config_path)
        .with_context(|| format!("failed to read config file {}", argv.config_path.display()))?;
    let table: Table = toml::from_str(&text).context("cannot parse config toml")?;

    let mut sim_config = SimConfig::from_section(table.get("sim"))?;
    let hybrid_config = HybridConfig::from_table(&table)?;

    // override toml configs with argv
    sim_config.trace = argv.trace.unwrap_or(sim_config.trace);
    sim_config.start_trans = argv.start.unwrap_or(sim_config.start_trans);
    sim_config.end_trans = argv.end.unwrap_or(sim_config.end_trans);
    sim_config.speedup = argv.speedup.unwrap_or(sim_config.speedup);

    let system = HybridSystem::new(hybrid_config)?;
    let mut sim = TraceSim::new(sim_config, system);
    let summary = sim.simulate()?;
    perf_log::write_summary(&summary);
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

pub fn main() -> ExitCode {
    let argv = HybridArgs::parse();
    let mut logger = env_logger::Builder::from_default_env();
    if let Some(filter) = &argv.log {
        logger.parse_filters(filter);
    }
    logger.init();

    match run(argv) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
