//! deadlock-sim: run a multi-resource allocation scenario under Banker's
//! avoidance or detect-and-resolve, and print the event trace.
//!
//! Run: `deadlock-sim --mode detection --resources 3,3,2 --n 5 --seed 123`

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use deadlock_sim::config::Config;
use deadlock_sim::events::{DebugSink, EventLog, EventSink, Tee, TraceSink};
use deadlock_sim::simulation::{RunReport, Simulation};
use deadlock_sim::types::{parse_units, Mode};

/// deadlock-sim: Banker's avoidance vs. deadlock detection
#[derive(Parser, Debug)]
#[command(name = "deadlock-sim")]
#[command(author = "PAIML Team")]
#[command(version)]
#[command(about = "Concurrent resource allocation simulator", long_about = None)]
struct Cli {
    /// Deadlock strategy: avoidance or detection
    #[arg(short, long)]
    mode: Option<Mode>,

    /// Total units per resource type, e.g. 3,3,2
    #[arg(short, long)]
    resources: Option<String>,

    /// Number of processes
    #[arg(short, long)]
    n: Option<usize>,

    /// Random seed for demands and request sizes
    #[arg(short, long)]
    seed: Option<u64>,

    /// Config file path (defaults to the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the timestamped event log as YAML
    #[arg(long)]
    events_out: Option<PathBuf>,

    /// Enable diagnostic logging on stderr
    #[arg(long)]
    debug: bool,

    /// Do not print the live trace
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.debug {
        deadlock_sim::debug::enable();
    } else {
        deadlock_sim::debug::init_from_env();
    }

    let config = resolve_config(&cli)?;
    let sim = Simulation::new(config).context("invalid scenario")?;
    print_scenario(&sim);

    let log = Arc::new(EventLog::new());
    let mut sink = Tee::new().with(log.clone());
    if !cli.quiet {
        sink = sink.with(Arc::new(TraceSink::new(std::io::stdout())));
    }
    if deadlock_sim::debug::is_enabled() {
        sink = sink.with(Arc::new(DebugSink));
    }
    let sink: Arc<dyn EventSink> = Arc::new(sink);

    let report = sim.run(sink).context("simulation failed")?;
    print_summary(&report, &log);

    if let Some(path) = &cli.events_out {
        log.write_yaml(path)
            .with_context(|| format!("could not write events to {}", path.display()))?;
        println!("events written to {}", path.display());
    }

    Ok(())
}

/// Layers defaults, file, environment and flags, lowest to highest.
fn resolve_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default_path().map(Config::load_or_default).unwrap_or_default(),
    };
    config.apply_env()?;

    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    if let Some(resources) = &cli.resources {
        config.resources = parse_units(resources)
            .map_err(|e| anyhow::anyhow!("invalid --resources {e}"))?;
        config.max_demand = None;
    }
    if let Some(n) = cli.n {
        config.processes = n;
        config.max_demand = None;
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    Ok(config)
}

fn print_scenario(sim: &Simulation) {
    let scenario = sim.scenario();
    println!("mode: {}", sim.config().mode);
    println!("total: {:?}", scenario.total);
    println!("max demand:");
    for (pid, row) in scenario.max_demand.iter().enumerate() {
        println!("  P{pid}: {row:?}");
    }
    println!();
}

fn print_summary(report: &RunReport, log: &EventLog) {
    println!();
    println!("=== {} summary ({:.2?}) ===", report.mode, report.elapsed);
    println!("finished: {:?}", report.finished());
    println!("aborted:  {:?}", report.aborted());
    if !report.forced.is_empty() {
        println!("forced:   {:?}", report.forced);
    }
    if let Some(detector) = &report.detector {
        println!(
            "detector: {} scans, {} cycles, victims {:?} ({:?})",
            detector.iterations,
            detector.cycles.len(),
            detector.victims,
            detector.exit
        );
    }
    println!(
        "events:   {} total, {} grants, {} blocks, {} timeouts",
        log.len(),
        log.count("grant"),
        log.count("block"),
        log.count("timeout")
    );
    println!("available: {:?} of {:?}", report.final_state.available(), report.final_state.total());
}
