//! Consensim CLI - experiment driver for the average-consensus engines
//!
//! Usage:
//!   consensim run --protocol gossip                 # One run on a 200-agent network
//!   consensim run --protocol pdmm-async --failure-rate 0.25 -o json
//!   consensim run --scenario scenario.json          # Parameters from a JSON file
//!   consensim sweep                                 # PDMM cost for c = 0.1 ..= 0.9

use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use consensim_core::report::{CostSweep, ErrorSeries, RunSummary};
use consensim_core::topology::{
    connectivity_radius, is_connected, MeasurementSource, RandomGeometricTopology,
    UniformMeasurements,
};
use consensim_core::{
    run_protocol, AgentGraph, ChurnMode, ConsensusError, FaultConfig, FaultInjector, PdmmConfig,
    Protocol, RunConfig,
};

/// Attempts at drawing a connected network before giving up.
const MAX_NETWORK_ATTEMPTS: usize = 100;

/// Networks above this size make the matrix-based engine impractically slow.
const MATRIX_ENGINE_SOFT_LIMIT: usize = 50;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "consensim")]
#[command(version)]
#[command(about = "Consensim - distributed average consensus simulator")]
#[command(
    long_about = "Simulate synchronous, asynchronous, gossip and PDMM averaging on random geometric sensor networks, with optional transmission failures and membership churn"
)]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one protocol and report its traces
    Run(RunArgs),
    /// Transmissions to converge for PDMM with c = 0.1 ..= 0.9
    Sweep(NetworkArgs),
}

#[derive(Args)]
struct NetworkArgs {
    /// JSON scenario file; flags given on the command line override it
    #[arg(long, value_name = "FILE")]
    scenario: Option<PathBuf>,

    /// Number of agents
    #[arg(short, long)]
    nodes: Option<usize>,

    /// Connection radius (default: sqrt(ln(2n)/n))
    #[arg(long)]
    radius: Option<f64>,

    /// Dimension of the placement cube
    #[arg(long)]
    dimension: Option<usize>,

    /// Stop once the squared error is at or below this value
    #[arg(short, long)]
    tolerance: Option<f64>,

    /// Iteration cap; runs without one may not terminate on disconnected graphs
    #[arg(long)]
    max_iterations: Option<u64>,

    /// Seed for network generation and engine randomness
    #[arg(long)]
    seed: Option<u64>,

    /// Output format: summary or json
    #[arg(short, long, default_value = "summary", value_name = "FORMAT")]
    output: String,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    network: NetworkArgs,

    /// synchronous, async-matrix, async-direct, gossip, pdmm-sync or pdmm-async
    #[arg(short, long)]
    protocol: Option<Protocol>,

    /// PDMM exchange rate
    #[arg(short, long)]
    c: Option<f64>,

    /// Probability that a single transmission is lost
    #[arg(long)]
    failure_rate: Option<f64>,

    /// Fraction of agents removed
    #[arg(long)]
    drop_rate: Option<f64>,

    /// Fraction of agents added
    #[arg(long)]
    add_rate: Option<f64>,

    /// When churn is applied: bulk or sequential
    #[arg(long, value_parser = parse_churn_mode)]
    churn: Option<ChurnMode>,
}

/// Everything one experiment needs. Every field has a default, so a scenario
/// file only lists what it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct Scenario {
    protocol: Protocol,
    nodes: usize,
    radius: Option<f64>,
    dimension: usize,
    seed: u64,
    run: RunConfig,
    pdmm: PdmmConfig,
    faults: FaultConfig,
    measurements: UniformMeasurements,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            protocol: Protocol::AsyncDirect,
            nodes: 200,
            radius: None,
            dimension: 2,
            seed: 0,
            run: RunConfig::default(),
            pdmm: PdmmConfig::default(),
            faults: FaultConfig::default(),
            measurements: UniformMeasurements::default(),
        }
    }
}

impl Scenario {
    fn load(args: &NetworkArgs) -> CliResult<Self> {
        let mut scenario = match &args.scenario {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| format!("failed to read '{}': {}", path.display(), e))?;
                serde_json::from_str(&text)
                    .map_err(|e| format!("invalid scenario '{}': {}", path.display(), e))?
            }
            None => Scenario::default(),
        };
        if let Some(nodes) = args.nodes {
            scenario.nodes = nodes;
        }
        if args.radius.is_some() {
            scenario.radius = args.radius;
        }
        if let Some(dimension) = args.dimension {
            scenario.dimension = dimension;
        }
        if let Some(tolerance) = args.tolerance {
            scenario.run.tolerance = tolerance;
        }
        if args.max_iterations.is_some() {
            scenario.run.max_iterations = args.max_iterations;
        }
        if let Some(seed) = args.seed {
            scenario.seed = seed;
        }
        Ok(scenario)
    }

    fn apply_run_flags(&mut self, args: &RunArgs) {
        if let Some(protocol) = args.protocol {
            self.protocol = protocol;
        }
        if let Some(c) = args.c {
            self.pdmm.c = c;
        }
        if let Some(rate) = args.failure_rate {
            self.faults.failure_rate = rate;
        }
        if let Some(rate) = args.drop_rate {
            self.faults.drop_rate = rate;
        }
        if let Some(rate) = args.add_rate {
            self.faults.add_rate = rate;
        }
        if let Some(mode) = args.churn {
            self.faults.churn_mode = mode;
        }
    }

    fn topology(&self) -> CliResult<RandomGeometricTopology> {
        let radius = self
            .radius
            .unwrap_or_else(|| connectivity_radius(self.nodes));
        Ok(RandomGeometricTopology::new(radius, self.dimension)?)
    }
}

fn parse_churn_mode(value: &str) -> Result<ChurnMode, String> {
    match value {
        "bulk" => Ok(ChurnMode::Bulk),
        "sequential" => Ok(ChurnMode::Sequential),
        other => Err(format!(
            "unknown churn mode '{}', expected bulk or sequential",
            other
        )),
    }
}

#[derive(Serialize)]
struct RunReport {
    summary: RunSummary,
    errors: ErrorSeries,
    dispersion: ErrorSeries,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let outcome = match &cli.command {
        Command::Run(args) => run(args),
        Command::Sweep(args) => sweep(args),
    };
    if let Err(e) = outcome {
        error!(error = %e, "experiment aborted");
        process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Draws measurements and positions until the network is connected.
fn build_network(scenario: &Scenario, rng: &mut StdRng) -> CliResult<AgentGraph> {
    let topology = scenario.topology()?;
    for attempt in 1..=MAX_NETWORK_ATTEMPTS {
        let measurements = scenario.measurements.generate(scenario.nodes, rng);
        let graph = topology.generate(&measurements, rng)?;
        if is_connected(&graph) {
            info!(
                agents = graph.len(),
                edges = graph.edge_count(),
                radius = topology.radius,
                attempt,
                "network generated"
            );
            return Ok(graph);
        }
    }
    Err(ConsensusError::Graph(format!(
        "no connected network with {} agents and radius {} after {} attempts",
        scenario.nodes, topology.radius, MAX_NETWORK_ATTEMPTS
    ))
    .into())
}

fn run(args: &RunArgs) -> CliResult<()> {
    let mut scenario = Scenario::load(&args.network)?;
    scenario.apply_run_flags(args);
    if scenario.protocol == Protocol::AsyncMatrix && scenario.nodes > MATRIX_ENGINE_SOFT_LIMIT {
        warn!(
            agents = scenario.nodes,
            "async-matrix rebuilds an NxN matrix per activation; prefer async-direct"
        );
    }

    let mut rng = StdRng::seed_from_u64(scenario.seed);
    let mut graph = build_network(&scenario, &mut rng)?;
    let topology = scenario.topology()?;
    let mut injector = FaultInjector::new(scenario.faults)?
        .with_membership(&topology, &scenario.measurements);

    let metrics = run_protocol(
        scenario.protocol,
        &mut graph,
        &scenario.run,
        &scenario.pdmm,
        &mut injector,
        &mut rng,
    )?;

    let label = scenario.protocol.name();
    let summary = RunSummary::new(label, graph.len(), &metrics);
    match args.network.output.as_str() {
        "json" => {
            let report = RunReport {
                summary,
                errors: ErrorSeries::errors(label, &metrics),
                dispersion: ErrorSeries::dispersion(label, &metrics),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => println!("{}", summary),
    }
    Ok(())
}

fn sweep(args: &NetworkArgs) -> CliResult<()> {
    let scenario = Scenario::load(args)?;
    let mut rng = StdRng::seed_from_u64(scenario.seed);
    let network = build_network(&scenario, &mut rng)?;
    let mut injector = FaultInjector::none();

    let mut sweeps = Vec::new();
    for protocol in [Protocol::PdmmSync, Protocol::PdmmAsync] {
        let mut sweep = CostSweep::new(protocol.name());
        for step in 1..=9 {
            let c = step as f64 / 10.0;
            info!(protocol = protocol.name(), c, "sweep point");
            let mut graph = network.clone();
            let mut engine_rng = StdRng::seed_from_u64(scenario.seed.wrapping_add(1));
            let metrics = run_protocol(
                protocol,
                &mut graph,
                &scenario.run,
                &PdmmConfig::new(c),
                &mut injector,
                &mut engine_rng,
            )?;
            sweep.push(c, &metrics);
        }
        sweeps.push(sweep);
    }

    match args.output.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&sweeps)?),
        _ => {
            for sweep in &sweeps {
                println!("{}:", sweep.label);
                for point in &sweep.points {
                    let marker = if point.converged { "" } else { "  (capped)" };
                    println!(
                        "  c = {:.1}  transmissions = {}{}",
                        point.c, point.transmissions, marker
                    );
                }
                if let Some(best) = sweep.cheapest() {
                    println!("  cheapest: c = {:.1}", best.c);
                }
            }
        }
    }
    Ok(())
}
