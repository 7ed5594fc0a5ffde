//! motesim - wireless sensor-network simulation
//!
//! Replays the scripted scenarios against a topology and noise model, or
//! builds and visualizes a synthetic topology.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use motesim::{NoiseSpec, SimConfig, Simulation, Topology, TopologySpec, scenarios};
use motesim_core::NodeId;
use motesim_logging::{FileConfig, LogConfig, MotesimSubscriberBuilder};

#[derive(Parser)]
#[command(
    name = "motesim",
    about = "Discrete-event wireless sensor-network simulator",
    version
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Seed for the run's random generator (overrides --config)
    #[arg(short, long, global = true)]
    seed: Option<u64>,

    /// JSON simulation config
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Also write JSON logs into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Write the event trace as JSON lines to this file
    #[arg(long, global = true)]
    trace_out: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot every node and dump neighbor tables one node at a time
    NeighborDiscovery {
        #[arg(long, default_value = "simulation/topo/long_line.topo")]
        topo: PathBuf,

        #[arg(long, default_value = "simulation/topo/no_noise.txt")]
        noise: PathBuf,
    },

    /// Stabilize, open a transport session, then close it
    Tcp {
        #[arg(long, default_value = "simulation/topo/project1.topo")]
        topo: PathBuf,

        #[arg(long, default_value = "simulation/topo/no_noise.txt")]
        noise: PathBuf,

        /// Initiating node
        #[arg(long, default_value = "8")]
        src: NodeId,

        /// Responding node
        #[arg(long, default_value = "2")]
        dst: NodeId,
    },

    /// Create and visualize a synthetic topology
    Topology {
        #[arg(short, long, value_enum, default_value = "line")]
        kind: TopologyKind,

        /// Number of nodes
        #[arg(short, long, default_value = "6")]
        nodes: u16,

        /// Radio range in meters for the grid layout
        #[arg(short, long, default_value = "12.0")]
        range: f64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TopologyKind {
    Line,
    Ring,
    Full,
    /// Square grid with 10 m spacing, linked by path loss
    Grid,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut logging =
        MotesimSubscriberBuilder::new().with_config(LogConfig::cli(cli.verbose, cli.log_json));
    if let Some(directory) = &cli.log_dir {
        logging = logging.with_file_output(FileConfig {
            directory: directory.clone(),
            ..FileConfig::default()
        });
    }
    let _guard = logging.init().context("installing log subscriber")?;

    let mut config = match &cli.config {
        Some(path) => SimConfig::from_json_file(path)?,
        None => SimConfig::default(),
    };
    if let Some(seed) = cli.seed {
        config = config.with_seed(seed);
    }

    match cli.command {
        Commands::NeighborDiscovery { topo, noise } => {
            let (topology, noise) = load_inputs(&topo, &noise)?;
            let (sim, snapshots) = scenarios::run_neighbor_discovery(config, topology, Some(noise))?;
            for snapshot in &snapshots {
                println!("Node {} at {}:", snapshot.node, snapshot.at);
                for entry in &snapshot.neighbors {
                    println!(
                        "  {:>4}  quality {:.2}  last seen {}",
                        entry.neighbor, entry.quality, entry.last_seen
                    );
                }
            }
            finish(&sim, cli.trace_out.as_deref())?;
        }
        Commands::Tcp {
            topo,
            noise,
            src,
            dst,
        } => {
            let (topology, noise) = load_inputs(&topo, &noise)?;
            let (sim, report) = scenarios::run_tcp(config, topology, Some(noise), src, dst)?;
            match &report.path {
                Some(path) => println!(
                    "Route {}",
                    path.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> ")
                ),
                None => println!("No route from {src} to {dst}"),
            }
            println!(
                "After open:  initiator {:?}, responder {:?}",
                report.after_open, report.responder_after_open
            );
            println!(
                "After close: initiator {:?}, responder {:?}",
                report.after_close, report.responder_after_close
            );
            for (node, failure) in &report.failures {
                println!("Node {node}: {failure}");
            }
            finish(&sim, cli.trace_out.as_deref())?;
            if !report.succeeded() {
                bail!("transport scenario did not open and close cleanly");
            }
        }
        Commands::Topology { kind, nodes, range } => {
            if nodes == 0 {
                bail!("--nodes must be at least 1");
            }
            let spec = match kind {
                TopologyKind::Line => TopologySpec::line(nodes),
                TopologyKind::Ring => TopologySpec::ring(nodes),
                TopologyKind::Full => TopologySpec::full(nodes),
                TopologyKind::Grid => {
                    let side = (f64::from(nodes).sqrt().ceil() as u16).max(1);
                    let positions: Vec<(f64, f64)> = (0..nodes)
                        .map(|i| (f64::from(i % side) * 10.0, f64::from(i / side) * 10.0))
                        .collect();
                    TopologySpec::geometric(&positions, range)
                }
            };
            let topology = Topology::resolve(&spec, None)?;
            println!("{}", topology.visualize());
        }
    }

    Ok(())
}

fn load_inputs(topo: &Path, noise: &Path) -> anyhow::Result<(TopologySpec, NoiseSpec)> {
    let topology = TopologySpec::from_file(topo)
        .with_context(|| format!("loading topology {}", topo.display()))?;
    let noise = NoiseSpec::from_file(noise)
        .with_context(|| format!("loading noise model {}", noise.display()))?;
    Ok((topology, noise))
}

fn finish(sim: &Simulation, trace_out: Option<&Path>) -> anyhow::Result<()> {
    let stats = sim.stats();
    println!(
        "\nt={}  events {}  frames sent {} delivered {} dropped {}",
        sim.now(),
        stats.events_dispatched,
        stats.frames_sent,
        stats.frames_delivered,
        stats.frames_dropped
    );
    if let Some(path) = trace_out {
        std::fs::write(path, sim.trace_json()?)
            .with_context(|| format!("writing trace {}", path.display()))?;
        println!("Trace written to {}", path.display());
    }
    Ok(())
}
