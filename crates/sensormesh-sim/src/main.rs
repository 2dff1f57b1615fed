mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use output::JsonlOutput;
use sensormesh_protocol::NodeId;
use sensormesh_sim::{Dropout, ScenarioConfig, Simulation};

#[derive(Parser)]
#[command(name = "sensormesh-sim", about = "Simulated SensorMesh network")]
struct Cli {
    /// Seed for link-loss randomness.
    #[arg(long, default_value = "1")]
    seed: u64,

    /// Also write the JSONL stream to a timestamped file in this directory.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Coordinator plus leaves: registrations, then periodic readings.
    Run {
        /// Number of leaf nodes (identities 1..=N).
        #[arg(long, default_value = "3")]
        leaves: u8,
        /// Ticks to simulate.
        #[arg(long, default_value = "30")]
        ticks: u64,
        /// Coordinator polls every leaf this often (0 disables).
        #[arg(long, default_value = "5")]
        poll_every: u64,
        /// Probability that a single write is lost.
        #[arg(long, default_value = "0")]
        loss: f64,
    },

    /// Take one leaf off the air for a while and watch it rejoin.
    Dropout {
        /// Number of leaf nodes (identities 1..=N).
        #[arg(long, default_value = "3")]
        leaves: u8,
        /// Ticks to simulate.
        #[arg(long, default_value = "30")]
        ticks: u64,
        /// Coordinator polls every leaf this often (0 disables).
        #[arg(long, default_value = "5")]
        poll_every: u64,
        /// Leaf to take down.
        #[arg(long, default_value = "1")]
        node: u8,
        /// Tick at which the link goes down.
        #[arg(long, default_value = "5")]
        at: u64,
        /// Ticks the link stays down.
        #[arg(long, default_value = "4")]
        duration: u64,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let (mode, config) = match cli.command {
        Command::Run {
            leaves,
            ticks,
            poll_every,
            loss,
        } => (
            "run",
            ScenarioConfig::default()
                .leaves(leaves)
                .ticks(ticks)
                .poll_every(poll_every)
                .loss(loss),
        ),
        Command::Dropout {
            leaves,
            ticks,
            poll_every,
            node,
            at,
            duration,
        } => {
            let node = NodeId::new(node)?;
            anyhow::ensure!(
                !node.is_coordinator() && node.get() <= leaves,
                "--node must name one of the {leaves} leaves"
            );
            (
                "dropout",
                ScenarioConfig::default()
                    .leaves(leaves)
                    .ticks(ticks)
                    .poll_every(poll_every)
                    .dropout(Dropout { node, at, duration }),
            )
        }
    };
    let config = config.seed(cli.seed);

    let mut out = match &cli.output_dir {
        Some(dir) => {
            let (out, path) = JsonlOutput::with_file(dir, mode)?;
            eprintln!("JSONL: {}", path.display());
            out
        }
        None => JsonlOutput::stdout_only(),
    };

    eprintln!("sensormesh-sim v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "{mode}: {} leaves, {} ticks, seed {}",
        config.leaves, config.ticks, config.seed
    );
    eprintln!();

    let ticks = config.ticks;
    let mut sim = Simulation::new(config)?;
    sim.start()?;
    for record in sim.journal().take_new() {
        out.emit(&record)?;
    }
    while sim.journal().tick() < ticks {
        sim.step()?;
        for record in sim.journal().take_new() {
            out.emit(&record)?;
        }
    }

    let summary = sim.summary();
    out.emit(&summary)?;

    eprintln!();
    eprintln!("Address table:");
    for entry in &summary.address_table {
        eprintln!("  node {:>2} -> {}", entry.node_id.get(), entry.address);
    }
    Ok(())
}
