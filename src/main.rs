use clap::{Parser, Subcommand};
use colored::*;
use mgs_core::DcId;
use mgs_gossip::{GossipConfig, GossipConfigBuilder, GossipError, ReconcilePolicy};
use simulation::{run_scaling, run_simulation, SimulationConfig};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub mod simulation;

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "stillwater")]
#[command(about = "In-memory cluster simulation of the Stillwater metadata gossip stabilizer")]
#[command(version)]
struct Cli {
    /// JSON gossip configuration file; CLI flags override its values
    #[arg(long, global = true)]
    config: Option<String>,

    /// Milliseconds between gossip rounds
    #[arg(long, global = true)]
    round_interval_ms: Option<u64>,

    /// Only reconcile membership when it is flagged as changing
    #[arg(long, global = true)]
    when_flagged: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one cluster until it agrees on a stable time
    Run {
        #[arg(long, default_value_t = 4)]
        nodes: usize,
        #[arg(long, default_value_t = 16)]
        partitions: u64,
        /// Comma separated datacenter names
        #[arg(long, default_value = "dc1,dc2,dc3", value_delimiter = ',')]
        dcs: Vec<String>,
        #[arg(long, default_value_t = 2000)]
        updates: usize,
        /// Remove a node halfway through
        #[arg(long)]
        churn: bool,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Measure settle time for growing cluster sizes
    Scaling {
        #[arg(long, default_value_t = 12)]
        max_nodes: usize,
        #[arg(long, default_value_t = 3)]
        step: usize,
    },
}

fn gossip_config(cli: &Cli) -> Result<GossipConfig, GossipError> {
    let file = match &cli.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .map_err(|e| GossipError::InvalidConfig(format!("{}: {}", path, e)))?;
            GossipConfig::from_json(&json)?
        }
        None => GossipConfig::default(),
    };

    let mut builder = GossipConfigBuilder::new()
        .round_interval(cli.round_interval_ms.unwrap_or(file.round_interval_ms))
        .reconcile_policy(file.reconcile_policy)
        .inbox_capacity(file.inbox_capacity);
    if cli.when_flagged {
        builder = builder.reconcile_policy(ReconcilePolicy::WhenFlagged);
    }
    builder.build()
}

fn simulation_config(gossip: GossipConfig) -> SimulationConfig {
    SimulationConfig {
        nodes: 4,
        partitions: 16,
        datacenters: vec![DcId::new("dc1"), DcId::new("dc2"), DcId::new("dc3")],
        updates: 2000,
        max_step_us: 1_000,
        update_pause: Duration::from_millis(1),
        churn: false,
        seed: None,
        settle_timeout: Duration::from_secs(10),
        gossip,
    }
}

async fn run(cli: Cli) -> Result<bool, GossipError> {
    let base = simulation_config(gossip_config(&cli)?);

    match cli.command {
        Commands::Run {
            nodes,
            partitions,
            dcs,
            updates,
            churn,
            seed,
        } => {
            let config = SimulationConfig {
                nodes,
                partitions,
                datacenters: dcs.into_iter().map(DcId::new).collect(),
                updates,
                churn,
                seed,
                ..base
            };
            let stats = run_simulation(config).await?;
            stats.print();
            Ok(stats.converged())
        }
        Commands::Scaling { max_nodes, step } => {
            let config = SimulationConfig {
                updates: 500,
                ..base
            };
            run_scaling(config, max_nodes, step).await?;
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    match run(Cli::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
