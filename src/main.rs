// ================================
// src/main.rs
// ================================
use anyhow::{Context, Result};
use chain_pursuit::{AgentId, ChainManager, ChainParams, TopicBus, TurtleSim};
use clap::Parser;
use rand::{rngs::StdRng, SeedableRng};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::{sync::watch, time::interval};
use tracing::{info, warn};

/// Chain of agents: the first drives to a goal, every other one chases the
/// agent ahead of it.
#[derive(Parser, Debug)]
#[command(name = "chain_pursuit", version, about)]
struct Cli {
    /// Parameter file (defaults to $CONFIG_PATH, then ./chain_param.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Goal x for the head of the chain
    #[arg(long)]
    goal_x: Option<f64>,

    /// Goal y for the head of the chain
    #[arg(long)]
    goal_y: Option<f64>,

    /// Number of agents, named turtle1..turtleN
    #[arg(short = 'n', long)]
    agents: Option<usize>,

    /// Seed for spawn positions
    #[arg(long)]
    seed: Option<u64>,

    /// Log level when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(&self, params: &mut ChainParams) {
        if let Some(x) = self.goal_x {
            params.goal.x = x;
        }
        if let Some(y) = self.goal_y {
            params.goal.y = y;
        }
        if let Some(count) = self.agents {
            params.agents = ChainParams::numbered_agents(count);
        }
        if self.seed.is_some() {
            params.seed = self.seed;
        }
        if let Some(level) = &self.log_level {
            params.log_level = level.clone();
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    Ok(())
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut params = ChainParams::load(cli.config.as_deref()).context("Failed to load parameters")?;
    cli.apply(&mut params);
    init_logging(&params.log_level)?;

    info!("Chain pursuit node with Rust");

    let ids: Vec<AgentId> = params.agents.iter().cloned().map(AgentId::from).collect();
    // The world starts with the head of the chain already in it.
    if let Some(primary) = ids.first() {
        params.sim.initial_agent = primary.to_string();
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(true);
    })
    .context("Failed to install Ctrl-C handler")?;

    let bus = TopicBus::default();
    let sim = Arc::new(TurtleSim::new(bus.clone(), params.sim.clone())?);
    let sim_task = tokio::spawn(sim.clone().run(shutdown_rx.clone()));

    let rng = match params.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let mut manager = ChainManager::from_params(&params, rng)?;
    let chain = manager
        .launch(&ids, params.goal_pose(), &bus, sim.as_ref())
        .await?;

    for id in chain.dormant() {
        warn!(agent = %id, "dormant: no pose feed will ever arrive");
    }

    report_until_shutdown(&chain, &sim, shutdown_rx).await;

    sim_task.await.context("Simulator task failed")?;
    info!("shutting down");
    Ok(())
}

async fn report_until_shutdown(
    chain: &chain_pursuit::Chain,
    sim: &TurtleSim,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for node in chain.nodes() {
                    if chain.is_dormant(node.id().as_str()) {
                        info!(agent = %node.id(), "status: dormant");
                        continue;
                    }
                    if let Some(pose) = sim.pose_of(node.id().as_str()) {
                        info!(
                            agent = %node.id(),
                            phase = ?node.phase(),
                            x = pose.x,
                            y = pose.y,
                            theta = pose.theta,
                            "status"
                        );
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
