//! meshkv command line.
//!
//! Simulate a lossy cluster deterministically:
//! ```bash
//! meshkv simulate --seed 42 --drop 0.2 --ops 200
//! ```
//!
//! Run a cluster on local tasks and issue a few requests:
//! ```bash
//! meshkv run --config cluster.json put color blue
//! meshkv run get color
//! ```

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use meshkv::client::Outcome;
use meshkv::runtime::LocalCluster;
use meshkv::sim::{ChaosConfig, SimCluster};
use meshkv::{ClusterConfig, ConfigError};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "meshkv")]
#[command(about = "Sharded key-value store for meshes of small nodes")]
#[command(long_about = None)]
struct Args {
    /// JSON cluster configuration (defaults apply to missing fields)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run a random workload on the deterministic simulator
    Simulate {
        /// Simulation seed
        #[arg(long, default_value_t = 1)]
        seed: u64,

        /// Mesh packet drop probability
        #[arg(long = "drop", default_value_t = 0.0)]
        drop_probability: f64,

        /// Mesh packet bit-flip probability
        #[arg(long = "corrupt", default_value_t = 0.0)]
        corrupt_probability: f64,

        /// Number of requests to issue
        #[arg(long, default_value_t = 100)]
        ops: usize,
    },

    /// Start the cluster on local tasks and issue one request
    Run {
        /// Mesh packet drop probability
        #[arg(long = "drop", default_value_t = 0.0)]
        drop_probability: f64,

        #[command(subcommand)]
        op: Op,
    },
}

#[derive(Subcommand, Debug)]
enum Op {
    /// Store a text value
    Put {
        /// Key
        key: String,
        /// Value
        value: String,
    },
    /// Look a key up
    Get {
        /// Key
        key: String,
    },
    /// Drop every record
    Clear,
}

fn load_config(path: Option<&PathBuf>) -> Result<ClusterConfig, ConfigError> {
    match path {
        Some(path) => ClusterConfig::from_file(path),
        None => Ok(ClusterConfig::default()),
    }
}

fn simulate(
    config: ClusterConfig,
    chaos: ChaosConfig,
    seed: u64,
    ops: usize,
) -> Result<(), ConfigError> {
    let mut sim = SimCluster::new(config, chaos, seed)?;
    let mut workload = ChaCha8Rng::seed_from_u64(seed ^ 0x5eed);

    for _ in 0..ops {
        let key = format!("key-{}", workload.random_range(0..32u32));
        match workload.random_range(0..10u32) {
            0 => {
                sim.clear();
            }
            1..=5 => {
                let value = format!("value-{}", workload.random::<u16>());
                sim.put(key.as_str(), value.as_str());
            }
            _ => {
                sim.pull(key.as_str());
            }
        }
        let pause = Duration::from_micros(workload.random_range(0..2_000));
        sim.run_until(sim.now() + pause);
    }

    let quiescent = sim.run_until_quiescent(Duration::from_secs(60));
    let responses = sim.take_responses();
    let report = sim.report();

    eprintln!("{}", report);
    let ok = responses.iter().filter(|r| r.is_success()).count();
    eprintln!(
        "Requests:         {} issued, {} answered, {} succeeded",
        ops,
        responses.len(),
        ok
    );
    if !quiescent || responses.len() != ops {
        tracing::error!(
            quiescent,
            answered = responses.len(),
            ops,
            "not every request was answered"
        );
        process::exit(1);
    }
    Ok(())
}

async fn run(config: ClusterConfig, loss: f64, op: Op) -> Result<(), ConfigError> {
    let mut cluster = LocalCluster::start(&config, loss, 0)?;
    let response = match op {
        Op::Put { key, value } => cluster.put(key.as_str(), value.as_str()).await,
        Op::Get { key } => cluster.pull(key.as_str()).await,
        Op::Clear => cluster.clear().await,
    };

    match response {
        Some(response) => {
            let elapsed_ms = response.elapsed.as_secs_f64() * 1000.0;
            match &response.outcome {
                Outcome::Found(value) => match value.as_text() {
                    Some(text) => println!("{}", text),
                    None => println!("{:?}", value.bytes),
                },
                other => println!("{:?}", other),
            }
            tracing::info!(from = %response.from, elapsed_ms, "request complete");
        }
        None => tracing::error!("no response"),
    }
    tracing::info!(dropped = cluster.dropped_packets(), "shutting down");
    cluster.shutdown();
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,meshkv=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = load_config(args.config.as_ref())?;

    match args.command {
        Cmd::Simulate {
            seed,
            drop_probability,
            corrupt_probability,
            ops,
        } => {
            let chaos = ChaosConfig {
                drop_probability,
                corrupt_probability,
                ..ChaosConfig::default()
            };
            tracing::info!(seed, ops, "starting simulation");
            simulate(config, chaos, seed, ops)?;
        }
        Cmd::Run {
            drop_probability,
            op,
        } => {
            let local = tokio::task::LocalSet::new();
            local.run_until(run(config, drop_probability, op)).await?;
        }
    }

    Ok(())
}
