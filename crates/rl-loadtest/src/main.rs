//! # Rate Limit Load Test CLI
//!
//! Command-line interface for driving weighted virtual-user traffic against a
//! rate-limited service.
//!
//! ## Usage
//!
//! ```bash
//! # Default population (100:10:1 normal/aggressive/hacker)
//! rl-loadtest --target http://localhost:8080 --users 111 --spawn-rate 10 --duration 300
//!
//! # Record the traffic shape without sending anything
//! rl-loadtest --dry-run --duration 30 --seed 7
//!
//! # Print the archetype table
//! rl-loadtest --profiles
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use rl_loadtest::*;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "rl-loadtest")]
#[command(version)]
#[command(about = "Weighted virtual-user load generator for rate limiters", long_about = None)]
struct Cli {
    /// Target base URL
    #[arg(short, long, env = "RL_TARGET", default_value = "http://localhost:8080")]
    target: String,

    /// Number of virtual users
    #[arg(short, long, env = "RL_USERS", default_value = "111")]
    users: usize,

    /// Users spawned per second
    #[arg(short, long, env = "RL_SPAWN_RATE", default_value = "10")]
    spawn_rate: f64,

    /// Test duration in seconds
    #[arg(short, long, env = "RL_DURATION", default_value = "300")]
    duration: u64,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Limiter endpoints to exercise (bucket4j | resilience4j)
    #[arg(long, default_value = "bucket4j")]
    family: EndpointFamily,

    /// Seed for reproducible populations and identifiers
    #[arg(long)]
    seed: Option<u64>,

    /// Progress log interval in seconds (0 disables)
    #[arg(long, default_value = "10")]
    progress_interval: u64,

    /// Record requests instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// Print the traffic profiles and exit
    #[arg(long)]
    profiles: bool,

    /// Output results to JSON file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write Prometheus counters to this file after the run
    #[arg(long)]
    metrics_output: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_logging(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

fn print_profiles() {
    println!("\n═══════════════════════════════════════════════════════════════");
    println!("                     TRAFFIC PROFILES");
    println!("═══════════════════════════════════════════════════════════════");
    for archetype in Archetype::ALL {
        println!("  {}", archetype.profile().describe());
    }
    println!("═══════════════════════════════════════════════════════════════\n");
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = LoadTestConfig {
        target_url: cli.target,
        users: cli.users,
        spawn_rate: cli.spawn_rate,
        duration_secs: cli.duration,
        request_timeout_secs: cli.timeout,
        family: cli.family,
        seed: cli.seed,
        progress_interval_secs: cli.progress_interval,
    };

    let swarm = if cli.dry_run {
        info!("Dry run: requests are recorded, not sent");
        Swarm::new(config, Arc::new(DryRunClient::new()))?
    } else {
        Swarm::with_http_client(config)?
    };

    let report = swarm.run().await?;
    report.summary.print_report();

    if let Some(path) = cli.output {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write results to {}", path.display()))?;
        info!("Results saved to {}", path.display());
    }

    if let Some(path) = cli.metrics_output {
        let text = swarm.metrics().export_prometheus()?;
        std::fs::write(&path, text)
            .with_context(|| format!("failed to write metrics to {}", path.display()))?;
        info!("Metrics saved to {}", path.display());
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    if cli.profiles {
        print_profiles();
        return;
    }

    info!("Rate Limit Load Test Tool v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
