//! llm-throttle CLI - exercise an admission policy against a synthetic executor.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use llm_throttle::{Config, LimitConfig, RateLimitManager, SimulatedExecutor};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "llm-throttle")]
#[command(version)]
#[command(about = "Admission control (fixed concurrency or fixed rate) for chat completion calls")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "throttle.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Push a burst of synthetic calls through a rate limit manager
    Simulate {
        /// Requests per second (overrides the config file)
        #[arg(long, conflicts_with = "concurrency")]
        rps: Option<f64>,

        /// Maximum concurrent calls (overrides the config file)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Concurrency cap applied after the rate gate
        #[arg(long, requires = "rps")]
        max_in_flight: Option<usize>,

        /// Number of calls to issue at once
        #[arg(short = 'n', long)]
        calls: Option<u64>,

        /// Latency of each simulated call in milliseconds
        #[arg(long)]
        latency_ms: Option<u64>,

        /// Make every n-th call fail
        #[arg(long)]
        fail_every: Option<u64>,
    },

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
}

fn print_example_config() {
    let example = r#"# llm-throttle configuration file

[limits]
# Exactly one of rps / concurrency.
rps = 2.0
# Optional cap on in-flight calls, only valid with rps.
# max_in_flight = 4
# concurrency = 5

[simulation]
calls = 20
latency_ms = 250
# fail_every = 7
"#;
    println!("{example}");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Example => {
            print_example_config();
        }

        Commands::Validate => {
            let config = Config::from_file(&cli.config)
                .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
            let policy = config.limits.policy().context("Invalid limits")?;

            info!("Configuration is valid");
            info!("  Policy: {policy}");
            info!(
                "  Simulation: {} calls, {}ms latency",
                config.simulation.calls, config.simulation.latency_ms
            );
        }

        Commands::Simulate {
            rps,
            concurrency,
            max_in_flight,
            calls,
            latency_ms,
            fail_every,
        } => {
            // Flags win over the file; the file is only required without them.
            let mut config = if rps.is_some() || concurrency.is_some() {
                Config {
                    limits: LimitConfig {
                        rps,
                        concurrency,
                        max_in_flight,
                    },
                    ..Config::default()
                }
            } else {
                Config::from_file(&cli.config)
                    .with_context(|| format!("Failed to load config from {:?}", cli.config))?
            };
            if let Some(calls) = calls {
                config.simulation.calls = calls;
            }
            if let Some(latency_ms) = latency_ms {
                config.simulation.latency_ms = latency_ms;
            }
            if fail_every.is_some() {
                config.simulation.fail_every = fail_every;
            }

            let sim = &config.simulation;
            let executor = Arc::new(
                SimulatedExecutor::new(Duration::from_millis(sim.latency_ms))
                    .with_fail_every(sim.fail_every.unwrap_or(0)),
            );
            let manager = Arc::new(
                RateLimitManager::new(Arc::clone(&executor), config.limits)
                    .context("Invalid limits")?,
            );

            let start = Instant::now();
            let results = manager.execute_batch((0..sim.calls).collect()).await;
            let elapsed = start.elapsed().as_secs_f64();

            let failed = results.iter().filter(|r| r.is_err()).count();
            let stats = manager.stats();

            println!("\n=== Simulation Complete ===");
            println!("Policy:      {}", manager.policy());
            println!("Calls:       {}", results.len());
            println!("Succeeded:   {}", results.len() - failed);
            println!("Failed:      {failed}");
            println!("Peak:        {} in flight", stats.peak_in_flight);
            println!("Total wait:  {:.2}s", stats.total_wait_secs);
            println!("Runtime:     {elapsed:.2}s");
            if elapsed > 0.0 {
                println!("Throughput:  {:.2}/s", results.len() as f64 / elapsed);
            }
        }
    }

    Ok(())
}
