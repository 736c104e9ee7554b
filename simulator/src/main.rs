//! fxrefresh Simulator
//!
//! Drives the refresh pipeline with synthetic load and provider faults.

use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fxrefresh_service::config::PipelineConfig;

mod controller;
mod metrics;
mod scenario;
mod simulated_provider;

use controller::{SimulationConfig, SimulationController};
use scenario::Scenario;
use simulated_provider::SimulatedProviderConfig;

/// fxrefresh Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Load and fault simulator for the fxrefresh pipeline")]
struct Args {
    /// Scenario to run (steady, burst, provider-outage, shutdown-midflight
    /// or a path to a JSON scenario)
    #[arg(short, long)]
    scenario: Option<String>,

    /// Number of consumer workers
    #[arg(short, long, default_value = "5")]
    workers: usize,

    /// Refresh queue capacity
    #[arg(long, default_value = "5")]
    queue_capacity: usize,

    /// Minimum provider latency in milliseconds
    #[arg(long, default_value = "20")]
    min_latency_ms: u64,

    /// Maximum provider latency in milliseconds
    #[arg(long, default_value = "120")]
    max_latency_ms: u64,

    /// Probability that a provider call fails
    #[arg(long, default_value = "0.05")]
    failure_rate: f64,

    /// Simulation speed multiplier
    #[arg(long, default_value = "1.0")]
    speed: f64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Run duration in seconds (0 = until Ctrl+C)
    #[arg(long, default_value = "0")]
    duration: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if !(0.0..=1.0).contains(&args.failure_rate) {
        return Err(anyhow::anyhow!("Failure rate must be within [0, 1]"));
    }
    if args.speed <= 0.0 {
        return Err(anyhow::anyhow!("Speed must be positive"));
    }

    info!("Starting fxrefresh Simulator");
    info!("Workers: {}, queue capacity: {}", args.workers, args.queue_capacity);
    info!("Speed: {}x", args.speed);

    let controller = SimulationController::new(SimulationConfig {
        pipeline: PipelineConfig {
            workers: args.workers,
            queue_capacity: args.queue_capacity,
        },
        provider: SimulatedProviderConfig {
            min_latency: Duration::from_millis(args.min_latency_ms),
            max_latency: Duration::from_millis(args.max_latency_ms),
            failure_rate: args.failure_rate,
        },
        seed: args.seed,
        speed: args.speed,
    })?;

    controller.initialize()?;

    let started = std::time::Instant::now();
    let outcome = match &args.scenario {
        Some(scenario_name) => {
            info!("Running scenario: {}", scenario_name);
            let scenario = Scenario::load(scenario_name)?;
            controller.run_scenario(scenario).await
        }
        None => {
            info!("Running in continuous mode");
            info!("Press Ctrl+C to stop");

            let duration = if args.duration > 0 {
                Some(Duration::from_secs(args.duration))
            } else {
                None
            };

            controller.run(duration).await
        }
    };

    let elapsed = started.elapsed().as_secs_f64();
    let report = controller.finish().await;

    info!("Simulation complete");
    info!("Submitted: {}, refused: {}", report.submitted, report.rejected);
    info!(
        "Updated: {}, failed: {}, still created: {}",
        report.updated, report.failed, report.created
    );
    info!(
        "Admission latency p50: {}us, p99: {}us, max: {}us",
        report.admission_p50_us, report.admission_p99_us, report.admission_max_us
    );
    if elapsed > 0.0 {
        info!("Throughput: {:.1} req/s", report.submitted as f64 / elapsed);
    }
    println!("{}", serde_json::to_string_pretty(&report)?);

    outcome
}
