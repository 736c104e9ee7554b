//! fxrefresh CLI
//!
//! Requests rate refreshes and reads back records. Logs go to stderr as JSON,
//! results are printed to stdout.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fxrefresh_common::Record;
use fxrefresh_provider::ExchangeRatesApiClient;
use fxrefresh_service::{RefreshService, ServiceConfig};
use fxrefresh_store::PgRecordStore;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "fxrefresh")]
#[command(about = "Asynchronous exchange-rate refresh pipeline")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply database migrations
    Migrate,

    /// Request refreshes for one base against one or more secondaries
    Refresh {
        base: String,
        #[arg(required = true)]
        secondary: Vec<String>,

        /// Print the resolved records instead of their identifiers
        #[arg(long)]
        wait: bool,

        /// Seconds to wait for records to resolve
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },

    /// Show a record by identifier
    Status { identifier: String },

    /// Show the most recent updated record for a pair
    Latest { base: String, secondary: String },

    /// List currencies known to the rate provider
    Currencies,
}

#[derive(Serialize)]
struct Submitted {
    secondary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = ServiceConfig::from_env();

    let level = config.log_level.clone().unwrap_or_else(|| "info".into());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or(level),
        ))
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let store = Arc::new(
        PgRecordStore::connect_with_retry(
            &config.database.url(),
            config.database.max_connections,
            config.database.connect_attempts,
            config.database.connect_delay,
        )
        .await?,
    );

    if let Command::Migrate = args.command {
        store.migrate().await?;
        store.close().await;
        return Ok(());
    }

    let provider = Arc::new(ExchangeRatesApiClient::new(config.provider.client_config())?);
    let service = Arc::new(RefreshService::new(
        &config.pipeline,
        store.clone(),
        provider,
        Arc::new(config.currencies.registry()),
    )?);

    let result = run(&service, args.command).await;

    service.stop().await;
    store.close().await;
    result
}

async fn run(service: &Arc<RefreshService>, command: Command) -> anyhow::Result<()> {
    let recorder = service.recorder();

    match command {
        Command::Migrate => {}
        Command::Refresh {
            base,
            secondary,
            wait,
            timeout_secs,
        } => {
            service.start()?;

            let interrupt = service.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutdown signal received");
                    interrupt.stop().await;
                }
            });

            let mut submitted = Vec::with_capacity(secondary.len());
            for code in secondary {
                let outcome = recorder.refresh(&base, &code).await;
                submitted.push((code, outcome));
            }

            // Records left unresolved when the pool stops would stay `created`.
            let timeout = Duration::from_secs(timeout_secs);
            let mut output = Vec::with_capacity(submitted.len());
            for (code, outcome) in submitted {
                let entry = match outcome {
                    Ok(id) => {
                        let record = service.wait_for_terminal(&id, POLL_INTERVAL, timeout).await?;
                        if !record.status.is_terminal() {
                            warn!(identifier = %id, "Record still pending at timeout");
                        }
                        Submitted {
                            secondary: code,
                            identifier: Some(id.to_string()),
                            record: wait.then_some(record),
                            error: None,
                        }
                    }
                    Err(e) => Submitted {
                        secondary: code,
                        identifier: None,
                        record: None,
                        error: Some(e.to_string()),
                    },
                };
                output.push(entry);
            }

            println!("{}", serde_json::to_string_pretty(&output)?);
            info!(metrics = ?service.metrics(), "Refresh run finished");
        }
        Command::Status { identifier } => {
            let record = recorder.fetch_by_identifier(&identifier).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Latest { base, secondary } => {
            let record = recorder.fetch_latest(&base, &secondary).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Currencies => {
            let codes: Vec<String> = service
                .provider_currencies()
                .await?
                .iter()
                .map(|c| c.code().to_string())
                .collect();
            println!("{}", serde_json::to_string_pretty(&codes)?);
        }
    }

    Ok(())
}
