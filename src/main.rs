use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use financial_etl::api::FmpClient;
use financial_etl::dataset::collect_rows;
use financial_etl::dedup::SortOrder;
use financial_etl::models::{Config, ExtractionMode};
use financial_etl::pipeline::Extractor;
use financial_etl::storage;

#[derive(Parser)]
#[command(author, version, about = "Incremental Financial Modeling Prep extractor", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract new data (default: earning_calendar, profile, historical_price_full)
    Run {
        /// Mode to run; repeat to run several in order
        #[arg(long = "mode")]
        modes: Vec<ExtractionMode>,

        /// Walk candidate keys in descending order
        #[arg(long)]
        descending: bool,
    },
    /// Print the deduplicated rows stored for a mode as JSON lines
    Df {
        #[arg(long, default_value = "earning_calendar")]
        mode: ExtractionMode,

        /// Columns to keep
        columns: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("financial_etl=info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            eprintln!("❌ Configuration Error: {}", e);
            eprintln!("Make sure you have a .env file with API_KEY (or API_KEY_FILE) set.");
            std::process::exit(1);
        }
    };

    match cli.command.unwrap_or(Commands::Run {
        modes: Vec::new(),
        descending: false,
    }) {
        Commands::Run { modes, descending } => run(config, modes, descending).await,
        Commands::Df { mode, columns } => print_rows(config, mode, columns).await,
    }
}

async fn run(config: Config, modes: Vec<ExtractionMode>, descending: bool) -> Result<()> {
    // Fail on a missing key before touching storage
    let client = match FmpClient::new(&config) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("❌ Configuration Error: {:#}", e);
            std::process::exit(1);
        }
    };

    let modes = if modes.is_empty() {
        ExtractionMode::ALL.to_vec()
    } else {
        modes
    };
    let order = if descending {
        SortOrder::Descending
    } else {
        SortOrder::Ascending
    };

    let store = storage::open(&config).await?;
    let report = Extractor::new(config, Arc::new(client), store)
        .with_order(order)
        .run(&modes)
        .await?;

    info!(
        "🎉 Run finished: {} requests across {} modes",
        report.dispatched(),
        report.modes.len()
    );
    Ok(())
}

async fn print_rows(config: Config, mode: ExtractionMode, columns: Vec<String>) -> Result<()> {
    let store = storage::open(&config).await?;
    let rows = collect_rows(store.as_ref(), mode, &columns).await?;
    for row in &rows {
        println!("{}", serde_json::to_string(row)?);
    }
    info!("📊 {} distinct {} rows", rows.len(), mode);
    Ok(())
}
