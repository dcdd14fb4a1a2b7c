//! Engine server binary.
//!
//! Wires the in-memory gateways, lifecycle managers, expiry sweeper, and
//! HTTP server from one config.

use caseforge::api::handlers::AppState;
use caseforge::api::ApiServer;
use caseforge::battles::BattleService;
use caseforge::config::EngineConfig;
use caseforge::fairness::FairnessEngine;
use caseforge::ledger::InMemoryLedger;
use caseforge::metrics::EngineMetrics;
use caseforge::pots::PotService;
use caseforge::store::MemoryStore;
use caseforge::sweeper::ExpirySweeper;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "caseforge")]
#[command(about = "Provably-fair pot and battle engine", long_about = None)]
struct Args {
    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the listen port
    #[arg(long)]
    port: Option<u16>,

    /// Override the bind address
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = EngineConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.api.port = port;
    }
    if let Some(bind) = args.bind {
        config.api.bind_address = bind;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("caseforge={}", config.monitoring.log_level).into()),
        )
        .init();

    info!("Starting caseforge engine v{}", env!("CARGO_PKG_VERSION"));

    let catalog = Arc::new(config.load_catalog()?);
    info!("Case catalog loaded: {} cases", catalog.len());

    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(InMemoryLedger::new());
    let fairness = Arc::new(FairnessEngine::new());
    let metrics = Arc::new(EngineMetrics::new());

    let pots = Arc::new(PotService::new(
        store.clone(),
        ledger.clone(),
        fairness.clone(),
        metrics.clone(),
        config.clone(),
    ));
    let battles = Arc::new(BattleService::new(
        store.clone(),
        ledger.clone(),
        fairness.clone(),
        catalog.clone(),
        metrics.clone(),
        config.clone(),
    ));

    let sweeper = if config.sweeper.enabled {
        info!(
            "Expiry sweeper running every {}ms",
            config.sweeper.interval_ms
        );
        Some(ExpirySweeper::spawn(
            pots.clone(),
            metrics.clone(),
            config.sweep_interval(),
        ))
    } else {
        None
    };

    let state = Arc::new(AppState {
        pots,
        battles,
        ledger,
        catalog,
        metrics,
        version: env!("CARGO_PKG_VERSION").to_string(),
    });

    let server = ApiServer::new(config.api.clone(), state);
    server.run().await?;

    if let Some(sweeper) = sweeper {
        sweeper.stop();
    }

    Ok(())
}
