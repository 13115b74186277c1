//! COURIER — Targeted inventory distribution engine
//!
//! Entry point. Loads configuration and account data, initialises
//! structured logging, wires the engine together, and runs the
//! distribution with graceful shutdown.

use anyhow::Result;
use secrecy::SecretString;
use tracing::{error, info, warn};

use courier::accounts::AccountStore;
use courier::config;
use courier::engine::optimizer::Optimizer;
use courier::engine::orchestrator::Orchestrator;
use courier::engine::planner::TradePlanner;
use courier::engine::results::ResultsTracker;
use courier::platform::dryrun::DryRunFactory;
use courier::platform::gateway::PlatformGateway;
use courier::pricing::PriceServiceClient;
use courier::proxy::ProxyPool;
use courier::storage::CredentialCache;

const BANNER: &str = r#"
  ____ ___  _   _ ____  ___ _____ ____
 / ___/ _ \| | | |  _ \|_ _| ____|  _ \
| |  | | | | | | | |_) || ||  _| | |_) |
| |__| |_| | |_| |  _ < | || |___|  _ <
 \____\___/ \___/|_| \_\___|_____|_| \_\

  Targeted inventory distribution engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = config::AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging();

    // Print startup banner
    println!("{BANNER}");
    info!(
        target = format!("${:.2}", cfg.trade.target),
        overfill = format!("${:.2}", cfg.trade.overfill),
        attempts = cfg.program.trade_attempts,
        delay_secs = cfg.program.trade_delay_secs,
        "COURIER starting up"
    );

    // -- Load accounts, proxies and cached credentials -------------------

    let store = AccountStore::new("data");
    let senders = store.load_senders()?;
    let acceptors = store.load_acceptors()?;
    let proxies = ProxyPool::new(store.load_proxies()?);

    info!(
        senders = senders.len(),
        acceptors = acceptors.len(),
        proxies = proxies.size(),
        "Accounts loaded"
    );

    let credentials = CredentialCache::load(None)?;

    // -- Initialise components -------------------------------------------

    // Dry-run sessions until the trading protocol client lands; the
    // engine runs end-to-end against fixture inventories.
    let factory = DryRunFactory::from_fixture("data/dryrun_inventories.json")?;
    let gateway = PlatformGateway::new(Box::new(factory), credentials);

    let bearer_token = cfg
        .pricing
        .token_env
        .as_deref()
        .and_then(|env| std::env::var(env).ok())
        .map(SecretString::new);
    let pricing = PriceServiceClient::new(cfg.pricing.url.clone(), bearer_token)?;

    let planner = TradePlanner::new(Optimizer::new(cfg.trade.overfill));
    let results = ResultsTracker::new(acceptors.len(), store, "results")?;

    let mut orchestrator = Orchestrator::new(
        cfg,
        senders,
        acceptors,
        gateway,
        Box::new(pricing),
        planner,
        proxies,
        results,
    );

    // -- Run with graceful shutdown ---------------------------------------

    tokio::select! {
        result = orchestrator.execute() => {
            match result {
                Ok(()) => info!("Distribution complete"),
                Err(e) => error!(error = format!("{e:#}"), "Distribution aborted"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            // A trade offer already sent but not yet accepted is left
            // as-is; there is no rollback for transmitted offers.
            warn!("Interrupt received — aborting in-flight attempt");
        }
    }

    orchestrator.shutdown().await;
    info!(progress = %orchestrator.stats(), "COURIER shut down cleanly.");

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("courier=info"));

    let json_logging = std::env::var("COURIER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
