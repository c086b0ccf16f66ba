//! BOOKIE — fictional-currency sports betting ledger and settlement engine.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the database, wires the provider → cache → engine stack, and
//! runs the periodic settlement loop with graceful shutdown.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use bookie::config;
use bookie::engine::Settler;
use bookie::ledger::WalletLedger;
use bookie::market::{MarketCache, QuotaGovernor};
use bookie::provider::odds_api::TheOddsApi;
use bookie::storage::Store;

const BANNER: &str = r#"
 ____   ___   ___  _  _ ___ _____
| __ ) / _ \ / _ \| |/ /_ _| ____|
|  _ \| | | | | | | ' / | ||  _|
| |_) | |_| | |_| | . \ | || |___
|____/ \___/ \___/|_|\_\___|_____|

  Fictional-Currency Betting Ledger
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
        starting_balance = cfg.engine.starting_balance,
        settlement_interval_secs = cfg.engine.settlement_interval_secs,
        quota_budget = cfg.provider.quota_budget,
        "BOOKIE starting up"
    );

    // -- Wire components -------------------------------------------------

    let store = Store::open(&cfg.storage.db_path).await?;

    let api_key = config::AppConfig::resolve_env(&cfg.provider.api_key_env)?;
    let provider = TheOddsApi::new(
        api_key,
        cfg.provider.base_url.clone(),
        Some(cfg.provider.region.clone()),
    )?;

    let governor = Arc::new(QuotaGovernor::new(
        cfg.provider.quota_budget,
        Duration::from_secs(cfg.provider.quota_window_secs),
    ));
    let cache = Arc::new(MarketCache::new(
        Arc::new(provider),
        governor,
        Duration::from_secs(cfg.provider.odds_ttl_secs),
        Duration::from_secs(cfg.provider.scores_ttl_secs),
    ));

    let ledger = Arc::new(WalletLedger::new(
        store.pool().clone(),
        cfg.engine.starting_balance,
    ));

    let settler = Settler::new(
        store,
        Arc::clone(&ledger),
        Arc::clone(&cache),
        Duration::from_secs(cfg.engine.settle_max_age_secs),
    );

    // -- Settlement loop -------------------------------------------------

    let mut interval =
        tokio::time::interval(Duration::from_secs(cfg.engine.settlement_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.engine.settlement_interval_secs,
        "Entering settlement loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = settler.run_cycle().await;
                if report.deferred > 0 {
                    info!(
                        deferred = report.deferred,
                        quota_remaining = cache.quota_remaining(),
                        "Some markets deferred to the next cycle"
                    );
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    info!("BOOKIE shut down cleanly.");
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("bookie=info"));

    let json_logging = std::env::var("BOOKIE_LOG_JSON").is_ok();

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
