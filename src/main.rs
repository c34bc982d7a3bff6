use anyhow::Result;
use clap::Parser;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

mod api;
mod config;
mod db;
mod detector;
mod engine;
mod feed;
mod odds;
mod providers;
mod settlement;

use api::AppState;
use config::Config;
use db::Database;
use engine::Engine;
use feed::{DataDomain, DataFeed, PolicySet, RetryPolicy};
use providers::{DataProvider, NbaStats, TheOddsApi};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    if config.odds_api_key.is_none() {
        warn!("ODDS_API_KEY not set – odds/scores refreshes will fail upstream and serve cache fallbacks only");
    }

    // Open database
    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);

    // Providers are constructed here and injected; nothing holds a global.
    let odds_provider = Arc::new(TheOddsApi::new(
        config.odds_api_key.as_deref().unwrap_or_default(),
        Some(&config.odds_api_url),
    )?);
    let nba_provider = Arc::new(NbaStats::new(
        Some(&config.nba_live_url),
        Some(&config.nba_stats_url),
    )?);

    let mut provider_map: HashMap<DataDomain, Arc<dyn DataProvider>> = HashMap::new();
    provider_map.insert(DataDomain::Odds, odds_provider.clone());
    provider_map.insert(DataDomain::Scores, odds_provider);
    provider_map.insert(DataDomain::Lineups, nba_provider.clone());
    provider_map.insert(DataDomain::Matchups, nba_provider);

    let policies = PolicySet::default();
    policies.validate()?;
    let feed = DataFeed::new(
        provider_map,
        policies,
        config.refresh_timeout(),
        RetryPolicy::default(),
    );

    let engine = Engine::new(feed, db, config.engine_config());

    // Background warm-refresh: keep tracked sports inside the fresh window so
    // interactive requests rarely pay for an upstream fetch.
    {
        let engine = engine.clone();
        let sports = config.sport_list();
        let interval = Duration::from_secs(config.warm_refresh_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let fetches: Vec<_> = sports
                    .iter()
                    .map(|sport| {
                        let engine = engine.clone();
                        async move {
                            (sport.as_str(), engine.get_data(DataDomain::Odds, sport).await)
                        }
                    })
                    .collect();
                for (sport, result) in futures_util::future::join_all(fetches).await {
                    match result {
                        Ok(snapshot) => info!(
                            "Warm refresh {}: tier {:?}, age {}s",
                            sport, snapshot.tier, snapshot.age_secs
                        ),
                        Err(e) => warn!("Warm refresh {} failed: {}", sport, e),
                    }
                }
            }
        });
    }

    // Serve the core API (blocks until shutdown)
    let app = api::router(AppState { engine });
    let addr: SocketAddr = config.api_addr.parse()?;
    info!("API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
