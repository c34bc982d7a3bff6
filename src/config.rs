use clap::Parser;
use std::time::Duration;

use crate::detector::{DiscrepancyConfig, SharpConfig};
use crate::engine::EngineConfig;

/// Sports-betting assistant core service
#[derive(Parser, Debug, Clone)]
#[command(name = "oddsdesk", version, about)]
pub struct Config {
    /// API listen address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8080")]
    pub api_addr: String,

    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "oddsdesk.db")]
    pub database_path: String,

    /// The Odds API key (odds + scores domains)
    #[arg(long, env = "ODDS_API_KEY")]
    pub odds_api_key: Option<String>,

    /// The Odds API base URL
    #[arg(long, env = "ODDS_API_URL", default_value = "https://api.the-odds-api.com/v4")]
    pub odds_api_url: String,

    /// NBA live-data CDN base URL (lineups domain)
    #[arg(
        long,
        env = "NBA_LIVE_URL",
        default_value = "https://cdn.nba.com/static/json/liveData"
    )]
    pub nba_live_url: String,

    /// NBA stats host base URL (matchups domain)
    #[arg(long, env = "NBA_STATS_URL", default_value = "https://stats.nba.com/stats")]
    pub nba_stats_url: String,

    /// Bankroll seeded for each new user (USD)
    #[arg(long, env = "INITIAL_BANKROLL", default_value = "1000.0")]
    pub initial_bankroll: f64,

    /// Hard ceiling on one upstream refresh attempt (seconds)
    #[arg(long, env = "REFRESH_TIMEOUT_SECS", default_value = "3")]
    pub refresh_timeout_secs: u64,

    /// Background warm-refresh interval for tracked sports (seconds)
    #[arg(long, env = "WARM_REFRESH_INTERVAL_SECS", default_value = "300")]
    pub warm_refresh_interval_secs: u64,

    /// Sports kept warm in the cache, comma-separated sport slugs
    #[arg(long, env = "SPORTS", default_value = "basketball_nba")]
    pub sports: String,

    /// Minimum bookmakers per outcome group for discrepancy detection
    #[arg(long, env = "MIN_BOOKMAKERS", default_value = "2")]
    pub min_bookmakers: usize,

    /// Minimum implied-probability gap (percentage points) to report
    #[arg(long, env = "MIN_DISCREPANCY_PP", default_value = "0.5")]
    pub min_discrepancy_pp: f64,

    /// Books whose moves count toward a steam signal
    #[arg(long, env = "STEAM_MIN_BOOKS", default_value = "3")]
    pub steam_min_books: usize,

    /// Steam detection window (seconds)
    #[arg(long, env = "STEAM_WINDOW_SECS", default_value = "600")]
    pub steam_window_secs: u64,

    /// Sharp-signal strength floors (confidence 0–100).  Policy constants,
    /// not fitted values; tune with care.
    #[arg(long, env = "STRENGTH_MODERATE_FLOOR", default_value = "50.0")]
    pub strength_moderate_floor: f64,

    #[arg(long, env = "STRENGTH_STRONG_FLOOR", default_value = "70.0")]
    pub strength_strong_floor: f64,

    #[arg(long, env = "STRENGTH_VERY_STRONG_FLOOR", default_value = "90.0")]
    pub strength_very_strong_floor: f64,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.initial_bankroll <= 0.0 {
            anyhow::bail!("initial_bankroll must be positive");
        }
        if !(1..=30).contains(&self.refresh_timeout_secs) {
            anyhow::bail!("refresh_timeout_secs must be between 1 and 30");
        }
        if self.min_bookmakers < 2 {
            anyhow::bail!("min_bookmakers must be at least 2");
        }
        if self.min_discrepancy_pp < 0.0 {
            anyhow::bail!("min_discrepancy_pp must not be negative");
        }
        let floors = [
            self.strength_moderate_floor,
            self.strength_strong_floor,
            self.strength_very_strong_floor,
        ];
        if floors.windows(2).any(|w| w[0] >= w[1])
            || floors.iter().any(|f| !(0.0..=100.0).contains(f))
        {
            anyhow::bail!("strength floors must be increasing and within 0–100");
        }
        if self.sport_list().is_empty() {
            anyhow::bail!("at least one sport slug is required");
        }
        Ok(())
    }

    pub fn sport_list(&self) -> Vec<String> {
        self.sports
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            initial_bankroll: self.initial_bankroll,
            discrepancy: DiscrepancyConfig {
                min_bookmakers: self.min_bookmakers,
                min_difference_pp: self.min_discrepancy_pp,
            },
            sharp: SharpConfig {
                steam_min_books: self.steam_min_books,
                steam_window: Duration::from_secs(self.steam_window_secs),
                moderate_floor: self.strength_moderate_floor,
                strong_floor: self.strength_strong_floor,
                very_strong_floor: self.strength_very_strong_floor,
                ..SharpConfig::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config::parse_from(["oddsdesk"])
    }

    #[test]
    fn test_defaults_validate() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_sport_list_parsing() {
        let mut cfg = base_config();
        cfg.sports = "basketball_nba, americanfootball_nfl,,icehockey_nhl ".into();
        assert_eq!(
            cfg.sport_list(),
            vec!["basketball_nba", "americanfootball_nfl", "icehockey_nhl"]
        );
    }

    #[test]
    fn test_inverted_strength_floors_rejected() {
        let mut cfg = base_config();
        cfg.strength_strong_floor = 40.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_nonpositive_bankroll_rejected() {
        let mut cfg = base_config();
        cfg.initial_bankroll = 0.0;
        assert!(cfg.validate().is_err());
    }
}
