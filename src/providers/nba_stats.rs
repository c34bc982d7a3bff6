//! Lineup and matchup data from the NBA's public endpoints.
//!
//! The live scoreboard CDN feed answers "who is playing today" (lineups
//! domain); the stats host's `leaguedashteamstats` endpoint supplies season
//! aggregates per team (matchups domain).  The stats host returns tabular
//! `resultSets` (parallel header/row arrays) which get zipped into one JSON
//! object per row before caching.

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::feed::DataDomain;

use super::{error_for_status, DataProvider, ProviderError};

pub struct NbaStats {
    http: Client,
    /// Live-data CDN base URL, overridable in tests
    live_base_url: String,
    /// Stats host base URL, overridable in tests
    stats_base_url: String,
}

impl NbaStats {
    pub fn new(live_base_url: Option<&str>, stats_base_url: Option<&str>) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            // The stats host rejects requests without browser-ish headers
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36")
            .build()?;
        Ok(NbaStats {
            http,
            live_base_url: live_base_url
                .unwrap_or("https://cdn.nba.com/static/json/liveData")
                .to_string(),
            stats_base_url: stats_base_url
                .unwrap_or("https://stats.nba.com/stats")
                .to_string(),
        })
    }

    async fn get_json(&self, url: Url) -> Result<serde_json::Value, ProviderError> {
        debug!("GET {}", url);
        let resp = self
            .http
            .get(url)
            .header("Referer", "https://www.nba.com/")
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        if let Some(err) = error_for_status(&resp) {
            return Err(err);
        }
        resp.json::<serde_json::Value>()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))
    }

    /// Today's slate from the live scoreboard feed.
    async fn fetch_lineups(&self) -> Result<serde_json::Value, ProviderError> {
        let url = Url::parse(&format!(
            "{}/scoreboard/todaysScoreboard_00.json",
            self.live_base_url
        ))
        .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        let raw = self.get_json(url).await?;
        Ok(normalize_scoreboard(&raw))
    }

    /// Season team aggregates from the stats host.
    async fn fetch_matchups(&self) -> Result<serde_json::Value, ProviderError> {
        let season = current_season(Utc::now().year(), Utc::now().month());
        let url = Url::parse_with_params(
            &format!("{}/leaguedashteamstats", self.stats_base_url),
            &[
                ("Season", season.as_str()),
                ("SeasonType", "Regular Season"),
                ("PerMode", "PerGame"),
                ("MeasureType", "Base"),
            ],
        )
        .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        let raw = self.get_json(url).await?;
        let teams = flatten_result_set(&raw, "LeagueDashTeamStats")?;
        Ok(serde_json::json!({ "season": season, "teams": teams }))
    }
}

#[async_trait]
impl DataProvider for NbaStats {
    async fn fetch(
        &self,
        domain: DataDomain,
        _key: &str,
    ) -> Result<serde_json::Value, ProviderError> {
        match domain {
            DataDomain::Lineups => self.fetch_lineups().await,
            DataDomain::Matchups => self.fetch_matchups().await,
            other => Err(ProviderError::UnsupportedDomain(other)),
        }
    }

    fn name(&self) -> &str {
        "NbaStats"
    }
}

/// Reduce the scoreboard feed to the fields the assistant cares about.
fn normalize_scoreboard(raw: &serde_json::Value) -> serde_json::Value {
    let games: Vec<serde_json::Value> = raw["scoreboard"]["games"]
        .as_array()
        .map(|games| {
            games
                .iter()
                .filter_map(|game| {
                    let game_id = game["gameId"].as_str()?;
                    let home = &game["homeTeam"];
                    let away = &game["awayTeam"];
                    Some(serde_json::json!({
                        "game_id": game_id,
                        "home_team": home["teamTricode"].as_str().unwrap_or("N/A"),
                        "away_team": away["teamTricode"].as_str().unwrap_or("N/A"),
                        "home_score": home["score"].clone(),
                        "away_score": away["score"].clone(),
                        "status": game["gameStatusText"].as_str().unwrap_or("Unknown"),
                    }))
                })
                .collect()
        })
        .unwrap_or_default();

    serde_json::json!({ "games": games })
}

/// Zip a `resultSets` table (parallel headers + rowSet arrays) into a list
/// of objects keyed by header name.
fn flatten_result_set(
    raw: &serde_json::Value,
    set_name: &str,
) -> Result<Vec<serde_json::Value>, ProviderError> {
    let sets = raw["resultSets"]
        .as_array()
        .ok_or_else(|| ProviderError::Malformed("missing resultSets".into()))?;
    let set = sets
        .iter()
        .find(|s| s["name"].as_str() == Some(set_name))
        .ok_or_else(|| ProviderError::Malformed(format!("result set '{}' absent", set_name)))?;

    let headers: Vec<&str> = set["headers"]
        .as_array()
        .ok_or_else(|| ProviderError::Malformed("missing headers".into()))?
        .iter()
        .filter_map(|h| h.as_str())
        .collect();
    let rows = set["rowSet"]
        .as_array()
        .ok_or_else(|| ProviderError::Malformed("missing rowSet".into()))?;

    let records = rows
        .iter()
        .filter_map(|row| {
            let cells = row.as_array()?;
            let mut obj = serde_json::Map::new();
            for (header, cell) in headers.iter().zip(cells.iter()) {
                obj.insert(header.to_lowercase(), cell.clone());
            }
            Some(serde_json::Value::Object(obj))
        })
        .collect();

    Ok(records)
}

/// NBA season label for a date, e.g. October 2025 → "2025-26".
fn current_season(year: i32, month: u32) -> String {
    let start_year = if month >= 10 { year } else { year - 1 };
    format!("{}-{:02}", start_year, (start_year + 1) % 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_current_season_rollover() {
        assert_eq!(current_season(2025, 10), "2025-26");
        assert_eq!(current_season(2026, 2), "2025-26");
        assert_eq!(current_season(2026, 8), "2025-26");
        assert_eq!(current_season(2026, 11), "2026-27");
    }

    #[test]
    fn test_normalize_scoreboard() {
        let raw = json!({
            "scoreboard": {
                "games": [{
                    "gameId": "0022600123",
                    "gameStatusText": "Q3 4:12",
                    "homeTeam": {"teamTricode": "LAL", "score": 78},
                    "awayTeam": {"teamTricode": "BOS", "score": 81}
                }]
            }
        });
        let normalized = normalize_scoreboard(&raw);
        let games = normalized["games"].as_array().unwrap();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0]["home_team"], json!("LAL"));
        assert_eq!(games[0]["status"], json!("Q3 4:12"));
    }

    #[test]
    fn test_flatten_result_set_zips_headers() {
        let raw = json!({
            "resultSets": [{
                "name": "LeagueDashTeamStats",
                "headers": ["TEAM_ID", "TEAM_NAME", "W", "L"],
                "rowSet": [
                    [1610612747, "Los Angeles Lakers", 30, 12],
                    [1610612738, "Boston Celtics", 33, 9]
                ]
            }]
        });
        let teams = flatten_result_set(&raw, "LeagueDashTeamStats").unwrap();
        assert_eq!(teams.len(), 2);
        assert_eq!(teams[0]["team_name"], json!("Los Angeles Lakers"));
        assert_eq!(teams[1]["w"], json!(33));
    }

    #[test]
    fn test_flatten_result_set_missing_set() {
        let raw = json!({"resultSets": []});
        assert!(flatten_result_set(&raw, "LeagueDashTeamStats").is_err());
    }
}
