//! Odds and scores provider backed by The Odds API v4.
//! Docs: <https://the-odds-api.com/liveapi/guides/v4/>

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::db::models::{MarketKind, Quote};
use crate::feed::DataDomain;

use super::{error_for_status, DataProvider, ProviderError};

pub struct TheOddsApi {
    http: Client,
    api_key: String,
    /// Base URL for overriding in tests
    base_url: String,
}

impl TheOddsApi {
    pub fn new(api_key: &str, base_url: Option<&str>) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(TheOddsApi {
            http,
            api_key: api_key.to_string(),
            base_url: base_url
                .unwrap_or("https://api.the-odds-api.com/v4")
                .to_string(),
        })
    }

    async fn get_json(&self, url: Url) -> Result<serde_json::Value, ProviderError> {
        debug!("GET {}", url);
        let resp = self
            .http
            .get(url)
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

    async fn fetch_odds(&self, sport: &str) -> Result<serde_json::Value, ProviderError> {
        let url = Url::parse_with_params(
            &format!("{}/sports/{}/odds", self.base_url, sport),
            &[
                ("apiKey", self.api_key.as_str()),
                ("regions", "us"),
                ("markets", "h2h,spreads,totals"),
                ("oddsFormat", "american"),
            ],
        )
        .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let raw = self.get_json(url).await?;
        let quotes = parse_odds_response(&raw, sport)?;
        serde_json::to_value(quotes).map_err(|e| ProviderError::Malformed(e.to_string()))
    }

    async fn fetch_scores(&self, sport: &str) -> Result<serde_json::Value, ProviderError> {
        let url = Url::parse_with_params(
            &format!("{}/sports/{}/scores", self.base_url, sport),
            &[("apiKey", self.api_key.as_str()), ("daysFrom", "1")],
        )
        .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let raw = self.get_json(url).await?;
        Ok(normalize_scores(&raw))
    }
}

#[async_trait]
impl DataProvider for TheOddsApi {
    async fn fetch(
        &self,
        domain: DataDomain,
        key: &str,
    ) -> Result<serde_json::Value, ProviderError> {
        match domain {
            DataDomain::Odds => self.fetch_odds(key).await,
            DataDomain::Scores => self.fetch_scores(key).await,
            other => Err(ProviderError::UnsupportedDomain(other)),
        }
    }

    fn name(&self) -> &str {
        "TheOddsApi"
    }
}

/// Flatten the event → bookmakers → markets → outcomes nesting into one
/// `Quote` per (bookmaker, market, outcome).
fn parse_odds_response(raw: &serde_json::Value, sport: &str) -> Result<Vec<Quote>, ProviderError> {
    let events = raw
        .as_array()
        .ok_or_else(|| ProviderError::Malformed("odds response is not an array".into()))?;

    let now = Utc::now();
    let mut quotes = Vec::new();

    for event in events {
        let Some(event_id) = event["id"].as_str() else {
            continue;
        };
        let commence_time = parse_timestamp(&event["commence_time"]).unwrap_or(now);

        let Some(bookmakers) = event["bookmakers"].as_array() else {
            continue;
        };
        for bookmaker in bookmakers {
            let Some(book_key) = bookmaker["key"].as_str() else {
                continue;
            };
            let observed_at = parse_timestamp(&bookmaker["last_update"]).unwrap_or(now);

            let Some(markets) = bookmaker["markets"].as_array() else {
                continue;
            };
            for market in markets {
                let Some(kind) = market["key"].as_str().and_then(MarketKind::parse) else {
                    continue;
                };
                let Some(outcomes) = market["outcomes"].as_array() else {
                    continue;
                };
                for outcome in outcomes {
                    let Some(name) = outcome["name"].as_str() else {
                        continue;
                    };
                    let Some(price) = outcome["price"].as_i64() else {
                        continue;
                    };
                    quotes.push(Quote {
                        event_id: event_id.to_string(),
                        sport: sport.to_string(),
                        commence_time,
                        bookmaker: book_key.to_string(),
                        market: kind,
                        outcome_name: name.to_string(),
                        price: price as i32,
                        point: outcome["point"].as_f64(),
                        observed_at,
                    });
                }
            }
        }
    }

    Ok(quotes)
}

/// Compact per-game score summaries out of the scores endpoint.
fn normalize_scores(raw: &serde_json::Value) -> serde_json::Value {
    let games: Vec<serde_json::Value> = raw
        .as_array()
        .map(|events| {
            events
                .iter()
                .filter_map(|ev| {
                    let event_id = ev["id"].as_str()?;
                    let home_team = ev["home_team"].as_str().unwrap_or("N/A");
                    let away_team = ev["away_team"].as_str().unwrap_or("N/A");
                    let mut home_score = serde_json::Value::Null;
                    let mut away_score = serde_json::Value::Null;
                    if let Some(scores) = ev["scores"].as_array() {
                        for s in scores {
                            let name = s["name"].as_str().unwrap_or("");
                            if name == home_team {
                                home_score = s["score"].clone();
                            } else if name == away_team {
                                away_score = s["score"].clone();
                            }
                        }
                    }
                    Some(serde_json::json!({
                        "event_id": event_id,
                        "home_team": home_team,
                        "away_team": away_team,
                        "home_score": home_score,
                        "away_score": away_score,
                        "completed": ev["completed"].as_bool().unwrap_or(false),
                        "commence_time": ev["commence_time"].clone(),
                    }))
                })
                .collect()
        })
        .unwrap_or_default();

    serde_json::json!({ "games": games })
}

fn parse_timestamp(v: &serde_json::Value) -> Option<DateTime<Utc>> {
    v.as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_odds() -> serde_json::Value {
        json!([{
            "id": "evt1",
            "sport_key": "basketball_nba",
            "commence_time": "2026-01-15T00:10:00Z",
            "home_team": "Los Angeles Lakers",
            "away_team": "Boston Celtics",
            "bookmakers": [{
                "key": "draftkings",
                "last_update": "2026-01-14T23:55:00Z",
                "markets": [{
                    "key": "h2h",
                    "outcomes": [
                        {"name": "Los Angeles Lakers", "price": -110},
                        {"name": "Boston Celtics", "price": -105}
                    ]
                }, {
                    "key": "spreads",
                    "outcomes": [
                        {"name": "Los Angeles Lakers", "price": -110, "point": -2.5},
                        {"name": "Boston Celtics", "price": -110, "point": 2.5}
                    ]
                }]
            }]
        }])
    }

    #[test]
    fn test_parse_odds_flattens_all_outcomes() {
        let quotes = parse_odds_response(&sample_odds(), "basketball_nba").unwrap();
        assert_eq!(quotes.len(), 4);

        let ml: Vec<_> = quotes
            .iter()
            .filter(|q| q.market == MarketKind::Moneyline)
            .collect();
        assert_eq!(ml.len(), 2);
        assert_eq!(ml[0].bookmaker, "draftkings");
        assert_eq!(ml[0].price, -110);
        assert!(ml[0].point.is_none());

        let spreads: Vec<_> = quotes
            .iter()
            .filter(|q| q.market == MarketKind::Spread)
            .collect();
        assert_eq!(spreads[0].point, Some(-2.5));
    }

    #[test]
    fn test_parse_odds_skips_malformed_outcomes() {
        let raw = json!([{
            "id": "evt1",
            "commence_time": "2026-01-15T00:10:00Z",
            "bookmakers": [{
                "key": "fanduel",
                "markets": [{
                    "key": "h2h",
                    "outcomes": [
                        {"name": "Lakers"},
                        {"name": "Celtics", "price": 120}
                    ]
                }]
            }]
        }]);
        let quotes = parse_odds_response(&raw, "basketball_nba").unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].price, 120);
    }

    #[test]
    fn test_parse_odds_rejects_non_array() {
        let raw = json!({"message": "Unauthorized"});
        assert!(parse_odds_response(&raw, "basketball_nba").is_err());
    }

    #[test]
    fn test_normalize_scores_matches_teams() {
        let raw = json!([{
            "id": "evt1",
            "home_team": "Lakers",
            "away_team": "Celtics",
            "completed": false,
            "commence_time": "2026-01-15T00:10:00Z",
            "scores": [
                {"name": "Lakers", "score": "88"},
                {"name": "Celtics", "score": "90"}
            ]
        }]);
        let normalized = normalize_scores(&raw);
        let games = normalized["games"].as_array().unwrap();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0]["home_score"], json!("88"));
        assert_eq!(games[0]["away_score"], json!("90"));
    }
}
