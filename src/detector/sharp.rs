//! Behavioral signals consistent with informed ("sharp") money.
//!
//! Three detectors over quote history:
//! - **Reverse line movement**: the line moves against the side holding the
//!   majority of public tickets.
//! - **Steam move**: several books move the same outcome the same direction
//!   inside a short window.
//! - **Consensus sharp**: the designated sharp-book subset prices an outcome
//!   away from the broader market's no-vig consensus.
//!
//! Confidence scores and the 50/70/90 strength boundaries are policy
//! constants with no statistical derivation behind them.  They are exposed
//! through `SharpConfig` so deployments can tune them; the defaults are kept
//! as-is rather than silently refit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::db::models::{MarketKind, Quote};
use crate::odds::implied_probability;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    ReverseLineMovement,
    SteamMove,
    ConsensusSharp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStrength {
    Weak,
    Moderate,
    Strong,
    VeryStrong,
}

#[derive(Debug, Clone, Serialize)]
pub struct SharpSignal {
    pub event_id: String,
    pub market: MarketKind,
    pub signal_type: SignalKind,
    pub strength: SignalStrength,
    /// 0–100
    pub confidence_score: f64,
    /// The outcome the sharp action favors
    pub side: String,
    pub detected_at: DateTime<Utc>,
}

/// Public betting distribution for one outcome, when a source supplies it.
/// Absent splits simply disable reverse-line-movement detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicSplit {
    pub event_id: String,
    pub market: MarketKind,
    pub outcome_name: String,
    /// Share of public tickets on this outcome, 0–100
    pub ticket_pct: f64,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SharpConfig {
    /// Books whose prices are treated as sharp-origin
    pub sharp_books: Vec<String>,
    /// Minimum books moving together for a steam move
    pub steam_min_books: usize,
    /// Window within which coordinated movement counts as steam
    pub steam_window: Duration,
    /// Minimum per-book probability move to count toward steam
    pub steam_min_move: f64,
    /// Public ticket share above which a side counts as the public side
    pub rlm_public_threshold_pct: f64,
    /// Minimum adverse probability move (vs opening) for reverse line movement
    pub rlm_min_move: f64,
    /// Minimum sharp-vs-market probability divergence for a consensus signal
    pub consensus_min_divergence: f64,
    /// Strength bucket floors (confidence 0–100)
    pub moderate_floor: f64,
    pub strong_floor: f64,
    pub very_strong_floor: f64,
}

impl Default for SharpConfig {
    fn default() -> Self {
        SharpConfig {
            sharp_books: vec![
                "pinnacle".into(),
                "circasports".into(),
                "bookmaker".into(),
                "betonlineag".into(),
            ],
            steam_min_books: 3,
            steam_window: Duration::from_secs(10 * 60),
            steam_min_move: 0.005,
            rlm_public_threshold_pct: 60.0,
            rlm_min_move: 0.01,
            consensus_min_divergence: 0.02,
            moderate_floor: 50.0,
            strong_floor: 70.0,
            very_strong_floor: 90.0,
        }
    }
}

impl SharpConfig {
    /// `<50` weak, `50–70` moderate, `70–90` strong, `>90` very strong.
    pub fn strength_for(&self, confidence: f64) -> SignalStrength {
        if confidence < self.moderate_floor {
            SignalStrength::Weak
        } else if confidence < self.strong_floor {
            SignalStrength::Moderate
        } else if confidence <= self.very_strong_floor {
            SignalStrength::Strong
        } else {
            SignalStrength::VeryStrong
        }
    }
}

/// Per-outcome quote history inside one (event, market) group.
type OutcomeHistory<'a> = HashMap<&'a str, Vec<&'a Quote>>;

/// Run all three detectors over quote history.
///
/// `quotes` must already have passed the feed's freshness gate; signals are
/// recomputed per pass and supersede earlier ones for the same event.
/// Output is sorted by confidence descending.
pub fn detect_sharp_signals(
    quotes: &[Quote],
    splits: &[PublicSplit],
    config: &SharpConfig,
    now: DateTime<Utc>,
) -> Vec<SharpSignal> {
    // (event, market) → outcome → quotes ordered by observed_at
    let mut groups: HashMap<(&str, MarketKind), OutcomeHistory> = HashMap::new();
    for quote in quotes {
        groups
            .entry((quote.event_id.as_str(), quote.market))
            .or_default()
            .entry(quote.outcome_name.as_str())
            .or_default()
            .push(quote);
    }
    for outcomes in groups.values_mut() {
        for history in outcomes.values_mut() {
            history.sort_by_key(|q| q.observed_at);
        }
    }

    let mut signals = Vec::new();
    for ((event_id, market), outcomes) in &groups {
        signals.extend(detect_reverse_line_movement(
            event_id, *market, outcomes, splits, config, now,
        ));
        signals.extend(detect_steam(event_id, *market, outcomes, config, now));
        signals.extend(detect_consensus(event_id, *market, outcomes, config, now));
    }

    signals.sort_by(|a, b| {
        b.confidence_score
            .partial_cmp(&a.confidence_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    signals
}

/// Mean implied probability across each bookmaker's earliest (opening) quote.
fn opening_consensus(history: &[&Quote]) -> Option<f64> {
    per_book_consensus(history, |quotes| quotes.first().copied())
}

/// Mean implied probability across each bookmaker's latest quote.
fn current_consensus(history: &[&Quote]) -> Option<f64> {
    per_book_consensus(history, |quotes| quotes.last().copied())
}

fn per_book_consensus<'a>(
    history: &[&'a Quote],
    pick: impl Fn(&Vec<&'a Quote>) -> Option<&'a Quote>,
) -> Option<f64> {
    let mut by_book: HashMap<&str, Vec<&Quote>> = HashMap::new();
    for quote in history {
        by_book.entry(quote.bookmaker.as_str()).or_default().push(*quote);
    }
    let picks: Vec<f64> = by_book
        .values()
        .filter_map(|quotes| pick(quotes).map(|q| implied_probability(q.price)))
        .collect();
    if picks.is_empty() {
        return None;
    }
    Some(picks.iter().sum::<f64>() / picks.len() as f64)
}

fn detect_reverse_line_movement(
    event_id: &str,
    market: MarketKind,
    outcomes: &OutcomeHistory,
    splits: &[PublicSplit],
    config: &SharpConfig,
    now: DateTime<Utc>,
) -> Vec<SharpSignal> {
    // Only meaningful for two-way markets where "the other side" is defined.
    if outcomes.len() != 2 {
        return Vec::new();
    }
    let names: Vec<&str> = outcomes.keys().copied().collect();

    let mut signals = Vec::new();
    for (i, &public_side) in names.iter().enumerate() {
        let Some(split) = splits.iter().find(|s| {
            s.event_id == event_id && s.market == market && s.outcome_name == public_side
        }) else {
            continue;
        };
        if split.ticket_pct < config.rlm_public_threshold_pct {
            continue;
        }

        let history = &outcomes[public_side];
        let (Some(open), Some(current)) = (opening_consensus(history), current_consensus(history))
        else {
            continue;
        };

        // Public money should push the line toward its side; a drop in the
        // public side's implied probability is movement against the crowd.
        let adverse_move = open - current;
        if adverse_move < config.rlm_min_move {
            continue;
        }

        let sharp_side = names[1 - i];
        let confidence = (40.0 + adverse_move * 100.0 * 8.0 + (split.ticket_pct - 50.0) * 0.8)
            .clamp(0.0, 100.0);
        signals.push(SharpSignal {
            event_id: event_id.to_string(),
            market,
            signal_type: SignalKind::ReverseLineMovement,
            strength: config.strength_for(confidence),
            confidence_score: confidence,
            side: sharp_side.to_string(),
            detected_at: now,
        });
    }
    signals
}

fn detect_steam(
    event_id: &str,
    market: MarketKind,
    outcomes: &OutcomeHistory,
    config: &SharpConfig,
    now: DateTime<Utc>,
) -> Vec<SharpSignal> {
    let window_start =
        now - chrono::Duration::from_std(config.steam_window).unwrap_or(chrono::Duration::zero());

    let mut signals = Vec::new();
    for (outcome_name, history) in outcomes {
        // Per book: probability move across the steam window.
        let mut by_book: HashMap<&str, Vec<&Quote>> = HashMap::new();
        for quote in history {
            if quote.observed_at >= window_start {
                by_book
                    .entry(quote.bookmaker.as_str())
                    .or_default()
                    .push(*quote);
            }
        }

        let mut up = 0usize;
        let mut down = 0usize;
        let mut total_move = 0.0f64;
        for quotes in by_book.values() {
            if quotes.len() < 2 {
                continue;
            }
            let first = implied_probability(quotes.first().unwrap().price);
            let last = implied_probability(quotes.last().unwrap().price);
            let delta = last - first;
            if delta >= config.steam_min_move {
                up += 1;
                total_move += delta;
            } else if delta <= -config.steam_min_move {
                down += 1;
                total_move += delta.abs();
            }
        }

        // Coordinated movement in one direction; books disagreeing cancel out.
        let (moving, toward_outcome) = if up >= down { (up, true) } else { (down, false) };
        if moving < config.steam_min_books || up.min(down) > 0 {
            continue;
        }
        // Steam toward the outcome is money on it; steam away is money on
        // the other side, which that side's own pass will report.
        if !toward_outcome {
            continue;
        }

        let avg_move = total_move / moving as f64;
        let confidence =
            (30.0 + moving as f64 * 12.0 + avg_move * 100.0 * 10.0).clamp(0.0, 100.0);
        signals.push(SharpSignal {
            event_id: event_id.to_string(),
            market,
            signal_type: SignalKind::SteamMove,
            strength: config.strength_for(confidence),
            confidence_score: confidence,
            side: outcome_name.to_string(),
            detected_at: now,
        });
    }
    signals
}

fn detect_consensus(
    event_id: &str,
    market: MarketKind,
    outcomes: &OutcomeHistory,
    config: &SharpConfig,
    now: DateTime<Utc>,
) -> Vec<SharpSignal> {
    let mut signals = Vec::new();
    for (outcome_name, history) in outcomes {
        let mut sharp_latest: HashMap<&str, &Quote> = HashMap::new();
        let mut rec_latest: HashMap<&str, &Quote> = HashMap::new();
        for quote in history {
            let bucket = if config
                .sharp_books
                .iter()
                .any(|b| b.eq_ignore_ascii_case(&quote.bookmaker))
            {
                &mut sharp_latest
            } else {
                &mut rec_latest
            };
            match bucket.get(quote.bookmaker.as_str()) {
                Some(existing) if existing.observed_at >= quote.observed_at => {}
                _ => {
                    bucket.insert(quote.bookmaker.as_str(), *quote);
                }
            }
        }
        // Need a sharp quote and a broad-enough market to diverge from.
        if sharp_latest.is_empty() || rec_latest.len() < 2 {
            continue;
        }

        let mean = |quotes: &HashMap<&str, &Quote>| {
            quotes
                .values()
                .map(|q| implied_probability(q.price))
                .sum::<f64>()
                / quotes.len() as f64
        };
        let sharp_avg = mean(&sharp_latest);
        let market_avg = mean(&rec_latest);
        let divergence = sharp_avg - market_avg;

        // Sharps pricing this outcome higher than the crowd is agreement the
        // crowd has it too cheap; the mirrored negative divergence on the
        // opposite outcome is reported by that outcome's own pass.
        if divergence < config.consensus_min_divergence {
            continue;
        }

        let confidence = (50.0 + divergence * 100.0 * 10.0).clamp(0.0, 100.0);
        signals.push(SharpSignal {
            event_id: event_id.to_string(),
            market,
            signal_type: SignalKind::ConsensusSharp,
            strength: config.strength_for(confidence),
            confidence_score: confidence,
            side: outcome_name.to_string(),
            detected_at: now,
        });
    }
    signals
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote_at(
        event: &str,
        book: &str,
        outcome: &str,
        price: i32,
        minutes_ago: i64,
    ) -> Quote {
        let now = Utc::now();
        Quote {
            event_id: event.into(),
            sport: "basketball_nba".into(),
            commence_time: now + chrono::Duration::hours(3),
            bookmaker: book.into(),
            market: MarketKind::Moneyline,
            outcome_name: outcome.into(),
            price,
            point: None,
            observed_at: now - chrono::Duration::minutes(minutes_ago),
        }
    }

    fn split(event: &str, outcome: &str, pct: f64) -> PublicSplit {
        PublicSplit {
            event_id: event.into(),
            market: MarketKind::Moneyline,
            outcome_name: outcome.into(),
            ticket_pct: pct,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn test_strength_buckets() {
        let cfg = SharpConfig::default();
        assert_eq!(cfg.strength_for(30.0), SignalStrength::Weak);
        assert_eq!(cfg.strength_for(49.9), SignalStrength::Weak);
        assert_eq!(cfg.strength_for(50.0), SignalStrength::Moderate);
        assert_eq!(cfg.strength_for(69.9), SignalStrength::Moderate);
        assert_eq!(cfg.strength_for(70.0), SignalStrength::Strong);
        assert_eq!(cfg.strength_for(90.0), SignalStrength::Strong);
        assert_eq!(cfg.strength_for(90.1), SignalStrength::VeryStrong);
    }

    #[test]
    fn test_reverse_line_movement_detected() {
        // 70% of tickets on Lakers, yet Lakers drift from -150 (60%) to -120
        // (54.5%) across both books → sharp side is Celtics.
        let quotes = vec![
            quote_at("e1", "draftkings", "Lakers", -150, 60),
            quote_at("e1", "fanduel", "Lakers", -150, 60),
            quote_at("e1", "draftkings", "Lakers", -120, 1),
            quote_at("e1", "fanduel", "Lakers", -120, 1),
            quote_at("e1", "draftkings", "Celtics", 130, 60),
            quote_at("e1", "draftkings", "Celtics", 100, 1),
        ];
        let splits = vec![split("e1", "Lakers", 70.0)];
        let signals =
            detect_sharp_signals(&quotes, &splits, &SharpConfig::default(), Utc::now());

        let rlm: Vec<_> = signals
            .iter()
            .filter(|s| s.signal_type == SignalKind::ReverseLineMovement)
            .collect();
        assert_eq!(rlm.len(), 1);
        assert_eq!(rlm[0].side, "Celtics");
        assert!(rlm[0].confidence_score > 50.0);
    }

    #[test]
    fn test_no_rlm_without_public_majority() {
        let quotes = vec![
            quote_at("e1", "draftkings", "Lakers", -150, 60),
            quote_at("e1", "draftkings", "Lakers", -120, 1),
            quote_at("e1", "draftkings", "Celtics", 130, 60),
            quote_at("e1", "draftkings", "Celtics", 100, 1),
        ];
        let splits = vec![split("e1", "Lakers", 52.0)];
        let signals =
            detect_sharp_signals(&quotes, &splits, &SharpConfig::default(), Utc::now());
        assert!(signals
            .iter()
            .all(|s| s.signal_type != SignalKind::ReverseLineMovement));
    }

    #[test]
    fn test_no_rlm_without_splits_at_all() {
        let quotes = vec![
            quote_at("e1", "draftkings", "Lakers", -150, 60),
            quote_at("e1", "draftkings", "Lakers", -120, 1),
            quote_at("e1", "draftkings", "Celtics", 130, 60),
            quote_at("e1", "draftkings", "Celtics", 100, 1),
        ];
        let signals = detect_sharp_signals(&quotes, &[], &SharpConfig::default(), Utc::now());
        assert!(signals
            .iter()
            .all(|s| s.signal_type != SignalKind::ReverseLineMovement));
    }

    #[test]
    fn test_steam_move_three_books_same_direction() {
        // Three books all move Lakers up inside the window.
        let quotes = vec![
            quote_at("e1", "draftkings", "Lakers", 100, 8),
            quote_at("e1", "draftkings", "Lakers", -120, 1),
            quote_at("e1", "fanduel", "Lakers", 100, 7),
            quote_at("e1", "fanduel", "Lakers", -115, 1),
            quote_at("e1", "betmgm", "Lakers", 105, 9),
            quote_at("e1", "betmgm", "Lakers", -110, 1),
        ];
        let signals = detect_sharp_signals(&quotes, &[], &SharpConfig::default(), Utc::now());
        let steam: Vec<_> = signals
            .iter()
            .filter(|s| s.signal_type == SignalKind::SteamMove)
            .collect();
        assert_eq!(steam.len(), 1);
        assert_eq!(steam[0].side, "Lakers");
    }

    #[test]
    fn test_no_steam_with_two_books() {
        let quotes = vec![
            quote_at("e1", "draftkings", "Lakers", 100, 8),
            quote_at("e1", "draftkings", "Lakers", -120, 1),
            quote_at("e1", "fanduel", "Lakers", 100, 7),
            quote_at("e1", "fanduel", "Lakers", -115, 1),
        ];
        let signals = detect_sharp_signals(&quotes, &[], &SharpConfig::default(), Utc::now());
        assert!(signals.iter().all(|s| s.signal_type != SignalKind::SteamMove));
    }

    #[test]
    fn test_no_steam_when_moves_outside_window() {
        // Movement happened 30–60 minutes ago; the window only covers 10.
        let quotes = vec![
            quote_at("e1", "draftkings", "Lakers", 100, 60),
            quote_at("e1", "draftkings", "Lakers", -120, 30),
            quote_at("e1", "fanduel", "Lakers", 100, 55),
            quote_at("e1", "fanduel", "Lakers", -115, 30),
            quote_at("e1", "betmgm", "Lakers", 105, 50),
            quote_at("e1", "betmgm", "Lakers", -110, 30),
        ];
        let signals = detect_sharp_signals(&quotes, &[], &SharpConfig::default(), Utc::now());
        assert!(signals.iter().all(|s| s.signal_type != SignalKind::SteamMove));
    }

    #[test]
    fn test_consensus_sharp_divergence() {
        // Pinnacle has Lakers at -150 (60%); the recreational market sits at
        // -120 (54.5%) → sharps are ~5.5 points higher.
        let quotes = vec![
            quote_at("e1", "pinnacle", "Lakers", -150, 2),
            quote_at("e1", "draftkings", "Lakers", -120, 2),
            quote_at("e1", "fanduel", "Lakers", -120, 2),
            quote_at("e1", "betmgm", "Lakers", -118, 2),
        ];
        let signals = detect_sharp_signals(&quotes, &[], &SharpConfig::default(), Utc::now());
        let consensus: Vec<_> = signals
            .iter()
            .filter(|s| s.signal_type == SignalKind::ConsensusSharp)
            .collect();
        assert_eq!(consensus.len(), 1);
        assert_eq!(consensus[0].side, "Lakers");
        assert!(consensus[0].confidence_score >= 50.0);
    }

    #[test]
    fn test_no_consensus_when_sharps_agree_with_market() {
        let quotes = vec![
            quote_at("e1", "pinnacle", "Lakers", -120, 2),
            quote_at("e1", "draftkings", "Lakers", -120, 2),
            quote_at("e1", "fanduel", "Lakers", -122, 2),
        ];
        let signals = detect_sharp_signals(&quotes, &[], &SharpConfig::default(), Utc::now());
        assert!(signals
            .iter()
            .all(|s| s.signal_type != SignalKind::ConsensusSharp));
    }

    #[test]
    fn test_signals_sorted_by_confidence() {
        let quotes = vec![
            // Consensus setup
            quote_at("e1", "pinnacle", "Lakers", -160, 2),
            quote_at("e1", "draftkings", "Lakers", -120, 2),
            quote_at("e1", "fanduel", "Lakers", -120, 2),
            // Steam setup on another event
            quote_at("e2", "draftkings", "Knicks", 100, 8),
            quote_at("e2", "draftkings", "Knicks", -130, 1),
            quote_at("e2", "fanduel", "Knicks", 100, 7),
            quote_at("e2", "fanduel", "Knicks", -125, 1),
            quote_at("e2", "betmgm", "Knicks", 100, 6),
            quote_at("e2", "betmgm", "Knicks", -128, 1),
        ];
        let signals = detect_sharp_signals(&quotes, &[], &SharpConfig::default(), Utc::now());
        assert!(signals.len() >= 2);
        for pair in signals.windows(2) {
            assert!(pair[0].confidence_score >= pair[1].confidence_score);
        }
    }
}
