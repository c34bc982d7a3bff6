//! Cross-bookmaker pricing disagreement.
//!
//! Quotes are grouped per (event, market, outcome); the spread between the
//! lowest and highest implied probability in a group is the discrepancy.  A
//! wide spread means at least one book is off consensus, which is where a
//! bettor shopping lines finds value.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

use crate::db::models::{Discrepancy, MarketKind, Quote};
use crate::odds::implied_probability;

#[derive(Debug, Clone, Copy)]
pub struct DiscrepancyConfig {
    /// Minimum distinct bookmakers required per group
    pub min_bookmakers: usize,
    /// Minimum high−low gap, in percentage points, to emit a record
    pub min_difference_pp: f64,
}

impl Default for DiscrepancyConfig {
    fn default() -> Self {
        DiscrepancyConfig {
            min_bookmakers: 2,
            min_difference_pp: 0.5,
        }
    }
}

/// Compute discrepancy records from a quote snapshot.
///
/// Quotes older than `max_age` (the domain's hard cutoff) are dropped before
/// grouping.  When one bookmaker appears multiple times in a group only its
/// most recent observation counts.  Output is sorted widest-gap first, ties
/// broken by event start time (earlier games first).
pub fn detect_discrepancies(
    quotes: &[Quote],
    config: &DiscrepancyConfig,
    max_age: Duration,
    now: DateTime<Utc>,
) -> Vec<Discrepancy> {
    let cutoff = now - chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::zero());

    // (event, market, outcome) → bookmaker → latest usable quote
    let mut groups: HashMap<(String, MarketKind, String), HashMap<&str, &Quote>> = HashMap::new();
    for quote in quotes {
        if quote.observed_at < cutoff {
            continue;
        }
        let group = groups
            .entry((
                quote.event_id.clone(),
                quote.market,
                quote.outcome_name.clone(),
            ))
            .or_default();
        match group.get(quote.bookmaker.as_str()) {
            Some(existing) if existing.observed_at >= quote.observed_at => {}
            _ => {
                group.insert(&quote.bookmaker, quote);
            }
        }
    }

    let mut records = Vec::new();
    for ((event_id, market, outcome_name), by_book) in groups {
        if by_book.len() < config.min_bookmakers {
            continue;
        }

        let mut low: Option<(&Quote, f64)> = None;
        let mut high: Option<(&Quote, f64)> = None;
        for quote in by_book.values() {
            let p = implied_probability(quote.price);
            if low.map_or(true, |(_, lp)| p < lp) {
                low = Some((quote, p));
            }
            if high.map_or(true, |(_, hp)| p > hp) {
                high = Some((quote, p));
            }
        }
        let (low_quote, probability_low) = low.expect("non-empty group");
        let (high_quote, probability_high) = high.expect("non-empty group");

        let difference_pp = (probability_high - probability_low) * 100.0;
        if difference_pp <= config.min_difference_pp {
            continue;
        }

        records.push(Discrepancy {
            event_id,
            market,
            outcome_name,
            commence_time: high_quote.commence_time,
            probability_low,
            probability_high,
            bookmaker_low: low_quote.bookmaker.clone(),
            bookmaker_high: high_quote.bookmaker.clone(),
            num_bookmakers: by_book.len(),
            difference_pp,
            computed_at: now,
        });
    }

    records.sort_by(|a, b| {
        b.difference_pp
            .partial_cmp(&a.difference_pp)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.commence_time.cmp(&b.commence_time))
    });
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// American odds whose implied probability is `p` (two-decimal percent).
    /// -150 → 60.0%, -186 → ~65.0%.
    fn quote(event: &str, book: &str, price: i32, hours_from_now: i64) -> Quote {
        let now = Utc::now();
        Quote {
            event_id: event.into(),
            sport: "basketball_nba".into(),
            commence_time: now + chrono::Duration::hours(hours_from_now),
            bookmaker: book.into(),
            market: MarketKind::Moneyline,
            outcome_name: "Lakers".into(),
            price,
            point: None,
            observed_at: now,
        }
    }

    fn config() -> DiscrepancyConfig {
        DiscrepancyConfig::default()
    }

    fn two_hours() -> Duration {
        Duration::from_secs(2 * 3600)
    }

    #[test]
    fn test_five_point_gap_detected() {
        // -150 implies 60.0%; -185.7 ≈ 65%; use -1857/10 → price must be int,
        // -186 implies 65.03%.
        let quotes = vec![quote("e1", "bookA", -150, 2), quote("e1", "bookB", -186, 2)];
        let records = detect_discrepancies(&quotes, &config(), two_hours(), Utc::now());
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_relative_eq!(r.probability_low, 0.60, epsilon = 1e-3);
        assert_relative_eq!(r.probability_high, 0.6503, epsilon = 1e-3);
        assert_relative_eq!(r.difference_pp, 5.03, epsilon = 0.05);
        assert_eq!(r.bookmaker_low, "bookA");
        assert_eq!(r.bookmaker_high, "bookB");
        assert_eq!(r.num_bookmakers, 2);
    }

    #[test]
    fn test_gap_below_threshold_excluded() {
        let mut cfg = config();
        cfg.min_difference_pp = 10.0;
        let quotes = vec![quote("e1", "bookA", -150, 2), quote("e1", "bookB", -186, 2)];
        let records = detect_discrepancies(&quotes, &cfg, two_hours(), Utc::now());
        assert!(records.is_empty());
    }

    #[test]
    fn test_single_bookmaker_group_skipped() {
        let quotes = vec![quote("e1", "bookA", -150, 2)];
        let records = detect_discrepancies(&quotes, &config(), two_hours(), Utc::now());
        assert!(records.is_empty());
    }

    #[test]
    fn test_stale_quotes_excluded_before_grouping() {
        let mut old = quote("e1", "bookB", -186, 2);
        old.observed_at = Utc::now() - chrono::Duration::hours(3);
        // Only bookA survives the cutoff → group is below min_bookmakers.
        let quotes = vec![quote("e1", "bookA", -150, 2), old];
        let records = detect_discrepancies(&quotes, &config(), two_hours(), Utc::now());
        assert!(records.is_empty());
    }

    #[test]
    fn test_latest_quote_per_book_wins() {
        let mut earlier = quote("e1", "bookB", -300, 2);
        earlier.observed_at = Utc::now() - chrono::Duration::minutes(30);
        let quotes = vec![
            quote("e1", "bookA", -150, 2),
            earlier,
            quote("e1", "bookB", -186, 2),
        ];
        let records = detect_discrepancies(&quotes, &config(), two_hours(), Utc::now());
        assert_eq!(records.len(), 1);
        // bookB's stale -300 must not inflate the gap
        assert_relative_eq!(records[0].probability_high, 0.6503, epsilon = 1e-3);
    }

    #[test]
    fn test_sorted_by_gap_then_start_time() {
        let mut quotes = vec![
            // e1: ~5pp gap, starts in 4h
            quote("e1", "bookA", -150, 4),
            quote("e1", "bookB", -186, 4),
            // e2: ~10pp gap, starts in 6h
            quote("e2", "bookA", -150, 6),
            quote("e2", "bookB", -233, 6),
            // e3: ~5pp gap, starts in 1h (same gap as e1, earlier start)
            quote("e3", "bookA", -150, 1),
            quote("e3", "bookB", -186, 1),
        ];
        for q in quotes.iter_mut() {
            if q.event_id == "e2" {
                q.outcome_name = "Celtics".into();
            }
        }
        let records = detect_discrepancies(&quotes, &config(), two_hours(), Utc::now());
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].event_id, "e2");
        assert_eq!(records[1].event_id, "e3");
        assert_eq!(records[2].event_id, "e1");
    }
}
